// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Update event types delivered over the push channel and the poll endpoint.
//!
//! The event union is closed: the router handles every kind exhaustively and
//! an unrecognized `kind` fails deserialization instead of being interpreted
//! best-effort.
//!
//! # Events
//!
//! - `connected` - acknowledgment emitted when the push channel opens
//! - `heartbeat` - keep-alive emitted on a fixed interval
//! - `query_update` - a thread changed (created, message added, resolved, ...)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{MarkedFor, Message, Team};

/// What happened to the thread a `query_update` event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
	Created,
	Updated,
	MessageAdded,
	Resolved,
	Reopened,
}

/// Compact summary of a newly written message, carried on `message_added`
/// events so subscribers can render without a follow-up read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
	pub id: String,
	pub text: String,
	pub author: String,
	pub author_team: Team,
	pub timestamp: DateTime<Utc>,
}

impl From<&Message> for MessageSummary {
	fn from(msg: &Message) -> Self {
		MessageSummary {
			id: msg.id.clone(),
			text: msg.content.clone(),
			author: msg.sender.clone(),
			author_team: msg.team,
			timestamp: msg.timestamp,
		}
	}
}

/// Payload of a `query_update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryUpdate {
	/// Unique event identifier (e.g. "evt_<uuid>").
	pub id: String,
	/// Canonical id of the thread this event refers to.
	pub thread_ref: String,
	/// What happened.
	pub action: UpdateAction,
	/// For broadcast events, the explicit target team; otherwise the thread's
	/// owning team.
	pub team: Team,
	/// Team(s) the thread is currently marked for.
	pub marked_for_team: MarkedFor,
	/// Broadcast events are delivered to the explicit target regardless of
	/// thread ownership.
	pub broadcast: bool,
	/// When the event was produced.
	pub timestamp: DateTime<Utc>,
	/// Summary of the new message, when the action is `message_added`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub new_message: Option<MessageSummary>,
}

/// An update event, framed on the push channel or returned as an array
/// element from the poll endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateEvent {
	/// Push channel opened; first frame on every connection.
	Connected { timestamp: DateTime<Utc> },
	/// Keep-alive.
	Heartbeat { timestamp: DateTime<Utc> },
	/// A thread changed.
	QueryUpdate(QueryUpdate),
}

impl UpdateEvent {
	/// Returns the event kind as a string.
	pub fn kind(&self) -> &'static str {
		match self {
			UpdateEvent::Connected { .. } => "connected",
			UpdateEvent::Heartbeat { .. } => "heartbeat",
			UpdateEvent::QueryUpdate(_) => "query_update",
		}
	}

	/// Timestamp the event was produced at, whatever the kind.
	pub fn timestamp(&self) -> DateTime<Utc> {
		match self {
			UpdateEvent::Connected { timestamp } => *timestamp,
			UpdateEvent::Heartbeat { timestamp } => *timestamp,
			UpdateEvent::QueryUpdate(update) => update.timestamp,
		}
	}

	/// Creates a connected acknowledgment stamped now.
	pub fn connected() -> Self {
		UpdateEvent::Connected {
			timestamp: Utc::now(),
		}
	}

	/// Creates a heartbeat stamped now.
	pub fn heartbeat() -> Self {
		UpdateEvent::Heartbeat {
			timestamp: Utc::now(),
		}
	}

	/// Creates a `query_update` event for a thread mutation.
	pub fn query_update(
		thread_ref: String,
		action: UpdateAction,
		team: Team,
		marked_for_team: MarkedFor,
		broadcast: bool,
		new_message: Option<MessageSummary>,
	) -> Self {
		UpdateEvent::QueryUpdate(QueryUpdate {
			id: format!("evt_{}", uuid::Uuid::new_v4()),
			thread_ref,
			action,
			team,
			marked_for_team,
			broadcast,
			timestamp: Utc::now(),
			new_message,
		})
	}

	/// Creates a `message_added` event carrying the new message summary.
	pub fn message_added(msg: &Message, marked_for_team: MarkedFor) -> Self {
		Self::query_update(
			msg.canonical_thread_id.clone(),
			UpdateAction::MessageAdded,
			msg.team,
			marked_for_team,
			false,
			Some(MessageSummary::from(msg)),
		)
	}
}
