// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared data model for the query synchronization engine.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the three organizational teams that raise and answer queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
	Sales,
	Credit,
	Ops,
}

impl Team {
	/// All concrete teams, in routing order.
	pub const ALL: [Team; 3] = [Team::Sales, Team::Credit, Team::Ops];

	pub fn as_str(&self) -> &'static str {
		match self {
			Team::Sales => "sales",
			Team::Credit => "credit",
			Team::Ops => "ops",
		}
	}
}

impl fmt::Display for Team {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Team {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"sales" => Ok(Team::Sales),
			"credit" => Ok(Team::Credit),
			"ops" => Ok(Team::Ops),
			other => Err(format!("unknown team: {other}")),
		}
	}
}

/// The team(s) a thread is currently marked for.
///
/// `Both` is the sentinel meaning the two query-raising teams (sales and
/// credit) are jointly responsible; ops is reachable only via broadcast or
/// the `all` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkedFor {
	Both,
	#[serde(untagged)]
	Team(Team),
}

impl MarkedFor {
	/// Expands the sentinel to the concrete teams it denotes.
	pub fn expand(&self) -> Vec<Team> {
		match self {
			MarkedFor::Team(team) => vec![*team],
			MarkedFor::Both => vec![Team::Sales, Team::Credit],
		}
	}
}

impl fmt::Display for MarkedFor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MarkedFor::Team(team) => team.fmt(f),
			MarkedFor::Both => f.write_str("both"),
		}
	}
}

impl FromStr for MarkedFor {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s == "both" {
			Ok(MarkedFor::Both)
		} else {
			s.parse::<Team>().map(MarkedFor::Team)
		}
	}
}

/// A delivery channel a subscriber can attach to: a concrete team, or the
/// `all` pseudo-team that observes every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
	All,
	#[serde(untagged)]
	Team(Team),
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Channel::Team(team) => team.fmt(f),
			Channel::All => f.write_str("all"),
		}
	}
}

impl FromStr for Channel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s == "all" {
			Ok(Channel::All)
		} else {
			s.parse::<Team>().map(Channel::Team)
		}
	}
}

/// Role of a message sender within their team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
	Officer,
	Manager,
	System,
}

impl SenderRole {
	pub fn as_str(&self) -> &'static str {
		match self {
			SenderRole::Officer => "officer",
			SenderRole::Manager => "manager",
			SenderRole::System => "system",
		}
	}
}

impl fmt::Display for SenderRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SenderRole {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"officer" => Ok(SenderRole::Officer),
			"manager" => Ok(SenderRole::Manager),
			"system" => Ok(SenderRole::System),
			other => Err(format!("unknown sender role: {other}")),
		}
	}
}

/// A single chat message attached to a logical thread.
///
/// Messages are append-only: once written they are never mutated except to
/// attach isolation metadata, and only the repair job deletes them (as
/// proven duplicates or orphans).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	/// Unique message identifier (e.g. "msg_<uuid>").
	pub id: String,
	/// Message body.
	pub content: String,
	/// Display name of the sender.
	pub sender: String,
	/// Role of the sender within their team.
	pub sender_role: SenderRole,
	/// Team the sender belongs to.
	pub team: Team,
	/// When the message was written.
	pub timestamp: DateTime<Utc>,
	/// The canonical id chosen for the thread at write time.
	pub canonical_thread_id: String,
	/// The identifier the writer originally supplied, trimmed but otherwise
	/// untouched.
	pub raw_thread_id: String,
	/// Canonical id this message has been verified to belong to, set by the
	/// repair job.
	pub isolation_key: Option<String>,
	/// Whether the repair job has verified this message belongs to exactly
	/// one canonical thread.
	#[serde(default)]
	pub thread_isolated: bool,
}

/// A logical conversation, identified by its canonical id.
///
/// The variation set grows monotonically as reconciliation discovers more
/// equivalent identifiers; it never shrinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
	/// The identifier chosen to represent this conversation.
	pub canonical_id: String,
	/// Every identifier known to denote this conversation, the canonical id
	/// included.
	pub variations: BTreeSet<String>,
	/// Team that opened the thread.
	pub owning_team: Team,
	/// Team(s) the thread is currently marked for.
	pub marked_for: MarkedFor,
}

impl Thread {
	/// Creates a thread whose canonical id is its only known variation.
	pub fn new(canonical_id: impl Into<String>, owning_team: Team, marked_for: MarkedFor) -> Self {
		let canonical_id = canonical_id.into();
		let mut variations = BTreeSet::new();
		variations.insert(canonical_id.clone());
		Self {
			canonical_id,
			variations,
			owning_team,
			marked_for,
		}
	}

	/// Returns true if any of the given identifiers is a known variation.
	pub fn matches_any(&self, ids: &BTreeSet<String>) -> bool {
		ids.iter().any(|id| self.variations.contains(id))
	}
}
