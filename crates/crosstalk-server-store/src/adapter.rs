// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The message store adapter: reconciled writes and merged, deduplicated
//! multi-source reads.
//!
//! Writes resolve the raw identifier to a canonical thread id (the
//! first-seen variation becomes canonical, or an existing thread's
//! canonical id when any variation already maps to one). Reads expand the
//! identifier, fan out across every backing source, tolerate partial source
//! failure, and pass the merged result through the deduplication engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crosstalk_core::event::{UpdateAction, UpdateEvent};
use crosstalk_core::model::{MarkedFor, Message, SenderRole, Team, Thread};
use crosstalk_core::{dedupe, reconcile, CrosstalkError};

use crate::error::{Result, StoreError};
use crate::event_log::EventLog;
use crate::registry::ThreadRegistry;
use crate::source::MessageSource;

/// A message as submitted by an upstream writer, before reconciliation.
#[derive(Debug, Clone)]
pub struct MessageDraft {
	pub content: String,
	pub sender: String,
	pub sender_role: SenderRole,
	pub team: Team,
	/// Thread id the upstream payload itself declares, when it carries one
	/// separately from the write target. Checked for contamination.
	pub declared_thread_id: Option<String>,
	/// Write time; defaults to now.
	pub timestamp: Option<DateTime<Utc>>,
}

/// Write/read facade over the backing sources and the thread registry.
pub struct MessageStoreAdapter {
	primary: Arc<dyn MessageSource>,
	secondaries: Vec<Arc<dyn MessageSource>>,
	registry: ThreadRegistry,
	event_log: Arc<EventLog>,
}

impl MessageStoreAdapter {
	/// Creates an adapter. Writes land in `primary`; reads merge `primary`
	/// and every secondary.
	pub fn new(
		primary: Arc<dyn MessageSource>,
		secondaries: Vec<Arc<dyn MessageSource>>,
		registry: ThreadRegistry,
		event_log: Arc<EventLog>,
	) -> Self {
		Self {
			primary,
			secondaries,
			registry,
			event_log,
		}
	}

	pub fn registry(&self) -> &ThreadRegistry {
		&self.registry
	}

	pub fn event_log(&self) -> &Arc<EventLog> {
		&self.event_log
	}

	/// Every backing source, primary first.
	pub fn sources(&self) -> impl Iterator<Item = &Arc<dyn MessageSource>> {
		std::iter::once(&self.primary).chain(self.secondaries.iter())
	}

	/// Writes a message under a raw thread identifier.
	///
	/// Returns the stored message and the update events produced by the
	/// write (a `created` event when the thread is new, and the
	/// `message_added` event). The events are also appended to the event
	/// log for polling clients.
	#[instrument(skip(self, draft), fields(raw_id = %raw_id, team = %draft.team))]
	pub async fn write(
		&self,
		raw_id: &str,
		draft: MessageDraft,
	) -> Result<(Message, Vec<UpdateEvent>)> {
		let trimmed = raw_id.trim().to_string();
		let mut resolved = reconcile::resolve(raw_id);
		if resolved.is_empty() {
			warn!("write rejected: identifier resolved to nothing");
			return Err(CrosstalkError::IdentifierUnresolved(raw_id.to_string()).into());
		}

		// The payload's own thread id must connect to the write target;
		// silently merging a mismatch is how contamination happened.
		if let Some(declared) = draft
			.declared_thread_id
			.as_deref()
			.map(str::trim)
			.filter(|d| !d.is_empty())
		{
			let declared_set = reconcile::resolve(declared);
			if declared_set.is_disjoint(&resolved) {
				warn!(declared, "write rejected: declared thread does not match target");
				return Err(CrosstalkError::ContaminationDetected {
					declared: declared.to_string(),
					target: trimmed,
				}
				.into());
			}
			resolved.extend(declared_set);
		}

		let existing = self.registry.find_by_variations(&resolved).await?;
		let (thread, created) = match existing.into_iter().next() {
			Some(thread) => {
				self
					.registry
					.extend_variations(&thread.canonical_id, &resolved)
					.await?;
				(thread, false)
			}
			None => {
				let mut thread = Thread::new(trimmed.clone(), draft.team, MarkedFor::Both);
				thread.variations.extend(resolved.iter().cloned());
				self.registry.create(&thread).await?;
				info!(canonical_id = %thread.canonical_id, "created thread on first write");
				(thread, true)
			}
		};

		let message = Message {
			id: format!("msg_{}", uuid::Uuid::new_v4()),
			content: draft.content,
			sender: draft.sender,
			sender_role: draft.sender_role,
			team: draft.team,
			timestamp: draft.timestamp.unwrap_or_else(Utc::now),
			canonical_thread_id: thread.canonical_id.clone(),
			raw_thread_id: trimmed,
			isolation_key: None,
			thread_isolated: false,
		};
		self.primary.insert(&message).await?;

		let mut events = Vec::new();
		if created {
			events.push(UpdateEvent::query_update(
				thread.canonical_id.clone(),
				UpdateAction::Created,
				thread.owning_team,
				thread.marked_for,
				false,
				None,
			));
		}
		events.push(UpdateEvent::message_added(&message, thread.marked_for));

		for event in &events {
			self.event_log.push(event.clone()).await;
		}

		debug!(
			message_id = %message.id,
			canonical_id = %message.canonical_thread_id,
			"message written"
		);
		Ok((message, events))
	}

	/// Reads the merged, deduplicated, time-ordered messages of a thread.
	///
	/// A failing source is skipped and logged; the read degrades to a
	/// partial merge and only fails when every source is down.
	#[instrument(skip(self), fields(raw_id = %raw_id))]
	pub async fn read(&self, raw_id: &str) -> Result<Vec<Message>> {
		let (expanded, _) = self.registry.expand(raw_id).await?;
		if expanded.is_empty() {
			return Err(CrosstalkError::IdentifierUnresolved(raw_id.to_string()).into());
		}

		let mut merged = Vec::new();
		let mut failures = 0usize;
		let mut total = 0usize;
		for source in self.sources() {
			total += 1;
			match source.find_by_thread_ids(&expanded).await {
				Ok(mut messages) => merged.append(&mut messages),
				Err(e) => {
					failures += 1;
					warn!(
						source = source.name(),
						error = %e,
						"backing source failed, degrading to partial merge"
					);
				}
			}
		}
		if failures == total {
			return Err(StoreError::AllSourcesUnavailable);
		}

		let mut messages = dedupe::dedupe(merged);
		messages.sort_by_key(|m| m.timestamp);
		Ok(messages)
	}

	/// Produces a thread-level update event (resolved, reopened, ...) for an
	/// existing thread.
	///
	/// With `broadcast_to` set, the event is a broadcast explicitly targeted
	/// at that team, regardless of ownership and marking.
	#[instrument(skip(self), fields(raw_id = %raw_id, ?action))]
	pub async fn emit_thread_update(
		&self,
		raw_id: &str,
		action: UpdateAction,
		broadcast_to: Option<Team>,
	) -> Result<UpdateEvent> {
		let (_, threads) = self.registry.expand(raw_id).await?;
		let Some(thread) = threads.into_iter().next() else {
			return Err(CrosstalkError::IdentifierUnresolved(raw_id.to_string()).into());
		};

		let event = UpdateEvent::query_update(
			thread.canonical_id,
			action,
			broadcast_to.unwrap_or(thread.owning_team),
			thread.marked_for,
			broadcast_to.is_some(),
			None,
		);
		self.event_log.push(event.clone()).await;
		Ok(event)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::source::SqliteMessageSource;
	use async_trait::async_trait;
	use sqlx::SqlitePool;
	use std::collections::BTreeSet;

	/// A source that fails every operation, for degraded-read tests.
	struct DownSource;

	#[async_trait]
	impl MessageSource for DownSource {
		fn name(&self) -> &str {
			"down"
		}

		async fn find_by_thread_ids(&self, _ids: &BTreeSet<String>) -> Result<Vec<Message>> {
			Err(StoreError::Engine(CrosstalkError::StoreUnavailable {
				source_name: "down".to_string(),
				message: "connection refused".to_string(),
			}))
		}

		async fn insert(&self, _message: &Message) -> Result<()> {
			unreachable!("writes never target a secondary")
		}

		async fn reassign(&self, _message_id: &str, _canonical_id: &str) -> Result<bool> {
			Ok(false)
		}

		async fn update_isolation(&self, _message_id: &str, _isolation_key: &str) -> Result<bool> {
			Ok(false)
		}

		async fn delete(&self, _message_id: &str) -> Result<bool> {
			Ok(false)
		}

		async fn load_all(&self) -> Result<Vec<Message>> {
			Err(StoreError::Engine(CrosstalkError::StoreUnavailable {
				source_name: "down".to_string(),
				message: "connection refused".to_string(),
			}))
		}
	}

	async fn adapter_with(secondaries: Vec<Arc<dyn MessageSource>>) -> MessageStoreAdapter {
		let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
		let primary = SqliteMessageSource::new(pool.clone(), "queries").unwrap();
		primary.init().await.unwrap();
		let registry = ThreadRegistry::new(pool);
		registry.init().await.unwrap();
		MessageStoreAdapter::new(
			Arc::new(primary),
			secondaries,
			registry,
			Arc::new(EventLog::new()),
		)
	}

	fn draft(content: &str, sender: &str, team: Team) -> MessageDraft {
		MessageDraft {
			content: content.to_string(),
			sender: sender.to_string(),
			sender_role: SenderRole::Officer,
			team,
			declared_thread_id: None,
			timestamp: None,
		}
	}

	#[tokio::test]
	async fn test_first_write_creates_thread_with_trimmed_canonical() {
		let adapter = adapter_with(vec![]).await;
		let (msg, events) = adapter
			.write(" HPR85 ", draft("Need payslips", "Sales1", Team::Sales))
			.await
			.unwrap();

		assert_eq!(msg.canonical_thread_id, "HPR85");
		assert_eq!(msg.raw_thread_id, "HPR85");
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].kind(), "query_update");

		let thread = adapter.registry().get("HPR85").await.unwrap().unwrap();
		assert_eq!(thread.owning_team, Team::Sales);
		assert!(thread.variations.contains("85"));
	}

	#[tokio::test]
	async fn test_variation_write_reuses_existing_canonical() {
		let adapter = adapter_with(vec![]).await;
		adapter
			.write("HPR85", draft("Need payslips", "Sales1", Team::Sales))
			.await
			.unwrap();

		let (msg, events) = adapter
			.write("85", draft("Uploaded", "Credit1", Team::Credit))
			.await
			.unwrap();

		assert_eq!(msg.canonical_thread_id, "HPR85");
		assert_eq!(msg.raw_thread_id, "85");
		// No second `created` event for a known thread.
		assert_eq!(events.len(), 1);
	}

	#[tokio::test]
	async fn test_read_by_decorated_id_finds_bare_id_write() {
		let adapter = adapter_with(vec![]).await;
		adapter
			.write("85", draft("Need payslips", "Sales1", Team::Sales))
			.await
			.unwrap();

		let messages = adapter.read("HPR85").await.unwrap();
		assert_eq!(messages.len(), 1);
		assert_eq!(messages[0].raw_thread_id, "85");
	}

	#[tokio::test]
	async fn test_duplicate_writes_collapse_on_read() {
		use chrono::TimeZone;

		let adapter = adapter_with(vec![]).await;
		// Bucket-aligned base so both writes land in one dedup bucket.
		let aligned =
			Utc::now().timestamp_millis() / crosstalk_core::DEDUPE_BUCKET_MS
				* crosstalk_core::DEDUPE_BUCKET_MS;
		let base = Utc.timestamp_millis_opt(aligned).unwrap();
		for offset_ms in [0, 500] {
			let mut d = draft("Approved", "Ops1", Team::Ops);
			d.timestamp = Some(base + chrono::Duration::milliseconds(offset_ms));
			adapter.write("HPR85", d).await.unwrap();
		}

		let messages = adapter.read("HPR85").await.unwrap();
		// Identical content, sender and bucket: the dedup engine keeps the
		// earliest write.
		assert_eq!(messages.len(), 1);
		assert_eq!(messages[0].timestamp, base);
	}

	#[tokio::test]
	async fn test_read_sorted_by_timestamp() {
		let adapter = adapter_with(vec![]).await;
		let base = Utc::now();
		for (content, offset_s) in [("third", 20), ("first", 0), ("second", 10)] {
			let mut d = draft(content, "Sales1", Team::Sales);
			d.timestamp = Some(base + chrono::Duration::seconds(offset_s));
			adapter.write("HPR85", d).await.unwrap();
		}

		let messages = adapter.read("HPR85").await.unwrap();
		let order: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
		assert_eq!(order, vec!["first", "second", "third"]);
	}

	#[tokio::test]
	async fn test_partial_source_failure_degrades() {
		let adapter = adapter_with(vec![Arc::new(DownSource)]).await;
		adapter
			.write("HPR85", draft("Need payslips", "Sales1", Team::Sales))
			.await
			.unwrap();

		// The failing secondary is skipped, the primary still answers.
		let messages = adapter.read("HPR85").await.unwrap();
		assert_eq!(messages.len(), 1);
	}

	#[tokio::test]
	async fn test_blank_identifier_rejected() {
		let adapter = adapter_with(vec![]).await;
		let err = adapter
			.write("   ", draft("Need payslips", "Sales1", Team::Sales))
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			StoreError::Engine(CrosstalkError::IdentifierUnresolved(_))
		));
	}

	#[tokio::test]
	async fn test_contaminated_declared_thread_rejected() {
		let adapter = adapter_with(vec![]).await;
		let mut d = draft("Need payslips", "Sales1", Team::Sales);
		d.declared_thread_id = Some("HPR99".to_string());

		let err = adapter.write("HPR85", d).await.unwrap_err();
		assert!(matches!(
			err,
			StoreError::Engine(CrosstalkError::ContaminationDetected { .. })
		));

		// Nothing was persisted for either thread.
		assert!(adapter.read("HPR85").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_matching_declared_thread_accepted() {
		let adapter = adapter_with(vec![]).await;
		let mut d = draft("Need payslips", "Sales1", Team::Sales);
		// "85" is a variation of "HPR85"; this is the same thread.
		d.declared_thread_id = Some("85".to_string());

		assert!(adapter.write("HPR85", d).await.is_ok());
	}

	#[tokio::test]
	async fn test_write_records_events_for_polling() {
		let adapter = adapter_with(vec![]).await;
		let before = Utc::now() - chrono::Duration::seconds(1);
		adapter
			.write("HPR85", draft("Need payslips", "Sales1", Team::Sales))
			.await
			.unwrap();

		let events = adapter.event_log().since(before).await;
		assert_eq!(events.len(), 2);
	}

	#[tokio::test]
	async fn test_emit_thread_update_broadcast() {
		let adapter = adapter_with(vec![]).await;
		adapter
			.write("HPR85", draft("Need payslips", "Sales1", Team::Sales))
			.await
			.unwrap();

		let event = adapter
			.emit_thread_update("85", UpdateAction::Resolved, Some(Team::Ops))
			.await
			.unwrap();
		let UpdateEvent::QueryUpdate(update) = event else {
			panic!("expected query_update");
		};
		assert!(update.broadcast);
		assert_eq!(update.team, Team::Ops);
		assert_eq!(update.thread_ref, "HPR85");
	}

	#[tokio::test]
	async fn test_emit_thread_update_unknown_thread_rejected() {
		let adapter = adapter_with(vec![]).await;
		let err = adapter
			.emit_thread_update("HPR77", UpdateAction::Resolved, None)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			StoreError::Engine(CrosstalkError::IdentifierUnresolved(_))
		));
	}
}
