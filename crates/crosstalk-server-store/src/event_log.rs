// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded in-memory update-event cache backing the poll endpoint.
//!
//! Update events are consumed once per interested subscriber and are never
//! durable; this log exists only so polling clients can ask "everything
//! since my high-water mark". It is an explicit, bounded cache: when the
//! retention window overflows, the oldest events are discarded and a client
//! that far behind recovers via a full read instead.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crosstalk_core::event::UpdateEvent;

/// Default number of retained events.
const DEFAULT_CAPACITY: usize = 4_096;

/// Bounded, append-only cache of recent update events.
pub struct EventLog {
	events: RwLock<VecDeque<UpdateEvent>>,
	capacity: usize,
}

impl EventLog {
	/// Creates a log with the default retention capacity.
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_CAPACITY)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			events: RwLock::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
			capacity: capacity.max(1),
		}
	}

	/// Appends an event, evicting the oldest when over capacity.
	pub async fn push(&self, event: UpdateEvent) {
		let mut events = self.events.write().await;
		if events.len() == self.capacity {
			events.pop_front();
			debug!("event log at capacity, evicted oldest event");
		}
		events.push_back(event);
	}

	/// Returns every event with a timestamp strictly greater than `since`,
	/// oldest first.
	pub async fn since(&self, since: DateTime<Utc>) -> Vec<UpdateEvent> {
		let events = self.events.read().await;
		events
			.iter()
			.filter(|event| event.timestamp() > since)
			.cloned()
			.collect()
	}

	pub async fn len(&self) -> usize {
		self.events.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.events.read().await.is_empty()
	}
}

impl Default for EventLog {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use crosstalk_core::event::UpdateAction;
	use crosstalk_core::model::{MarkedFor, Team};

	fn event() -> UpdateEvent {
		UpdateEvent::query_update(
			"HPR85".to_string(),
			UpdateAction::Updated,
			Team::Sales,
			MarkedFor::Both,
			false,
			None,
		)
	}

	#[tokio::test]
	async fn test_since_returns_only_newer_events_oldest_first() {
		let log = EventLog::new();
		let before = Utc::now() - Duration::seconds(1);

		let first = event();
		let second = event();
		log.push(first.clone()).await;
		log.push(second.clone()).await;

		let events = log.since(before).await;
		assert_eq!(events.len(), 2);
		assert_eq!(events[0], first);
		assert_eq!(events[1], second);

		// A mark at "now" excludes everything already seen.
		assert!(log.since(Utc::now()).await.is_empty());
	}

	#[tokio::test]
	async fn test_since_is_strictly_greater() {
		let log = EventLog::new();
		let e = event();
		log.push(e.clone()).await;
		assert!(log.since(e.timestamp()).await.is_empty());
	}

	#[tokio::test]
	async fn test_capacity_evicts_oldest() {
		let log = EventLog::with_capacity(2);
		let first = event();
		log.push(first.clone()).await;
		log.push(event()).await;
		log.push(event()).await;

		assert_eq!(log.len().await, 2);
		let all = log.since(Utc::now() - Duration::seconds(10)).await;
		assert!(!all.contains(&first));
	}
}
