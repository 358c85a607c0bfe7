// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deduplication engine: collapses messages that are content-identical
//! across sources and identifier variations into a single logical message.
//!
//! A message may be stored more than once: once per backing collection it
//! was written to, or once per identifier variation an inconsistent upstream
//! writer used. The merge key is (canonical thread id, sender, content,
//! timestamp bucket); the earliest message per key survives.
//!
//! This is a pure function with no I/O. `dedupe(dedupe(x)) == dedupe(x)`
//! for any input list.

use std::collections::HashMap;

use crate::model::Message;

/// Width of the timestamp bucket in milliseconds.
///
/// Wide enough to absorb the double-submit and transport-failover windows,
/// narrow enough that a genuinely repeated message minutes later survives.
pub const DEDUPE_BUCKET_MS: i64 = 2_000;

/// Maps a timestamp onto its fixed-width bucket.
pub fn bucket_of(timestamp: chrono::DateTime<chrono::Utc>) -> i64 {
	timestamp.timestamp_millis().div_euclid(DEDUPE_BUCKET_MS)
}

/// Key identifying a logical message across sources and variations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupeKey {
	canonical_thread_id: String,
	sender: String,
	content: String,
	bucket: i64,
}

impl DedupeKey {
	fn of(msg: &Message) -> Self {
		DedupeKey {
			canonical_thread_id: msg.canonical_thread_id.clone(),
			sender: msg.sender.clone(),
			content: msg.content.clone(),
			bucket: bucket_of(msg.timestamp),
		}
	}
}

/// Collapses duplicates, keeping the earliest message per key.
///
/// Survivors are returned in their original relative order.
pub fn dedupe(messages: Vec<Message>) -> Vec<Message> {
	// Index of the earliest message seen per key.
	let mut earliest: HashMap<DedupeKey, usize> = HashMap::new();
	for (idx, msg) in messages.iter().enumerate() {
		let key = DedupeKey::of(msg);
		match earliest.get(&key) {
			Some(&kept) if messages[kept].timestamp <= msg.timestamp => {}
			_ => {
				earliest.insert(key, idx);
			}
		}
	}

	messages
		.into_iter()
		.enumerate()
		.filter_map(|(idx, msg)| {
			let key = DedupeKey::of(&msg);
			(earliest.get(&key) == Some(&idx)).then_some(msg)
		})
		.collect()
}
