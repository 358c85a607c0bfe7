// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The isolation repair job: re-groups historically contaminated messages
//! into clean per-thread sets.
//!
//! The job is a batch pass over every backing source. Within each group it
//! applies the deduplication key and deletes losing duplicates; messages
//! with no resolvable identifier are dropped and counted as orphaned;
//! messages whose declared thread does not match the group they were
//! physically found under are reassigned when a correct group exists,
//! otherwise flagged orphaned. Survivors are tagged with isolation
//! metadata.
//!
//! The job is idempotent: a second run over an unchanged store performs
//! zero further writes. It aborts when any source fails to load, because
//! deleting duplicates against a partial view could destroy the only
//! surviving copy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crosstalk_core::model::Message;
use crosstalk_core::{bucket_of, reconcile};

use crate::error::Result;
use crate::registry::ThreadRegistry;
use crate::source::MessageSource;

/// Outcome counts of one repair run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
	/// Messages examined.
	pub processed: u64,
	/// Messages moved into their correct group.
	pub merged: u64,
	/// Losing duplicates deleted.
	pub deleted_duplicates: u64,
	/// Messages dropped because no group could be determined.
	pub orphaned: u64,
}

/// One message together with the source it was physically found in.
struct Located {
	source: Arc<dyn MessageSource>,
	message: Message,
	/// Canonical id of the group the message belongs to after repair.
	group: String,
}

/// Idempotent batch job restoring per-thread isolation.
pub struct RepairJob {
	sources: Vec<Arc<dyn MessageSource>>,
	registry: ThreadRegistry,
}

impl RepairJob {
	pub fn new(sources: Vec<Arc<dyn MessageSource>>, registry: ThreadRegistry) -> Self {
		Self { sources, registry }
	}

	/// Runs one repair pass over every source.
	#[instrument(skip(self))]
	pub async fn run(&self) -> Result<RepairReport> {
		let mut report = RepairReport::default();
		let mut survivors: Vec<Located> = Vec::new();

		for source in &self.sources {
			for message in source.load_all().await? {
				report.processed += 1;
				match self.regroup(source, message, &mut report).await? {
					Some(located) => survivors.push(located),
					None => {}
				}
			}
		}

		self.drop_duplicates(&mut survivors, &mut report).await?;
		self.tag_survivors(&survivors).await?;

		info!(
			processed = report.processed,
			merged = report.merged,
			deleted_duplicates = report.deleted_duplicates,
			orphaned = report.orphaned,
			"repair run complete"
		);
		Ok(report)
	}

	/// Determines the group a message belongs to, reassigning or orphaning
	/// it as needed. Returns `None` when the message was deleted.
	async fn regroup(
		&self,
		source: &Arc<dyn MessageSource>,
		mut message: Message,
		report: &mut RepairReport,
	) -> Result<Option<Located>> {
		let canonical = message.canonical_thread_id.trim().to_string();
		let raw = message.raw_thread_id.trim().to_string();

		if canonical.is_empty() && reconcile::resolve(&raw).is_empty() {
			warn!(message_id = %message.id, "orphaned: no resolvable identifier");
			source.delete(&message.id).await?;
			report.orphaned += 1;
			return Ok(None);
		}

		if canonical.is_empty() {
			// No physical group recorded; adopt the declared thread's group
			// when the registry knows one, else the raw id itself.
			let (declared_set, threads) = self.registry.expand(&raw).await?;
			debug_assert!(!declared_set.is_empty());
			let group = match threads.into_iter().next() {
				Some(thread) => {
					source.reassign(&message.id, &thread.canonical_id).await?;
					report.merged += 1;
					thread.canonical_id
				}
				None => raw.clone(),
			};
			message.canonical_thread_id = group.clone();
			return Ok(Some(Located {
				source: Arc::clone(source),
				message,
				group,
			}));
		}

		// Physical group exists; verify the declared thread connects to it.
		if !raw.is_empty() {
			let (declared_set, _) = self.registry.expand(&raw).await?;
			let (physical_set, _) = self.registry.expand(&canonical).await?;
			if declared_set.is_disjoint(&physical_set) {
				let correct = self.registry.find_by_variations(&declared_set).await?;
				match correct.into_iter().next() {
					Some(thread) => {
						warn!(
							message_id = %message.id,
							from = %canonical,
							to = %thread.canonical_id,
							"reassigning contaminated message to its declared group"
						);
						source.reassign(&message.id, &thread.canonical_id).await?;
						report.merged += 1;
						message.canonical_thread_id = thread.canonical_id.clone();
						let group = thread.canonical_id;
						return Ok(Some(Located {
							source: Arc::clone(source),
							message,
							group,
						}));
					}
					None => {
						warn!(
							message_id = %message.id,
							declared = %raw,
							found_under = %canonical,
							"orphaned: declared thread matches no group"
						);
						source.delete(&message.id).await?;
						report.orphaned += 1;
						return Ok(None);
					}
				}
			}
		}

		let group = canonical;
		message.canonical_thread_id = group.clone();
		Ok(Some(Located {
			source: Arc::clone(source),
			message,
			group,
		}))
	}

	/// Applies the dedup key within each group and deletes the losers.
	async fn drop_duplicates(
		&self,
		survivors: &mut Vec<Located>,
		report: &mut RepairReport,
	) -> Result<()> {
		// Earliest-first so the first occurrence of a key is the keeper.
		survivors.sort_by(|a, b| {
			a.message
				.timestamp
				.cmp(&b.message.timestamp)
				.then_with(|| a.message.id.cmp(&b.message.id))
		});

		let mut seen: HashSet<(String, String, String, i64)> = HashSet::new();
		let mut kept = Vec::with_capacity(survivors.len());
		for located in survivors.drain(..) {
			let key = (
				located.group.clone(),
				located.message.sender.clone(),
				located.message.content.clone(),
				bucket_of(located.message.timestamp),
			);
			if seen.insert(key) {
				kept.push(located);
			} else {
				located.source.delete(&located.message.id).await?;
				report.deleted_duplicates += 1;
			}
		}
		*survivors = kept;
		Ok(())
	}

	/// Attaches isolation metadata to survivors that do not carry it yet.
	async fn tag_survivors(&self, survivors: &[Located]) -> Result<()> {
		for located in survivors {
			let tagged = located.message.thread_isolated
				&& located.message.isolation_key.as_deref() == Some(located.group.as_str());
			if !tagged {
				located
					.source
					.update_isolation(&located.message.id, &located.group)
					.await?;
			}
		}
		Ok(())
	}

	/// Counts messages per group without modifying anything, for
	/// diagnostics.
	pub async fn group_sizes(&self) -> Result<HashMap<String, usize>> {
		let mut sizes = HashMap::new();
		for source in &self.sources {
			for message in source.load_all().await? {
				let canonical = message.canonical_thread_id.trim();
				let key = if canonical.is_empty() {
					message.raw_thread_id.trim().to_string()
				} else {
					canonical.to_string()
				};
				*sizes.entry(key).or_insert(0) += 1;
			}
		}
		Ok(sizes)
	}
}
