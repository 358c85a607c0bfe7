// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Thread registry: canonical ids and their identifier variation sets.
//!
//! The registry is what turns the pure reconciliation pass into the
//! bidirectional closure: any persisted thread whose variation set
//! intersects a locally computed set contributes its other variations.
//! Unlike the pure pass, this augmentation is not idempotent in the strict
//! sense; threads created between calls can extend the result.
//!
//! Variation sets only ever grow.

use std::collections::BTreeSet;

use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crosstalk_core::model::{MarkedFor, Team, Thread};
use crosstalk_core::reconcile;

use crate::error::{Result, StoreError};

/// SQLite-backed registry of threads and their identifier variations.
#[derive(Clone)]
pub struct ThreadRegistry {
	pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ThreadRow {
	canonical_id: String,
	owning_team: String,
	marked_for: String,
}

impl ThreadRegistry {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Creates the registry tables if they do not exist.
	pub async fn init(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS threads (
				canonical_id TEXT PRIMARY KEY,
				owning_team TEXT NOT NULL,
				marked_for TEXT NOT NULL,
				created_at TEXT NOT NULL
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS thread_variations (
				variation TEXT PRIMARY KEY,
				canonical_id TEXT NOT NULL REFERENCES threads(canonical_id)
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			"CREATE INDEX IF NOT EXISTS idx_thread_variations_canonical
			 ON thread_variations(canonical_id)",
		)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Registers a new thread with its initial variation set.
	#[instrument(skip(self, thread), fields(canonical_id = %thread.canonical_id))]
	pub async fn create(&self, thread: &Thread) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO threads (canonical_id, owning_team, marked_for, created_at)
			VALUES (?, ?, ?, ?)
			"#,
		)
		.bind(&thread.canonical_id)
		.bind(thread.owning_team.as_str())
		.bind(thread.marked_for.to_string())
		.bind(chrono::Utc::now().to_rfc3339())
		.execute(&self.pool)
		.await?;

		self
			.extend_variations(&thread.canonical_id, &thread.variations)
			.await?;
		Ok(())
	}

	/// Adds variations to a thread. Existing entries are kept; returns the
	/// number of newly learned variations.
	#[instrument(skip(self, variations), fields(canonical_id = %canonical_id))]
	pub async fn extend_variations(
		&self,
		canonical_id: &str,
		variations: &BTreeSet<String>,
	) -> Result<u64> {
		let mut learned = 0;
		for variation in variations {
			let result = sqlx::query(
				"INSERT OR IGNORE INTO thread_variations (variation, canonical_id) VALUES (?, ?)",
			)
			.bind(variation)
			.bind(canonical_id)
			.execute(&self.pool)
			.await?;
			learned += result.rows_affected();
		}
		if learned > 0 {
			debug!(canonical_id, learned, "registry learned new identifier variations");
		}
		Ok(learned)
	}

	/// Loads a thread by canonical id, variations included.
	pub async fn get(&self, canonical_id: &str) -> Result<Option<Thread>> {
		let row = sqlx::query_as::<_, ThreadRow>(
			"SELECT canonical_id, owning_team, marked_for FROM threads WHERE canonical_id = ?",
		)
		.bind(canonical_id)
		.fetch_optional(&self.pool)
		.await?;

		let Some(row) = row else {
			return Ok(None);
		};
		Ok(Some(self.hydrate(row).await?))
	}

	/// Finds the threads whose variation set intersects `ids`.
	pub async fn find_by_variations(&self, ids: &BTreeSet<String>) -> Result<Vec<Thread>> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}

		let marks = std::iter::repeat("?")
			.take(ids.len())
			.collect::<Vec<_>>()
			.join(", ");
		let sql = format!(
			r#"
			SELECT DISTINCT t.canonical_id, t.owning_team, t.marked_for
			FROM threads t
			JOIN thread_variations v ON v.canonical_id = t.canonical_id
			WHERE v.variation IN ({marks})
			ORDER BY t.canonical_id
			"#,
		);

		let mut query = sqlx::query_as::<_, ThreadRow>(&sql);
		for id in ids {
			query = query.bind(id);
		}
		let rows = query.fetch_all(&self.pool).await?;

		let mut threads = Vec::with_capacity(rows.len());
		for row in rows {
			threads.push(self.hydrate(row).await?);
		}
		Ok(threads)
	}

	/// Changes which team(s) a thread is marked for.
	#[instrument(skip(self), fields(canonical_id = %canonical_id))]
	pub async fn set_marked_for(&self, canonical_id: &str, marked_for: MarkedFor) -> Result<bool> {
		let result = sqlx::query("UPDATE threads SET marked_for = ? WHERE canonical_id = ?")
			.bind(marked_for.to_string())
			.bind(canonical_id)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Expands a raw identifier with the pure pass, then augments the result
	/// with the variation sets of every intersecting persisted thread.
	///
	/// Returns the expanded set and the matched threads (empty when the
	/// identifier is new to the registry).
	pub async fn expand(&self, raw: &str) -> Result<(BTreeSet<String>, Vec<Thread>)> {
		let mut expanded = reconcile::resolve(raw);
		if expanded.is_empty() {
			return Ok((expanded, Vec::new()));
		}

		let threads = self.find_by_variations(&expanded).await?;
		for thread in &threads {
			expanded.extend(thread.variations.iter().cloned());
		}
		Ok((expanded, threads))
	}

	async fn hydrate(&self, row: ThreadRow) -> Result<Thread> {
		let variations: Vec<(String,)> =
			sqlx::query_as("SELECT variation FROM thread_variations WHERE canonical_id = ?")
				.bind(&row.canonical_id)
				.fetch_all(&self.pool)
				.await?;

		let owning_team: Team = row.owning_team.parse().map_err(StoreError::InvalidRecord)?;
		let marked_for: MarkedFor = row.marked_for.parse().map_err(StoreError::InvalidRecord)?;

		let mut thread = Thread::new(row.canonical_id, owning_team, marked_for);
		thread.variations.extend(variations.into_iter().map(|(v,)| v));
		Ok(thread)
	}
}
