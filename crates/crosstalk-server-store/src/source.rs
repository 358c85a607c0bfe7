// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The `MessageSource` document interface and its SQLite implementation.
//!
//! A source is one backing collection of messages. The surrounding
//! application historically wrote chat messages into more than one
//! collection, so reads must fan out across every configured source; each
//! SQLite source maps onto its own table.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use crosstalk_core::model::Message;

use crate::error::{Result, StoreError};

/// Document read/write interface for one backing message collection.
#[async_trait]
pub trait MessageSource: Send + Sync {
	/// Name of this source, for logs and degraded-read reporting.
	fn name(&self) -> &str;

	/// Finds every message whose canonical or raw thread id is in `ids`.
	async fn find_by_thread_ids(&self, ids: &BTreeSet<String>) -> Result<Vec<Message>>;

	/// Inserts a message.
	async fn insert(&self, message: &Message) -> Result<()>;

	/// Moves a message to another canonical thread.
	async fn reassign(&self, message_id: &str, canonical_id: &str) -> Result<bool>;

	/// Attaches isolation metadata to a message.
	async fn update_isolation(&self, message_id: &str, isolation_key: &str) -> Result<bool>;

	/// Deletes a message. Returns false when it did not exist.
	async fn delete(&self, message_id: &str) -> Result<bool>;

	/// Loads every message in the collection, for the repair job.
	async fn load_all(&self) -> Result<Vec<Message>>;
}

/// SQLite-backed message source. One table per source name.
#[derive(Clone)]
pub struct SqliteMessageSource {
	pool: SqlitePool,
	name: String,
	table: String,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
	id: String,
	content: String,
	sender: String,
	sender_role: String,
	team: String,
	timestamp: String,
	canonical_thread_id: String,
	raw_thread_id: String,
	isolation_key: Option<String>,
	thread_isolated: bool,
}

impl TryFrom<MessageRow> for Message {
	type Error = StoreError;

	fn try_from(row: MessageRow) -> Result<Message> {
		let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
			.map_err(|e| StoreError::InvalidRecord(format!("timestamp {:?}: {e}", row.timestamp)))?
			.with_timezone(&Utc);
		Ok(Message {
			id: row.id,
			content: row.content,
			sender: row.sender,
			sender_role: row
				.sender_role
				.parse()
				.map_err(StoreError::InvalidRecord)?,
			team: row.team.parse().map_err(StoreError::InvalidRecord)?,
			timestamp,
			canonical_thread_id: row.canonical_thread_id,
			raw_thread_id: row.raw_thread_id,
			isolation_key: row.isolation_key,
			thread_isolated: row.thread_isolated,
		})
	}
}

impl SqliteMessageSource {
	/// Creates a source over the given pool. The source name doubles as the
	/// table name, so it must be a bare identifier.
	pub fn new(pool: SqlitePool, name: impl Into<String>) -> Result<Self> {
		let name = name.into();
		if name.is_empty()
			|| !name
				.chars()
				.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
		{
			return Err(StoreError::InvalidRecord(format!(
				"source name must be a bare lowercase identifier, got {name:?}"
			)));
		}
		let table = format!("messages_{name}");
		Ok(Self { pool, name, table })
	}

	/// Creates the backing table and indexes if they do not exist.
	pub async fn init(&self) -> Result<()> {
		sqlx::query(&format!(
			r#"
			CREATE TABLE IF NOT EXISTS {table} (
				id TEXT PRIMARY KEY,
				content TEXT NOT NULL,
				sender TEXT NOT NULL,
				sender_role TEXT NOT NULL,
				team TEXT NOT NULL,
				timestamp TEXT NOT NULL,
				canonical_thread_id TEXT NOT NULL,
				raw_thread_id TEXT NOT NULL,
				isolation_key TEXT,
				thread_isolated INTEGER NOT NULL DEFAULT 0
			)
			"#,
			table = self.table
		))
		.execute(&self.pool)
		.await?;

		sqlx::query(&format!(
			"CREATE INDEX IF NOT EXISTS idx_{table}_canonical ON {table}(canonical_thread_id)",
			table = self.table
		))
		.execute(&self.pool)
		.await?;

		sqlx::query(&format!(
			"CREATE INDEX IF NOT EXISTS idx_{table}_raw ON {table}(raw_thread_id)",
			table = self.table
		))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	fn placeholders(n: usize) -> String {
		std::iter::repeat("?")
			.take(n)
			.collect::<Vec<_>>()
			.join(", ")
	}
}

#[async_trait]
impl MessageSource for SqliteMessageSource {
	fn name(&self) -> &str {
		&self.name
	}

	#[instrument(skip(self, ids), fields(source = %self.name, id_count = ids.len()))]
	async fn find_by_thread_ids(&self, ids: &BTreeSet<String>) -> Result<Vec<Message>> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}

		let marks = Self::placeholders(ids.len());
		let sql = format!(
			r#"
			SELECT id, content, sender, sender_role, team, timestamp,
			       canonical_thread_id, raw_thread_id, isolation_key, thread_isolated
			FROM {table}
			WHERE canonical_thread_id IN ({marks}) OR raw_thread_id IN ({marks})
			"#,
			table = self.table,
		);

		let mut query = sqlx::query_as::<_, MessageRow>(&sql);
		for id in ids {
			query = query.bind(id);
		}
		for id in ids {
			query = query.bind(id);
		}

		let rows = query.fetch_all(&self.pool).await?;
		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self, message), fields(source = %self.name, message_id = %message.id))]
	async fn insert(&self, message: &Message) -> Result<()> {
		sqlx::query(&format!(
			r#"
			INSERT INTO {table} (id, content, sender, sender_role, team, timestamp,
			                     canonical_thread_id, raw_thread_id, isolation_key, thread_isolated)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
			table = self.table
		))
		.bind(&message.id)
		.bind(&message.content)
		.bind(&message.sender)
		.bind(message.sender_role.as_str())
		.bind(message.team.as_str())
		.bind(message.timestamp.to_rfc3339())
		.bind(&message.canonical_thread_id)
		.bind(&message.raw_thread_id)
		.bind(&message.isolation_key)
		.bind(message.thread_isolated)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self), fields(source = %self.name, message_id = %message_id, canonical_id = %canonical_id))]
	async fn reassign(&self, message_id: &str, canonical_id: &str) -> Result<bool> {
		let result = sqlx::query(&format!(
			"UPDATE {table} SET canonical_thread_id = ? WHERE id = ?",
			table = self.table
		))
		.bind(canonical_id)
		.bind(message_id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self), fields(source = %self.name, message_id = %message_id))]
	async fn update_isolation(&self, message_id: &str, isolation_key: &str) -> Result<bool> {
		let result = sqlx::query(&format!(
			"UPDATE {table} SET isolation_key = ?, thread_isolated = 1 WHERE id = ?",
			table = self.table
		))
		.bind(isolation_key)
		.bind(message_id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self), fields(source = %self.name, message_id = %message_id))]
	async fn delete(&self, message_id: &str) -> Result<bool> {
		let result = sqlx::query(&format!(
			"DELETE FROM {table} WHERE id = ?",
			table = self.table
		))
		.bind(message_id)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self), fields(source = %self.name))]
	async fn load_all(&self) -> Result<Vec<Message>> {
		let rows = sqlx::query_as::<_, MessageRow>(&format!(
			r#"
			SELECT id, content, sender, sender_role, team, timestamp,
			       canonical_thread_id, raw_thread_id, isolation_key, thread_isolated
			FROM {table}
			ORDER BY timestamp ASC
			"#,
			table = self.table
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}
}
