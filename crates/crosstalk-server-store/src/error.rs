// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the store layer.

use thiserror::Error;

use crosstalk_core::CrosstalkError;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
	/// A domain error (unresolved identifier, contamination) surfaced
	/// through the store boundary.
	#[error(transparent)]
	Engine(#[from] CrosstalkError),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// A stored row could not be mapped back onto the domain model.
	#[error("invalid record: {0}")]
	InvalidRecord(String),

	/// Every backing source failed a merged read; there is nothing to
	/// degrade to.
	#[error("all backing sources unavailable")]
	AllSourcesUnavailable,
}
