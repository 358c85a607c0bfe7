// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error taxonomy for the query synchronization engine.
//!
//! Transport and partial store failures are recovered locally and never
//! surfaced to subscribers. Identifier and contamination failures are the
//! only class propagated outward: masking them risks data leaking between
//! teams. Duplicates are not errors at all; the deduplication engine drops
//! them silently.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CrosstalkError>;

/// Errors that can occur in the synchronization engine.
#[derive(Debug, Error)]
pub enum CrosstalkError {
	/// Reconciliation produced nothing usable for the given identifier.
	/// Writes are rejected, logged, and not retried.
	#[error("identifier unresolved: {0:?}")]
	IdentifierUnresolved(String),

	/// A backing source failed. Reads degrade to a partial merge instead of
	/// failing outright.
	#[error("store unavailable: {source_name}: {message}")]
	StoreUnavailable {
		source_name: String,
		message: String,
	},

	/// The push channel errored. Recovered locally via polling failover and
	/// a scheduled reconnect; subscribers only observe latency.
	#[error("transport failure: {0}")]
	TransportFailure(String),

	/// An incoming message declares a thread that matches no identifier
	/// variation of the group it targets. Never silently merged.
	#[error("contamination detected: message declares thread {declared:?} but targets {target:?}")]
	ContaminationDetected { declared: String, target: String },

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}
