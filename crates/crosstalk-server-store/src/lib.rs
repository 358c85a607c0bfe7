// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Message persistence for the Crosstalk query synchronization engine.
//!
//! This crate owns everything that touches durable state:
//!
//! - [`source`] - the `MessageSource` document interface and its SQLite
//!   implementation (one table per backing collection)
//! - [`registry`] - the thread registry mapping identifier variations to
//!   canonical thread ids
//! - [`adapter`] - the store adapter: reconciled writes, merged and
//!   deduplicated multi-source reads
//! - [`event_log`] - the bounded in-memory update-event cache backing the
//!   poll endpoint
//! - [`repair`] - the idempotent isolation repair job

pub mod adapter;
pub mod error;
pub mod event_log;
pub mod registry;
pub mod repair;
pub mod source;

pub use adapter::{MessageDraft, MessageStoreAdapter};
pub use error::{Result, StoreError};
pub use event_log::EventLog;
pub use registry::ThreadRegistry;
pub use repair::{RepairJob, RepairReport};
pub use source::{MessageSource, SqliteMessageSource};
