// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types and algorithms for the Crosstalk query synchronization engine.
//!
//! This crate holds the pure half of the system: the message/thread/event
//! model shared by the server and the client SDK, identifier reconciliation,
//! the deduplication engine, and the interested-team computation. Nothing in
//! here performs I/O; everything is deterministic and unit-testable.
//!
//! # Components
//!
//! - [`reconcile`] - expands a raw thread identifier into its equivalent
//!   variations
//! - [`dedupe`] - collapses content-identical messages across sources
//! - [`interest`] - computes which teams must see an update event
//! - [`model`] / [`event`] - the shared data model and the closed update
//!   event union

pub mod dedupe;
pub mod error;
pub mod event;
pub mod interest;
pub mod model;
pub mod reconcile;

pub use dedupe::{bucket_of, dedupe, DEDUPE_BUCKET_MS};
pub use error::{CrosstalkError, Result};
pub use event::{MessageSummary, QueryUpdate, UpdateAction, UpdateEvent};
pub use interest::interested_channels;
pub use model::{Channel, MarkedFor, Message, SenderRole, Team, Thread};
pub use reconcile::{resolve, resolve_set};
