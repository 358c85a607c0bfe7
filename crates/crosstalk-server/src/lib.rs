// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP server for cross-team query synchronization.
//!
//! Exposes the message store adapter over HTTP: reconciled thread reads
//! and writes, polling for missed updates, and an SSE stream per delivery
//! channel with server-side fan-out.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crosstalk_server_store::{MessageStoreAdapter, RepairJob};

pub mod broadcast;
pub mod routes;

pub use broadcast::{BroadcasterStats, UpdateBroadcaster, UpdateBroadcasterConfig};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
	pub adapter: Arc<MessageStoreAdapter>,
	pub broadcaster: Arc<UpdateBroadcaster>,
	pub repair: Arc<RepairJob>,
}

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health))
		.route(
			"/api/threads/{id}",
			get(routes::get_thread),
		)
		.route(
			"/api/threads/{id}/messages",
			get(routes::get_messages).post(routes::create_message),
		)
		.route("/api/threads/{id}/mark", post(routes::mark_thread))
		.route(
			"/api/threads/{id}/updates",
			post(routes::publish_thread_update),
		)
		.route("/api/events", get(routes::get_events))
		.route("/api/events/stream", get(routes::stream_events))
		.route("/api/events/stats", get(routes::get_stream_stats))
		.route("/api/admin/repair", post(routes::run_repair))
		.with_state(state)
}
