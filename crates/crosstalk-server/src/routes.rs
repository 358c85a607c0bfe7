// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP handlers for thread messaging, event polling and SSE streaming.

use std::convert::Infallible;

use axum::{
	extract::{Path, Query, State},
	http::StatusCode,
	response::{
		sse::{Event, Sse},
		IntoResponse,
	},
	Json,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{info, instrument, warn};

use crosstalk_core::event::{UpdateAction, UpdateEvent};
use crosstalk_core::model::{Channel, MarkedFor, Message, SenderRole, Team, Thread};
use crosstalk_core::CrosstalkError;
use crosstalk_server_store::{MessageDraft, StoreError};

use crate::AppState;

/// Error response for all endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

fn error_response(status: StatusCode, error: &str, message: String) -> axum::response::Response {
	(
		status,
		Json(ErrorResponse {
			error: error.to_string(),
			message,
		}),
	)
		.into_response()
}

/// Maps a store failure to its HTTP representation.
fn store_error(e: StoreError) -> axum::response::Response {
	match e {
		StoreError::Engine(CrosstalkError::IdentifierUnresolved(raw)) => error_response(
			StatusCode::BAD_REQUEST,
			"identifier_unresolved",
			format!("thread identifier {raw:?} resolves to nothing"),
		),
		StoreError::Engine(CrosstalkError::ContaminationDetected { declared, target }) => {
			error_response(
				StatusCode::CONFLICT,
				"contamination_detected",
				format!("payload declares thread {declared:?} but targets {target:?}"),
			)
		}
		StoreError::AllSourcesUnavailable => error_response(
			StatusCode::SERVICE_UNAVAILABLE,
			"all_sources_unavailable",
			"every backing message source failed".to_string(),
		),
		other => {
			tracing::error!(error = %other, "store operation failed");
			error_response(
				StatusCode::INTERNAL_SERVER_ERROR,
				"internal_error",
				"internal error".to_string(),
			)
		}
	}
}

// ============================================================================
// Thread Endpoints
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
	pub messages: Vec<Message>,
}

/// GET /api/threads/{id}/messages - Merged, deduplicated thread view
#[instrument(skip(state), fields(thread_id = %id))]
pub async fn get_messages(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> impl IntoResponse {
	match state.adapter.read(&id).await {
		Ok(messages) => Json(MessagesResponse { messages }).into_response(),
		Err(e) => store_error(e),
	}
}

/// Request to append a message to a thread.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
	pub content: String,
	pub sender: String,
	pub sender_role: SenderRole,
	pub team: Team,
	#[serde(default)]
	pub declared_thread_id: Option<String>,
	#[serde(default)]
	pub timestamp: Option<DateTime<Utc>>,
}

/// POST /api/threads/{id}/messages - Append a message
#[instrument(skip(state, req), fields(thread_id = %id, team = %req.team))]
pub async fn create_message(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(req): Json<CreateMessageRequest>,
) -> impl IntoResponse {
	let draft = MessageDraft {
		content: req.content,
		sender: req.sender,
		sender_role: req.sender_role,
		team: req.team,
		declared_thread_id: req.declared_thread_id,
		timestamp: req.timestamp,
	};

	let (message, events) = match state.adapter.write(&id, draft).await {
		Ok(result) => result,
		Err(e) => return store_error(e),
	};

	for event in &events {
		if let UpdateEvent::QueryUpdate(update) = event {
			state.broadcaster.publish(update).await;
		}
	}

	info!(message_id = %message.id, "message created");
	(StatusCode::CREATED, Json(message)).into_response()
}

/// Request to re-mark a thread.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkThreadRequest {
	pub marked_for: MarkedFor,
}

/// POST /api/threads/{id}/mark - Change which teams a thread is marked for
#[instrument(skip(state, req), fields(thread_id = %id, marked_for = %req.marked_for))]
pub async fn mark_thread(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(req): Json<MarkThreadRequest>,
) -> impl IntoResponse {
	let registry = state.adapter.registry();
	let thread = match registry.expand(&id).await {
		Ok((_, threads)) => match threads.into_iter().next() {
			Some(thread) => thread,
			None => {
				return error_response(
					StatusCode::NOT_FOUND,
					"thread_not_found",
					format!("no thread matches {id:?}"),
				)
			}
		},
		Err(e) => return store_error(e),
	};

	if let Err(e) = registry
		.set_marked_for(&thread.canonical_id, req.marked_for)
		.await
	{
		return store_error(e);
	}

	let event = match state
		.adapter
		.emit_thread_update(&id, UpdateAction::Updated, None)
		.await
	{
		Ok(event) => event,
		Err(e) => return store_error(e),
	};
	if let UpdateEvent::QueryUpdate(update) = &event {
		state.broadcaster.publish(update).await;
	}

	match registry.get(&thread.canonical_id).await {
		Ok(Some(thread)) => Json(thread).into_response(),
		Ok(None) => StatusCode::NOT_FOUND.into_response(),
		Err(e) => store_error(e),
	}
}

/// Request to publish a thread status change.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadUpdateRequest {
	pub action: UpdateAction,
	/// When set, the update is broadcast to this team regardless of
	/// ownership and marking.
	#[serde(default)]
	pub broadcast_to: Option<Team>,
}

/// POST /api/threads/{id}/updates - Publish a resolved/reopened update
#[instrument(skip(state, req), fields(thread_id = %id, action = ?req.action))]
pub async fn publish_thread_update(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(req): Json<ThreadUpdateRequest>,
) -> impl IntoResponse {
	if matches!(req.action, UpdateAction::Created | UpdateAction::MessageAdded) {
		return error_response(
			StatusCode::BAD_REQUEST,
			"action_not_allowed",
			"created and message_added updates are produced by writes".to_string(),
		);
	}

	let event = match state
		.adapter
		.emit_thread_update(&id, req.action, req.broadcast_to)
		.await
	{
		Ok(event) => event,
		Err(e) => return store_error(e),
	};
	if let UpdateEvent::QueryUpdate(update) = &event {
		state.broadcaster.publish(update).await;
	}

	Json(event).into_response()
}

/// GET /api/threads/{id} - Thread metadata
#[instrument(skip(state), fields(thread_id = %id))]
pub async fn get_thread(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> impl IntoResponse {
	let threads: Vec<Thread> = match state.adapter.registry().expand(&id).await {
		Ok((_, threads)) => threads,
		Err(e) => return store_error(e),
	};
	match threads.into_iter().next() {
		Some(thread) => Json(thread).into_response(),
		None => error_response(
			StatusCode::NOT_FOUND,
			"thread_not_found",
			format!("no thread matches {id:?}"),
		),
	}
}

// ============================================================================
// Event Endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EventsParams {
	pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventsResponse {
	pub events: Vec<UpdateEvent>,
	/// Server time of this response, usable as the next `since` mark.
	pub now: DateTime<Utc>,
}

/// GET /api/events - Poll for updates after a timestamp
#[instrument(skip(state))]
pub async fn get_events(
	State(state): State<AppState>,
	Query(params): Query<EventsParams>,
) -> impl IntoResponse {
	let since = params.since.unwrap_or(DateTime::<Utc>::MIN_UTC);
	let events = state.adapter.event_log().since(since).await;
	Json(EventsResponse {
		events,
		now: Utc::now(),
	})
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
	pub channel: Option<String>,
}

/// GET /api/events/stream - SSE stream for one delivery channel
///
/// The first frame is always a `connected` acknowledgment; clients treat
/// its receipt as push-transport liveness.
#[instrument(skip(state))]
pub async fn stream_events(
	State(state): State<AppState>,
	Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, axum::response::Response> {
	let channel = match params.channel.as_deref() {
		None => Channel::All,
		Some(raw) => raw.parse::<Channel>().map_err(|e| {
			error_response(StatusCode::BAD_REQUEST, "invalid_channel", e)
		})?,
	};

	info!(channel = %channel, "client connected to event stream");

	let receiver = state.broadcaster.subscribe(channel).await;
	let broadcast_stream = BroadcastStream::new(receiver);

	let ack = UpdateEvent::connected();
	let ack_stream = futures::stream::once(async move {
		let json = serde_json::to_string(&ack).unwrap_or_else(|_| "{}".to_string());
		Ok::<_, Infallible>(Event::default().event("connected").data(json))
	});

	let updates_stream = broadcast_stream.filter_map(|result| match result {
		Ok(event) => match serde_json::to_string(&event) {
			Ok(json) => Some(Ok::<_, Infallible>(
				Event::default().event(event.kind()).data(json),
			)),
			Err(e) => {
				warn!(error = %e, "failed to serialize SSE event");
				None
			}
		},
		Err(e) => {
			tracing::debug!(error = %e, "broadcast stream error (client may have lagged)");
			None
		}
	});

	Ok(
		Sse::new(ack_stream.chain(updates_stream)).keep_alive(
			axum::response::sse::KeepAlive::new()
				.interval(std::time::Duration::from_secs(30))
				.text("heartbeat"),
		),
	)
}

/// GET /api/events/stats - Broadcaster statistics
pub async fn get_stream_stats(State(state): State<AppState>) -> impl IntoResponse {
	Json(state.broadcaster.stats().await)
}

// ============================================================================
// Admin Endpoints
// ============================================================================

/// POST /api/admin/repair - Run the isolation repair job
#[instrument(skip(state))]
pub async fn run_repair(State(state): State<AppState>) -> impl IntoResponse {
	match state.repair.run().await {
		Ok(report) => {
			info!(
				processed = report.processed,
				merged = report.merged,
				deleted_duplicates = report.deleted_duplicates,
				orphaned = report.orphaned,
				"repair run finished"
			);
			Json(report).into_response()
		}
		Err(e) => {
			tracing::error!(error = %e, "repair run failed");
			error_response(
				StatusCode::INTERNAL_SERVER_ERROR,
				"repair_failed",
				"repair aborted; no source was modified on a partial view".to_string(),
			)
		}
	}
}

/// GET /health - Liveness probe
pub async fn health() -> impl IntoResponse {
	(StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{create_router, AppState};
	use axum::body::{to_bytes, Body};
	use axum::http::Request;
	use sqlx::SqlitePool;
	use std::sync::Arc;
	use tower::ServiceExt;

	use crate::broadcast::UpdateBroadcaster;
	use crosstalk_server_store::{
		EventLog, MessageSource, MessageStoreAdapter, RepairJob, RepairReport,
		SqliteMessageSource, ThreadRegistry,
	};

	async fn test_state() -> AppState {
		let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
		let queries = Arc::new(SqliteMessageSource::new(pool.clone(), "queries").unwrap());
		let chat = Arc::new(SqliteMessageSource::new(pool.clone(), "chat").unwrap());
		queries.init().await.unwrap();
		chat.init().await.unwrap();
		let registry = ThreadRegistry::new(pool);
		registry.init().await.unwrap();

		let sources: Vec<Arc<dyn MessageSource>> = vec![queries.clone(), chat.clone()];
		let adapter = Arc::new(MessageStoreAdapter::new(
			queries,
			vec![chat],
			registry.clone(),
			Arc::new(EventLog::new()),
		));
		AppState {
			adapter,
			broadcaster: Arc::new(UpdateBroadcaster::with_defaults()),
			repair: Arc::new(RepairJob::new(sources, registry)),
		}
	}

	fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
		Request::builder()
			.method("POST")
			.uri(uri)
			.header("content-type", "application/json")
			.body(Body::from(body.to_string()))
			.unwrap()
	}

	fn get(uri: &str) -> Request<Body> {
		Request::builder().uri(uri).body(Body::empty()).unwrap()
	}

	async fn body_json(response: axum::response::Response) -> serde_json::Value {
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		serde_json::from_slice(&bytes).unwrap()
	}

	fn message_body(content: &str, team: &str) -> serde_json::Value {
		serde_json::json!({
			"content": content,
			"sender": "Sales1",
			"senderRole": "officer",
			"team": team,
		})
	}

	#[tokio::test]
	async fn test_post_then_get_messages() {
		let app = create_router(test_state().await);

		let response = app
			.clone()
			.oneshot(post_json(
				"/api/threads/HPR85/messages",
				message_body("Need payslips", "sales"),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::CREATED);
		let created = body_json(response).await;
		assert_eq!(created["canonicalThreadId"], "HPR85");

		// A variation of the same identifier reads the same thread.
		let response = app
			.oneshot(get("/api/threads/85/messages"))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let body = body_json(response).await;
		assert_eq!(body["messages"].as_array().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_get_messages_unknown_thread_is_empty() {
		let app = create_router(test_state().await);
		let response = app
			.oneshot(get("/api/threads/HPR77/messages"))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let body = body_json(response).await;
		assert!(body["messages"].as_array().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_post_blank_identifier_rejected() {
		let app = create_router(test_state().await);
		let response = app
			.oneshot(post_json(
				"/api/threads/%20%20/messages",
				message_body("hello", "sales"),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_post_contaminated_payload_conflicts() {
		let app = create_router(test_state().await);
		let mut body = message_body("hello", "sales");
		body["declaredThreadId"] = serde_json::json!("HPR99");

		let response = app
			.oneshot(post_json("/api/threads/HPR85/messages", body))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::CONFLICT);
		let body = body_json(response).await;
		assert_eq!(body["error"], "contamination_detected");
	}

	#[tokio::test]
	async fn test_mark_thread_and_get_metadata() {
		let app = create_router(test_state().await);
		app.clone()
			.oneshot(post_json(
				"/api/threads/HPR85/messages",
				message_body("Need payslips", "sales"),
			))
			.await
			.unwrap();

		let response = app
			.clone()
			.oneshot(post_json(
				"/api/threads/85/mark",
				serde_json::json!({ "markedFor": "credit" }),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let thread = body_json(response).await;
		assert_eq!(thread["markedFor"], "credit");

		let response = app.oneshot(get("/api/threads/HPR85")).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn test_mark_unknown_thread_not_found() {
		let app = create_router(test_state().await);
		let response = app
			.oneshot(post_json(
				"/api/threads/HPR77/mark",
				serde_json::json!({ "markedFor": "both" }),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn test_publish_resolved_update() {
		let app = create_router(test_state().await);
		app.clone()
			.oneshot(post_json(
				"/api/threads/HPR85/messages",
				message_body("Need payslips", "sales"),
			))
			.await
			.unwrap();

		let response = app
			.oneshot(post_json(
				"/api/threads/HPR85/updates",
				serde_json::json!({ "action": "resolved", "broadcastTo": "ops" }),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let event = body_json(response).await;
		assert_eq!(event["kind"], "query_update");
		assert_eq!(event["broadcast"], true);
	}

	#[tokio::test]
	async fn test_publish_message_added_update_rejected() {
		let app = create_router(test_state().await);
		let response = app
			.oneshot(post_json(
				"/api/threads/HPR85/updates",
				serde_json::json!({ "action": "message_added" }),
			))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_poll_events_since() {
		let app = create_router(test_state().await);
		let before = Utc::now() - chrono::Duration::seconds(1);
		app.clone()
			.oneshot(post_json(
				"/api/threads/HPR85/messages",
				message_body("Need payslips", "sales"),
			))
			.await
			.unwrap();

		let uri = format!(
			"/api/events?since={}",
			before.to_rfc3339().replace('+', "%2B")
		);
		let response = app.oneshot(get(&uri)).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let body = body_json(response).await;
		// One created event and one message_added event.
		assert_eq!(body["events"].as_array().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_stream_invalid_channel_rejected() {
		let app = create_router(test_state().await);
		let response = app
			.oneshot(get("/api/events/stream?channel=finance"))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_repair_endpoint_returns_report() {
		let app = create_router(test_state().await);
		app.clone()
			.oneshot(post_json(
				"/api/threads/HPR85/messages",
				message_body("Need payslips", "sales"),
			))
			.await
			.unwrap();

		let response = app
			.oneshot(
				Request::builder()
					.method("POST")
					.uri("/api/admin/repair")
					.body(Body::empty())
					.unwrap(),
			)
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let report: RepairReport = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(report.processed, 1);
		assert_eq!(report.orphaned, 0);
	}

	#[tokio::test]
	async fn test_health() {
		let app = create_router(test_state().await);
		let response = app.oneshot(get("/health")).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}
}
