// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The Crosstalk client: thread reads and writes over HTTP, plus managed
//! subscriptions with automatic transport lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crosstalk_common_http::RetryConfig;
use crosstalk_core::event::{UpdateAction, UpdateEvent};
use crosstalk_core::model::{Channel, MarkedFor, Message, SenderRole, Team, Thread};

use crate::error::{ClientError, Result};
use crate::router::{EventCallback, NotificationRouter, SubscriptionHandle};
use crate::transport::{DualTransport, TransportConfig};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A message to append to a thread.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
	pub content: String,
	pub sender: String,
	pub sender_role: SenderRole,
	pub team: Team,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub declared_thread_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MessagesPage {
	messages: Vec<Message>,
}

/// Builder for [`CrosstalkClient`].
pub struct CrosstalkClientBuilder {
	base_url: Option<String>,
	channel: Channel,
	timeout: Duration,
	transport: TransportConfig,
	retry: RetryConfig,
}

impl CrosstalkClientBuilder {
	/// Base URL of the synchronization server, e.g. `http://localhost:8385`.
	pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
		self.base_url = Some(base_url.into());
		self
	}

	/// Delivery channel the push connection attaches to. Defaults to `all`.
	pub fn channel(mut self, channel: Channel) -> Self {
		self.channel = channel;
		self
	}

	/// Request timeout for plain HTTP calls.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Fixed delay between push reconnection attempts.
	pub fn reconnect_delay(mut self, delay: Duration) -> Self {
		self.transport.reconnect_delay = delay;
		self
	}

	/// Fixed polling interval used while the push channel is down.
	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.transport.poll_interval = interval;
		self
	}

	/// Retry policy for idempotent reads.
	pub fn retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;
		self
	}

	pub fn build(self) -> Result<CrosstalkClient> {
		let base_url = self
			.base_url
			.ok_or_else(|| ClientError::InvalidConfig("base_url is required".to_string()))?;
		let base_url = base_url.trim_end_matches('/').to_string();
		if base_url.is_empty() {
			return Err(ClientError::InvalidConfig("base_url is empty".to_string()));
		}

		let http = crosstalk_common_http::builder()
			.timeout(self.timeout)
			.build()
			.map_err(ClientError::ConnectionFailed)?;

		Ok(CrosstalkClient {
			base_url,
			channel: self.channel,
			http,
			retry: self.retry,
			transport_config: self.transport,
			router: Arc::new(NotificationRouter::new()),
			transport: tokio::sync::Mutex::new(DualTransport::new()),
		})
	}
}

/// Client for the Crosstalk synchronization server.
pub struct CrosstalkClient {
	base_url: String,
	channel: Channel,
	http: reqwest::Client,
	retry: RetryConfig,
	transport_config: TransportConfig,
	router: Arc<NotificationRouter>,
	transport: tokio::sync::Mutex<DualTransport>,
}

impl CrosstalkClient {
	pub fn builder() -> CrosstalkClientBuilder {
		CrosstalkClientBuilder {
			base_url: None,
			channel: Channel::All,
			timeout: DEFAULT_TIMEOUT,
			transport: TransportConfig::default(),
			retry: RetryConfig::default(),
		}
	}

	fn thread_url(&self, thread_id: &str, tail: Option<&str>) -> Result<reqwest::Url> {
		let mut url = reqwest::Url::parse(&self.base_url)
			.map_err(|e| ClientError::InvalidConfig(format!("bad base_url: {e}")))?;
		{
			let mut segments = url
				.path_segments_mut()
				.map_err(|_| ClientError::InvalidConfig("base_url cannot be a base".to_string()))?;
			segments.extend(["api", "threads", thread_id]);
			if let Some(tail) = tail {
				segments.push(tail);
			}
		}
		Ok(url)
	}

	async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
		if response.status().is_success() {
			Ok(response)
		} else {
			Err(ClientError::ServerError {
				status: response.status().as_u16(),
				message: response.text().await.unwrap_or_default(),
			})
		}
	}

	/// Fetches the merged, deduplicated, time-ordered messages of a thread.
	///
	/// Reads are idempotent and retried on transient failure.
	#[instrument(skip(self), fields(thread_id = %thread_id))]
	pub async fn messages(&self, thread_id: &str) -> Result<Vec<Message>> {
		let url = self.thread_url(thread_id, Some("messages"))?;
		let page: MessagesPage = crosstalk_common_http::retry(&self.retry, || async {
			let response = self.http.get(url.clone()).send().await?;
			Self::check(response)
				.await?
				.json()
				.await
				.map_err(ClientError::ConnectionFailed)
		})
		.await?;
		debug!(count = page.messages.len(), "fetched thread messages");
		Ok(page.messages)
	}

	/// Appends a message to a thread. Not retried; writes are not
	/// idempotent.
	#[instrument(skip(self, message), fields(thread_id = %thread_id, team = %message.team))]
	pub async fn post_message(&self, thread_id: &str, message: &NewMessage) -> Result<Message> {
		let url = self.thread_url(thread_id, Some("messages"))?;
		let response = self.http.post(url).json(message).send().await?;
		let created: Message = Self::check(response).await?.json().await?;
		info!(message_id = %created.id, "message posted");
		Ok(created)
	}

	/// Fetches thread metadata (canonical id, variations, marking).
	#[instrument(skip(self), fields(thread_id = %thread_id))]
	pub async fn thread(&self, thread_id: &str) -> Result<Thread> {
		let url = self.thread_url(thread_id, None)?;
		crosstalk_common_http::retry(&self.retry, || async {
			let response = self.http.get(url.clone()).send().await?;
			Self::check(response)
				.await?
				.json()
				.await
				.map_err(ClientError::ConnectionFailed)
		})
		.await
	}

	/// Changes which teams a thread is marked for.
	#[instrument(skip(self), fields(thread_id = %thread_id, marked_for = %marked_for))]
	pub async fn mark_thread(&self, thread_id: &str, marked_for: MarkedFor) -> Result<Thread> {
		let url = self.thread_url(thread_id, Some("mark"))?;
		let response = self
			.http
			.post(url)
			.json(&serde_json::json!({ "markedFor": marked_for }))
			.send()
			.await?;
		Self::check(response).await?.json().await.map_err(Into::into)
	}

	/// Publishes a thread status change (resolved, reopened, ...),
	/// optionally broadcast to one team regardless of marking.
	#[instrument(skip(self), fields(thread_id = %thread_id, ?action))]
	pub async fn publish_update(
		&self,
		thread_id: &str,
		action: UpdateAction,
		broadcast_to: Option<Team>,
	) -> Result<UpdateEvent> {
		let url = self.thread_url(thread_id, Some("updates"))?;
		let response = self
			.http
			.post(url)
			.json(&serde_json::json!({
				"action": action,
				"broadcastTo": broadcast_to,
			}))
			.send()
			.await?;
		Self::check(response).await?.json().await.map_err(Into::into)
	}

	/// Registers a callback for update events on one channel.
	///
	/// The first registration starts the dual transport; events then flow
	/// over push with polling fallback until the last registration is
	/// removed.
	pub async fn subscribe(
		&self,
		channel: Channel,
		callback: EventCallback,
	) -> SubscriptionHandle {
		let (handle, first) = self.router.subscribe(channel, callback);
		if first {
			info!(channel = %self.channel, "first subscription, starting transport");
			self.transport
				.lock()
				.await
				.start(
					self.base_url.clone(),
					self.channel,
					Arc::clone(&self.router),
					self.transport_config.clone(),
				)
				.await;
		}
		handle
	}

	/// Removes a registration; stops the transport when it was the last
	/// one.
	pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
		let (removed, now_empty) = self.router.unsubscribe(handle);
		if removed && now_empty {
			info!("last subscription removed, stopping transport");
			self.transport.lock().await.stop().await;
		}
	}

	/// True while the push channel is live; false means updates arrive via
	/// polling.
	pub async fn is_push_connected(&self) -> bool {
		self.transport.lock().await.is_push_connected()
	}

	/// Stops the transport regardless of remaining registrations.
	pub async fn shutdown(&self) {
		self.transport.lock().await.stop().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{body_partial_json, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn sample_message() -> serde_json::Value {
		serde_json::json!({
			"id": "msg_1",
			"content": "Need payslips",
			"sender": "Sales1",
			"senderRole": "officer",
			"team": "sales",
			"timestamp": Utc::now().to_rfc3339(),
			"canonicalThreadId": "HPR85",
			"rawThreadId": "85",
			"isolationKey": null,
			"threadIsolated": false,
		})
	}

	fn client(server: &MockServer) -> CrosstalkClient {
		CrosstalkClient::builder()
			.base_url(server.uri())
			.retry(RetryConfig {
				max_attempts: 2,
				delay: Duration::from_millis(1),
			})
			.build()
			.unwrap()
	}

	#[test]
	fn test_builder_requires_base_url() {
		assert!(matches!(
			CrosstalkClient::builder().build(),
			Err(ClientError::InvalidConfig(_))
		));
	}

	#[tokio::test]
	async fn test_messages_fetch() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/threads/HPR85/messages"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"messages": [sample_message()],
			})))
			.mount(&server)
			.await;

		let messages = client(&server).messages("HPR85").await.unwrap();
		assert_eq!(messages.len(), 1);
		assert_eq!(messages[0].canonical_thread_id, "HPR85");
	}

	#[tokio::test]
	async fn test_messages_retries_transient_failure() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/threads/HPR85/messages"))
			.respond_with(ResponseTemplate::new(500))
			.up_to_n_times(1)
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path("/api/threads/HPR85/messages"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"messages": [],
			})))
			.mount(&server)
			.await;

		let messages = client(&server).messages("HPR85").await.unwrap();
		assert!(messages.is_empty());
	}

	#[tokio::test]
	async fn test_post_message() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/threads/HPR85/messages"))
			.and(body_partial_json(serde_json::json!({
				"content": "Need payslips",
				"team": "sales",
			})))
			.respond_with(ResponseTemplate::new(201).set_body_json(sample_message()))
			.mount(&server)
			.await;

		let created = client(&server)
			.post_message(
				"HPR85",
				&NewMessage {
					content: "Need payslips".to_string(),
					sender: "Sales1".to_string(),
					sender_role: SenderRole::Officer,
					team: Team::Sales,
					declared_thread_id: None,
					timestamp: None,
				},
			)
			.await
			.unwrap();
		assert_eq!(created.id, "msg_1");
	}

	#[tokio::test]
	async fn test_contamination_conflict_surfaces_as_server_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/threads/HPR85/messages"))
			.respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
				"error": "contamination_detected",
				"message": "payload declares thread \"HPR99\" but targets \"HPR85\"",
			})))
			.mount(&server)
			.await;

		let err = client(&server)
			.post_message(
				"HPR85",
				&NewMessage {
					content: "misfiled".to_string(),
					sender: "Sales1".to_string(),
					sender_role: SenderRole::Officer,
					team: Team::Sales,
					declared_thread_id: Some("HPR99".to_string()),
					timestamp: None,
				},
			)
			.await
			.unwrap_err();
		assert!(matches!(err, ClientError::ServerError { status: 409, .. }));
	}

	#[tokio::test]
	async fn test_publish_update_broadcast() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/api/threads/HPR85/updates"))
			.and(body_partial_json(serde_json::json!({
				"action": "resolved",
				"broadcastTo": "ops",
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(
				UpdateEvent::query_update(
					"HPR85".to_string(),
					UpdateAction::Resolved,
					Team::Ops,
					MarkedFor::Both,
					true,
					None,
				),
			))
			.mount(&server)
			.await;

		let event = client(&server)
			.publish_update("HPR85", UpdateAction::Resolved, Some(Team::Ops))
			.await
			.unwrap();
		assert_eq!(event.kind(), "query_update");
	}

	#[tokio::test]
	async fn test_thread_id_with_spaces_is_encoded() {
		let server = MockServer::start().await;
		// The raw identifier's spaces must arrive percent-encoded.
		Mock::given(method("GET"))
			.and(path("/api/threads/loan%20file%2085/messages"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"messages": [],
			})))
			.mount(&server)
			.await;

		let messages = client(&server).messages("loan file 85").await.unwrap();
		assert!(messages.is_empty());
	}

	#[tokio::test]
	async fn test_subscription_lifecycle_starts_and_stops_transport() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/api/events"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"events": [],
				"now": Utc::now().to_rfc3339(),
			})))
			.mount(&server)
			.await;

		let client = client(&server);
		let handle = client
			.subscribe(Channel::All, Arc::new(|_event: &UpdateEvent| {}))
			.await;
		assert_eq!(client.router.subscription_count(), 1);

		let second = client
			.subscribe(Channel::Team(Team::Sales), Arc::new(|_event: &UpdateEvent| {}))
			.await;
		assert_eq!(client.router.subscription_count(), 2);

		client.unsubscribe(handle).await;
		client.unsubscribe(second).await;
		assert_eq!(client.router.subscription_count(), 0);
		assert!(!client.is_push_connected().await);
	}
}
