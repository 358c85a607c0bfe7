// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dual transport: an SSE push channel with a polling fallback.
//!
//! The push loop keeps an SSE connection open and reconnects after a fixed
//! delay whenever it drops. The poll loop runs on a fixed interval and only
//! issues requests while the push channel is down, carrying a high-water
//! mark so a reconnect window is replayed from the server's event log.
//! Events may be delivered twice around a failover; subscribers deduplicate
//! by event id if they care.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crosstalk_core::event::UpdateEvent;
use crosstalk_core::model::Channel;

use crate::error::{ClientError, Result};
use crate::router::NotificationRouter;

/// Configuration for both transport loops.
#[derive(Debug, Clone)]
pub struct TransportConfig {
	/// Fixed delay between push reconnection attempts.
	pub reconnect_delay: Duration,
	/// Fixed polling interval while the push channel is down.
	pub poll_interval: Duration,
}

impl Default for TransportConfig {
	fn default() -> Self {
		Self {
			reconnect_delay: Duration::from_secs(1),
			poll_interval: Duration::from_secs(5),
		}
	}
}

/// Shape of the poll endpoint response.
#[derive(Debug, Deserialize)]
struct EventsPage {
	events: Vec<UpdateEvent>,
	/// Server time of the response, the next `since` mark.
	now: DateTime<Utc>,
}

/// Push channel state. Polling is active in every state but `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportState {
	Disconnected = 0,
	Connecting = 1,
	Connected = 2,
}

impl TransportState {
	/// A connection attempt begins.
	pub fn on_connect_started(self) -> Self {
		TransportState::Connecting
	}

	/// The server's `connected` acknowledgment arrived.
	pub fn on_acknowledged(self) -> Self {
		TransportState::Connected
	}

	/// The connection dropped or failed to open.
	pub fn on_dropped(self) -> Self {
		TransportState::Disconnected
	}

	/// Whether the polling fallback should issue requests.
	pub fn polling_active(self) -> bool {
		self != TransportState::Connected
	}

	fn from_u8(raw: u8) -> Self {
		match raw {
			2 => TransportState::Connected,
			1 => TransportState::Connecting,
			_ => TransportState::Disconnected,
		}
	}
}

/// Shared, atomically updated transport state.
#[derive(Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
	fn new() -> Self {
		Self(Arc::new(AtomicU8::new(TransportState::Disconnected as u8)))
	}

	fn get(&self) -> TransportState {
		TransportState::from_u8(self.0.load(Ordering::SeqCst))
	}

	fn set(&self, state: TransportState) {
		self.0.store(state as u8, Ordering::SeqCst);
	}
}

/// Manages the push connection and its polling fallback.
pub struct DualTransport {
	state: SharedState,
	events_received: Arc<AtomicU64>,
	reconnect_attempts: Arc<AtomicU64>,
	push_handle: Option<JoinHandle<()>>,
	poll_handle: Option<JoinHandle<()>>,
	shutdown_tx: Option<mpsc::Sender<()>>,
	poll_shutdown_tx: Option<mpsc::Sender<()>>,
}

impl DualTransport {
	pub fn new() -> Self {
		Self {
			state: SharedState::new(),
			events_received: Arc::new(AtomicU64::new(0)),
			reconnect_attempts: Arc::new(AtomicU64::new(0)),
			push_handle: None,
			poll_handle: None,
			shutdown_tx: None,
			poll_shutdown_tx: None,
		}
	}

	/// Starts both loops in background tasks.
	pub async fn start(
		&mut self,
		base_url: String,
		channel: Channel,
		router: Arc<NotificationRouter>,
		config: TransportConfig,
	) {
		self.stop().await;

		let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
		let (poll_shutdown_tx, poll_shutdown_rx) = mpsc::channel::<()>(1);
		self.shutdown_tx = Some(shutdown_tx);
		self.poll_shutdown_tx = Some(poll_shutdown_tx);

		let stream_url = format!("{}/api/events/stream?channel={}", base_url, channel);
		let poll_url = format!("{}/api/events", base_url);

		let state = self.state.clone();
		let events_received = Arc::clone(&self.events_received);
		let reconnect_attempts = Arc::clone(&self.reconnect_attempts);
		let push_router = Arc::clone(&router);
		let push_config = config.clone();
		self.push_handle = Some(tokio::spawn(async move {
			run_push_loop(
				stream_url,
				push_router,
				push_config,
				state,
				events_received,
				reconnect_attempts,
				shutdown_rx,
			)
			.await;
		}));

		let state = self.state.clone();
		let events_received = Arc::clone(&self.events_received);
		self.poll_handle = Some(tokio::spawn(async move {
			run_poll_loop(
				poll_url,
				router,
				config,
				state,
				events_received,
				poll_shutdown_rx,
			)
			.await;
		}));
	}

	/// Stops both loops.
	pub async fn stop(&mut self) {
		for tx in [self.shutdown_tx.take(), self.poll_shutdown_tx.take()]
			.into_iter()
			.flatten()
		{
			let _ = tx.send(()).await;
		}
		for handle in [self.push_handle.take(), self.poll_handle.take()]
			.into_iter()
			.flatten()
		{
			handle.abort();
			let _ = handle.await;
		}
		self.state.set(TransportState::Disconnected);
	}

	/// Current push channel state.
	pub fn state(&self) -> TransportState {
		self.state.get()
	}

	/// True while the push channel is live.
	pub fn is_push_connected(&self) -> bool {
		self.state.get() == TransportState::Connected
	}

	/// True while the transport is falling back to polling.
	pub fn is_polling_active(&self) -> bool {
		self.state.get().polling_active()
	}

	pub fn events_received(&self) -> u64 {
		self.events_received.load(Ordering::SeqCst)
	}

	pub fn reconnect_attempts(&self) -> u64 {
		self.reconnect_attempts.load(Ordering::SeqCst)
	}
}

impl Default for DualTransport {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for DualTransport {
	fn drop(&mut self) {
		for handle in [self.push_handle.take(), self.poll_handle.take()]
			.into_iter()
			.flatten()
		{
			handle.abort();
		}
	}
}

/// Keeps the push channel open, reconnecting after a fixed delay.
async fn run_push_loop(
	stream_url: String,
	router: Arc<NotificationRouter>,
	config: TransportConfig,
	state: SharedState,
	events_received: Arc<AtomicU64>,
	reconnect_attempts: Arc<AtomicU64>,
	mut shutdown_rx: mpsc::Receiver<()>,
) {
	loop {
		if shutdown_rx.try_recv().is_ok() {
			info!("push loop received shutdown signal");
			break;
		}

		info!(url = %stream_url, "connecting to event stream");
		state.set(state.get().on_connect_started());

		match connect_and_process(&stream_url, &router, &state, &events_received).await {
			Ok(()) => {
				debug!("event stream ended normally");
			}
			Err(e) => {
				error!(error = %e, "push connection error");
			}
		}

		state.set(state.get().on_dropped());
		reconnect_attempts.fetch_add(1, Ordering::SeqCst);

		// Fixed delay; worst-case latency matters more here than request
		// volume, so no backoff.
		warn!(
			delay_ms = config.reconnect_delay.as_millis(),
			"reconnecting to event stream"
		);
		tokio::select! {
			_ = tokio::time::sleep(config.reconnect_delay) => {}
			_ = shutdown_rx.recv() => {
				info!("push loop received shutdown signal during reconnect wait");
				break;
			}
		}
	}
}

/// Connects to the SSE stream and dispatches frames until disconnection.
async fn connect_and_process(
	stream_url: &str,
	router: &Arc<NotificationRouter>,
	state: &SharedState,
	events_received: &Arc<AtomicU64>,
) -> Result<()> {
	let client = crosstalk_common_http::builder()
		.build()
		.map_err(ClientError::ConnectionFailed)?;

	let response = client
		.get(stream_url)
		.header("Accept", "text/event-stream")
		.header("Cache-Control", "no-cache")
		.send()
		.await
		.map_err(ClientError::ConnectionFailed)?;

	if !response.status().is_success() {
		return Err(ClientError::ServerError {
			status: response.status().as_u16(),
			message: response.text().await.unwrap_or_default(),
		});
	}

	let mut event_stream = response.bytes_stream().eventsource();

	while let Some(event_result) = event_stream.next().await {
		match event_result {
			Ok(frame) => {
				if frame.data.is_empty() {
					continue;
				}
				let event: UpdateEvent = match serde_json::from_str(&frame.data) {
					Ok(event) => event,
					Err(e) => {
						warn!(data = %frame.data, error = %e, "failed to parse stream frame");
						continue;
					}
				};
				events_received.fetch_add(1, Ordering::SeqCst);

				// The connected acknowledgment is the liveness signal that
				// pauses polling.
				if matches!(event, UpdateEvent::Connected { .. }) {
					state.set(state.get().on_acknowledged());
					info!("push channel acknowledged");
				}

				router.dispatch(&event);
			}
			Err(e) => {
				return Err(ClientError::StreamError(e.to_string()));
			}
		}
	}

	Ok(())
}

/// Polls for missed events while the push channel is down.
///
/// The high-water mark advances to the server's own clock, and only after
/// a non-empty delivery; an empty response leaves it untouched so an
/// append racing the poll is picked up next round. A replayed window may
/// overlap with frames the push channel already delivered.
async fn run_poll_loop(
	poll_url: String,
	router: Arc<NotificationRouter>,
	config: TransportConfig,
	state: SharedState,
	events_received: Arc<AtomicU64>,
	mut shutdown_rx: mpsc::Receiver<()>,
) {
	let client = crosstalk_common_http::new_client();
	let mut mark: DateTime<Utc> = Utc::now();
	let mut ticker = tokio::time::interval(config.poll_interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

	loop {
		tokio::select! {
			_ = ticker.tick() => {}
			_ = shutdown_rx.recv() => {
				info!("poll loop received shutdown signal");
				break;
			}
		}

		if !state.get().polling_active() {
			continue;
		}

		match poll_once(&client, &poll_url, mark).await {
			Ok(page) => {
				let count = page.events.len();
				for event in &page.events {
					events_received.fetch_add(1, Ordering::SeqCst);
					router.dispatch(event);
				}
				if count > 0 {
					mark = page.now;
					debug!(count, "delivered polled events");
				}
			}
			Err(e) => {
				// Keep the fixed cadence; the mark stays put so nothing is
				// skipped.
				warn!(error = %e, "poll request failed");
			}
		}
	}
}

async fn poll_once(
	client: &reqwest::Client,
	poll_url: &str,
	since: DateTime<Utc>,
) -> Result<EventsPage> {
	let response = client
		.get(poll_url)
		.query(&[("since", since.to_rfc3339())])
		.send()
		.await
		.map_err(ClientError::ConnectionFailed)?;

	if !response.status().is_success() {
		return Err(ClientError::ServerError {
			status: response.status().as_u16(),
			message: response.text().await.unwrap_or_default(),
		});
	}

	response
		.json()
		.await
		.map_err(ClientError::ConnectionFailed)
}
