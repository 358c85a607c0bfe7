// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Broadcast hub for pushing query updates to connected SSE clients.
//!
//! One tokio broadcast channel per delivery channel (a team, or `all`).
//! Publishing a query update fans it out to every channel the routing
//! rules say is interested; subscribers attach to exactly one delivery
//! channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crosstalk_core::event::{QueryUpdate, UpdateEvent};
use crosstalk_core::interest::interested_channels;
use crosstalk_core::model::Channel;

/// Default capacity of each delivery channel.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Default heartbeat interval in seconds.
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Configuration for the update broadcaster.
#[derive(Debug, Clone)]
pub struct UpdateBroadcasterConfig {
	/// Capacity of each broadcast channel.
	pub channel_capacity: usize,
	/// Heartbeat interval for keep-alive.
	pub heartbeat_interval: Duration,
}

impl Default for UpdateBroadcasterConfig {
	fn default() -> Self {
		Self {
			channel_capacity: DEFAULT_CHANNEL_CAPACITY,
			heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
		}
	}
}

/// Statistics for one delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
	/// Number of active receivers.
	pub receiver_count: usize,
	/// When the channel was created.
	pub created_at: DateTime<Utc>,
}

struct ChannelState {
	sender: broadcast::Sender<UpdateEvent>,
	created_at: DateTime<Utc>,
}

/// Fans query updates out to connected clients, one broadcast channel per
/// delivery channel.
pub struct UpdateBroadcaster {
	config: UpdateBroadcasterConfig,
	channels: RwLock<HashMap<Channel, ChannelState>>,
	total_events: AtomicU64,
	total_connections: AtomicU64,
}

impl UpdateBroadcaster {
	pub fn new(config: UpdateBroadcasterConfig) -> Self {
		Self {
			config,
			channels: RwLock::new(HashMap::new()),
			total_events: AtomicU64::new(0),
			total_connections: AtomicU64::new(0),
		}
	}

	pub fn with_defaults() -> Self {
		Self::new(UpdateBroadcasterConfig::default())
	}

	/// Subscribes to one delivery channel, creating it on first use.
	pub async fn subscribe(&self, channel: Channel) -> broadcast::Receiver<UpdateEvent> {
		{
			let channels = self.channels.read().await;
			if let Some(state) = channels.get(&channel) {
				self.total_connections.fetch_add(1, Ordering::Relaxed);
				debug!(
					channel = %channel,
					receiver_count = state.sender.receiver_count(),
					"client subscribed to existing channel"
				);
				return state.sender.subscribe();
			}
		}

		let mut channels = self.channels.write().await;

		// Double-check in case another task created it while we waited.
		if let Some(state) = channels.get(&channel) {
			self.total_connections.fetch_add(1, Ordering::Relaxed);
			return state.sender.subscribe();
		}

		let (sender, receiver) = broadcast::channel(self.config.channel_capacity);
		channels.insert(
			channel,
			ChannelState {
				sender,
				created_at: Utc::now(),
			},
		);
		self.total_connections.fetch_add(1, Ordering::Relaxed);
		info!(channel = %channel, "created broadcast channel");
		receiver
	}

	/// Publishes a query update to every interested delivery channel.
	///
	/// Returns the number of receivers the event reached.
	pub async fn publish(&self, update: &QueryUpdate) -> usize {
		let targets = interested_channels(update);
		let event = UpdateEvent::QueryUpdate(update.clone());
		let channels = self.channels.read().await;

		let mut reached = 0;
		for target in &targets {
			let Some(state) = channels.get(target) else {
				continue;
			};
			if state.sender.receiver_count() == 0 {
				continue;
			}
			match state.sender.send(event.clone()) {
				Ok(count) => reached += count,
				Err(e) => {
					warn!(channel = %target, error = %e, "failed to broadcast update");
				}
			}
		}

		if reached > 0 {
			self.total_events.fetch_add(1, Ordering::Relaxed);
		}
		debug!(
			thread_ref = %update.thread_ref,
			action = ?update.action,
			channels = targets.len(),
			reached,
			"published query update"
		);
		reached
	}

	/// Sends a heartbeat to every connected client.
	pub async fn broadcast_heartbeat(&self) {
		let event = UpdateEvent::heartbeat();
		let channels = self.channels.read().await;
		for state in channels.values() {
			let _ = state.sender.send(event.clone());
		}
		debug!(channel_count = channels.len(), "broadcast heartbeat");
	}

	pub async fn channel_stats(&self, channel: Channel) -> Option<ChannelStats> {
		let channels = self.channels.read().await;
		channels.get(&channel).map(|state| ChannelStats {
			receiver_count: state.sender.receiver_count(),
			created_at: state.created_at,
		})
	}

	pub async fn channel_count(&self) -> usize {
		self.channels.read().await.len()
	}

	pub async fn total_receiver_count(&self) -> usize {
		let channels = self.channels.read().await;
		channels.values().map(|s| s.sender.receiver_count()).sum()
	}

	pub fn total_events_sent(&self) -> u64 {
		self.total_events.load(Ordering::Relaxed)
	}

	pub fn total_connections(&self) -> u64 {
		self.total_connections.load(Ordering::Relaxed)
	}

	pub fn heartbeat_interval(&self) -> Duration {
		self.config.heartbeat_interval
	}

	/// Drops channels with no active receivers.
	pub async fn cleanup_empty_channels(&self) -> usize {
		let mut channels = self.channels.write().await;
		let initial_count = channels.len();

		channels.retain(|channel, state| {
			let keep = state.sender.receiver_count() > 0;
			if !keep {
				debug!(channel = %channel, "removing empty broadcast channel");
			}
			keep
		});

		let removed = initial_count - channels.len();
		if removed > 0 {
			info!(removed_channels = removed, "cleaned up empty broadcast channels");
		}
		removed
	}
}

/// Global broadcaster stats for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterStats {
	pub channel_count: usize,
	pub total_receivers: usize,
	pub total_events_sent: u64,
	pub total_connections: u64,
}

impl UpdateBroadcaster {
	pub async fn stats(&self) -> BroadcasterStats {
		BroadcasterStats {
			channel_count: self.channel_count().await,
			total_receivers: self.total_receiver_count().await,
			total_events_sent: self.total_events_sent(),
			total_connections: self.total_connections(),
		}
	}
}
