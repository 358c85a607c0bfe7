// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side notification router.
//!
//! An explicit callback registry keyed by delivery channel. Events arriving
//! over either transport are dispatched to every interested callback in
//! registration order; a panicking callback is isolated and logged, and the
//! remaining callbacks still run.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crosstalk_core::event::UpdateEvent;
use crosstalk_core::interest::interested_channels;
use crosstalk_core::model::Channel;

/// A registered event callback.
pub type EventCallback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Identifies one registration, for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
	channel: Channel,
	id: u64,
}

impl SubscriptionHandle {
	pub fn channel(&self) -> Channel {
		self.channel
	}
}

struct Registration {
	id: u64,
	callback: EventCallback,
}

struct RouterInner {
	subscriptions: BTreeMap<Channel, Vec<Registration>>,
	next_id: u64,
}

/// Ordered callback registry keyed by delivery channel.
pub struct NotificationRouter {
	inner: Mutex<RouterInner>,
}

impl NotificationRouter {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(RouterInner {
				subscriptions: BTreeMap::new(),
				next_id: 0,
			}),
		}
	}

	/// Registers a callback on one channel.
	///
	/// Returns the handle and whether this was the first registration
	/// overall (the caller starts the transport on that transition).
	pub fn subscribe(&self, channel: Channel, callback: EventCallback) -> (SubscriptionHandle, bool) {
		let mut inner = self.inner.lock().expect("router lock poisoned");
		let was_empty = inner.subscriptions.values().all(Vec::is_empty);
		let id = inner.next_id;
		inner.next_id += 1;
		inner
			.subscriptions
			.entry(channel)
			.or_default()
			.push(Registration { id, callback });
		debug!(channel = %channel, id, "callback registered");
		(SubscriptionHandle { channel, id }, was_empty)
	}

	/// Removes a registration.
	///
	/// Returns whether the handle was known, and whether the registry is now
	/// empty (the caller stops the transport on that transition).
	pub fn unsubscribe(&self, handle: SubscriptionHandle) -> (bool, bool) {
		let mut inner = self.inner.lock().expect("router lock poisoned");
		let mut removed = false;
		if let Some(registrations) = inner.subscriptions.get_mut(&handle.channel) {
			let before = registrations.len();
			registrations.retain(|r| r.id != handle.id);
			removed = registrations.len() < before;
		}
		let now_empty = inner.subscriptions.values().all(Vec::is_empty);
		if removed {
			debug!(channel = %handle.channel, id = handle.id, "callback removed");
		}
		(removed, now_empty)
	}

	/// Number of live registrations across all channels.
	pub fn subscription_count(&self) -> usize {
		let inner = self.inner.lock().expect("router lock poisoned");
		inner.subscriptions.values().map(Vec::len).sum()
	}

	/// Dispatches one event to every interested callback, in registration
	/// order.
	///
	/// `connected` and `heartbeat` frames go to every registration;
	/// `query_update` events go to the channels the routing rules name.
	/// Callbacks run outside the registry lock, so a callback may itself
	/// subscribe or unsubscribe.
	pub fn dispatch(&self, event: &UpdateEvent) {
		let callbacks: Vec<(u64, EventCallback)> = {
			let inner = self.inner.lock().expect("router lock poisoned");
			let mut selected = Vec::new();
			match event {
				UpdateEvent::QueryUpdate(update) => {
					let targets = interested_channels(update);
					for (channel, registrations) in &inner.subscriptions {
						if !targets.contains(channel) {
							continue;
						}
						for r in registrations {
							selected.push((r.id, Arc::clone(&r.callback)));
						}
					}
				}
				UpdateEvent::Connected { .. } | UpdateEvent::Heartbeat { .. } => {
					for registrations in inner.subscriptions.values() {
						for r in registrations {
							selected.push((r.id, Arc::clone(&r.callback)));
						}
					}
				}
			}
			selected
		};

		let mut ordered = callbacks;
		ordered.sort_by_key(|(id, _)| *id);

		for (id, callback) in ordered {
			if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
				warn!(
					id,
					kind = event.kind(),
					"event callback panicked; continuing with remaining callbacks"
				);
			}
		}
	}
}

impl Default for NotificationRouter {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crosstalk_core::event::UpdateAction;
	use crosstalk_core::model::{MarkedFor, Team};

	fn update(team: Team, marked_for: MarkedFor, broadcast: bool) -> UpdateEvent {
		UpdateEvent::query_update(
			"HPR85".to_string(),
			UpdateAction::MessageAdded,
			team,
			marked_for,
			broadcast,
			None,
		)
	}

	fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> EventCallback {
		let log = Arc::clone(log);
		let label = label.to_string();
		Arc::new(move |_event| {
			log.lock().unwrap().push(label.clone());
		})
	}

	#[test]
	fn test_first_and_last_registration_transitions() {
		let router = NotificationRouter::new();
		let log = Arc::new(Mutex::new(Vec::new()));

		let (a, first) = router.subscribe(Channel::All, recorder(&log, "a"));
		assert!(first);
		let (b, first) = router.subscribe(Channel::Team(Team::Sales), recorder(&log, "b"));
		assert!(!first);

		let (removed, empty) = router.unsubscribe(a);
		assert!(removed && !empty);
		let (removed, empty) = router.unsubscribe(b);
		assert!(removed && empty);

		// Unknown handle is a no-op.
		let (removed, empty) = router.unsubscribe(b);
		assert!(!removed && empty);
	}

	#[test]
	fn test_dispatch_in_registration_order_across_channels() {
		let router = NotificationRouter::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		router.subscribe(Channel::Team(Team::Sales), recorder(&log, "sales"));
		router.subscribe(Channel::All, recorder(&log, "all"));
		router.subscribe(Channel::Team(Team::Sales), recorder(&log, "sales2"));

		router.dispatch(&update(Team::Sales, MarkedFor::Team(Team::Sales), false));

		assert_eq!(*log.lock().unwrap(), vec!["sales", "all", "sales2"]);
	}

	#[test]
	fn test_unmarked_channel_not_dispatched() {
		let router = NotificationRouter::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		router.subscribe(Channel::Team(Team::Ops), recorder(&log, "ops"));

		router.dispatch(&update(Team::Sales, MarkedFor::Both, false));
		assert!(log.lock().unwrap().is_empty());

		// Broadcast targeting ops does reach it.
		router.dispatch(&update(Team::Ops, MarkedFor::Both, true));
		assert_eq!(*log.lock().unwrap(), vec!["ops"]);
	}

	#[test]
	fn test_heartbeat_reaches_every_channel() {
		let router = NotificationRouter::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		router.subscribe(Channel::Team(Team::Ops), recorder(&log, "ops"));
		router.subscribe(Channel::Team(Team::Sales), recorder(&log, "sales"));

		router.dispatch(&UpdateEvent::heartbeat());
		assert_eq!(log.lock().unwrap().len(), 2);
	}

	#[test]
	fn test_panicking_callback_is_isolated() {
		let router = NotificationRouter::new();
		let log = Arc::new(Mutex::new(Vec::new()));
		router.subscribe(Channel::All, recorder(&log, "before"));
		router.subscribe(
			Channel::All,
			Arc::new(|_event: &UpdateEvent| panic!("callback bug")),
		);
		router.subscribe(Channel::All, recorder(&log, "after"));

		router.dispatch(&update(Team::Sales, MarkedFor::Both, false));

		assert_eq!(*log.lock().unwrap(), vec!["before", "after"]);
	}

	#[test]
	fn test_callback_can_unsubscribe_itself() {
		let router = Arc::new(NotificationRouter::new());
		let log = Arc::new(Mutex::new(Vec::new()));

		let handle_slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
		let (handle, _) = {
			let router_in_cb = Arc::clone(&router);
			let slot = Arc::clone(&handle_slot);
			let log = Arc::clone(&log);
			router.subscribe(
				Channel::All,
				Arc::new(move |_event| {
					log.lock().unwrap().push("once".to_string());
					if let Some(handle) = slot.lock().unwrap().take() {
						router_in_cb.unsubscribe(handle);
					}
				}),
			)
		};
		*handle_slot.lock().unwrap() = Some(handle);

		router.dispatch(&update(Team::Sales, MarkedFor::Both, false));
		router.dispatch(&update(Team::Sales, MarkedFor::Both, false));

		assert_eq!(*log.lock().unwrap(), vec!["once"]);
	}
}
