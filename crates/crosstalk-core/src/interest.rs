// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Interested-team computation.
//!
//! Shared by the server (deciding which broadcast channels an event is sent
//! to) and the client router (deciding which subscriber lists fire), so the
//! two can never disagree.
//!
//! Two modes:
//!
//! - **broadcast**: the interested set is exactly the event's explicit
//!   target team, plus `all`. Broadcast exists so a reply from one team can
//!   be pushed to a third, uninvolved team without that team owning or
//!   being marked for the thread.
//! - **ownership-derived**: the thread's marked-for team(s) (the `both`
//!   sentinel expanded), the owning team, plus `all`.

use std::collections::BTreeSet;

use crate::event::QueryUpdate;
use crate::model::Channel;

/// Computes the set of channels that must observe an update.
pub fn interested_channels(update: &QueryUpdate) -> BTreeSet<Channel> {
	let mut channels = BTreeSet::new();
	channels.insert(Channel::All);
	if update.broadcast {
		channels.insert(Channel::Team(update.team));
	} else {
		for team in update.marked_for_team.expand() {
			channels.insert(Channel::Team(team));
		}
		channels.insert(Channel::Team(update.team));
	}
	channels
}
