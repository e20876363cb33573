// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broadcast channel carrying discovery events.

use tokio::sync::broadcast;

use super::DiscoveryEvent;

/// Fans [`DiscoveryEvent`]s out to every subscribed receiver.
///
/// The capacity comes from
/// [`DiscoveryConfig::event_capacity`](crate::DiscoveryConfig::event_capacity).
/// A receiver that falls further behind gets `RecvError::Lagged` and skips
/// the oldest events; discovery itself never waits for receivers.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DiscoveryEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per receiver.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns a receiver of every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.sender.subscribe()
    }

    /// Publishes `event`. Without receivers the event is dropped.
    pub fn publish(&self, event: DiscoveryEvent) {
        let entity = event.entity_id().to_string();
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(entity = %entity, receivers, "Discovery event sent"),
            Err(_) => tracing::trace!(entity = %entity, "No event receivers"),
        }
    }
}
