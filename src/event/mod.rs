// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broadcast of discovery events.
//!
//! [`HomieDiscovery`](crate::HomieDiscovery) publishes a [`DiscoveryEvent`]
//! for every device announcement and every stage transition it observes.
//! The [`EventBus`] uses tokio's broadcast channel so any number of tasks can
//! follow discovery without registering callbacks.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use homie_discovery::{DiscoveryConfig, DiscoveryEvent, HomieDiscovery, MemoryBroker};
//!
//! # async fn example() -> homie_discovery::Result<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! let discovery = HomieDiscovery::new(broker.clone(), DiscoveryConfig::default());
//! let mut events = discovery.subscribe();
//! discovery.start()?;
//! broker.flush();
//!
//! while let Ok(event) = events.recv().await {
//!     if let DiscoveryEvent::DeviceStageChanged { device, stage } = event {
//!         println!("{} is {stage}", device.id());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod discovery_event;
mod event_bus;

pub use discovery_event::DiscoveryEvent;
pub use event_bus::EventBus;
