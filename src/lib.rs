// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `homie_discovery` - discover Homie convention devices over MQTT.
//!
//! Devices following the [Homie convention](https://homieiot.github.io/)
//! describe themselves with retained MQTT topics. This library subscribes to
//! those topics and maintains a live `Device → Node → Property` graph, and
//! tells consumers when each entity is fully described.
//!
//! # Features
//!
//! - **Staged discovery**: every entity moves from `Discovering` to
//!   `ChildrenReady` to `Ready`, whatever order the retained messages arrive in
//! - **Change notifications**: per-attribute listeners on every entity
//! - **Commands**: publish to settable properties with [`Property::set_state`]
//! - **Transports**: an in-process [`MemoryBroker`] and, with the `mqtt`
//!   feature (on by default), an [`MqttTransport`] built on `rumqttc`
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use homie_discovery::{DiscoveryConfig, HomieDiscovery, MqttTransport, Stage};
//!
//! #[tokio::main]
//! async fn main() -> homie_discovery::Result<()> {
//!     let transport = MqttTransport::builder()
//!         .host("192.168.1.50")
//!         .port(1883)
//!         .build()
//!         .await?;
//!
//!     let discovery = HomieDiscovery::new(Arc::new(transport), DiscoveryConfig::default());
//!     discovery.on_device_stage_change(|device, stage| {
//!         if stage == Stage::Ready {
//!             println!("{} is ready with {} nodes", device.id(), device.nodes().len());
//!         }
//!     });
//!     discovery.start()?;
//!
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Sending a Command
//!
//! ```no_run
//! # fn example(discovery: &homie_discovery::HomieDiscovery) -> homie_discovery::Result<()> {
//! if let Some(device) = discovery.device("dev1") {
//!     if let Some(node) = device.node("light") {
//!         let power = node.require_property("light", "power")?;
//!         power.set_state("true")?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod discovery;
pub mod error;
pub mod event;
pub mod protocol;

pub use discovery::{
    AttributeChange, AttributeFilter, ConventionVersion, Device, DeviceAttribute,
    DiscoveryConfig, HomieDiscovery, Node, NodeAttribute, Property, PropertyAttribute, Stage,
    StageFilter,
};
pub use error::{Error, ParseError, ProtocolError, Result};
pub use event::{DiscoveryEvent, EventBus};
#[cfg(feature = "mqtt")]
pub use protocol::{MqttTransport, MqttTransportBuilder, MqttTransportConfig};
pub use protocol::{MemoryBroker, Message, QoS, Transport};
