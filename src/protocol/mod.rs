// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport layer used by the discovery core.
//!
//! The core only needs two operations from a transport: subscribe to a topic
//! pattern with a message handler, and publish a payload. Everything else
//! (connection management, acknowledgements, retries) belongs to the
//! transport.
//!
//! # Transports
//!
//! - [`MemoryBroker`]: in-process broker with retained messages, used for tests
//!   and for replaying a captured topic tree
//! - [`MqttTransport`]: `rumqttc` connection to a real broker (feature `mqtt`)
//!
//! # Delivery Model
//!
//! Handlers must be invoked one message at a time. A transport that receives
//! messages on several threads is responsible for serializing delivery.

mod memory;
#[cfg(feature = "mqtt")]
mod mqtt_transport;
pub mod topic;

pub use memory::{MemoryBroker, PublishedMessage};
#[cfg(feature = "mqtt")]
pub use mqtt_transport::{MqttTransport, MqttTransportBuilder, MqttTransportConfig};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// MQTT quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// At most once delivery (QoS 0).
    AtMostOnce,
    /// At least once delivery (QoS 1).
    #[default]
    AtLeastOnce,
    /// Exactly once delivery (QoS 2).
    ExactlyOnce,
}

impl QoS {
    /// Returns the numeric QoS level.
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }

    /// Returns the lower of the two levels, as a broker downgrades delivery
    /// to the subscription's QoS.
    pub(crate) fn downgrade_to(self, subscribed: QoS) -> QoS {
        if self.level() <= subscribed.level() {
            self
        } else {
            subscribed
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("invalid QoS level {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

#[cfg(feature = "mqtt")]
impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[cfg(feature = "mqtt")]
impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// A message delivered to a subscription handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The concrete topic the message was published on.
    pub topic: String,
    /// The UTF-8 payload.
    pub payload: String,
    /// The QoS the message was delivered with.
    pub qos: QoS,
    /// Whether the message came from the broker's retained store.
    pub retain: bool,
}

/// Handler invoked for every message matching a subscription.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// The transport collaborator used by the discovery core.
///
/// Both operations are fire-and-forget from the caller's perspective:
/// failures are the transport's to log or retry.
pub trait Transport: Send + Sync {
    /// Subscribes `handler` to every message whose topic matches `pattern`.
    fn subscribe(&self, pattern: &str, qos: QoS, handler: MessageHandler);

    /// Publishes `payload` on `topic`.
    fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_levels() {
        assert_eq!(QoS::AtMostOnce.level(), 0);
        assert_eq!(QoS::AtLeastOnce.level(), 1);
        assert_eq!(QoS::ExactlyOnce.level(), 2);
        assert_eq!(QoS::default(), QoS::AtLeastOnce);
    }

    #[test]
    fn qos_from_level() {
        assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
        assert!(QoS::try_from(3).is_err());
    }

    #[test]
    fn qos_deserializes_from_number() {
        let qos: QoS = serde_json::from_str("0").unwrap();
        assert_eq!(qos, QoS::AtMostOnce);
        assert!(serde_json::from_str::<QoS>("7").is_err());
    }

    #[cfg(feature = "mqtt")]
    #[test]
    fn qos_converts_to_rumqttc() {
        assert_eq!(
            rumqttc::QoS::from(QoS::ExactlyOnce),
            rumqttc::QoS::ExactlyOnce
        );
        assert_eq!(QoS::from(rumqttc::QoS::AtMostOnce), QoS::AtMostOnce);
    }

    #[test]
    fn transport_is_object_safe() {
        fn assert_object_safe(_: Option<&dyn Transport>) {}
        assert_object_safe(None);
    }
}
