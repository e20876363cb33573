// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `homie_discovery` library.
//!
//! Discovery itself is tolerant of a noisy bus: malformed topics, unsupported
//! convention versions and duplicate announcements are logged and skipped.
//! The types here cover the cases that indicate a consumer bug or a broken
//! transport rather than bus noise.

use thiserror::Error;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// A node was asked for a property it does not have.
    #[error("Homie {platform} {entity_id} doesn't have a {property_id} property")]
    MissingProperty {
        /// The consumer platform that required the property (e.g. `light`).
        platform: String,
        /// Entity id of the node that was queried.
        entity_id: String,
        /// The missing property id.
        property_id: String,
    },

    /// A command was sent to a property that is not settable.
    #[error("property {entity_id} is not settable")]
    NotSettable {
        /// Entity id of the property.
        entity_id: String,
    },

    /// Discovery was started more than once.
    #[error("discovery has already been started")]
    AlreadyStarted,

    /// Error occurred in the transport.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing a topic, payload or configuration value.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Errors related to the MQTT transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// MQTT client request failed.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid broker address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors related to parsing Homie topics and payloads.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A convention version string is not `major.minor.bugfix`.
    #[error("invalid convention version: {0:?}")]
    InvalidVersion(String),

    /// A topic does not have the expected shape.
    #[error("unexpected topic shape: {0}")]
    InvalidTopic(String),

    /// A `$nodes` or `$properties` token is malformed.
    #[error("malformed token: {0:?}")]
    InvalidToken(String),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
