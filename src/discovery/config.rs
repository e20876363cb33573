// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery configuration.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use super::parse::ConventionVersion;
use crate::protocol::{QoS, Transport};

/// Default root topic of the Homie tree.
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homie";

/// Default number of buffered discovery events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Options for a discovery session.
///
/// # Examples
///
/// ```
/// use homie_discovery::{ConventionVersion, DiscoveryConfig, QoS};
///
/// let config = DiscoveryConfig::new()
///     .with_discovery_prefix("devices/homie")
///     .with_qos(QoS::AtMostOnce)
///     .with_required_version(ConventionVersion::new(2, 0, 1));
///
/// assert_eq!(config.discovery_prefix(), "devices/homie");
/// ```
///
/// The configuration can also be deserialized, with every field optional:
///
/// ```
/// use homie_discovery::DiscoveryConfig;
///
/// let config: DiscoveryConfig =
///     serde_json::from_str(r#"{ "required_version": "2.0.1", "qos": 0 }"#).unwrap();
/// assert_eq!(config.required_version().to_string(), "2.0.1");
/// assert_eq!(config.event_capacity(), 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Root topic under which devices announce themselves.
    #[serde(deserialize_with = "deserialize_prefix")]
    discovery_prefix: String,
    /// QoS used for every subscription and command.
    qos: QoS,
    /// Convention version the discovery logic implements.
    required_version: ConventionVersion,
    /// Retain flag used when publishing property commands.
    retain_commands: bool,
    /// Capacity of the discovery event channel.
    event_capacity: usize,
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}

fn deserialize_prefix<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let prefix = String::deserialize(deserializer)?;
    Ok(normalize_prefix(&prefix))
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            qos: QoS::AtLeastOnce,
            required_version: ConventionVersion::default(),
            retain_commands: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DiscoveryConfig {
    /// Creates a configuration with default settings.
    ///
    /// Defaults: prefix `homie`, QoS 1, required version `3.0.0`, retained
    /// commands, 256 buffered events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the discovery prefix. Trailing slashes are removed.
    #[must_use]
    pub fn with_discovery_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.discovery_prefix = normalize_prefix(&prefix.into());
        self
    }

    /// Sets the QoS used for subscriptions and commands.
    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Sets the convention version devices must be compatible with.
    #[must_use]
    pub fn with_required_version(mut self, version: ConventionVersion) -> Self {
        self.required_version = version;
        self
    }

    /// Sets whether property commands are published retained.
    #[must_use]
    pub fn with_retain_commands(mut self, retain: bool) -> Self {
        self.retain_commands = retain;
        self
    }

    /// Sets how many events a slow subscriber may fall behind before it
    /// starts losing them. Zero is treated as one.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Returns the discovery prefix.
    #[must_use]
    pub fn discovery_prefix(&self) -> &str {
        &self.discovery_prefix
    }

    /// Returns the QoS.
    #[must_use]
    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Returns the required convention version.
    #[must_use]
    pub fn required_version(&self) -> ConventionVersion {
        self.required_version
    }

    /// Returns whether property commands are published retained.
    #[must_use]
    pub fn retain_commands(&self) -> bool {
        self.retain_commands
    }

    /// Returns the capacity of the discovery event channel.
    #[must_use]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    /// Returns the pattern matching every device announcement.
    #[must_use]
    pub fn announcement_pattern(&self) -> String {
        format!("{}/+/{}", self.discovery_prefix, super::parse::HOMIE_SUFFIX)
    }
}

/// Transport handle shared by every entity of a session.
#[derive(Clone)]
pub(crate) struct Link {
    transport: Arc<dyn Transport>,
    qos: QoS,
    retain_commands: bool,
}

impl Link {
    pub(crate) fn new(transport: Arc<dyn Transport>, config: &DiscoveryConfig) -> Self {
        Self {
            transport,
            qos: config.qos(),
            retain_commands: config.retain_commands(),
        }
    }

    /// Subscribes `handler` to `pattern` at the session QoS.
    pub(crate) fn subscribe<F>(&self, pattern: &str, handler: F)
    where
        F: Fn(&crate::protocol::Message) + Send + Sync + 'static,
    {
        self.transport.subscribe(pattern, self.qos, Arc::new(handler));
    }

    /// Publishes a property command.
    pub(crate) fn publish_command(&self, topic: &str, payload: &str) {
        self.transport
            .publish(topic, payload, self.qos, self.retain_commands);
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("qos", &self.qos)
            .field("retain_commands", &self.retain_commands)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.discovery_prefix(), "homie");
        assert_eq!(config.qos(), QoS::AtLeastOnce);
        assert_eq!(config.required_version(), ConventionVersion::new(3, 0, 0));
        assert!(config.retain_commands());
        assert_eq!(config.event_capacity(), DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn config_chained() {
        let config = DiscoveryConfig::new()
            .with_discovery_prefix("site/homie/")
            .with_qos(QoS::ExactlyOnce)
            .with_required_version(ConventionVersion::new(2, 0, 1))
            .with_retain_commands(false);

        assert_eq!(config.discovery_prefix(), "site/homie");
        assert_eq!(config.qos(), QoS::ExactlyOnce);
        assert_eq!(config.required_version().to_string(), "2.0.1");
        assert!(!config.retain_commands());
    }

    #[test]
    fn announcement_pattern() {
        let config = DiscoveryConfig::new().with_discovery_prefix("devices");
        assert_eq!(config.announcement_pattern(), "devices/+/$homie");
    }

    #[test]
    fn config_deserialize_partial() {
        let config: DiscoveryConfig =
            serde_json::from_str(r#"{ "discovery_prefix": "lab" }"#).unwrap();
        assert_eq!(config.discovery_prefix(), "lab");
        assert_eq!(config.qos(), QoS::AtLeastOnce);
        assert!(config.retain_commands());
    }

    #[test]
    fn config_deserialize_trims_prefix() {
        let config: DiscoveryConfig =
            serde_json::from_str(r#"{ "discovery_prefix": "homie/", "event_capacity": 8 }"#)
                .unwrap();
        assert_eq!(config.discovery_prefix(), "homie");
        assert_eq!(config.announcement_pattern(), "homie/+/$homie");
        assert_eq!(config.event_capacity(), 8);
    }

    #[test]
    fn config_deserialize_rejects_bad_version() {
        let result = serde_json::from_str::<DiscoveryConfig>(r#"{ "required_version": "three" }"#);
        assert!(result.is_err());
    }
}
