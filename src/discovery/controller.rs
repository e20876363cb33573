// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::config::{DiscoveryConfig, Link};
use super::device::Device;
use super::node::Node;
use super::parse::{ConventionVersion, device_id_from_topic};
use super::property::Property;
use super::stage::{Stage, StageFilter};
use crate::error::{Error, Result};
use crate::event::{DiscoveryEvent, EventBus};
use crate::protocol::{Message, Transport};

/// Callback for device stage changes.
pub type DeviceStageCallback = Arc<dyn Fn(&Arc<Device>, Stage) + Send + Sync>;

/// Callback for node stage changes.
pub type NodeStageCallback = Arc<dyn Fn(&Arc<Node>, Stage) + Send + Sync>;

/// Callback for property stage changes.
pub type PropertyStageCallback = Arc<dyn Fn(&Arc<Property>, Stage) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    device: Vec<DeviceStageCallback>,
    node: Vec<NodeStageCallback>,
    property: Vec<PropertyStageCallback>,
}

struct Shared {
    config: DiscoveryConfig,
    link: Link,
    devices: RwLock<HashMap<String, Arc<Device>>>,
    callbacks: RwLock<Callbacks>,
    events: EventBus,
    started: AtomicBool,
}

/// Discovers Homie devices announced on a transport.
///
/// The controller subscribes to `{prefix}/+/$homie`, creates a [`Device`]
/// for every announcement with a supported convention version and reports
/// stage transitions of devices, nodes and properties through callbacks and
/// a broadcast channel.
///
/// Node and property events start once their device reaches
/// [`Stage::ChildrenReady`]; at that point every node and property is
/// reported with its current stage, and later transitions follow. Nodes and
/// properties announced after that are reported from `Discovering` on.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use homie_discovery::protocol::Transport;
/// use homie_discovery::{DiscoveryConfig, HomieDiscovery, MemoryBroker, QoS};
///
/// let broker = Arc::new(MemoryBroker::new());
/// for (topic, payload) in [
///     ("homie/dev1/$homie", "3.0.0"),
///     ("homie/dev1/$online", "true"),
///     ("homie/dev1/$nodes", "light"),
///     ("homie/dev1/light/$type", "switch"),
///     ("homie/dev1/light/$properties", "power:settable"),
/// ] {
///     broker.publish(topic, payload, QoS::AtLeastOnce, true);
/// }
///
/// let discovery = HomieDiscovery::new(broker.clone(), DiscoveryConfig::default());
/// discovery.on_device_stage_change(|device, stage| {
///     println!("{} -> {stage}", device.id());
/// });
/// discovery.start()?;
/// broker.flush();
///
/// assert!(discovery.device("dev1").is_some_and(|device| device.is_ready()));
/// # Ok::<(), homie_discovery::Error>(())
/// ```
#[derive(Clone)]
pub struct HomieDiscovery {
    shared: Arc<Shared>,
}

impl HomieDiscovery {
    /// Creates a controller on top of `transport`. Nothing is subscribed
    /// until [`start`](Self::start) is called.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: DiscoveryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                link: Link::new(transport, &config),
                events: EventBus::with_capacity(config.event_capacity()),
                config,
                devices: RwLock::new(HashMap::new()),
                callbacks: RwLock::new(Callbacks::default()),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to device announcements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if discovery was already started.
    pub fn start(&self) -> Result<()> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }

        let pattern = self.shared.config.announcement_pattern();
        tracing::info!(
            pattern = %pattern,
            required_version = %self.shared.config.required_version(),
            "Homie discovery started"
        );

        let shared = Arc::downgrade(&self.shared);
        self.shared.link.subscribe(&pattern, move |message| {
            if let Some(shared) = shared.upgrade() {
                shared.handle_announcement(message);
            }
        });
        Ok(())
    }

    /// Returns `true` once [`start`](Self::start) has been called.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DiscoveryConfig {
        &self.shared.config
    }

    /// Returns every discovered device, sorted by id.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> =
            self.shared.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    /// Returns the device with this id.
    #[must_use]
    pub fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.shared.devices.read().get(device_id).cloned()
    }

    /// Returns `true` if a device with this id was discovered.
    #[must_use]
    pub fn has_device(&self, device_id: &str) -> bool {
        self.shared.devices.read().contains_key(device_id)
    }

    /// Registers a callback for every device stage transition.
    pub fn on_device_stage_change<F>(&self, callback: F)
    where
        F: Fn(&Arc<Device>, Stage) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().device.push(Arc::new(callback));
    }

    /// Registers a callback for node stages.
    pub fn on_node_stage_change<F>(&self, callback: F)
    where
        F: Fn(&Arc<Node>, Stage) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().node.push(Arc::new(callback));
    }

    /// Registers a callback for property stages.
    pub fn on_property_stage_change<F>(&self, callback: F)
    where
        F: Fn(&Arc<Property>, Stage) + Send + Sync + 'static,
    {
        self.shared.callbacks.write().property.push(Arc::new(callback));
    }

    /// Returns a receiver of every [`DiscoveryEvent`] published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.shared.events.subscribe()
    }
}

impl Shared {
    fn handle_announcement(self: &Arc<Self>, message: &Message) {
        let prefix = self.config.discovery_prefix();
        let device_id = match device_id_from_topic(prefix, &message.topic) {
            Ok(device_id) => device_id,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring announcement");
                return;
            }
        };

        let version = match message.payload.parse::<ConventionVersion>() {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(device = %device_id, error = %e, "Ignoring device announcement");
                return;
            }
        };

        let required = self.config.required_version();
        if !version.is_compatible_with(&required) {
            tracing::warn!(
                device = %device_id,
                version = %version,
                required = %required,
                "Unsupported Homie convention version"
            );
            return;
        }

        let device = {
            let mut devices = self.devices.write();
            if devices.contains_key(device_id) {
                tracing::debug!(device = %device_id, "Device already discovered");
                return;
            }
            let device = Device::new(prefix, device_id, &message.payload, self.link.clone());
            devices.insert(device_id.to_string(), Arc::clone(&device));
            device
        };

        self.events.publish(DiscoveryEvent::DeviceDiscovered {
            device: Arc::clone(&device),
        });

        let shared = Arc::downgrade(self);
        let handle = Arc::downgrade(&device);
        device.on_stage_change(StageFilter::Any, move |_, stage| {
            if let (Some(shared), Some(device)) = (shared.upgrade(), handle.upgrade()) {
                shared.device_stage_changed(&device, stage);
            }
        });
        device.setup();
    }

    fn device_stage_changed(self: &Arc<Self>, device: &Arc<Device>, stage: Stage) {
        tracing::debug!(device = %device.id(), stage = %stage, "Device stage changed");

        if stage == Stage::ChildrenReady {
            for node in device.nodes() {
                self.watch_node(device.id(), &node);
            }

            let shared = Arc::downgrade(self);
            let owner = device.id().to_string();
            device.on_node_discovered(move |node| {
                if let Some(shared) = shared.upgrade() {
                    shared.watch_node(&owner, node);
                }
            });
        }

        let callbacks = self.callbacks.read().device.clone();
        for callback in callbacks {
            callback(device, stage);
        }
        self.events.publish(DiscoveryEvent::DeviceStageChanged {
            device: Arc::clone(device),
            stage,
        });
    }

    fn watch_node(self: &Arc<Self>, device_id: &str, node: &Arc<Node>) {
        let shared = Arc::downgrade(self);
        let handle: Weak<Node> = Arc::downgrade(node);
        let owner = device_id.to_string();
        node.on_stage_change(StageFilter::Any, move |_, stage| {
            if let (Some(shared), Some(node)) = (shared.upgrade(), handle.upgrade()) {
                shared.node_stage_changed(&owner, &node, stage);
            }
        });
        self.node_stage_changed(device_id, node, node.stage());

        for property in node.properties() {
            self.watch_property(device_id, &property);
        }

        let shared = Arc::downgrade(self);
        let owner = device_id.to_string();
        node.on_property_discovered(move |property| {
            if let Some(shared) = shared.upgrade() {
                shared.watch_property(&owner, property);
            }
        });
    }

    fn watch_property(self: &Arc<Self>, device_id: &str, property: &Arc<Property>) {
        let shared = Arc::downgrade(self);
        let handle: Weak<Property> = Arc::downgrade(property);
        let owner = device_id.to_string();
        property.on_stage_change(StageFilter::Any, move |_, stage| {
            if let (Some(shared), Some(property)) = (shared.upgrade(), handle.upgrade()) {
                shared.property_stage_changed(&owner, &property, stage);
            }
        });
        self.property_stage_changed(device_id, property, property.stage());
    }

    fn node_stage_changed(&self, device_id: &str, node: &Arc<Node>, stage: Stage) {
        tracing::debug!(node = %node.entity_id(), stage = %stage, "Node stage changed");
        let callbacks = self.callbacks.read().node.clone();
        for callback in callbacks {
            callback(node, stage);
        }
        self.events.publish(DiscoveryEvent::NodeStageChanged {
            device_id: device_id.to_string(),
            node: Arc::clone(node),
            stage,
        });
    }

    fn property_stage_changed(&self, device_id: &str, property: &Arc<Property>, stage: Stage) {
        tracing::trace!(property = %property.entity_id(), stage = %stage, "Property stage changed");
        let callbacks = self.callbacks.read().property.clone();
        for callback in callbacks {
            callback(property, stage);
        }
        self.events.publish(DiscoveryEvent::PropertyStageChanged {
            device_id: device_id.to_string(),
            property: Arc::clone(property),
            stage,
        });
    }
}

impl std::fmt::Debug for HomieDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomieDiscovery")
            .field("config", &self.shared.config)
            .field("started", &self.is_started())
            .field("devices", &self.shared.devices.read().len())
            .finish_non_exhaustive()
    }
}
