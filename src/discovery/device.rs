// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Homie device entity.
//!
//! A device is created from a `$homie` announcement and discovers its nodes
//! from the retained `$nodes` topic. Once every node has discovered its
//! properties the device reaches [`Stage::ChildrenReady`] and subscribes to
//! its whole subtree, which delivers the remaining attributes and property
//! values. It becomes [`Stage::Ready`] when every node is ready and `$online`
//! is known.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use super::change::{AttributeChange, AttributeFilter, ChangeNotifier, replace_if_changed};
use super::config::Link;
use super::node::{Node, NodeSnapshot};
use super::parse::parse_nodes;
use super::stage::{Stage, StageFilter, StageTracker};
use super::subtopic;
use crate::error::{ParseError, Result};
use crate::protocol::Message;

/// Attributes of a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceAttribute {
    /// `$homie`, the convention version.
    Homie,
    /// `$online`, the gating attribute of a device.
    Online,
    /// `$name`
    Name,
    /// `$localip`
    LocalIp,
    /// `$mac`
    Mac,
    /// `$stats/uptime`
    Uptime,
    /// `$stats/signal`
    Signal,
    /// `$stats/interval`
    StatsInterval,
    /// `$fw/name`
    FirmwareName,
    /// `$fw/version`
    FirmwareVersion,
    /// `$fw/checksum`
    FirmwareChecksum,
    /// `$implementation`
    Implementation,
}

impl DeviceAttribute {
    /// All device attributes.
    pub const ALL: [Self; 12] = [
        Self::Homie,
        Self::Online,
        Self::Name,
        Self::LocalIp,
        Self::Mac,
        Self::Uptime,
        Self::Signal,
        Self::StatsInterval,
        Self::FirmwareName,
        Self::FirmwareVersion,
        Self::FirmwareChecksum,
        Self::Implementation,
    ];

    /// Returns the topic suffix, relative to the device path.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Homie => "/$homie",
            Self::Online => "/$online",
            Self::Name => "/$name",
            Self::LocalIp => "/$localip",
            Self::Mac => "/$mac",
            Self::Uptime => "/$stats/uptime",
            Self::Signal => "/$stats/signal",
            Self::StatsInterval => "/$stats/interval",
            Self::FirmwareName => "/$fw/name",
            Self::FirmwareVersion => "/$fw/version",
            Self::FirmwareChecksum => "/$fw/checksum",
            Self::Implementation => "/$implementation",
        }
    }

    /// Looks up the attribute published on `suffix`.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|attribute| attribute.suffix() == suffix)
    }
}

/// Current attribute values of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceAttributes {
    pub homie: Option<String>,
    pub online: Option<String>,
    pub name: Option<String>,
    pub local_ip: Option<String>,
    pub mac: Option<String>,
    pub uptime: Option<String>,
    pub signal: Option<String>,
    pub stats_interval: Option<String>,
    pub firmware_name: Option<String>,
    pub firmware_version: Option<String>,
    pub firmware_checksum: Option<String>,
    pub implementation: Option<String>,
}

impl DeviceAttributes {
    fn slot_mut(&mut self, attribute: DeviceAttribute) -> &mut Option<String> {
        match attribute {
            DeviceAttribute::Homie => &mut self.homie,
            DeviceAttribute::Online => &mut self.online,
            DeviceAttribute::Name => &mut self.name,
            DeviceAttribute::LocalIp => &mut self.local_ip,
            DeviceAttribute::Mac => &mut self.mac,
            DeviceAttribute::Uptime => &mut self.uptime,
            DeviceAttribute::Signal => &mut self.signal,
            DeviceAttribute::StatsInterval => &mut self.stats_interval,
            DeviceAttribute::FirmwareName => &mut self.firmware_name,
            DeviceAttribute::FirmwareVersion => &mut self.firmware_version,
            DeviceAttribute::FirmwareChecksum => &mut self.firmware_checksum,
            DeviceAttribute::Implementation => &mut self.implementation,
        }
    }
}

/// Serializable view of a device tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    /// Device id.
    pub id: String,
    /// Full topic path.
    pub path: String,
    /// Discovery stage.
    pub stage: Stage,
    /// Attribute values.
    pub attributes: DeviceAttributes,
    /// Nodes, sorted by id.
    pub nodes: Vec<NodeSnapshot>,
}

impl DeviceSnapshot {
    /// Serializes the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self).map_err(ParseError::from)?)
    }
}

type NodeListener = Arc<dyn Fn(&Arc<Node>) + Send + Sync>;

/// A Homie device: the root of a discovered tree.
pub struct Device {
    id: String,
    base_path: String,
    path: String,
    attributes: Mutex<DeviceAttributes>,
    nodes: Mutex<HashMap<String, Arc<Node>>>,
    nodes_announced: AtomicBool,
    node_listeners: Mutex<Vec<NodeListener>>,
    link: Link,
    changes: ChangeNotifier<Device, DeviceAttribute>,
    stage: StageTracker<Device>,
}

impl Device {
    pub(crate) fn new(base_path: &str, device_id: &str, version: &str, link: Link) -> Arc<Self> {
        tracing::info!(device = %device_id, version = %version, "Homie device discovered");
        Arc::new(Self {
            id: device_id.to_string(),
            base_path: base_path.to_string(),
            path: format!("{base_path}/{device_id}"),
            attributes: Mutex::new(DeviceAttributes {
                homie: Some(version.to_string()),
                ..DeviceAttributes::default()
            }),
            nodes: Mutex::new(HashMap::new()),
            nodes_announced: AtomicBool::new(false),
            node_listeners: Mutex::new(Vec::new()),
            link,
            changes: ChangeNotifier::new(),
            stage: StageTracker::new(),
        })
    }

    /// Starts discovering nodes.
    pub(crate) fn setup(self: &Arc<Self>) {
        self.changes
            .subscribe(AttributeFilter::only([DeviceAttribute::Online]), |device, _| {
                device.check_advance();
            });

        let device = Arc::downgrade(self);
        self.stage.subscribe(Stage::ChildrenReady, move |_, _| {
            if let Some(device) = device.upgrade() {
                device.subscribe_subtree();
            }
        });

        let device = Arc::downgrade(self);
        self.link
            .subscribe(&format!("{}/$nodes", self.path), move |message| {
                if let Some(device) = device.upgrade() {
                    device.discover_nodes(message);
                }
            });
    }

    fn discover_nodes(self: &Arc<Self>, message: &Message) {
        let discovered: Vec<Arc<Node>> = {
            let mut nodes = self.nodes.lock();
            parse_nodes(&message.payload)
                .into_iter()
                .filter_map(|node_id| {
                    if nodes.contains_key(&node_id) {
                        tracing::debug!(node = %node_id, device = %self.id, "Node already discovered");
                        return None;
                    }
                    let node = Node::new(&self.path, &self.id, &node_id, self.link.clone());
                    nodes.insert(node_id, Arc::clone(&node));
                    Some(node)
                })
                .collect()
        };

        let listeners = self.node_listeners.lock().clone();
        for node in discovered {
            let device: Weak<Device> = Arc::downgrade(self);
            node.on_stage_change(StageFilter::Any, move |_, _| {
                if let Some(device) = device.upgrade() {
                    device.check_advance();
                }
            });
            for listener in &listeners {
                listener(&node);
            }
            node.setup();

            // The subtree replay already happened without this node
            if self.stage() >= Stage::ChildrenReady {
                node.subscribe_subtree();
            }
        }

        self.nodes_announced.store(true, Ordering::Release);
        self.check_advance();
    }

    fn subscribe_subtree(self: &Arc<Self>) {
        tracing::debug!(device = %self.id, "Subscribing to device subtree");
        let device = Arc::downgrade(self);
        self.link
            .subscribe(&format!("{}/#", self.path), move |message| {
                if let Some(device) = device.upgrade() {
                    device.update(&message.topic, &message.payload);
                }
            });
    }

    /// Re-evaluates convergence after a node transition or an `$online`
    /// write.
    pub(crate) fn check_advance(&self) {
        if self.stage() == Stage::Discovering
            && self.all_nodes_at_least(Stage::ChildrenReady)
            && self.stage.advance(self, Stage::ChildrenReady)
        {
            tracing::debug!(device = %self.id, stage = %Stage::ChildrenReady, "Stage changed");
        }

        if self.stage() == Stage::ChildrenReady
            && self.all_nodes_at_least(Stage::Ready)
            && self.is_online().is_some()
            && self.stage.advance(self, Stage::Ready)
        {
            tracing::info!(device = %self.id, "Homie device ready");
        }
    }

    fn all_nodes_at_least(&self, stage: Stage) -> bool {
        if !self.nodes_announced.load(Ordering::Acquire) {
            return false;
        }
        self.nodes.lock().values().all(|node| node.stage() >= stage)
    }

    /// Applies a message from the device subtree.
    pub(crate) fn update(&self, topic: &str, payload: &str) {
        let Some(suffix) = subtopic(&self.path, topic) else {
            return;
        };

        tracing::trace!(topic = %topic, "Routing device message");
        for node in self.nodes() {
            node.update(topic, payload);
        }

        if let Some(attribute) = DeviceAttribute::from_suffix(suffix) {
            self.write(attribute, payload);
        }
    }

    fn write(&self, attribute: DeviceAttribute, value: &str) {
        let old = {
            let mut attributes = self.attributes.lock();
            match replace_if_changed(attributes.slot_mut(attribute), value) {
                Some(old) => old,
                None => return,
            }
        };

        self.changes.notify(
            self,
            &AttributeChange {
                attribute,
                old: old.as_deref(),
                new: Some(value),
            },
        );
    }

    /// Returns the device id, which is also its entity id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the discovery prefix the device was announced under.
    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Returns the full topic path of the device.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the device's `$online` value as a boolean.
    ///
    /// `None` while the value is unknown. Any payload other than `true`
    /// counts as offline.
    #[must_use]
    pub fn is_online(&self) -> Option<bool> {
        self.attributes
            .lock()
            .online
            .as_deref()
            .map(|online| online == "true")
    }

    /// Returns a copy of every attribute.
    #[must_use]
    pub fn attributes(&self) -> DeviceAttributes {
        self.attributes.lock().clone()
    }

    /// Returns the discovered nodes, sorted by id.
    #[must_use]
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        let mut nodes: Vec<Arc<Node>> = self.nodes.lock().values().cloned().collect();
        nodes.sort_by(|a, b| a.id().cmp(b.id()));
        nodes
    }

    /// Returns the node with this id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<Arc<Node>> {
        self.nodes.lock().get(node_id).cloned()
    }

    /// Returns `true` if the device has a node with this id.
    #[must_use]
    pub fn has_node(&self, node_id: &str) -> bool {
        self.nodes.lock().contains_key(node_id)
    }

    /// Returns the discovery stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage.current()
    }

    /// Returns `true` once the device is fully discovered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.stage() == Stage::Ready
    }

    /// Registers a stage change listener.
    pub fn on_stage_change<F>(&self, filter: impl Into<StageFilter>, callback: F)
    where
        F: Fn(&Device, Stage) + Send + Sync + 'static,
    {
        self.stage.subscribe(filter, callback);
    }

    /// Registers a listener for nodes discovered from now on.
    ///
    /// The listener runs before the node starts discovering its properties.
    pub fn on_node_discovered<F>(&self, callback: F)
    where
        F: Fn(&Arc<Node>) + Send + Sync + 'static,
    {
        self.node_listeners.lock().push(Arc::new(callback));
    }

    /// Registers an attribute change listener.
    pub fn on_attribute_change<F>(&self, filter: AttributeFilter<DeviceAttribute>, callback: F)
    where
        F: Fn(&Device, &AttributeChange<'_, DeviceAttribute>) + Send + Sync + 'static,
    {
        self.changes.subscribe(filter, callback);
    }

    /// Returns a serializable view of the device tree.
    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id.clone(),
            path: self.path.clone(),
            stage: self.stage(),
            attributes: self.attributes(),
            nodes: self.nodes().iter().map(|node| node.snapshot()).collect(),
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("path", &self.path)
            .field("stage", &self.stage())
            .field("online", &self.is_online())
            .field("nodes", &self.nodes.lock().len())
            .finish_non_exhaustive()
    }
}
