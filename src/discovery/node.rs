// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Homie node entity.
//!
//! A node discovers its properties from the retained `$properties` topic and
//! becomes [`Stage::Ready`] once every property is ready and its `$type` is
//! known.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use super::change::{AttributeChange, AttributeFilter, ChangeNotifier, replace_if_changed};
use super::config::Link;
use super::parse::parse_properties;
use super::property::{Property, PropertySnapshot};
use super::stage::{Stage, StageFilter, StageTracker};
use super::subtopic;
use crate::error::{Error, Result};
use crate::protocol::Message;

/// Attributes of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeAttribute {
    /// `$type`, the gating attribute of a node.
    Type,
    /// `$name`
    Name,
}

impl NodeAttribute {
    /// Returns the topic suffix, relative to the node path.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Type => "/$type",
            Self::Name => "/$name",
        }
    }

    /// Looks up the attribute published on `suffix`.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        [Self::Type, Self::Name]
            .into_iter()
            .find(|attribute| attribute.suffix() == suffix)
    }
}

/// Current attribute values of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeAttributes {
    /// Node type, e.g. `switch` or `sensor`.
    #[serde(rename = "type")]
    pub node_type: Option<String>,
    /// Human readable name.
    pub name: Option<String>,
}

impl NodeAttributes {
    fn slot_mut(&mut self, attribute: NodeAttribute) -> &mut Option<String> {
        match attribute {
            NodeAttribute::Type => &mut self.node_type,
            NodeAttribute::Name => &mut self.name,
        }
    }
}

/// Serializable view of a node and its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    /// Node id.
    pub id: String,
    /// Discovery stage.
    pub stage: Stage,
    /// Attribute values.
    pub attributes: NodeAttributes,
    /// Properties, sorted by id.
    pub properties: Vec<PropertySnapshot>,
}

type PropertyListener = Arc<dyn Fn(&Arc<Property>) + Send + Sync>;

/// A Homie node: a logical unit of a device owning properties.
pub struct Node {
    id: String,
    path: String,
    entity_id: String,
    attributes: Mutex<NodeAttributes>,
    properties: Mutex<HashMap<String, Arc<Property>>>,
    properties_announced: AtomicBool,
    property_listeners: Mutex<Vec<PropertyListener>>,
    link: Link,
    changes: ChangeNotifier<Node, NodeAttribute>,
    stage: StageTracker<Node>,
}

impl Node {
    pub(crate) fn new(device_path: &str, device_id: &str, node_id: &str, link: Link) -> Arc<Self> {
        tracing::info!(node = %node_id, device = %device_path, "Homie node discovered");
        Arc::new(Self {
            id: node_id.to_string(),
            path: format!("{device_path}/{node_id}"),
            entity_id: format!("{device_id}_{node_id}"),
            attributes: Mutex::new(NodeAttributes::default()),
            properties: Mutex::new(HashMap::new()),
            properties_announced: AtomicBool::new(false),
            property_listeners: Mutex::new(Vec::new()),
            link,
            changes: ChangeNotifier::new(),
            stage: StageTracker::new(),
        })
    }

    /// Starts discovering properties.
    pub(crate) fn setup(self: &Arc<Self>) {
        self.changes
            .subscribe(AttributeFilter::only([NodeAttribute::Type]), |node, _| {
                node.check_advance();
            });

        let node = Arc::downgrade(self);
        self.link
            .subscribe(&format!("{}/$properties", self.path), move |message| {
                if let Some(node) = node.upgrade() {
                    node.discover_properties(message);
                }
            });
    }

    fn discover_properties(self: &Arc<Self>, message: &Message) {
        let discovered: Vec<Arc<Property>> = {
            let mut properties = self.properties.lock();
            parse_properties(&message.payload)
                .into_iter()
                .filter_map(|spec| {
                    if properties.contains_key(&spec.id) {
                        tracing::debug!(
                            property = %spec.id,
                            node = %self.path,
                            "Property already discovered"
                        );
                        return None;
                    }
                    let property =
                        Property::new(&self.path, &self.entity_id, spec, self.link.clone());
                    properties.insert(property.id().to_string(), Arc::clone(&property));
                    Some(property)
                })
                .collect()
        };

        // The whole batch is registered before any of it can advance
        let listeners = self.property_listeners.lock().clone();
        for property in discovered {
            let node: Weak<Node> = Arc::downgrade(self);
            property.on_stage_change(StageFilter::Any, move |_, _| {
                if let Some(node) = node.upgrade() {
                    node.check_advance();
                }
            });
            for listener in &listeners {
                listener(&property);
            }
            property.setup();
        }

        self.properties_announced.store(true, Ordering::Release);
        self.check_advance();
    }

    /// Subscribes to the node's own subtree. Used for nodes announced after
    /// their device already replayed its subtree.
    pub(crate) fn subscribe_subtree(self: &Arc<Self>) {
        tracing::debug!(node = %self.path, "Subscribing to node subtree");
        let node = Arc::downgrade(self);
        self.link
            .subscribe(&format!("{}/#", self.path), move |message| {
                if let Some(node) = node.upgrade() {
                    node.update(&message.topic, &message.payload);
                }
            });
    }

    /// Re-evaluates convergence after a property transition or a `$type`
    /// write. Nothing advances before `$properties` has been received.
    pub(crate) fn check_advance(&self) {
        if self.stage() == Stage::Discovering && self.all_properties_at_least(Stage::ChildrenReady)
        {
            self.stage.advance(self, Stage::ChildrenReady);
        }

        if self.stage() == Stage::ChildrenReady
            && self.all_properties_at_least(Stage::Ready)
            && self.node_type().is_some()
        {
            self.stage.advance(self, Stage::Ready);
        }
    }

    fn all_properties_at_least(&self, stage: Stage) -> bool {
        if !self.properties_announced.load(Ordering::Acquire) {
            return false;
        }
        self.properties
            .lock()
            .values()
            .all(|property| property.stage() >= stage)
    }

    /// Applies a message from the device subtree.
    pub(crate) fn update(&self, topic: &str, payload: &str) {
        let Some(suffix) = subtopic(&self.path, topic) else {
            return;
        };

        for property in self.properties() {
            property.update(topic, payload);
        }

        if let Some(attribute) = NodeAttribute::from_suffix(suffix) {
            self.write(attribute, payload);
        }
    }

    fn write(&self, attribute: NodeAttribute, value: &str) {
        let old = {
            let mut attributes = self.attributes.lock();
            match replace_if_changed(attributes.slot_mut(attribute), value) {
                Some(old) => old,
                None => return,
            }
        };

        tracing::trace!(node = %self.path, ?attribute, value = %value, "Attribute changed");
        self.changes.notify(
            self,
            &AttributeChange {
                attribute,
                old: old.as_deref(),
                new: Some(value),
            },
        );
    }

    /// Returns the node id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the full topic path of the node.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the entity id (`{device}_{node}`).
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Returns the node type, if known.
    #[must_use]
    pub fn node_type(&self) -> Option<String> {
        self.attributes.lock().node_type.clone()
    }

    /// Returns a copy of every attribute.
    #[must_use]
    pub fn attributes(&self) -> NodeAttributes {
        self.attributes.lock().clone()
    }

    /// Returns the discovered properties, sorted by id.
    #[must_use]
    pub fn properties(&self) -> Vec<Arc<Property>> {
        let mut properties: Vec<Arc<Property>> =
            self.properties.lock().values().cloned().collect();
        properties.sort_by(|a, b| a.id().cmp(b.id()));
        properties
    }

    /// Returns `true` if the node has a property with this id.
    #[must_use]
    pub fn has_property(&self, property_id: &str) -> bool {
        self.properties.lock().contains_key(property_id)
    }

    /// Returns the property with this id.
    #[must_use]
    pub fn property(&self, property_id: &str) -> Option<Arc<Property>> {
        self.properties.lock().get(property_id).cloned()
    }

    /// Returns the property a consumer platform depends on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingProperty`] if the node has no such property.
    pub fn require_property(&self, platform: &str, property_id: &str) -> Result<Arc<Property>> {
        self.property(property_id)
            .ok_or_else(|| Error::MissingProperty {
                platform: platform.to_string(),
                entity_id: self.entity_id.clone(),
                property_id: property_id.to_string(),
            })
    }

    /// Returns the discovery stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage.current()
    }

    /// Returns `true` once the node is fully discovered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.stage() == Stage::Ready
    }

    /// Registers a stage change listener.
    pub fn on_stage_change<F>(&self, filter: impl Into<StageFilter>, callback: F)
    where
        F: Fn(&Node, Stage) + Send + Sync + 'static,
    {
        self.stage.subscribe(filter, callback);
    }

    /// Registers a listener for properties discovered from now on.
    pub fn on_property_discovered<F>(&self, callback: F)
    where
        F: Fn(&Arc<Property>) + Send + Sync + 'static,
    {
        self.property_listeners.lock().push(Arc::new(callback));
    }

    /// Registers an attribute change listener.
    pub fn on_attribute_change<F>(&self, filter: AttributeFilter<NodeAttribute>, callback: F)
    where
        F: Fn(&Node, &AttributeChange<'_, NodeAttribute>) + Send + Sync + 'static,
    {
        self.changes.subscribe(filter, callback);
    }

    /// Returns a serializable view of the node and its properties.
    #[must_use]
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id.clone(),
            stage: self.stage(),
            attributes: self.attributes(),
            properties: self
                .properties()
                .iter()
                .map(|property| property.snapshot())
                .collect(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("stage", &self.stage())
            .field("attributes", &*self.attributes.lock())
            .field("properties", &self.properties.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiscoveryConfig;
    use crate::protocol::{MemoryBroker, QoS, Transport};

    fn node() -> (Arc<MemoryBroker>, Arc<Node>) {
        let broker = Arc::new(MemoryBroker::new());
        let link = Link::new(broker.clone(), &DiscoveryConfig::default());
        let node = Node::new("homie/dev1", "dev1", "light", link);
        node.setup();
        (broker, node)
    }

    fn publish(broker: &MemoryBroker, topic: &str, payload: &str) {
        broker.publish(topic, payload, QoS::AtLeastOnce, true);
        broker.flush();
    }

    #[test]
    fn identity() {
        let (_, node) = node();
        assert_eq!(node.path(), "homie/dev1/light");
        assert_eq!(node.entity_id(), "dev1_light");
        assert_eq!(node.stage(), Stage::Discovering);
    }

    #[test]
    fn properties_are_discovered() {
        let (broker, node) = node();
        publish(
            &broker,
            "homie/dev1/light/$properties",
            "power:settable,brightness[0-100]",
        );

        assert!(node.has_property("power"));
        assert!(node.property("power").unwrap().settable());
        assert_eq!(node.property("brightness").unwrap().range(), Some((0, 100)));
        assert_eq!(node.stage(), Stage::ChildrenReady);
    }

    #[test]
    fn type_gates_readiness() {
        let (broker, node) = node();
        publish(&broker, "homie/dev1/light/$properties", "power");
        assert_eq!(node.stage(), Stage::ChildrenReady);

        node.update("homie/dev1/light/$type", "switch");
        assert!(node.is_ready());
        assert_eq!(node.node_type().as_deref(), Some("switch"));
    }

    #[test]
    fn type_before_properties_still_converges() {
        let (broker, node) = node();
        node.update("homie/dev1/light/$type", "switch");
        assert_eq!(node.stage(), Stage::Discovering);

        publish(&broker, "homie/dev1/light/$properties", "power");
        assert!(node.is_ready());
    }

    #[test]
    fn empty_property_list_converges_on_type() {
        let (broker, node) = node();
        publish(&broker, "homie/dev1/light/$properties", "");
        assert_eq!(node.stage(), Stage::ChildrenReady);

        node.update("homie/dev1/light/$type", "group");
        assert!(node.is_ready());
    }

    #[test]
    fn redelivered_properties_are_idempotent() {
        let (broker, node) = node();
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&transitions);
        node.on_stage_change(StageFilter::Any, move |_, stage| sink.lock().push(stage));

        publish(&broker, "homie/dev1/light/$properties", "power,level");
        let first = node.property("power").unwrap();
        publish(&broker, "homie/dev1/light/$properties", "power,level");

        assert_eq!(node.properties().len(), 2);
        assert!(Arc::ptr_eq(&first, &node.property("power").unwrap()));
        assert_eq!(*transitions.lock(), vec![Stage::ChildrenReady]);
    }

    #[test]
    fn update_routes_to_properties() {
        let (broker, node) = node();
        publish(&broker, "homie/dev1/light/$properties", "power");

        node.update("homie/dev1/light/power", "true");
        node.update("homie/dev1/lightbulb/power", "false");

        assert_eq!(node.property("power").unwrap().state().as_deref(), Some("true"));
    }

    #[test]
    fn property_listener_sees_new_properties_only() {
        let (broker, node) = node();
        publish(&broker, "homie/dev1/light/$properties", "power");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        node.on_property_discovered(move |property| {
            sink.lock().push((property.id().to_string(), property.stage()));
        });
        publish(&broker, "homie/dev1/light/$properties", "power,level");

        assert_eq!(*seen.lock(), vec![("level".to_string(), Stage::Discovering)]);
    }

    #[test]
    fn own_subtree_delivers_retained_attributes() {
        let (broker, node) = node();
        broker.publish("homie/dev1/light/$type", "switch", QoS::AtLeastOnce, true);
        publish(&broker, "homie/dev1/light/$properties", "power");
        assert_eq!(node.stage(), Stage::ChildrenReady);

        node.subscribe_subtree();
        broker.flush();
        assert!(node.is_ready());
    }

    #[test]
    fn require_property_reports_missing() {
        let (_, node) = node();
        let err = node.require_property("light", "rgb").unwrap_err();
        match err {
            Error::MissingProperty {
                platform,
                entity_id,
                property_id,
            } => {
                assert_eq!(platform, "light");
                assert_eq!(entity_id, "dev1_light");
                assert_eq!(property_id, "rgb");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn snapshot_lists_properties_sorted() {
        let (broker, node) = node();
        publish(&broker, "homie/dev1/light/$properties", "zeta,alpha");
        node.update("homie/dev1/light/$name", "Desk lamp");

        let snapshot = node.snapshot();
        assert_eq!(snapshot.attributes.name.as_deref(), Some("Desk lamp"));
        let ids: Vec<&str> = snapshot.properties.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
