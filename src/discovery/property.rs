// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Homie property entity.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::change::{AttributeChange, AttributeFilter, ChangeNotifier, replace_if_changed};
use super::config::Link;
use super::parse::PropertySpec;
use super::stage::{Stage, StageFilter, StageTracker};
use super::subtopic;
use crate::error::{Error, Result};

/// Attributes of a [`Property`] that can change after discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyAttribute {
    /// The property value, published on the property's own topic.
    State,
    /// `$name`
    Name,
    /// `$unit`
    Unit,
    /// `$datatype`
    Datatype,
    /// `$format`
    Format,
    /// `$retained`
    Retained,
}

impl PropertyAttribute {
    /// All property attributes.
    pub const ALL: [Self; 6] = [
        Self::State,
        Self::Name,
        Self::Unit,
        Self::Datatype,
        Self::Format,
        Self::Retained,
    ];

    /// Returns the topic suffix, relative to the property path.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::State => "",
            Self::Name => "/$name",
            Self::Unit => "/$unit",
            Self::Datatype => "/$datatype",
            Self::Format => "/$format",
            Self::Retained => "/$retained",
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

/// Current attribute values of a property. `None` means not seen yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertyAttributes {
    /// Last value received on the property topic.
    pub state: Option<String>,
    /// Human readable name.
    pub name: Option<String>,
    /// Unit of the value.
    pub unit: Option<String>,
    /// Data type of the value.
    pub datatype: Option<String>,
    /// Format of the value.
    pub format: Option<String>,
    /// Whether the value is retained.
    pub retained: Option<String>,
}

impl PropertyAttributes {
    fn slot_mut(&mut self, attribute: PropertyAttribute) -> &mut Option<String> {
        match attribute {
            PropertyAttribute::State => &mut self.state,
            PropertyAttribute::Name => &mut self.name,
            PropertyAttribute::Unit => &mut self.unit,
            PropertyAttribute::Datatype => &mut self.datatype,
            PropertyAttribute::Format => &mut self.format,
            PropertyAttribute::Retained => &mut self.retained,
        }
    }
}

/// Serializable view of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertySnapshot {
    /// Property id.
    pub id: String,
    /// Discovery stage.
    pub stage: Stage,
    /// Whether the property accepts commands.
    pub settable: bool,
    /// Range of a range property.
    pub range: Option<(u32, u32)>,
    /// Attribute values.
    pub attributes: PropertyAttributes,
}

/// A Homie property: a single value exposed by a node.
pub struct Property {
    id: String,
    path: String,
    entity_id: String,
    settable: bool,
    range: Option<(u32, u32)>,
    attributes: Mutex<PropertyAttributes>,
    link: Link,
    changes: ChangeNotifier<Property, PropertyAttribute>,
    stage: StageTracker<Property>,
}

impl Property {
    pub(crate) fn new(
        node_path: &str,
        node_entity_id: &str,
        spec: PropertySpec,
        link: Link,
    ) -> Arc<Self> {
        tracing::info!(property = %spec.id, node = %node_path, "Homie property discovered");
        Arc::new(Self {
            path: format!("{node_path}/{}", spec.id),
            entity_id: format!("{node_entity_id}_{}", spec.id),
            id: spec.id,
            settable: spec.settable,
            range: spec.range,
            attributes: Mutex::new(PropertyAttributes::default()),
            link,
            changes: ChangeNotifier::new(),
            stage: StageTracker::new(),
        })
    }

    /// A property has no children and no gating attribute, so it is ready as
    /// soon as it is set up.
    pub(crate) fn setup(&self) {
        self.stage.advance(self, Stage::Ready);
    }

    /// Applies a message from the device subtree.
    pub(crate) fn update(&self, topic: &str, payload: &str) {
        let Some(suffix) = subtopic(&self.path, topic) else {
            return;
        };

        if let Some(attribute) = PropertyAttribute::from_suffix(suffix) {
            self.write(attribute, payload);
        }
    }

    fn write(&self, attribute: PropertyAttribute, value: &str) {
        let old = {
            let mut attributes = self.attributes.lock();
            match replace_if_changed(attributes.slot_mut(attribute), value) {
                Some(old) => old,
                None => return,
            }
        };

        tracing::trace!(property = %self.path, ?attribute, value = %value, "Attribute changed");
        self.changes.notify(
            self,
            &AttributeChange {
                attribute,
                old: old.as_deref(),
                new: Some(value),
            },
        );
    }

    /// Sends `value` to the device on the property's `/set` topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSettable`] if the property was not announced as
    /// settable.
    pub fn set_state(&self, value: &str) -> Result<()> {
        if !self.settable {
            return Err(Error::NotSettable {
                entity_id: self.entity_id.clone(),
            });
        }

        self.link.publish_command(&self.command_topic(), value);
        Ok(())
    }

    /// Returns the topic commands are published on.
    #[must_use]
    pub fn command_topic(&self) -> String {
        format!("{}/set", self.path)
    }

    /// Returns the property id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the full topic path of the property.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the entity id (`{device}_{node}_{property}`).
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Returns whether the property accepts commands.
    #[must_use]
    pub fn settable(&self) -> bool {
        self.settable
    }

    /// Returns the range of a range property.
    #[must_use]
    pub fn range(&self) -> Option<(u32, u32)> {
        self.range
    }

    /// Returns the last received value.
    #[must_use]
    pub fn state(&self) -> Option<String> {
        self.attributes.lock().state.clone()
    }

    /// Returns a copy of every attribute.
    #[must_use]
    pub fn attributes(&self) -> PropertyAttributes {
        self.attributes.lock().clone()
    }

    /// Returns the discovery stage.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage.current()
    }

    /// Registers a stage change listener.
    pub fn on_stage_change<F>(&self, filter: impl Into<StageFilter>, callback: F)
    where
        F: Fn(&Property, Stage) + Send + Sync + 'static,
    {
        self.stage.subscribe(filter, callback);
    }

    /// Registers an attribute change listener.
    pub fn on_attribute_change<F>(&self, filter: AttributeFilter<PropertyAttribute>, callback: F)
    where
        F: Fn(&Property, &AttributeChange<'_, PropertyAttribute>) + Send + Sync + 'static,
    {
        self.changes.subscribe(filter, callback);
    }

    /// Returns a serializable view of the property.
    #[must_use]
    pub fn snapshot(&self) -> PropertySnapshot {
        PropertySnapshot {
            id: self.id.clone(),
            stage: self.stage(),
            settable: self.settable,
            range: self.range,
            attributes: self.attributes(),
        }
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("path", &self.path)
            .field("settable", &self.settable)
            .field("range", &self.range)
            .field("stage", &self.stage())
            .field("attributes", &*self.attributes.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiscoveryConfig;
    use crate::protocol::{MemoryBroker, QoS};

    fn property(token: &str) -> (Arc<MemoryBroker>, Arc<Property>) {
        let broker = Arc::new(MemoryBroker::new());
        let link = Link::new(broker.clone(), &DiscoveryConfig::default());
        let spec: PropertySpec = token.parse().unwrap();
        let property = Property::new("homie/dev1/light", "dev1_light", spec, link);
        (broker, property)
    }

    #[test]
    fn identity() {
        let (_, property) = property("brightness[0-100]");
        assert_eq!(property.path(), "homie/dev1/light/brightness");
        assert_eq!(property.entity_id(), "dev1_light_brightness");
        assert_eq!(property.range(), Some((0, 100)));
        assert!(!property.settable());
        assert_eq!(property.stage(), Stage::Discovering);
    }

    #[test]
    fn setup_makes_property_ready() {
        let (_, property) = property("power");
        property.setup();
        assert_eq!(property.stage(), Stage::Ready);
    }

    #[test]
    fn update_sets_state_and_attributes() {
        let (_, property) = property("power");
        property.update("homie/dev1/light/power", "true");
        property.update("homie/dev1/light/power/$name", "Power");
        property.update("homie/dev1/light/power/set", "false");
        property.update("homie/dev1/light/powerful", "ignored");

        assert_eq!(property.state().as_deref(), Some("true"));
        assert_eq!(property.attributes().name.as_deref(), Some("Power"));
    }

    #[test]
    fn state_changes_notify_once_per_value() {
        let (_, property) = property("power");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        property.on_attribute_change(
            AttributeFilter::only([PropertyAttribute::State]),
            move |_, change| {
                sink.lock()
                    .push((change.old.map(str::to_string), change.new.map(str::to_string)));
            },
        );

        property.update("homie/dev1/light/power", "true");
        property.update("homie/dev1/light/power", "true");
        property.update("homie/dev1/light/power", "false");

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], (Some("true".to_string()), Some("false".to_string())));
    }

    #[test]
    fn set_state_publishes_command() {
        let (broker, property) = property("power:settable");
        property.set_state("true").unwrap();

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "homie/dev1/light/power/set");
        assert_eq!(published[0].payload, "true");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert!(published[0].retain);
    }

    #[test]
    fn set_state_on_read_only_property_fails() {
        let (broker, property) = property("temperature");
        let err = property.set_state("21").unwrap_err();
        assert!(matches!(err, Error::NotSettable { ref entity_id } if entity_id == "dev1_light_temperature"));
        assert!(broker.published().is_empty());
    }

    #[test]
    fn attribute_suffix_lookup() {
        assert_eq!(PropertyAttribute::from_suffix(""), Some(PropertyAttribute::State));
        assert_eq!(
            PropertyAttribute::from_suffix("/$unit"),
            Some(PropertyAttribute::Unit)
        );
        assert_eq!(PropertyAttribute::from_suffix("/set"), None);
    }
}
