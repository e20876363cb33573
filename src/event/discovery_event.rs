// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery event types.

use std::sync::Arc;

use crate::discovery::{Device, Node, Property, Stage};

/// Events emitted by [`HomieDiscovery`](crate::HomieDiscovery).
///
/// Entities are shared through `Arc` handles, so receivers can query their
/// current attributes or register further listeners.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A supported `$homie` announcement created a new device.
    DeviceDiscovered {
        /// The new device, still discovering its nodes.
        device: Arc<Device>,
    },

    /// A device entered a new stage.
    DeviceStageChanged {
        /// The device.
        device: Arc<Device>,
        /// The stage it entered.
        stage: Stage,
    },

    /// A node entered a new stage, or was reported with its current stage
    /// once its device finished discovering children.
    NodeStageChanged {
        /// Id of the owning device.
        device_id: String,
        /// The node.
        node: Arc<Node>,
        /// The node's stage.
        stage: Stage,
    },

    /// A property entered a new stage, or was reported with its current
    /// stage once its device finished discovering children.
    PropertyStageChanged {
        /// Id of the owning device.
        device_id: String,
        /// The property.
        property: Arc<Property>,
        /// The property's stage.
        stage: Stage,
    },
}

impl DiscoveryEvent {
    /// Returns the id of the device this event belongs to.
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::DeviceDiscovered { device } | Self::DeviceStageChanged { device, .. } => {
                device.id()
            }
            Self::NodeStageChanged { device_id, .. }
            | Self::PropertyStageChanged { device_id, .. } => device_id,
        }
    }

    /// Returns the entity id of the entity this event is about.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::DeviceDiscovered { device } | Self::DeviceStageChanged { device, .. } => {
                device.id()
            }
            Self::NodeStageChanged { node, .. } => node.entity_id(),
            Self::PropertyStageChanged { property, .. } => property.entity_id(),
        }
    }

    /// Returns the stage carried by the event, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::DeviceDiscovered { .. } => None,
            Self::DeviceStageChanged { stage, .. }
            | Self::NodeStageChanged { stage, .. }
            | Self::PropertyStageChanged { stage, .. } => Some(*stage),
        }
    }
}
