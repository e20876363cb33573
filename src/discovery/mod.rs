// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Staged discovery of Homie devices.
//!
//! Devices announce themselves with a retained `{prefix}/{device_id}/$homie`
//! message and describe their structure in further retained topics:
//!
//! ```text
//! homie/dev1/$homie                 3.0.0
//! homie/dev1/$nodes                 light
//! homie/dev1/$online                true
//! homie/dev1/light/$type            switch
//! homie/dev1/light/$properties      power:settable,brightness[0-100]
//! homie/dev1/light/power            true
//! ```
//!
//! Each [`Device`], [`Node`] and [`Property`] tracks its own [`Stage`]:
//!
//! | Entity | `ChildrenReady` when | `Ready` when |
//! |--------|----------------------|--------------|
//! | Property | immediately | immediately |
//! | Node | `$properties` received and every property is at least `ChildrenReady` | every property is `Ready` and `$type` is known |
//! | Device | `$nodes` received and every node is at least `ChildrenReady` | every node is `Ready` and `$online` is known |
//!
//! A device subscribes to its whole subtree once it reaches
//! `ChildrenReady`, so the remaining attributes arrive after the structure is
//! known. Messages may arrive in any order; the stages converge the same
//! way. Stages never go backwards, so a child announced after its parent is
//! `Ready` does not make the parent discovering again.
//!
//! [`HomieDiscovery`] drives the process and reports transitions.

mod change;
mod config;
mod controller;
mod device;
mod node;
mod parse;
mod property;
mod stage;

pub use change::{AttributeChange, AttributeFilter, ChangeCallback, ChangeNotifier};
pub use config::{DEFAULT_DISCOVERY_PREFIX, DEFAULT_EVENT_CAPACITY, DiscoveryConfig};
pub(crate) use config::Link;
pub use controller::{
    DeviceStageCallback, HomieDiscovery, NodeStageCallback, PropertyStageCallback,
};
pub use device::{Device, DeviceAttribute, DeviceAttributes, DeviceSnapshot};
pub use node::{Node, NodeAttribute, NodeAttributes, NodeSnapshot};
pub use parse::{
    ConventionVersion, PropertySpec, device_id_from_topic, is_valid_id, parse_nodes,
    parse_properties,
};
pub use property::{Property, PropertyAttribute, PropertyAttributes, PropertySnapshot};
pub use stage::{Stage, StageCallback, StageFilter, StageTracker};

/// Returns the part of `topic` below `path`.
///
/// The result is empty for `path` itself and starts with `/` for
/// descendants. Returns `None` for unrelated topics, including siblings that
/// merely share a prefix such as `homie/dev10` for `homie/dev1`.
pub(crate) fn subtopic<'a>(path: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(path)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtopic_of_exact_path() {
        assert_eq!(subtopic("homie/dev1/light/power", "homie/dev1/light/power"), Some(""));
    }

    #[test]
    fn subtopic_of_descendant() {
        assert_eq!(
            subtopic("homie/dev1", "homie/dev1/$stats/uptime"),
            Some("/$stats/uptime")
        );
    }

    #[test]
    fn subtopic_rejects_siblings_and_strangers() {
        assert_eq!(subtopic("homie/dev1", "homie/dev10/$online"), None);
        assert_eq!(subtopic("homie/dev1", "other/dev1/$online"), None);
        assert_eq!(subtopic("homie/dev1/light", "homie/dev1"), None);
    }
}
