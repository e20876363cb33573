// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic filter matching.
//!
//! Subscription patterns use the MQTT wildcards:
//!
//! - `+` matches exactly one topic level
//! - `#` matches one or more trailing levels and must be the last level
//!
//! ```
//! use homie_discovery::protocol::topic;
//!
//! assert!(topic::matches("homie/+/$homie", "homie/dev1/$homie"));
//! assert!(topic::matches("homie/dev1/#", "homie/dev1/light/$type"));
//! assert!(!topic::matches("homie/+/$homie", "homie/dev1/light/$homie"));
//! ```

/// Single-level wildcard.
const SINGLE_LEVEL: &str = "+";

/// Multi-level wildcard.
const MULTI_LEVEL: &str = "#";

/// Returns `true` if `topic` is matched by the subscription `pattern`.
///
/// Malformed patterns or topics never match; this function does not panic.
#[must_use]
pub fn matches(pattern: &str, topic: &str) -> bool {
    if !is_valid_pattern(pattern) || !is_valid_topic(topic) {
        return false;
    }

    let mut topic_levels = topic.split('/');

    for level in pattern.split('/') {
        if level == MULTI_LEVEL {
            // Absorbs the remainder, which must hold at least one level
            return topic_levels.next().is_some();
        }

        let Some(topic_level) = topic_levels.next() else {
            return false;
        };

        if level != SINGLE_LEVEL && level != topic_level {
            return false;
        }
    }

    topic_levels.next().is_none()
}

/// Returns `true` if `pattern` is a well-formed subscription pattern.
///
/// Every level must be non-empty; wildcards must occupy a whole level and
/// `#` may only appear as the last level.
#[must_use]
pub fn is_valid_pattern(pattern: &str) -> bool {
    let levels: Vec<&str> = pattern.split('/').collect();
    let last = levels.len() - 1;

    levels.iter().enumerate().all(|(index, level)| match *level {
        "" => false,
        MULTI_LEVEL => index == last,
        SINGLE_LEVEL => true,
        other => !other.contains(['+', '#']),
    })
}

/// Returns `true` if `topic` is a concrete, non-empty topic without wildcards.
#[must_use]
pub fn is_valid_topic(topic: &str) -> bool {
    topic
        .split('/')
        .all(|level| !level.is_empty() && !level.contains(['+', '#']))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_wildcard() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/b/b/c"));
        assert!(!matches("a/+", "a"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(matches("a/#", "a/b/c/d"));
        assert!(matches("a/#", "a/b"));
        assert!(!matches("a/#", "z/b"));
        assert!(!matches("a/#", "a"));
        assert!(matches("#", "a/b"));
    }

    #[test]
    fn exact_levels() {
        assert!(matches("homie/dev1/$homie", "homie/dev1/$homie"));
        assert!(!matches("homie/dev1/$homie", "homie/Dev1/$homie"));
        assert!(!matches("homie/dev1", "homie/dev1/$homie"));
        assert!(!matches("homie/dev1/$homie", "homie/dev1"));
    }

    #[test]
    fn multi_level_must_be_last() {
        assert!(!is_valid_pattern("a/#/c"));
        assert!(!matches("a/#/c", "a/b/c"));
    }

    #[test]
    fn malformed_inputs_do_not_match() {
        assert!(!matches("a/b+/c", "a/b+/c"));
        assert!(!matches("a//c", "a//c"));
        assert!(!matches("a/+/c", "a/+/c"));
        assert!(!matches("", ""));
        assert!(!matches("a/b/", "a/b/"));
    }

    #[test]
    fn pattern_validation() {
        assert!(is_valid_pattern("homie/+/$homie"));
        assert!(is_valid_pattern("homie/dev1/#"));
        assert!(is_valid_pattern("+"));
        assert!(!is_valid_pattern("homie/de#v"));
        assert!(!is_valid_pattern("/homie"));
    }

    #[test]
    fn topic_validation() {
        assert!(is_valid_topic("homie/dev1/light/power"));
        assert!(!is_valid_topic("homie/+/light"));
        assert!(!is_valid_topic("homie/dev1/"));
    }
}
