// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsing of Homie discovery topics and payloads.
//!
//! | Input | Format |
//! |-------|--------|
//! | `$homie` payload | `major.minor.bugfix` |
//! | `$homie` topic | `{prefix}/{device_id}/$homie` |
//! | `$nodes` payload | comma separated node ids |
//! | `$properties` payload | comma separated `id[start-end]:settable` tokens |
//!
//! Token parsers drop malformed entries instead of failing the whole batch.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Suffix of the topic announcing a device.
pub(crate) const HOMIE_SUFFIX: &str = "$homie";

/// A Homie convention version (`major.minor.bugfix`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConventionVersion {
    /// Major version; must match exactly.
    pub major: u32,
    /// Minor version; the device must be at least the required minor.
    pub minor: u32,
    /// Bugfix version; ignored for compatibility.
    pub bugfix: u32,
}

impl ConventionVersion {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u32, minor: u32, bugfix: u32) -> Self {
        Self {
            major,
            minor,
            bugfix,
        }
    }

    /// Returns `true` if a device reporting `self` can be handled by code
    /// requiring `required`.
    #[must_use]
    pub fn is_compatible_with(&self, required: &ConventionVersion) -> bool {
        self.major == required.major && self.minor >= required.minor
    }
}

impl Default for ConventionVersion {
    fn default() -> Self {
        Self::new(3, 0, 0)
    }
}

impl FromStr for ConventionVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidVersion(s.to_string());

        let mut parts = s.trim().split('.');
        let mut component = || -> Result<u32, ParseError> {
            parts
                .next()
                .filter(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|part| part.parse().ok())
                .ok_or_else(invalid)
        };

        let version = Self::new(component()?, component()?, component()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl TryFrom<String> for ConventionVersion {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConventionVersion> for String {
    fn from(version: ConventionVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for ConventionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.bugfix)
    }
}

/// Extracts the device id from a `{prefix}/{device_id}/$homie` topic.
///
/// # Errors
///
/// Returns [`ParseError::InvalidTopic`] if the topic does not have exactly
/// that shape or the device id is not a valid Homie id.
pub fn device_id_from_topic<'a>(prefix: &str, topic: &'a str) -> Result<&'a str, ParseError> {
    let invalid = || ParseError::InvalidTopic(topic.to_string());

    let device_id = topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_suffix(HOMIE_SUFFIX))
        .and_then(|rest| rest.strip_suffix('/'))
        .ok_or_else(invalid)?;

    if is_valid_id(device_id) {
        Ok(device_id)
    } else {
        Err(invalid())
    }
}

/// Returns `true` if `id` is a non-empty run of `[A-Za-z0-9_-]`.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Parses a `$nodes` payload into node ids.
///
/// Malformed ids are dropped.
#[must_use]
pub fn parse_nodes(payload: &str) -> Vec<String> {
    payload
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            if is_valid_id(token) {
                Some(token.to_string())
            } else {
                tracing::debug!(token = %token, "Dropping malformed node id");
                None
            }
        })
        .collect()
}

/// A property announced in a `$properties` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    /// The property id.
    pub id: String,
    /// Whether the property accepts commands on its `/set` topic.
    pub settable: bool,
    /// Optional inclusive `(start, end)` range of a range property.
    pub range: Option<(u32, u32)>,
}

impl FromStr for PropertySpec {
    type Err = ParseError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidToken(token.to_string());

        let (rest, settable) = match token.strip_suffix(":settable") {
            Some(rest) => (rest, true),
            None => (token, false),
        };

        let (id, range) = match rest.split_once('[') {
            Some((id, bracketed)) => {
                let inner = bracketed.strip_suffix(']').ok_or_else(invalid)?;
                let (start, end) = inner.split_once('-').ok_or_else(invalid)?;
                let start = start.parse::<u32>().map_err(|_| invalid())?;
                let end = end.parse::<u32>().map_err(|_| invalid())?;
                (id, Some((start, end)))
            }
            None => (rest, None),
        };

        if !is_valid_id(id) {
            return Err(invalid());
        }

        Ok(Self {
            id: id.to_string(),
            settable,
            range,
        })
    }
}

/// Parses a `$properties` payload into property specs.
///
/// Malformed tokens are dropped.
#[must_use]
pub fn parse_properties(payload: &str) -> Vec<PropertySpec> {
    payload
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<PropertySpec>() {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed property token");
                None
            }
        })
        .collect()
}
