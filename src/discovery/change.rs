// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attribute change notification.
//!
//! Each entity routes its attribute writes through a single helper that
//! compares the old and new value and, when they differ, calls
//! [`ChangeNotifier::notify`]. Stage re-evaluation is wired to gating
//! attributes through this mechanism.

use std::sync::Arc;

use parking_lot::Mutex;

/// Selects which attributes a listener is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeFilter<A> {
    /// Every attribute.
    Any,
    /// Only the listed attributes.
    Only(Vec<A>),
}

impl<A: PartialEq> AttributeFilter<A> {
    /// Creates a filter for the given attributes.
    pub fn only(attributes: impl IntoIterator<Item = A>) -> Self {
        Self::Only(attributes.into_iter().collect())
    }

    /// Returns `true` if a change of `attribute` passes this filter.
    pub fn accepts(&self, attribute: &A) -> bool {
        match self {
            Self::Any => true,
            Self::Only(attributes) => attributes.contains(attribute),
        }
    }
}

/// A single attribute change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeChange<'a, A> {
    /// The attribute that changed.
    pub attribute: A,
    /// Previous value, `None` if it was unknown.
    pub old: Option<&'a str>,
    /// New value.
    pub new: Option<&'a str>,
}

/// Callback invoked with the entity and the change.
pub type ChangeCallback<E, A> = Arc<dyn Fn(&E, &AttributeChange<'_, A>) + Send + Sync>;

struct ChangeListener<E, A> {
    filter: AttributeFilter<A>,
    callback: ChangeCallback<E, A>,
}

/// Registry of attribute change listeners for one entity.
pub struct ChangeNotifier<E, A> {
    listeners: Mutex<Vec<ChangeListener<E, A>>>,
}

impl<E, A: PartialEq> ChangeNotifier<E, A> {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener for changes passing `filter`.
    pub fn subscribe<F>(&self, filter: AttributeFilter<A>, callback: F)
    where
        F: Fn(&E, &AttributeChange<'_, A>) + Send + Sync + 'static,
    {
        self.listeners.lock().push(ChangeListener {
            filter,
            callback: Arc::new(callback),
        });
    }

    /// Calls every matching listener, in registration order.
    ///
    /// Callers are responsible for only notifying real changes.
    pub(crate) fn notify(&self, entity: &E, change: &AttributeChange<'_, A>) {
        let callbacks: Vec<ChangeCallback<E, A>> = self
            .listeners
            .lock()
            .iter()
            .filter(|listener| listener.filter.accepts(&change.attribute))
            .map(|listener| Arc::clone(&listener.callback))
            .collect();

        for callback in callbacks {
            callback(entity, change);
        }
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl<E, A: PartialEq> Default for ChangeNotifier<E, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, A> std::fmt::Debug for ChangeNotifier<E, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listener_count", &self.listeners.lock().len())
            .finish()
    }
}

/// Replaces `slot` with `value` and returns the previous value.
///
/// Returns `None` when the value is unchanged, in which case nothing must be
/// notified.
pub(crate) fn replace_if_changed(slot: &mut Option<String>, value: &str) -> Option<Option<String>> {
    if slot.as_deref() == Some(value) {
        return None;
    }
    Some(slot.replace(value.to_string()))
}
