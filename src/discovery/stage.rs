// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Discovery stages and stage change subscriptions.
//!
//! Every entity owns a [`StageTracker`]. The stage only ever moves forward:
//!
//! ```text
//! Discovering ──► ChildrenReady ──► Ready
//! ```
//!
//! Listeners registered with a [`StageFilter`] are called once per accepted
//! transition, in registration order.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Progress of an entity towards being fully described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The entity exists but its children are still being discovered.
    #[default]
    Discovering,
    /// Every known child has finished discovering its own children.
    ChildrenReady,
    /// Every known child is ready and the gating attribute is known.
    Ready,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Discovering => "discovering",
            Self::ChildrenReady => "children_ready",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Selects which stage transitions a listener is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageFilter {
    /// Every transition.
    #[default]
    Any,
    /// Only the transition into the given stage.
    Only(Stage),
}

impl StageFilter {
    /// Returns `true` if a transition into `stage` passes this filter.
    #[must_use]
    pub fn accepts(self, stage: Stage) -> bool {
        match self {
            Self::Any => true,
            Self::Only(wanted) => wanted == stage,
        }
    }
}

impl From<Stage> for StageFilter {
    fn from(stage: Stage) -> Self {
        Self::Only(stage)
    }
}

/// Callback invoked with the entity and the stage it just entered.
pub type StageCallback<E> = Arc<dyn Fn(&E, Stage) + Send + Sync>;

struct StageSubscription<E> {
    filter: StageFilter,
    callback: StageCallback<E>,
}

/// Monotonic stage holder with stage change listeners.
pub struct StageTracker<E> {
    current: Mutex<Stage>,
    subscriptions: Mutex<Vec<StageSubscription<E>>>,
}

impl<E> StageTracker<E> {
    /// Creates a tracker in [`Stage::Discovering`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Stage::Discovering),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Returns the current stage.
    #[must_use]
    pub fn current(&self) -> Stage {
        *self.current.lock()
    }

    /// Registers a listener for transitions passing `filter`.
    pub fn subscribe<F>(&self, filter: impl Into<StageFilter>, callback: F)
    where
        F: Fn(&E, Stage) + Send + Sync + 'static,
    {
        self.subscriptions.lock().push(StageSubscription {
            filter: filter.into(),
            callback: Arc::new(callback),
        });
    }

    /// Moves `entity` to `stage` and notifies listeners.
    ///
    /// Does nothing and returns `false` if `stage` is not past the current
    /// stage. Listeners run after the locks are released, so they may read
    /// the entity or register further listeners.
    pub(crate) fn advance(&self, entity: &E, stage: Stage) -> bool {
        {
            let mut current = self.current.lock();
            if stage <= *current {
                return false;
            }
            *current = stage;
        }

        let callbacks: Vec<StageCallback<E>> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|subscription| subscription.filter.accepts(stage))
            .map(|subscription| Arc::clone(&subscription.callback))
            .collect();

        for callback in callbacks {
            callback(entity, stage);
        }

        true
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl<E> Default for StageTracker<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for StageTracker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageTracker")
            .field("current", &self.current())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Discovering < Stage::ChildrenReady);
        assert!(Stage::ChildrenReady < Stage::Ready);
        assert_eq!(Stage::default(), Stage::Discovering);
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::ChildrenReady.to_string(), "children_ready");
    }

    #[test]
    fn filter_accepts() {
        assert!(StageFilter::Any.accepts(Stage::Ready));
        assert!(StageFilter::Only(Stage::Ready).accepts(Stage::Ready));
        assert!(!StageFilter::from(Stage::Ready).accepts(Stage::ChildrenReady));
    }

    #[test]
    fn advance_is_monotonic_and_fires_once() {
        let tracker = StageTracker::<Probe>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.subscribe(StageFilter::Any, move |_, stage| sink.lock().push(stage));

        assert!(tracker.advance(&Probe, Stage::ChildrenReady));
        assert!(!tracker.advance(&Probe, Stage::ChildrenReady));
        assert!(!tracker.advance(&Probe, Stage::Discovering));
        assert!(tracker.advance(&Probe, Stage::Ready));
        assert!(!tracker.advance(&Probe, Stage::Ready));

        assert_eq!(*seen.lock(), vec![Stage::ChildrenReady, Stage::Ready]);
        assert_eq!(tracker.current(), Stage::Ready);
    }

    #[test]
    fn stages_may_be_skipped() {
        let tracker = StageTracker::<Probe>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.subscribe(StageFilter::Any, move |_, stage| sink.lock().push(stage));

        assert!(tracker.advance(&Probe, Stage::Ready));
        assert!(!tracker.advance(&Probe, Stage::ChildrenReady));
        assert_eq!(*seen.lock(), vec![Stage::Ready]);
    }

    #[test]
    fn filtered_listeners_run_in_registration_order() {
        let tracker = StageTracker::<Probe>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        tracker.subscribe(Stage::Ready, move |_, _| first.lock().push("first"));
        let skipped = Arc::clone(&order);
        tracker.subscribe(Stage::ChildrenReady, move |_, _| {
            skipped.lock().push("children_ready");
        });
        let second = Arc::clone(&order);
        tracker.subscribe(StageFilter::Any, move |_, _| second.lock().push("second"));

        tracker.advance(&Probe, Stage::Ready);
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn listener_may_register_during_dispatch() {
        let tracker = Arc::new(StageTracker::<Probe>::new());
        let inner = Arc::clone(&tracker);
        tracker.subscribe(Stage::ChildrenReady, move |_, _| {
            inner.subscribe(Stage::Ready, |_, _| {});
        });

        tracker.advance(&Probe, Stage::ChildrenReady);
        assert_eq!(tracker.listener_count(), 2);
    }
}
