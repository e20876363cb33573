// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process broker with retained messages.
//!
//! [`MemoryBroker`] behaves like an MQTT broker seen from a single client:
//! retained messages are replayed to new subscribers and every publish is
//! routed to the matching subscriptions. Deliveries are queued and only run
//! when [`MemoryBroker::flush`] is called, one message at a time, so a
//! subscription created while a message is being handled receives its
//! retained messages after that handler returns.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use homie_discovery::protocol::{MemoryBroker, Message, QoS, Transport};
//!
//! let broker = MemoryBroker::new();
//! broker.publish("homie/dev1/$homie", "3.0.0", QoS::AtLeastOnce, true);
//!
//! broker.subscribe("homie/+/$homie", QoS::AtLeastOnce, Arc::new(|message: &Message| {
//!     assert_eq!(message.payload, "3.0.0");
//! }));
//! assert_eq!(broker.flush(), 1);
//! ```

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;

use super::{Message, MessageHandler, QoS, Transport, topic};

/// A message published through the broker, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Published payload.
    pub payload: String,
    /// Requested QoS.
    pub qos: QoS,
    /// Requested retain flag.
    pub retain: bool,
}

struct Subscription {
    pattern: String,
    qos: QoS,
    handler: MessageHandler,
}

struct Delivery {
    handler: MessageHandler,
    message: Message,
}

#[derive(Default)]
struct BrokerState {
    /// Retained messages by topic, kept sorted for deterministic replay.
    retained: BTreeMap<String, String>,
    subscriptions: Vec<Subscription>,
    queue: VecDeque<Delivery>,
    published: Vec<PublishedMessage>,
}

/// In-process broker implementing [`Transport`].
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers queued messages until the queue is empty.
    ///
    /// Messages queued by handlers during the flush are delivered as well.
    /// Returns the number of deliveries made.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;

        // Pop under the lock, invoke without it so handlers may re-enter
        while let Some(delivery) = self.next_delivery() {
            tracing::trace!(topic = %delivery.message.topic, "Delivering message");
            (delivery.handler)(&delivery.message);
            delivered += 1;
        }

        delivered
    }

    fn next_delivery(&self) -> Option<Delivery> {
        self.state.lock().queue.pop_front()
    }

    /// Returns the number of deliveries waiting for [`flush`](Self::flush).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns the retained payload for `topic`, if any.
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.state.lock().retained.get(topic).cloned()
    }

    /// Returns every message published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.clone()
    }

    /// Returns the patterns of all active subscriptions, in subscribe order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|subscription| subscription.pattern.clone())
            .collect()
    }
}

impl Transport for MemoryBroker {
    fn subscribe(&self, pattern: &str, qos: QoS, handler: MessageHandler) {
        if !topic::is_valid_pattern(pattern) {
            tracing::warn!(pattern = %pattern, "Ignoring malformed subscription pattern");
            return;
        }

        let mut state = self.state.lock();

        let replay: Vec<Delivery> = state
            .retained
            .iter()
            .filter(|(retained_topic, _)| topic::matches(pattern, retained_topic))
            .map(|(retained_topic, payload)| Delivery {
                handler: handler.clone(),
                message: Message {
                    topic: retained_topic.clone(),
                    payload: payload.clone(),
                    qos,
                    retain: true,
                },
            })
            .collect();

        tracing::debug!(
            pattern = %pattern,
            retained = replay.len(),
            "Subscribed"
        );

        state.queue.extend(replay);
        state.subscriptions.push(Subscription {
            pattern: pattern.to_string(),
            qos,
            handler,
        });
    }

    fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) {
        if !topic::is_valid_topic(topic) {
            tracing::warn!(topic = %topic, "Ignoring publish to malformed topic");
            return;
        }

        let mut state = self.state.lock();

        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
            retain,
        });

        if retain {
            // An empty retained payload clears the topic
            if payload.is_empty() {
                state.retained.remove(topic);
            } else {
                state.retained.insert(topic.to_string(), payload.to_string());
            }
        }

        let deliveries: Vec<Delivery> = state
            .subscriptions
            .iter()
            .filter(|subscription| topic::matches(&subscription.pattern, topic))
            .map(|subscription| Delivery {
                handler: subscription.handler.clone(),
                message: Message {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                    qos: qos.downgrade_to(subscription.qos),
                    retain: false,
                },
            })
            .collect();

        state.queue.extend(deliveries);
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("retained", &state.retained.len())
            .field("subscriptions", &state.subscriptions.len())
            .field("pending", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<Message>>>, MessageHandler) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: MessageHandler = Arc::new(move |message: &Message| {
            sink.lock().push(message.clone());
        });
        (received, handler)
    }

    #[test]
    fn retained_messages_replay_on_subscribe() {
        let broker = MemoryBroker::new();
        broker.publish("homie/dev1/$homie", "3.0.0", QoS::AtLeastOnce, true);
        broker.publish("homie/dev2/$homie", "3.0.1", QoS::AtLeastOnce, true);
        broker.publish("homie/dev1/$name", "Desk", QoS::AtLeastOnce, true);

        let (received, handler) = recorder();
        broker.subscribe("homie/+/$homie", QoS::AtLeastOnce, handler);

        assert_eq!(broker.pending(), 2);
        assert_eq!(broker.flush(), 2);

        let received = received.lock();
        assert_eq!(received[0].topic, "homie/dev1/$homie");
        assert_eq!(received[1].payload, "3.0.1");
        assert!(received.iter().all(|message| message.retain));
    }

    #[test]
    fn live_publish_reaches_matching_subscribers_only() {
        let broker = MemoryBroker::new();
        let (nodes, nodes_handler) = recorder();
        let (all, all_handler) = recorder();

        broker.subscribe("homie/dev1/$nodes", QoS::AtLeastOnce, nodes_handler);
        broker.subscribe("homie/dev1/#", QoS::AtMostOnce, all_handler);

        broker.publish("homie/dev1/$nodes", "light", QoS::AtLeastOnce, false);
        broker.publish("homie/dev1/light/$type", "switch", QoS::AtLeastOnce, false);
        broker.flush();

        assert_eq!(nodes.lock().len(), 1);
        assert_eq!(all.lock().len(), 2);
        assert_eq!(all.lock()[0].qos, QoS::AtMostOnce);
        assert!(broker.retained("homie/dev1/$nodes").is_none());
    }

    #[test]
    fn empty_retained_payload_clears_topic() {
        let broker = MemoryBroker::new();
        broker.publish("homie/dev1/$online", "true", QoS::AtLeastOnce, true);
        assert_eq!(broker.retained("homie/dev1/$online").as_deref(), Some("true"));

        broker.publish("homie/dev1/$online", "", QoS::AtLeastOnce, true);
        assert!(broker.retained("homie/dev1/$online").is_none());
    }

    #[test]
    fn handlers_may_subscribe_during_flush() {
        let broker = Arc::new(MemoryBroker::new());
        broker.publish("a/b", "first", QoS::AtLeastOnce, true);
        broker.publish("a/c", "second", QoS::AtLeastOnce, true);

        let (nested, nested_handler) = recorder();
        let inner = Arc::clone(&broker);
        broker.subscribe(
            "a/b",
            QoS::AtLeastOnce,
            Arc::new(move |_message: &Message| {
                inner.subscribe("a/c", QoS::AtLeastOnce, nested_handler.clone());
            }),
        );

        assert_eq!(broker.flush(), 2);
        assert_eq!(nested.lock()[0].payload, "second");
    }

    #[test]
    fn malformed_patterns_and_topics_are_ignored() {
        let broker = MemoryBroker::new();
        let (received, handler) = recorder();

        broker.subscribe("a/#/b", QoS::AtLeastOnce, handler);
        broker.publish("a/+/b", "x", QoS::AtLeastOnce, true);

        assert!(broker.subscriptions().is_empty());
        assert!(broker.published().is_empty());
        assert_eq!(broker.flush(), 0);
        assert!(received.lock().is_empty());
    }

    #[test]
    fn published_log_records_flags() {
        let broker = MemoryBroker::new();
        broker.publish("homie/dev1/light/power/set", "true", QoS::ExactlyOnce, true);

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].qos, QoS::ExactlyOnce);
        assert!(published[0].retain);
    }
}
