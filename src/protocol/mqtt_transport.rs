// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT broker connection implementing [`Transport`].
//!
//! [`MqttTransport`] owns a `rumqttc` client and a single event-loop task.
//! Incoming publishes are routed to the handlers of every matching
//! subscription from that task, so handlers never run concurrently.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use homie_discovery::{DiscoveryConfig, HomieDiscovery, MqttTransport};
//!
//! # async fn example() -> homie_discovery::Result<()> {
//! let transport = MqttTransport::builder()
//!     .host("192.168.1.50")
//!     .port(1883)
//!     .credentials("user", "password")
//!     .build()
//!     .await?;
//!
//! let discovery = HomieDiscovery::new(Arc::new(transport.clone()), DiscoveryConfig::default());
//! discovery.start()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use tokio::sync::oneshot;

use super::{Message, MessageHandler, QoS, Transport, topic};
use crate::error::ProtocolError;

/// Global counter for generating unique client IDs.
static CLIENT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Configuration for an MQTT transport connection.
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connection_timeout: Duration,
    reconnect_delay: Duration,
    client_id_prefix: String,
    request_capacity: usize,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            credentials: None,
            keep_alive: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            client_id_prefix: "homie_discovery".to_string(),
            request_capacity: 256,
        }
    }
}

/// A subscription routed locally to its handler.
struct Route {
    pattern: String,
    qos: QoS,
    handler: MessageHandler,
}

/// An MQTT broker connection usable as a discovery [`Transport`].
///
/// `MqttTransport` is cheaply cloneable (via `Arc`).
#[derive(Clone)]
pub struct MqttTransport {
    inner: Arc<MqttTransportInner>,
}

struct MqttTransportInner {
    client: AsyncClient,
    routes: RwLock<Vec<Route>>,
    config: MqttTransportConfig,
    connected: AtomicBool,
    closing: AtomicBool,
}

impl MqttTransport {
    /// Creates a new builder for configuring an MQTT transport.
    #[must_use]
    pub fn builder() -> MqttTransportBuilder {
        MqttTransportBuilder::default()
    }

    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.config.port
    }

    /// Returns the number of active subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.routes.read().len()
    }

    /// Disconnects from the broker and stops the event loop.
    ///
    /// # Errors
    ///
    /// Returns error if the disconnect request cannot be sent.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        self.inner.closing.store(true, Ordering::Release);
        self.inner.routes.write().clear();
        self.inner
            .client
            .disconnect()
            .await
            .map_err(ProtocolError::Mqtt)?;

        self.inner.connected.store(false, Ordering::Release);
        Ok(())
    }

    /// Routes an incoming message to every matching subscription handler.
    fn route_message(&self, message: &Message) {
        let handlers: Vec<MessageHandler> = self
            .inner
            .routes
            .read()
            .iter()
            .filter(|route| topic::matches(&route.pattern, &message.topic))
            .map(|route| Arc::clone(&route.handler))
            .collect();

        if handlers.is_empty() {
            tracing::trace!(topic = %message.topic, "No subscription for topic");
            return;
        }

        for handler in handlers {
            handler(message);
        }
    }

    /// Re-issues every subscription, used after (re)connecting.
    fn resubscribe_all(&self) {
        let routes: Vec<(String, QoS)> = self
            .inner
            .routes
            .read()
            .iter()
            .map(|route| (route.pattern.clone(), route.qos))
            .collect();

        for (pattern, qos) in routes {
            if let Err(e) = self.inner.client.try_subscribe(&pattern, qos.into()) {
                tracing::warn!(pattern = %pattern, error = %e, "Failed to resubscribe");
            }
        }
    }
}

impl Transport for MqttTransport {
    fn subscribe(&self, pattern: &str, qos: QoS, handler: MessageHandler) {
        if !topic::is_valid_pattern(pattern) {
            tracing::warn!(pattern = %pattern, "Ignoring malformed subscription pattern");
            return;
        }

        self.inner.routes.write().push(Route {
            pattern: pattern.to_string(),
            qos,
            handler,
        });

        match self.inner.client.try_subscribe(pattern, qos.into()) {
            Ok(()) => tracing::debug!(pattern = %pattern, qos = qos.level(), "Subscribed"),
            Err(e) => tracing::warn!(pattern = %pattern, error = %e, "Failed to subscribe"),
        }
    }

    fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) {
        tracing::debug!(topic = %topic, payload = %payload, retain, "Publishing");

        if let Err(e) =
            self.inner
                .client
                .try_publish(topic, qos.into(), retain, payload.as_bytes().to_vec())
        {
            tracing::warn!(topic = %topic, error = %e, "Failed to publish");
        }
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builder for creating an MQTT transport.
///
/// # Examples
///
/// ```no_run
/// use homie_discovery::MqttTransport;
/// use std::time::Duration;
///
/// # async fn example() -> homie_discovery::Result<()> {
/// let transport = MqttTransport::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .keep_alive(Duration::from_secs(60))
///     .connection_timeout(Duration::from_secs(5))
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MqttTransportBuilder {
    config: MqttTransportConfig,
}

impl MqttTransportBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Sets the connection timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// Sets the pause between reconnection attempts (default: 5 seconds).
    #[must_use]
    pub fn reconnect_delay(mut self, duration: Duration) -> Self {
        self.config.reconnect_delay = duration;
        self
    }

    /// Sets the client id prefix (default: `homie_discovery`).
    #[must_use]
    pub fn client_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.client_id_prefix = prefix.into();
        self
    }

    /// Sets the capacity of the outgoing request queue (default: 256).
    ///
    /// Subscriptions and publishes are queued without waiting; requests that
    /// do not fit are dropped and logged.
    #[must_use]
    pub fn request_capacity(mut self, capacity: usize) -> Self {
        self.config.request_capacity = capacity;
        self
    }

    /// Builds and connects the transport.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - Connection fails
    /// - Connection times out
    pub async fn build(self) -> Result<MqttTransport, ProtocolError> {
        if self.config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let counter = CLIENT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let client_id = format!(
            "{}_{}_{}",
            self.config.client_id_prefix,
            std::process::id(),
            counter
        );

        let mut mqtt_options = MqttOptions::new(&client_id, &self.config.host, self.config.port);
        mqtt_options.set_keep_alive(self.config.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.config.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, self.config.request_capacity);

        let transport = MqttTransport {
            inner: Arc::new(MqttTransportInner {
                client,
                routes: RwLock::new(Vec::new()),
                config: self.config.clone(),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
        };

        let (connack_tx, connack_rx) = oneshot::channel();

        let loop_transport = transport.clone();
        tokio::spawn(async move {
            handle_events(event_loop, loop_transport, connack_tx).await;
        });

        let timeout = self.config.connection_timeout;
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(())) => {
                tracing::info!(
                    host = %self.config.host,
                    port = %self.config.port,
                    client_id = %client_id,
                    "Connected to MQTT broker"
                );
                Ok(transport)
            }
            Ok(Err(_)) => Err(ProtocolError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => {
                transport.inner.closing.store(true, Ordering::Release);
                Err(ProtocolError::ConnectionFailed(format!(
                    "MQTT connection timeout after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

/// Polls the event loop, delivering incoming publishes one at a time.
async fn handle_events(
    mut event_loop: EventLoop,
    transport: MqttTransport,
    connack_tx: oneshot::Sender<()>,
) {
    use rumqttc::{Event, Packet};

    let mut connack_tx = Some(connack_tx);

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                transport.inner.connected.store(true, Ordering::Release);
                transport.resubscribe_all();
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(());
                }
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::trace!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                match String::from_utf8(publish.payload.to_vec()) {
                    Ok(payload) => {
                        tracing::trace!(topic = %publish.topic, payload = %payload, "MQTT message received");
                        let message = Message {
                            topic: publish.topic.clone(),
                            payload,
                            qos: publish.qos.into(),
                            retain: publish.retain,
                        };
                        transport.route_message(&message);
                    }
                    Err(_) => {
                        tracing::debug!(topic = %publish.topic, "Dropping non UTF-8 payload");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                transport.inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                transport.inner.connected.store(false, Ordering::Release);
                if transport.inner.closing.load(Ordering::Acquire) {
                    tracing::debug!(error = %e, "MQTT event loop stopped");
                    break;
                }
                tracing::warn!(error = %e, "MQTT event loop error, reconnecting");
                tokio::time::sleep(transport.inner.config.reconnect_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_values() {
        let builder = MqttTransportBuilder::default();
        assert_eq!(builder.config.port, 1883);
        assert!(builder.config.host.is_empty());
        assert!(builder.config.credentials.is_none());
        assert_eq!(builder.config.keep_alive, Duration::from_secs(30));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(10));
        assert_eq!(builder.config.request_capacity, 256);
    }

    #[test]
    fn builder_chain() {
        let builder = MqttTransportBuilder::default()
            .host("192.168.1.50")
            .port(8883)
            .credentials("admin", "secret")
            .keep_alive(Duration::from_secs(45))
            .connection_timeout(Duration::from_secs(15))
            .reconnect_delay(Duration::from_secs(1))
            .client_id_prefix("hass")
            .request_capacity(32);

        assert_eq!(builder.config.host, "192.168.1.50");
        assert_eq!(builder.config.port, 8883);
        assert_eq!(
            builder.config.credentials,
            Some(("admin".to_string(), "secret".to_string()))
        );
        assert_eq!(builder.config.keep_alive, Duration::from_secs(45));
        assert_eq!(builder.config.connection_timeout, Duration::from_secs(15));
        assert_eq!(builder.config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(builder.config.client_id_prefix, "hass");
        assert_eq!(builder.config.request_capacity, 32);
    }

    #[tokio::test]
    async fn builder_missing_host_fails() {
        let result = MqttTransportBuilder::default().build().await;
        assert!(matches!(result, Err(ProtocolError::InvalidAddress(_))));
    }

    #[test]
    fn transport_implements_transport_trait() {
        fn assert_transport<T: Transport>() {}
        assert_transport::<MqttTransport>();
    }
}
