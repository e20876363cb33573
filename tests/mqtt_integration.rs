// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT transport using mockforge-mqtt.

#![cfg(feature = "mqtt")]

use std::sync::Arc;
use std::time::Duration;

use homie_discovery::{
    DiscoveryConfig, Error, HomieDiscovery, Message, MqttTransport, ProtocolError, QoS, Transport,
};
use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use tokio::time::sleep;

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to bind and accept connections
    sleep(Duration::from_millis(500)).await;
}

async fn connect(port: u16) -> MqttTransport {
    MqttTransport::builder()
        .host("127.0.0.1")
        .port(port)
        .connection_timeout(Duration::from_secs(5))
        .build()
        .await
        .expect("connect to mock broker")
}

// ============================================================================
// Connection Tests
// ============================================================================

mod connection {
    use super::*;

    #[tokio::test]
    async fn connect_to_broker() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let transport = connect(port).await;

        assert!(transport.is_connected());
        assert_eq!(transport.host(), "127.0.0.1");
        assert_eq!(transport.port(), port);
    }

    #[tokio::test]
    async fn missing_host_is_rejected() {
        let result = MqttTransport::builder().port(1883).build().await;
        assert!(matches!(result, Err(ProtocolError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn unreachable_broker_times_out() {
        let port = get_test_port();

        let result = MqttTransport::builder()
            .host("127.0.0.1")
            .port(port)
            .connection_timeout(Duration::from_millis(300))
            .reconnect_delay(Duration::from_millis(50))
            .build()
            .await;

        assert!(matches!(result, Err(ProtocolError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn disconnect_clears_subscriptions() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let transport = connect(port).await;
        transport.subscribe("homie/+/$homie", QoS::AtLeastOnce, Arc::new(|_: &Message| {}));
        assert_eq!(transport.subscription_count(), 1);

        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.subscription_count(), 0);
    }
}

// ============================================================================
// Discovery over MQTT
// ============================================================================
//
// The mock broker does not forward publishes between clients, so these tests
// cover subscription bookkeeping and command publishing. Convergence of the
// discovery stages is covered against `MemoryBroker` in discovery_flow.rs.

mod discovery {
    use super::*;

    #[tokio::test]
    async fn start_subscribes_to_announcements() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let transport = connect(port).await;
        let discovery =
            HomieDiscovery::new(Arc::new(transport.clone()), DiscoveryConfig::default());

        discovery.start().unwrap();
        assert_eq!(transport.subscription_count(), 1);
        assert!(matches!(discovery.start(), Err(Error::AlreadyStarted)));
        assert_eq!(transport.subscription_count(), 1);
        assert!(discovery.devices().is_empty());
    }

    #[tokio::test]
    async fn malformed_pattern_is_not_subscribed() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let transport = connect(port).await;
        transport.subscribe("homie/#/$homie", QoS::AtLeastOnce, Arc::new(|_: &Message| {}));

        assert_eq!(transport.subscription_count(), 0);
    }

    #[tokio::test]
    async fn publish_does_not_block() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let transport = connect(port).await;
        transport.publish("homie/dev1/light/power/set", "true", QoS::AtLeastOnce, true);

        // Give the event loop time to flush the request
        sleep(Duration::from_millis(100)).await;
        assert!(transport.is_connected());
    }
}
