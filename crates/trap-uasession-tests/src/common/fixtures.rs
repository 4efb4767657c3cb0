// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built node ids, client configurations and subscription settings.
//! Timings are short so suites finish quickly against the mock server.

use std::time::Duration;

use trap_uasession::{
    ClientConfig, ConnectionStrategy, NodeId, ReadValueId, SubscriptionSettings,
};

/// Endpoint used by every mock channel.
pub const TEST_ENDPOINT: &str = "opc.tcp://mock-plc:4840";

// =============================================================================
// Nodes
// =============================================================================

/// Node ids of a small production line.
pub struct NodeFixtures;

impl NodeFixtures {
    /// Line temperature.
    pub fn temperature() -> NodeId {
        NodeId::string(2, "Line1.Temperature")
    }

    /// Line pressure.
    pub fn pressure() -> NodeId {
        NodeId::string(2, "Line1.Pressure")
    }

    /// Writable speed set point.
    pub fn setpoint() -> NodeId {
        NodeId::string(2, "Line1.SpeedSetpoint")
    }

    /// Node the server does not know.
    pub fn missing() -> NodeId {
        NodeId::string(2, "Line1.DoesNotExist")
    }

    /// Event notifier of the line.
    pub fn alarms() -> NodeId {
        NodeId::string(2, "Line1.Alarms")
    }

    /// `count` distinct tag nodes.
    pub fn tags(count: usize) -> Vec<NodeId> {
        (0..count)
            .map(|i| NodeId::string(2, format!("Line1.Tag{i:03}")))
            .collect()
    }

    /// Value attributes of `count` tag nodes.
    pub fn tag_values(count: usize) -> Vec<ReadValueId> {
        Self::tags(count)
            .into_iter()
            .map(ReadValueId::value_of)
            .collect()
    }
}

// =============================================================================
// Configurations
// =============================================================================

/// Client configurations tuned for tests.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// Fast timings, no keep-alive, bounded repair.
    pub fn fast() -> ClientConfig {
        ClientConfig::builder()
            .endpoint(TEST_ENDPOINT)
            .application_name("trap-uasession-tests")
            .session_timeout(Duration::from_secs(30))
            .request_timeout(Duration::from_secs(2))
            .keepalive(false)
            .connection(Self::fast_reconnect())
            .repair_backoff(Duration::from_millis(50))
            .repair_max_attempts(3)
            .subscription(SubscriptionFixtures::fast())
            .build()
            .expect("fast fixture config is valid")
    }

    /// Reconnects every 20ms, at most five times.
    pub fn fast_reconnect() -> ConnectionStrategy {
        ConnectionStrategy::fixed(Duration::from_millis(20), Some(5))
    }

    /// YAML file equivalent to a production deployment.
    pub fn yaml() -> &'static str {
        r#"
client:
  endpoint: opc.tcp://mock-plc:4840
  application_name: line1-collector
  session_timeout: 30s
  request_timeout: 2s
  keepalive_enabled: false
  connection:
    retry_connection: true
    max_retries: 5
    base_delay: 20ms
    max_delay: 20ms
    strategy: fixed
  repair:
    backoff: 50ms
    max_attempts: 3
  subscription:
    publishing_interval: 100ms
    lifetime_count: 60
    keepalive_count: 10
  max_monitored_items_per_call: 50
logging:
  level: debug
  format: compact
"#
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Subscription settings for tests.
pub struct SubscriptionFixtures;

impl SubscriptionFixtures {
    /// 100ms publishing interval, default counts.
    pub fn fast() -> SubscriptionSettings {
        SubscriptionSettings::with_interval(Duration::from_millis(100))
    }

    /// Slower subscription used to check modifications.
    pub fn slow() -> SubscriptionSettings {
        SubscriptionSettings {
            publishing_interval: Duration::from_millis(500),
            lifetime_count: 90,
            keepalive_count: 20,
            ..Default::default()
        }
    }
}
