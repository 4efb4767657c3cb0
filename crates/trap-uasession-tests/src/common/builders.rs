// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Builders
//!
//! Builders for clients wired to a [`MockChannel`] and for notification
//! payloads the mock server publishes.

use std::sync::Arc;
use std::time::Duration;

use trap_uasession::messages::{EventFieldList, MonitoredItemNotification, NotificationData};
use trap_uasession::{
    ClientConfig, ConnectionStrategy, DataValue, RecoveryPolicy, StatusCode, SubscriptionSettings,
    UaClient, Variant,
};

use super::fixtures::{ConfigFixtures, SubscriptionFixtures, TEST_ENDPOINT};
use super::mocks::MockChannel;

// =============================================================================
// TestClientBuilder
// =============================================================================

/// Builds a [`UaClient`] on top of a fresh [`MockChannel`].
///
/// ```rust,ignore
/// let (channel, client) = TestClientBuilder::new()
///     .keepalive(true)
///     .repair_max_attempts(1)
///     .build();
/// ```
pub struct TestClientBuilder {
    session_timeout: Duration,
    request_timeout: Duration,
    keepalive: bool,
    connection: ConnectionStrategy,
    repair_backoff: Duration,
    repair_max_attempts: u32,
    policy: RecoveryPolicy,
    max_publish_requests: u32,
    max_items_per_call: usize,
    subscription: SubscriptionSettings,
}

impl Default for TestClientBuilder {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(2),
            keepalive: false,
            connection: ConfigFixtures::fast_reconnect(),
            repair_backoff: Duration::from_millis(50),
            repair_max_attempts: 3,
            policy: RecoveryPolicy::default(),
            max_publish_requests: 5,
            max_items_per_call: 1000,
            subscription: SubscriptionFixtures::fast(),
        }
    }
}

impl TestClientBuilder {
    /// Starts from the fast fixture settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    pub fn connection(mut self, strategy: ConnectionStrategy) -> Self {
        self.connection = strategy;
        self
    }

    pub fn repair_backoff(mut self, backoff: Duration) -> Self {
        self.repair_backoff = backoff;
        self
    }

    /// Zero means unlimited.
    pub fn repair_max_attempts(mut self, attempts: u32) -> Self {
        self.repair_max_attempts = attempts;
        self
    }

    pub fn recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_publish_requests(mut self, max: u32) -> Self {
        self.max_publish_requests = max;
        self
    }

    pub fn max_items_per_call(mut self, max: usize) -> Self {
        self.max_items_per_call = max;
        self
    }

    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.subscription = settings;
        self
    }

    /// Client configuration only.
    pub fn config(&self) -> ClientConfig {
        let mut builder = ClientConfig::builder()
            .endpoint(TEST_ENDPOINT)
            .application_name("trap-uasession-tests")
            .session_timeout(self.session_timeout)
            .request_timeout(self.request_timeout)
            .keepalive(self.keepalive)
            .connection(self.connection.clone())
            .repair_backoff(self.repair_backoff)
            .recovery_policy(self.policy.clone())
            .max_publish_requests(self.max_publish_requests)
            .max_monitored_items_per_call(self.max_items_per_call)
            .subscription(self.subscription.clone());
        if self.repair_max_attempts > 0 {
            builder = builder.repair_max_attempts(self.repair_max_attempts);
        }
        builder.build().expect("test client config is valid")
    }

    /// Builds a disconnected client and its channel.
    pub fn build(self) -> (Arc<MockChannel>, UaClient) {
        let channel = Arc::new(MockChannel::new(TEST_ENDPOINT));
        let client = UaClient::new(self.config(), channel.clone())
            .expect("client construction succeeds");
        (channel, client)
    }
}

// =============================================================================
// NotificationBuilder
// =============================================================================

/// Builds the payload of one notification message.
#[derive(Default)]
pub struct NotificationBuilder {
    changes: Vec<MonitoredItemNotification>,
    events: Vec<EventFieldList>,
    status: Option<StatusCode>,
}

impl NotificationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a good data change.
    pub fn data_change(mut self, client_handle: u32, value: Variant) -> Self {
        self.changes.push(MonitoredItemNotification {
            client_handle,
            value: DataValue::new(value),
        });
        self
    }

    /// Adds a data change carrying a bad status.
    pub fn bad_value(mut self, client_handle: u32, status: StatusCode) -> Self {
        self.changes.push(MonitoredItemNotification {
            client_handle,
            value: DataValue::from_status(status),
        });
        self
    }

    /// Adds an event notification.
    pub fn event(mut self, client_handle: u32, fields: Vec<Variant>) -> Self {
        self.events.push(EventFieldList {
            client_handle,
            event_fields: fields,
        });
        self
    }

    /// Adds a subscription status change.
    pub fn status_change(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(self) -> Vec<NotificationData> {
        let mut data = Vec::new();
        if !self.changes.is_empty() {
            data.push(NotificationData::DataChange(self.changes));
        }
        if !self.events.is_empty() {
            data.push(NotificationData::Event(self.events));
        }
        if let Some(status) = self.status {
            data.push(NotificationData::StatusChange(status));
        }
        data
    }
}
