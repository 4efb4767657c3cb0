// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! [`TestHarness`] owns a connected [`UaClient`] and the [`MockChannel`]
//! behind it, and provides shortcuts for the usual starting points: an open
//! session, a running subscription, a batch of monitored items.

use std::sync::Arc;

use trap_uasession::{
    MonitoredItemGroup, MonitoringParameters, Session, SessionState, Subscription,
    TimestampsToReturn, UaClient, UserIdentity,
};

use super::builders::TestClientBuilder;
use super::fixtures::{NodeFixtures, SubscriptionFixtures};
use super::init_test_logging;
use super::mocks::MockChannel;

/// Connected client plus the mock server behind it.
pub struct TestHarness {
    /// Mock channel and server.
    pub channel: Arc<MockChannel>,
    /// Client under test.
    pub client: UaClient,
}

impl TestHarness {
    /// Harness with default test settings.
    pub async fn start() -> Self {
        Self::with_builder(TestClientBuilder::new()).await
    }

    /// Harness with custom settings.
    pub async fn with_builder(builder: TestClientBuilder) -> Self {
        init_test_logging();
        let (channel, client) = builder.build();
        client.connect().await.expect("mock channel connects");
        Self { channel, client }
    }

    /// Opens an anonymous session.
    pub async fn open_session(&self) -> Session {
        let session = self
            .client
            .open_session(UserIdentity::Anonymous)
            .await
            .expect("session opens");
        assert_eq!(session.state(), SessionState::Active);
        session
    }

    /// Opens a session with one subscription and waits until its publish
    /// requests are outstanding.
    pub async fn session_with_subscription(&self) -> (Session, Subscription) {
        let session = self.open_session().await;
        let subscription = session
            .create_subscription(SubscriptionFixtures::fast())
            .await
            .expect("subscription is created");
        self.wait_for_publishes(1).await;
        (session, subscription)
    }

    /// Opens a session with a subscription monitoring `count` tags.
    pub async fn monitored(&self, count: usize) -> (Session, Subscription, MonitoredItemGroup) {
        let (session, subscription) = self.session_with_subscription().await;
        let group = subscription
            .monitor_items(
                NodeFixtures::tag_values(count),
                MonitoringParameters::default(),
                TimestampsToReturn::Both,
            )
            .await
            .expect("items are created");
        (session, subscription, group)
    }

    /// Waits until the server holds at least `count` Publish requests.
    pub async fn wait_for_publishes(&self, count: usize) {
        let channel = Arc::clone(&self.channel);
        super::assertions::wait_until(&format!("{count} parked publish requests"), move || {
            channel.parked_publishes() >= count
        })
        .await;
    }

    /// Disconnects the client.
    pub async fn shutdown(self) {
        let _ = self.client.disconnect().await;
    }
}
