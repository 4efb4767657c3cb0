// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! End-to-end scenarios mixing data flow and outages.

use futures::future::join_all;
use trap_uasession_tests::prelude::*;

async fn wait_for_repair(events: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> FanOutReport {
    match expect_event(events, "repair_completed", |e| {
        matches!(e, ClientEvent::RepairCompleted { .. })
    })
    .await
    {
        ClientEvent::RepairCompleted { report } => report,
        other => panic!("unexpected {other:?}"),
    }
}

async fn expect_value(
    events: &mut tokio::sync::broadcast::Receiver<SubscriptionEvent>,
    handle: u32,
    expected: Variant,
) {
    let wanted = expected.clone();
    expect_event(events, &format!("{expected:?} on {handle}"), move |e| {
        matches!(
            e,
            SubscriptionEvent::DataChange { client_handle, value }
                if *client_handle == handle && value.value == wanted
        )
    })
    .await;
}

#[tokio::test]
async fn test_data_keeps_flowing_after_server_restart() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(10).await;
    let handles: Vec<u32> = group.items().iter().map(|i| i.client_handle()).collect();
    let mut client_events = harness.client.events();
    let mut data = subscription.events();

    harness
        .channel
        .notify_data_change(subscription.id(), &[(handles[0], Variant::Double(20.5))]);
    expect_value(&mut data, handles[0], Variant::Double(20.5)).await;

    harness.channel.restart(false);
    let report = wait_for_repair(&mut client_events).await;
    assert!(report.is_success());
    harness.wait_for_publishes(1).await;

    let changes: Vec<(u32, Variant)> = handles
        .iter()
        .enumerate()
        .map(|(i, h)| (*h, Variant::Int32(i as i32)))
        .collect();
    harness
        .channel
        .notify_data_change(subscription.id(), &changes);
    for (handle, value) in changes {
        expect_value(&mut data, handle, value).await;
    }

    assert_eq!(
        group.items()[9].last_value().map(|v| v.value),
        Some(Variant::Int32(9))
    );
    assert_eq!(subscription.item_count(), 10);
    assert_eq!(session.state(), SessionState::Active);
    assert!(!subscription.is_terminated());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_message_lost_during_outage_is_recovered() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(1).await;
    let handle = group.items()[0].client_handle();
    let mut client_events = harness.client.events();
    let mut data = subscription.events();

    harness
        .channel
        .notify_data_change(subscription.id(), &[(handle, Variant::Int32(1))]);
    expect_value(&mut data, handle, Variant::Int32(1)).await;

    harness.channel.lose_next(
        subscription.id(),
        NotificationBuilder::new()
            .data_change(handle, Variant::Int32(2))
            .build(),
    );
    harness.channel.break_connection();

    let report = wait_for_repair(&mut client_events).await;
    let repaired = match report.outcome(session.key()) {
        Some(Ok(report)) => report.clone(),
        other => panic!("repair failed: {other:?}"),
    };
    assert!(repaired.path.is_reactivation());
    assert_eq!(repaired.recovered, 1);
    expect_value(&mut data, handle, Variant::Int32(2)).await;
    assert_eq!(subscription.last_sequence_number(), 2);

    harness.wait_for_publishes(1).await;
    harness
        .channel
        .notify_data_change(subscription.id(), &[(handle, Variant::Int32(3))]);
    expect_value(&mut data, handle, Variant::Int32(3)).await;
    assert_eq!(session.publish_engine().stats().lost_messages, 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_consecutive_outages() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(3).await;
    let handle = group.items()[1].client_handle();
    let subscription_id = subscription.id();
    let mut client_events = harness.client.events();
    let mut data = subscription.events();

    harness.channel.break_connection();
    let first = wait_for_repair(&mut client_events).await;
    assert!(first.is_success());

    harness.channel.restart(true);
    let second = wait_for_repair(&mut client_events).await;
    assert!(second.is_success());
    assert_eq!(subscription.id(), subscription_id);

    harness.wait_for_publishes(1).await;
    harness
        .channel
        .notify_data_change(subscription_id, &[(handle, Variant::Boolean(true))]);
    expect_value(&mut data, handle, Variant::Boolean(true)).await;

    let stats = harness.client.stats();
    assert_eq!(stats.connection_losses, 2);
    assert_eq!(stats.fan_out_repairs, 2);
    assert_eq!(session.repair_stats().runs, 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_every_session_survives_a_restart() {
    let harness = TestHarness::start().await;
    let sessions = join_all((0..3).map(|_| harness.open_session())).await;
    let mut subscriptions = Vec::new();
    for session in sessions {
        let subscription = session
            .create_subscription(SubscriptionFixtures::fast())
            .await
            .unwrap();
        let item = subscription
            .monitor(
                ReadValueId::value_of(NodeFixtures::pressure()),
                MonitoringParameters::default(),
                TimestampsToReturn::Both,
                MonitoringMode::Reporting,
            )
            .await
            .unwrap();
        subscriptions.push((session, subscription, item));
    }
    harness.wait_for_publishes(3).await;
    let mut client_events = harness.client.events();

    harness.channel.restart(true);
    let report = wait_for_repair(&mut client_events).await;
    assert_eq!(report.succeeded().len(), 3);

    for (session, subscription, item) in &subscriptions {
        assert_eq!(session.state(), SessionState::Active);
        let token = session.authentication_token().unwrap();
        assert_eq!(
            harness.channel.subscription_owner(subscription.id()),
            Some(token)
        );

        let mut data = subscription.events();
        harness
            .channel
            .notify_data_change(subscription.id(), &[(item.client_handle(), Variant::Float(1.5))]);
        expect_value(&mut data, item.client_handle(), Variant::Float(1.5)).await;
    }

    harness.shutdown().await;
}
