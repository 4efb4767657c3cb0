// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription, monitored item and publish pipeline tests.

use std::time::Duration;

use trap_uasession::messages::{Request, SubscriptionAcknowledgement};
use trap_uasession::{ContractError, SubscriptionError};
use trap_uasession_tests::prelude::*;

fn data_change_with(handle: u32) -> impl FnMut(&SubscriptionEvent) -> bool {
    move |event| matches!(event, SubscriptionEvent::DataChange { client_handle, .. } if *client_handle == handle)
}

fn value_of(event: SubscriptionEvent) -> Variant {
    match event {
        SubscriptionEvent::DataChange { value, .. } => value.value,
        other => panic!("not a data change: {other:?}"),
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test]
async fn test_create_subscription_starts_publishing() {
    let harness = TestHarness::start().await;
    let (session, subscription) = harness.session_with_subscription().await;

    let revised = subscription.revised();
    assert_eq!(revised.publishing_interval, Duration::from_millis(100));
    assert_eq!(revised.lifetime_count, 60);
    assert_eq!(revised.keepalive_count, 10);
    assert_eq!(subscription.keep_alive_period(), Duration::from_secs(1));

    let engine = session.publish_engine();
    assert!(engine.has_subscription(subscription.id()));
    assert_eq!(engine.target(), 2);
    harness.wait_for_publishes(2).await;
    assert_eq!(harness.channel.subscription_ids(), vec![subscription.id()]);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_publish_target_follows_subscription_count() {
    let harness =
        TestHarness::with_builder(TestClientBuilder::new().max_publish_requests(3)).await;
    let session = harness.open_session().await;
    assert_eq!(session.publish_engine().target(), 0);

    let mut subscriptions = Vec::new();
    for expected in [2, 3, 3] {
        subscriptions.push(
            session
                .create_subscription(SubscriptionFixtures::fast())
                .await
                .unwrap(),
        );
        assert_eq!(session.publish_engine().target(), expected);
    }
    harness.wait_for_publishes(3).await;
    assert_eq!(session.publish_engine().subscription_count(), 3);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_invalid_settings_are_rejected_locally() {
    let harness = TestHarness::start().await;
    let session = harness.open_session().await;

    let settings = SubscriptionSettings {
        lifetime_count: 5,
        keepalive_count: 10,
        ..SubscriptionFixtures::fast()
    };
    let result = session.create_subscription(settings).await;
    result.expect_kind(ErrorKind::Contract);
    assert_eq!(harness.channel.count("CreateSubscription"), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_modify_subscription() {
    let harness = TestHarness::start().await;
    let (_session, subscription) = harness.session_with_subscription().await;

    let revised = subscription.modify(SubscriptionFixtures::slow()).await.unwrap();
    assert_eq!(revised.publishing_interval, Duration::from_millis(500));
    assert_eq!(revised.lifetime_count, 90);
    assert_eq!(revised.keepalive_count, 20);
    assert_eq!(subscription.revised(), revised);
    assert_eq!(subscription.settings(), SubscriptionFixtures::slow());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_set_publishing_mode() {
    let harness = TestHarness::start().await;
    let (_session, subscription) = harness.session_with_subscription().await;

    subscription.set_publishing_mode(false).await.unwrap();
    assert_eq!(
        harness.channel.publishing_enabled(subscription.id()),
        Some(false)
    );
    assert!(!subscription.settings().publishing_enabled);

    subscription.set_publishing_mode(true).await.unwrap();
    assert_eq!(
        harness.channel.publishing_enabled(subscription.id()),
        Some(true)
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn test_terminate_subscription_is_idempotent() {
    let harness = TestHarness::start().await;
    let (session, subscription) = harness.session_with_subscription().await;
    let mut events = subscription.events();

    subscription.terminate().await.unwrap();
    expect_event(&mut events, "terminated", |e| {
        matches!(e, SubscriptionEvent::Terminated)
    })
    .await;
    assert!(subscription.is_terminated());
    assert!(!session.publish_engine().has_subscription(subscription.id()));
    assert_eq!(session.publish_engine().target(), 0);
    assert!(harness.channel.subscription_ids().is_empty());

    subscription.terminate().await.unwrap();
    assert_eq!(harness.channel.count("DeleteSubscriptions"), 1);
    assert_eq!(harness.channel.count("DeleteMonitoredItems"), 0);
    assert_eq!(subscription.item_count(), 0);

    let result = subscription
        .monitor(
            ReadValueId::value_of(NodeFixtures::temperature()),
            MonitoringParameters::default(),
            TimestampsToReturn::Both,
            MonitoringMode::Reporting,
        )
        .await;
    assert!(matches!(
        result,
        Err(UaError::Subscription(SubscriptionError::Terminated { .. }))
    ));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_terminate_deletes_items_before_subscription() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(4).await;
    let subscription_id = subscription.id();

    subscription.terminate().await.unwrap();

    let services: Vec<&str> = harness
        .channel
        .requests()
        .iter()
        .map(|r| r.service())
        .filter(|s| *s == "DeleteMonitoredItems" || *s == "DeleteSubscriptions")
        .collect();
    assert_eq!(services, vec!["DeleteMonitoredItems", "DeleteSubscriptions"]);
    match &harness.channel.requests_of("DeleteMonitoredItems")[0].body {
        Request::DeleteMonitoredItems(body) => {
            assert_eq!(body.subscription_id, subscription_id);
            assert_eq!(body.monitored_item_ids.len(), 4);
        }
        other => panic!("unexpected body {other:?}"),
    }

    assert_eq!(subscription.item_count(), 0);
    assert!(subscription.items().is_empty());
    assert!(group.items().iter().all(|i| !i.is_created()));
    assert!(!session.publish_engine().has_subscription(subscription_id));
    assert!(harness.channel.subscription_ids().is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_delete_subscriptions_through_session() {
    let harness = TestHarness::start().await;
    let (session, subscription) = harness.session_with_subscription().await;

    session
        .delete_subscriptions(Vec::new())
        .await
        .expect_kind(ErrorKind::Contract);

    let results = session
        .delete_subscriptions(vec![subscription.id(), 4242])
        .await
        .unwrap();
    results.assert_status_at(0, StatusCode::GOOD);
    results.assert_status_at(1, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    assert!(subscription.is_terminated());
    assert_eq!(session.publish_engine().subscription_count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_server_status_change_ends_subscription() {
    let harness = TestHarness::start().await;
    let (session, subscription) = harness.session_with_subscription().await;
    let mut events = subscription.events();

    harness
        .channel
        .end_subscription(subscription.id(), StatusCode::BAD_TIMEOUT);

    expect_event(&mut events, "status_changed", |e| {
        matches!(
            e,
            SubscriptionEvent::StatusChanged {
                status: StatusCode::BAD_TIMEOUT
            }
        )
    })
    .await;
    expect_event(&mut events, "terminated", |e| {
        matches!(e, SubscriptionEvent::Terminated)
    })
    .await;
    assert!(!session.publish_engine().has_subscription(subscription.id()));
    assert_eq!(session.state(), SessionState::Active);

    harness.shutdown().await;
}

// =============================================================================
// Monitored items
// =============================================================================

async fn monitor_and_check(count: usize) {
    let harness = TestHarness::start().await;
    let (_session, subscription, group) = harness.monitored(count).await;

    assert_eq!(group.len(), count);
    group.statuses().assert_all_good();
    assert_eq!(group.created().count(), count);
    assert_eq!(subscription.item_count(), count);

    let mut handles: Vec<u32> = group.items().iter().map(|i| i.client_handle()).collect();
    handles.sort_unstable();
    handles.dedup();
    assert_eq!(handles.len(), count, "client handles must be unique");
    assert_eq!(harness.channel.item_handles(subscription.id()), handles);

    for item in group.items() {
        assert!(item.is_created());
        assert_ne!(item.monitored_item_id(), 0);
        assert_eq!(item.revised_sampling_interval(), Duration::from_millis(250));
        assert!(subscription.item(item.client_handle()).is_some());
    }

    harness.shutdown().await;
}

#[tokio::test]
async fn test_monitor_one_item() {
    monitor_and_check(1).await;
}

#[tokio::test]
async fn test_monitor_five_items() {
    monitor_and_check(5).await;
}

#[tokio::test]
async fn test_monitor_hundred_items() {
    monitor_and_check(100).await;
}

#[tokio::test]
async fn test_monitor_items_are_chunked() {
    let harness = TestHarness::with_builder(TestClientBuilder::new().max_items_per_call(40)).await;
    let (_session, subscription, group) = harness.monitored(100).await;

    assert_eq!(group.len(), 100);
    let sizes: Vec<usize> = harness
        .channel
        .requests_of("CreateMonitoredItems")
        .iter()
        .map(|r| match &r.body {
            Request::CreateMonitoredItems(body) => body.items_to_create.len(),
            other => panic!("unexpected body {other:?}"),
        })
        .collect();
    assert_eq!(sizes, vec![40, 40, 20]);
    assert_eq!(subscription.item_count(), 100);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_rejected_item_stays_in_group() {
    let harness = TestHarness::start().await;
    let rejected = NodeFixtures::tags(5)[2].clone();
    harness.channel.reject_node(rejected.clone());
    let (_session, subscription, group) = harness.monitored(5).await;

    let statuses = group.statuses();
    statuses.assert_status_at(2, StatusCode::BAD_NODE_ID_UNKNOWN);
    assert_eq!(group.created().count(), 4);
    let failed: Vec<_> = group.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].item_to_monitor().node_id, rejected);
    assert!(!failed[0].is_created());
    assert_eq!(subscription.item_count(), 4);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_single_item_failure_is_an_error() {
    let harness = TestHarness::start().await;
    harness.channel.reject_node(NodeFixtures::missing());
    let (_session, subscription) = harness.session_with_subscription().await;
    let mut events = subscription.events();

    let result = subscription
        .monitor(
            ReadValueId::value_of(NodeFixtures::missing()),
            MonitoringParameters::default(),
            TimestampsToReturn::Both,
            MonitoringMode::Reporting,
        )
        .await;
    result.expect_status(StatusCode::BAD_NODE_ID_UNKNOWN);

    expect_event(&mut events, "item_added", |e| {
        matches!(
            e,
            SubscriptionEvent::ItemAdded {
                status: StatusCode::BAD_NODE_ID_UNKNOWN,
                ..
            }
        )
    })
    .await;
    assert_eq!(subscription.item_count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_misaligned_create_response_is_contract_error() {
    let harness = TestHarness::start().await;
    let (_session, subscription) = harness.session_with_subscription().await;
    harness.channel.misalign_next_create();

    let result = subscription
        .monitor_items(
            NodeFixtures::tag_values(3),
            MonitoringParameters::default(),
            TimestampsToReturn::Both,
        )
        .await;
    match result {
        Err(UaError::Contract(ContractError::IndexMisalignment {
            expected, actual, ..
        })) => {
            assert_eq!(expected, 3);
            assert_eq!(actual, 2);
        }
        other => panic!("expected misalignment, got {other:?}"),
    }
    assert_eq!(subscription.item_count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_raw_create_rejects_reserved_handle() {
    let harness = TestHarness::start().await;
    let (session, subscription) = harness.session_with_subscription().await;

    let request = trap_uasession::messages::CreateMonitoredItemsRequest {
        subscription_id: subscription.id(),
        timestamps_to_return: TimestampsToReturn::Both,
        items_to_create: vec![trap_uasession::messages::MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId::value_of(NodeFixtures::temperature()),
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle: trap_uasession::INVALID_CLIENT_HANDLE,
                ..Default::default()
            },
        }],
    };
    session
        .create_monitored_items(request)
        .await
        .expect_kind(ErrorKind::Contract);
    assert_eq!(harness.channel.count("CreateMonitoredItems"), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_modify_mode_and_delete_items() {
    let harness = TestHarness::start().await;
    let (_session, subscription, group) = harness.monitored(4).await;

    let statuses = group
        .modify(MonitoringParameters::with_sampling_interval(Duration::from_secs(1)).queue_size(5))
        .await
        .unwrap();
    statuses.assert_all_good();
    for item in group.items() {
        assert_eq!(item.revised_sampling_interval(), Duration::from_secs(1));
        assert_eq!(item.revised_queue_size(), 5);
        assert_eq!(item.parameters().sampling_interval, Duration::from_secs(1));
    }

    group
        .set_monitoring_mode(MonitoringMode::Sampling)
        .await
        .unwrap()
        .assert_all_good();
    assert!(group
        .items()
        .iter()
        .all(|i| i.monitoring_mode() == MonitoringMode::Sampling));

    let first = group.items()[0].clone();
    first.delete().await.unwrap();
    assert_eq!(subscription.item_count(), 3);
    assert!(subscription.item(first.client_handle()).is_none());
    assert!(!harness
        .channel
        .item_handles(subscription.id())
        .contains(&first.client_handle()));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_set_triggering_links_items() {
    let harness = TestHarness::start().await;
    let (_session, subscription, group) = harness.monitored(3).await;
    let items = group.items();

    let (added, removed) = subscription
        .set_triggering(&items[0], &items[1..], &[])
        .await
        .unwrap();
    assert_eq!(added.len(), 2);
    added.assert_all_good();
    assert!(removed.is_empty());

    let (added, removed) = subscription
        .set_triggering(&items[0], &[], &items[2..])
        .await
        .unwrap();
    assert!(added.is_empty());
    removed.assert_all_good();

    harness.shutdown().await;
}

// =============================================================================
// Notifications
// =============================================================================

#[tokio::test]
async fn test_data_changes_are_routed_and_acknowledged() {
    let harness = TestHarness::start().await;
    let (_session, subscription, group) = harness.monitored(3).await;
    let mut events = subscription.events();
    let handles: Vec<u32> = group.items().iter().map(|i| i.client_handle()).collect();

    let sequence_number = harness
        .channel
        .notify_data_change(
            subscription.id(),
            &[(handles[0], Variant::Double(1.5)), (handles[2], Variant::Double(3.5))],
        )
        .unwrap();

    let first = expect_event(&mut events, "first change", data_change_with(handles[0])).await;
    assert_eq!(value_of(first), Variant::Double(1.5));
    let third = expect_event(&mut events, "third change", data_change_with(handles[2])).await;
    assert_eq!(value_of(third), Variant::Double(3.5));

    let item = subscription.item(handles[0]).unwrap();
    assert_eq!(item.last_value().map(|v| v.value), Some(Variant::Double(1.5)));
    assert!(subscription.item(handles[1]).unwrap().last_value().is_none());
    assert_eq!(subscription.last_sequence_number(), sequence_number);
    assert_eq!(subscription.stats().data_changes, 2);

    let channel = harness.channel.clone();
    let expected = SubscriptionAcknowledgement {
        subscription_id: subscription.id(),
        sequence_number,
    };
    wait_until("acknowledgement is sent", move || {
        channel.acknowledgements().contains(&expected)
    })
    .await;
    wait_until("message leaves the retransmission queue", || {
        harness.channel.retained(subscription.id()).is_empty()
    })
    .await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_event_notifications() {
    let harness = TestHarness::start().await;
    let (_session, subscription) = harness.session_with_subscription().await;
    let item = subscription
        .monitor(
            ReadValueId::events_of(NodeFixtures::alarms()),
            MonitoringParameters::default(),
            TimestampsToReturn::Neither,
            MonitoringMode::Reporting,
        )
        .await
        .unwrap();
    let mut events = subscription.events();

    harness.channel.notify(
        subscription.id(),
        NotificationBuilder::new()
            .event(
                item.client_handle(),
                vec![Variant::String("Overheat".into()), Variant::Int32(700)],
            )
            .build(),
    );

    let event = expect_event(&mut events, "event", |e| {
        matches!(e, SubscriptionEvent::Event { .. })
    })
    .await;
    match event {
        SubscriptionEvent::Event { fields } => {
            assert_eq!(fields.client_handle, item.client_handle());
            assert_eq!(fields.event_fields[1], Variant::Int32(700));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(subscription.stats().events, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_keep_alive_notification() {
    let harness = TestHarness::start().await;
    let (session, subscription) = harness.session_with_subscription().await;
    let mut events = subscription.events();

    assert!(harness.channel.keep_alive(subscription.id()));
    let event = expect_event(&mut events, "keepalive", |e| {
        matches!(e, SubscriptionEvent::KeepAlive { .. })
    })
    .await;
    assert_eq!(event, SubscriptionEvent::KeepAlive { sequence_number: 1 });
    assert_eq!(subscription.stats().keep_alives, 1);
    assert_eq!(session.publish_engine().stats().keep_alives, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_sequence_gap_is_republished_in_order() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(1).await;
    let handle = group.items()[0].client_handle();
    let mut events = subscription.events();

    harness
        .channel
        .notify_data_change(subscription.id(), &[(handle, Variant::Int32(1))]);
    let first = expect_event(&mut events, "value 1", data_change_with(handle)).await;
    assert_eq!(value_of(first), Variant::Int32(1));

    harness.channel.lose_next(
        subscription.id(),
        NotificationBuilder::new()
            .data_change(handle, Variant::Int32(2))
            .build(),
    );
    harness
        .channel
        .notify_data_change(subscription.id(), &[(handle, Variant::Int32(3))]);

    let second = expect_event(&mut events, "value 2", data_change_with(handle)).await;
    let third = expect_event(&mut events, "value 3", data_change_with(handle)).await;
    assert_eq!(value_of(second), Variant::Int32(2));
    assert_eq!(value_of(third), Variant::Int32(3));

    let republished = harness.channel.requests_of("Republish");
    assert_eq!(republished.len(), 1);
    match &republished[0].body {
        Request::Republish(body) => assert_eq!(body.retransmit_sequence_number, 2),
        other => panic!("unexpected body {other:?}"),
    }
    let stats = session.publish_engine().stats();
    assert_eq!(stats.sequence_gaps, 1);
    assert_eq!(stats.republished_messages, 1);
    assert_eq!(stats.lost_messages, 0);
    assert_eq!(subscription.last_sequence_number(), 3);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_sequence_numbers_wrap_to_one() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(1).await;
    let handle = group.items()[0].client_handle();
    let mut events = subscription.events();

    harness
        .channel
        .set_next_sequence_number(subscription.id(), u32::MAX - 1);
    harness
        .channel
        .notify_data_change(subscription.id(), &[(handle, Variant::Int32(1))]);
    expect_event(&mut events, "value 1", data_change_with(handle)).await;
    assert_eq!(subscription.last_sequence_number(), u32::MAX - 1);

    // u32::MAX is only available through Republish; the next message is 1.
    harness.channel.lose_next(
        subscription.id(),
        NotificationBuilder::new()
            .data_change(handle, Variant::Int32(2))
            .build(),
    );
    harness
        .channel
        .notify_data_change(subscription.id(), &[(handle, Variant::Int32(3))]);

    let second = expect_event(&mut events, "value 2", data_change_with(handle)).await;
    let third = expect_event(&mut events, "value 3", data_change_with(handle)).await;
    assert_eq!(value_of(second), Variant::Int32(2));
    assert_eq!(value_of(third), Variant::Int32(3));
    assert_eq!(subscription.last_sequence_number(), 1);

    let republished = harness.channel.requests_of("Republish");
    assert_eq!(republished.len(), 1);
    match &republished[0].body {
        Request::Republish(body) => assert_eq!(body.retransmit_sequence_number, u32::MAX),
        other => panic!("unexpected body {other:?}"),
    }

    assert!(harness.channel.keep_alive(subscription.id()));
    let event = expect_event(&mut events, "keepalive", |e| {
        matches!(e, SubscriptionEvent::KeepAlive { .. })
    })
    .await;
    assert_eq!(event, SubscriptionEvent::KeepAlive { sequence_number: 2 });

    let stats = session.publish_engine().stats();
    assert_eq!(stats.sequence_gaps, 1);
    assert_eq!(stats.lost_messages, 0);
    assert_eq!(harness.channel.count("Republish"), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_gap_is_counted_as_lost() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(1).await;
    let handle = group.items()[0].client_handle();
    let mut events = subscription.events();

    harness
        .channel
        .notify_data_change(subscription.id(), &[(handle, Variant::Int32(1))]);
    expect_event(&mut events, "value 1", data_change_with(handle)).await;

    let lost = harness
        .channel
        .lose_next(subscription.id(), Vec::new())
        .unwrap();
    harness.channel.forget(subscription.id(), lost);
    harness
        .channel
        .notify_data_change(subscription.id(), &[(handle, Variant::Int32(3))]);

    let next = expect_event(&mut events, "value 3", data_change_with(handle)).await;
    assert_eq!(value_of(next), Variant::Int32(3));
    let stats = session.publish_engine().stats();
    assert_eq!(stats.sequence_gaps, 1);
    assert_eq!(stats.lost_messages, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_raw_republish_of_unknown_message() {
    let harness = TestHarness::start().await;
    let (session, subscription) = harness.session_with_subscription().await;

    session
        .republish(subscription.id(), 99)
        .await
        .expect_status(StatusCode::BAD_MESSAGE_NOT_AVAILABLE);
    assert_eq!(session.state(), SessionState::Active);

    harness.shutdown().await;
}
