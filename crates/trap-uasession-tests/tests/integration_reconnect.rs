// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Connection loss, session repair and request replay tests.

use std::time::Duration;

use trap_uasession::messages::Request;
use trap_uasession::{RepairError, RepairOutcome};
use trap_uasession_tests::prelude::*;

async fn repair_report(events: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> FanOutReport {
    let event = expect_event(events, "repair_completed", |e| {
        matches!(e, ClientEvent::RepairCompleted { .. })
    })
    .await;
    match event {
        ClientEvent::RepairCompleted { report } => report,
        other => panic!("unexpected {other:?}"),
    }
}

fn successful(outcome: Option<&RepairOutcome>) -> RepairReport {
    match outcome {
        Some(Ok(report)) => report.clone(),
        other => panic!("expected a successful repair, got {other:?}"),
    }
}

fn written_values(channel: &MockChannel) -> Vec<Variant> {
    channel
        .requests_of("Write")
        .into_iter()
        .flat_map(|request| match request.body {
            Request::Write(body) => body
                .nodes_to_write
                .into_iter()
                .map(|w| w.value.value)
                .collect::<Vec<_>>(),
            other => panic!("unexpected body {other:?}"),
        })
        .collect()
}

fn sorted_handles(group: &MonitoredItemGroup) -> Vec<u32> {
    let mut handles: Vec<u32> = group.items().iter().map(|i| i.client_handle()).collect();
    handles.sort_unstable();
    handles
}

async fn expect_value(subscription: &Subscription, channel: &MockChannel, handle: u32, value: Variant) {
    let mut events = subscription.events();
    channel.notify_data_change(subscription.id(), &[(handle, value.clone())]);
    expect_event(&mut events, &format!("{value:?} on {handle}"), move |e| {
        matches!(
            e,
            SubscriptionEvent::DataChange { client_handle, value: received }
                if *client_handle == handle && received.value == value
        )
    })
    .await;
}

// =============================================================================
// Repair paths
// =============================================================================

#[tokio::test]
async fn test_connection_loss_reactivates_session() {
    let harness = TestHarness::start().await;
    let (session, subscription) = harness.session_with_subscription().await;
    let session_id = session.session_id();
    let mut client_events = harness.client.events();
    let mut session_events = session.events();

    harness.channel.break_connection();

    expect_event(&mut client_events, "connection_lost", |e| {
        matches!(e, ClientEvent::ConnectionLost { .. })
    })
    .await;
    expect_event(&mut session_events, "reconnecting", |e| {
        matches!(e, SessionEvent::Reconnecting)
    })
    .await;
    expect_event(&mut client_events, "connection_reestablished", |e| {
        matches!(e, ClientEvent::ConnectionReestablished)
    })
    .await;

    let report = repair_report(&mut client_events).await;
    assert!(report.is_success());
    let repaired = successful(report.outcome(session.key()));
    assert_eq!(repaired.path, RepairPath::Reactivated);
    assert_eq!(repaired.attempts, 1);

    expect_event(&mut session_events, "session_restored", |e| {
        matches!(
            e,
            SessionEvent::SessionRestored {
                path: RepairPath::Reactivated
            }
        )
    })
    .await;
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.session_id(), session_id);
    assert!(!subscription.is_terminated());
    assert_eq!(harness.channel.count("CreateSession"), 1);
    assert_eq!(harness.channel.count("ActivateSession"), 2);

    let stats = session.repair_stats();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.reactivations, 1);
    assert_eq!(harness.client.stats().connection_losses, 1);

    harness.wait_for_publishes(1).await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_server_restart_transfers_subscriptions() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(3).await;
    let old_session_id = session.session_id();
    let subscription_id = subscription.id();
    let mut client_events = harness.client.events();

    harness.channel.restart(true);

    let report = repair_report(&mut client_events).await;
    let repaired = successful(report.outcome(session.key()));
    assert_eq!(
        repaired.path,
        RepairPath::Recreated {
            transferred: vec![subscription_id],
            recreated: Vec::new(),
            failed: Vec::new(),
        }
    );
    assert_ne!(session.session_id(), old_session_id);
    assert_eq!(subscription.id(), subscription_id);
    assert_eq!(subscription.item_count(), group.len());

    let token = session.authentication_token().unwrap();
    assert_eq!(harness.channel.subscription_owner(subscription_id), Some(token));
    assert_eq!(harness.channel.count("CreateSubscription"), 1);
    assert_eq!(session.repair_stats().recreations, 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_lost_subscriptions_are_recreated() {
    let harness = TestHarness::start().await;
    let (session, subscription, group) = harness.monitored(4).await;
    let old_id = subscription.id();
    let mut handles: Vec<u32> = group.items().iter().map(|i| i.client_handle()).collect();
    handles.sort_unstable();
    let mut client_events = harness.client.events();

    harness.channel.restart(false);

    let report = repair_report(&mut client_events).await;
    let repaired = successful(report.outcome(session.key()));
    let new_id = subscription.id();
    assert_ne!(new_id, old_id);
    assert_eq!(
        repaired.path,
        RepairPath::Recreated {
            transferred: Vec::new(),
            recreated: vec![(old_id, new_id)],
            failed: Vec::new(),
        }
    );

    assert_eq!(harness.channel.subscription_ids(), vec![new_id]);
    assert_eq!(harness.channel.item_handles(new_id), handles);
    assert!(session.publish_engine().has_subscription(new_id));
    assert!(!session.publish_engine().has_subscription(old_id));
    assert_eq!(subscription.stats().recreations, 1);
    assert!(group.items().iter().all(|i| i.is_created()));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_transfer_fault_falls_back_to_recreation() {
    let harness = TestHarness::start().await;
    let (session, subscription, _group) = harness.monitored(2).await;
    let old_id = subscription.id();
    harness
        .channel
        .inject_fault("TransferSubscriptions", StatusCode::BAD_SERVICE_UNSUPPORTED);
    let mut client_events = harness.client.events();

    harness.channel.restart(true);

    let report = repair_report(&mut client_events).await;
    match successful(report.outcome(session.key())).path {
        RepairPath::Recreated {
            transferred,
            recreated,
            failed,
        } => {
            assert!(transferred.is_empty());
            assert_eq!(recreated, vec![(old_id, subscription.id())]);
            assert!(failed.is_empty());
        }
        other => panic!("expected recreation, got {other:?}"),
    }
    assert_eq!(harness.channel.count("TransferSubscriptions"), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_failed_activation_during_recreate_is_retried() {
    let harness = TestHarness::start().await;
    let session = harness.open_session().await;
    let mut client_events = harness.client.events();

    harness
        .channel
        .inject_fault("ActivateSession", StatusCode::BAD_NONCE_INVALID);
    harness
        .channel
        .inject_fault("ActivateSession", StatusCode::BAD_NONCE_INVALID);
    harness.channel.restart(false);

    let report = repair_report(&mut client_events).await;
    let repaired = successful(report.outcome(session.key()));
    assert_eq!(repaired.attempts, 2);
    assert!(!repaired.path.is_reactivation());

    // The half-created replacement of the first attempt is closed again.
    assert_eq!(harness.channel.count("CloseSession"), 1);
    assert_eq!(harness.channel.session_count(), 1);
    assert_eq!(session.state(), SessionState::Active);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_long_timeout_session_is_reactivated_in_place() {
    let settings = SubscriptionSettings::with_interval(Duration::from_secs(1));
    let harness = TestHarness::with_builder(
        TestClientBuilder::new()
            .session_timeout(Duration::from_secs(60))
            .subscription(settings.clone()),
    )
    .await;
    let session = harness.open_session().await;
    assert_eq!(session.revised_timeout(), Duration::from_secs(60));

    let subscription = session.create_subscription(settings).await.unwrap();
    assert_eq!(subscription.revised_publishing_interval(), Duration::from_secs(1));
    let group = subscription
        .monitor_items(
            NodeFixtures::tag_values(3),
            MonitoringParameters::default(),
            TimestampsToReturn::Both,
        )
        .await
        .unwrap();
    assert_eq!(group.created().count(), 3);
    harness.wait_for_publishes(1).await;

    let subscription_id = subscription.id();
    let session_id = session.session_id();
    let mut client_events = harness.client.events();

    harness.channel.break_connection();

    let report = repair_report(&mut client_events).await;
    let repaired = successful(report.outcome(session.key()));
    assert_eq!(repaired.path, RepairPath::Reactivated);
    assert_eq!(session.publish_engine().stats().republish_calls, 1);
    assert_eq!(subscription.id(), subscription_id);
    assert_eq!(session.session_id(), session_id);
    assert_eq!(harness.channel.count("CreateSession"), 1);
    assert_eq!(harness.channel.count("CreateSubscription"), 1);
    assert_eq!(harness.channel.item_handles(subscription_id), sorted_handles(&group));

    harness.wait_for_publishes(1).await;
    let handle = group.items()[2].client_handle();
    expect_value(&subscription, &harness.channel, handle, Variant::Double(1.25)).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_partial_transfer_recreates_only_lost_subscription() {
    let harness = TestHarness::start().await;
    let (session, kept, kept_group) = harness.monitored(2).await;
    let lost = session
        .create_subscription(SubscriptionFixtures::fast())
        .await
        .unwrap();
    let lost_group = lost
        .monitor_items(
            NodeFixtures::tag_values(3),
            MonitoringParameters::default(),
            TimestampsToReturn::Both,
        )
        .await
        .unwrap();
    let kept_id = kept.id();
    let lost_id = lost.id();
    let mut client_events = harness.client.events();

    harness.channel.drop_subscription(lost_id);
    harness.channel.restart(true);

    let report = repair_report(&mut client_events).await;
    let repaired = successful(report.outcome(session.key()));
    let recreated_id = lost.id();
    assert_ne!(recreated_id, lost_id);
    assert_eq!(
        repaired.path,
        RepairPath::Recreated {
            transferred: vec![kept_id],
            recreated: vec![(lost_id, recreated_id)],
            failed: Vec::new(),
        }
    );

    assert_eq!(kept.id(), kept_id);
    let engine = session.publish_engine();
    assert!(engine
        .get_subscription(kept_id)
        .is_some_and(|s| s.ptr_eq(&kept)));
    assert!(engine
        .get_subscription(recreated_id)
        .is_some_and(|s| s.ptr_eq(&lost)));
    assert!(!engine.has_subscription(lost_id));
    assert_eq!(engine.subscription_count(), 2);

    assert_eq!(lost.item_count(), 3);
    assert!(lost_group.items().iter().all(|i| i.is_created()));
    assert_eq!(harness.channel.item_handles(recreated_id), sorted_handles(&lost_group));
    assert_eq!(harness.channel.item_handles(kept_id), sorted_handles(&kept_group));
    assert_eq!(harness.channel.count("CreateSubscription"), 3);

    let token = session.authentication_token().unwrap();
    assert_eq!(harness.channel.subscription_owner(kept_id), Some(token.clone()));
    assert_eq!(harness.channel.subscription_owner(recreated_id), Some(token));

    harness.wait_for_publishes(2).await;
    let kept_handle = kept_group.items()[0].client_handle();
    let lost_handle = lost_group.items()[1].client_handle();
    expect_value(&kept, &harness.channel, kept_handle, Variant::Int32(11)).await;
    expect_value(&lost, &harness.channel, lost_handle, Variant::Int32(22)).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_recreated_ids_overlapping_old_ids_keep_both_registered() {
    let harness = TestHarness::start().await;
    let (session, first, first_group) = harness.monitored(1).await;
    let second = session
        .create_subscription(SubscriptionFixtures::fast())
        .await
        .unwrap();
    let second_group = second
        .monitor_items(
            NodeFixtures::tag_values(2),
            MonitoringParameters::default(),
            TimestampsToReturn::Both,
        )
        .await
        .unwrap();
    let old_ids = vec![first.id(), second.id()];
    let mut client_events = harness.client.events();

    // The restarted server hands out the second subscription's old id again.
    harness.channel.set_next_subscription_id(old_ids[1]);
    harness.channel.restart(false);

    let report = repair_report(&mut client_events).await;
    match successful(report.outcome(session.key())).path {
        RepairPath::Recreated {
            recreated, failed, ..
        } => {
            assert_eq!(recreated.len(), 2);
            assert!(failed.is_empty());
        }
        other => panic!("expected recreation, got {other:?}"),
    }

    let mut new_ids = vec![first.id(), second.id()];
    new_ids.sort_unstable();
    assert_eq!(new_ids, vec![old_ids[1], old_ids[1] + 1]);

    let engine = session.publish_engine();
    assert_eq!(engine.get_subscription_ids(), new_ids);
    assert!(engine
        .get_subscription(first.id())
        .is_some_and(|s| s.ptr_eq(&first)));
    assert!(engine
        .get_subscription(second.id())
        .is_some_and(|s| s.ptr_eq(&second)));
    assert!(!first.is_terminated());
    assert!(!second.is_terminated());

    harness.wait_for_publishes(2).await;
    let first_handle = first_group.items()[0].client_handle();
    let second_handle = second_group.items()[1].client_handle();
    expect_value(&first, &harness.channel, first_handle, Variant::Int32(1)).await;
    expect_value(&second, &harness.channel, second_handle, Variant::Int32(2)).await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_second_break_during_repair_reconnects_channel() {
    let harness =
        TestHarness::with_builder(TestClientBuilder::new().repair_max_attempts(0)).await;
    let session = harness.open_session().await;
    let mut client_events = harness.client.events();

    harness.channel.hold("ActivateSession");
    harness.channel.break_connection();
    let channel = harness.channel.clone();
    wait_until("repair activation is held", move || {
        channel.count("ActivateSession") == 2
    })
    .await;

    harness.channel.break_connection();
    let channel = harness.channel.clone();
    wait_until("channel reconnects while repair is held", move || {
        channel.is_valid()
    })
    .await;
    assert_eq!(session.state(), SessionState::Reconnecting);

    harness.channel.release("ActivateSession");
    let report = repair_report(&mut client_events).await;
    assert!(report.is_success(), "{report:?}");
    wait_for_state(&session, SessionState::Active).await;

    session
        .read(vec![ReadValueId::value_of(NodeFixtures::temperature())])
        .await
        .unwrap();
    assert!(harness.client.is_connected());
    assert_eq!(harness.client.session_count(), 1);
    assert_eq!(harness.client.stats().connection_losses, 2);
    assert_eq!(session.repair_stats().failures, 0);

    harness.shutdown().await;
}

// =============================================================================
// Queueing
// =============================================================================

#[tokio::test]
async fn test_requests_during_repair_are_replayed_in_order() {
    let harness = TestHarness::start().await;
    let session = harness.open_session().await;
    let mut client_events = harness.client.events();

    harness.channel.hold("ActivateSession");
    harness.channel.break_connection();
    wait_for_state(&session, SessionState::Reconnecting).await;

    let mut writes = Vec::new();
    for value in 1..=3 {
        let writer = session.clone();
        writes.push(tokio::spawn(async move {
            writer
                .write(vec![WriteValue::value(
                    NodeFixtures::setpoint(),
                    Variant::Int32(value),
                )])
                .await
        }));
        wait_for_queued(&session, value as usize).await;
    }
    assert_eq!(harness.channel.count("Write"), 0);

    harness.channel.release("ActivateSession");
    for write in writes {
        write.await.unwrap().unwrap().assert_all_good();
    }

    assert_eq!(
        written_values(&harness.channel),
        vec![Variant::Int32(1), Variant::Int32(2), Variant::Int32(3)]
    );
    assert_eq!(
        harness.channel.value(&NodeFixtures::setpoint()),
        Some(Variant::Int32(3))
    );

    let report = repair_report(&mut client_events).await;
    assert_eq!(successful(report.outcome(session.key())).replayed, 3);
    let stats = session.stats();
    assert_eq!(stats.queued, 3);
    assert_eq!(stats.replayed, 3);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_repairs_are_coalesced() {
    let harness = TestHarness::start().await;
    let session = harness.open_session().await;
    harness.channel.hold("ActivateSession");

    let channel = harness.channel.clone();
    let release = async move {
        let server = channel.clone();
        wait_until("repair activation is held", move || {
            server.count("ActivateSession") == 2
        })
        .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.release("ActivateSession");
    };

    let (first, second, third, ()) =
        tokio::join!(session.repair(), session.repair(), session.repair(), release);

    let first = first.unwrap();
    assert_eq!(first.path, RepairPath::Reactivated);
    assert_eq!(second.unwrap(), first);
    assert_eq!(third.unwrap(), first);

    let stats = session.repair_stats();
    assert_eq!(stats.runs, 1);
    assert_eq!(stats.coalesced, 2);
    assert_eq!(harness.channel.count("ActivateSession"), 2);
    assert_eq!(session.state(), SessionState::Active);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_close_during_repair_cancels_queued_requests() {
    let harness = TestHarness::start().await;
    let session = harness.open_session().await;

    harness.channel.hold("ActivateSession");
    harness.channel.break_connection();
    wait_for_state(&session, SessionState::Reconnecting).await;

    let writer = session.clone();
    let write = tokio::spawn(async move {
        writer
            .write(vec![WriteValue::value(
                NodeFixtures::setpoint(),
                Variant::Int32(7),
            )])
            .await
    });
    wait_for_queued(&session, 1).await;

    session.close(true).await.unwrap();
    write.await.unwrap().expect_cancelled();
    assert_eq!(session.state(), SessionState::Closed);

    harness.channel.release("ActivateSession");
    assert!(matches!(session.repair().await, Err(RepairError::Cancelled)));
    assert_eq!(harness.channel.count("Write"), 0);

    harness.shutdown().await;
}

// =============================================================================
// Giving up
// =============================================================================

#[tokio::test]
async fn test_reconnect_exhaustion_closes_sessions() {
    let harness = TestHarness::with_builder(
        TestClientBuilder::new()
            .connection(ConnectionStrategy::fixed(Duration::from_millis(10), Some(3))),
    )
    .await;
    let (session, subscription) = harness.session_with_subscription().await;
    let mut client_events = harness.client.events();
    let mut session_events = session.events();
    let mut subscription_events = subscription.events();

    harness.channel.refuse_connects(10);
    harness.channel.break_connection();

    expect_event(&mut client_events, "backoff", |e| {
        matches!(e, ClientEvent::Backoff { attempt: 1, .. })
    })
    .await;
    expect_event(&mut client_events, "internal_error", |e| {
        matches!(e, ClientEvent::InternalError { .. })
    })
    .await;
    expect_event(&mut session_events, "session_closed", |e| {
        matches!(
            e,
            SessionEvent::SessionClosed {
                status: StatusCode::BAD_CONNECTION_CLOSED
            }
        )
    })
    .await;
    expect_event(&mut subscription_events, "terminated", |e| {
        matches!(e, SubscriptionEvent::Terminated)
    })
    .await;

    assert_eq!(session.state(), SessionState::Closed);
    let client = &harness.client;
    wait_until("closed session is removed", || client.session_count() == 0).await;
    assert_eq!(harness.client.stats().connect_retries, 2);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_no_retry_closes_sessions_immediately() {
    let harness = TestHarness::with_builder(
        TestClientBuilder::new().connection(ConnectionStrategy::no_retry()),
    )
    .await;
    let session = harness.open_session().await;
    let mut session_events = session.events();

    harness.channel.break_connection();

    expect_event(&mut session_events, "session_closed", |e| {
        matches!(
            e,
            SessionEvent::SessionClosed {
                status: StatusCode::BAD_CONNECTION_CLOSED
            }
        )
    })
    .await;
    assert_eq!(harness.channel.count("ActivateSession"), 1);
    assert!(!harness.client.is_connected());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_fan_out_isolates_failed_sessions() {
    let harness =
        TestHarness::with_builder(TestClientBuilder::new().repair_max_attempts(1)).await;
    let doomed = harness.open_session().await;
    let survivor = harness.open_session().await;
    let mut client_events = harness.client.events();

    let token = doomed.authentication_token().unwrap();
    harness.channel.expire_session(&token);
    harness
        .channel
        .set_persistent_fault("CreateSession", Some(StatusCode::BAD_TOO_MANY_SESSIONS));
    harness.channel.break_connection();

    let report = repair_report(&mut client_events).await;
    assert!(!report.is_success());
    assert_eq!(report.succeeded(), vec![survivor.key()]);
    let failed = report.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, doomed.key());
    assert!(matches!(
        failed[0].1,
        RepairError::Exhausted { attempts: 1, .. }
    ));

    assert_eq!(doomed.state(), SessionState::Closed);
    assert_eq!(survivor.state(), SessionState::Active);
    let client = &harness.client;
    wait_until("doomed session is removed", || client.session_count() == 1).await;
    assert_eq!(doomed.repair_stats().failures, 1);

    harness
        .channel
        .set_persistent_fault("CreateSession", None);
    harness.shutdown().await;
}
