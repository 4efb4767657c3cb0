// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Keep-alive monitor tests.

use std::time::Duration;

use trap_uasession::{KeepAliveTiming, CheckOutcome, ServerState, SkipReason};
use trap_uasession_tests::prelude::*;

/// Session timeout giving a 200 ms ping timeout and a 400 ms check interval.
const SHORT_TIMEOUT: Duration = Duration::from_millis(600);

async fn quiet_harness(keepalive: bool) -> TestHarness {
    TestHarness::with_builder(
        TestClientBuilder::new()
            .session_timeout(SHORT_TIMEOUT)
            .keepalive(keepalive),
    )
    .await
}

#[tokio::test]
async fn test_timing_follows_revised_timeout() {
    let harness = quiet_harness(false).await;
    let session = harness.open_session().await;

    let timing = session.keepalive().timing();
    assert_eq!(timing, KeepAliveTiming::from_session_timeout(SHORT_TIMEOUT));
    assert_eq!(timing.ping_timeout, Duration::from_millis(200));
    assert_eq!(timing.check_interval, Duration::from_millis(400));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_reports_server_state() {
    let harness = quiet_harness(true).await;
    let session = harness.open_session().await;
    let mut events = session.events();
    assert!(session.keepalive().is_running());

    let event = expect_event(&mut events, "keepalive", |e| {
        matches!(e, SessionEvent::KeepAlive { .. })
    })
    .await;
    assert_eq!(
        event,
        SessionEvent::KeepAlive {
            state: ServerState::Running,
            count: 1
        }
    );
    assert_eq!(session.keepalive().last_server_state(), Some(ServerState::Running));

    harness.channel.set_server_state(4);
    expect_event(&mut events, "shutdown state", |e| {
        matches!(
            e,
            SessionEvent::KeepAlive {
                state: ServerState::Shutdown,
                ..
            }
        )
    })
    .await;

    harness.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_failure_stops_monitor() {
    let harness = quiet_harness(true).await;
    let session = harness.open_session().await;
    let mut events = session.events();

    harness
        .channel
        .set_persistent_fault("Read", Some(StatusCode::BAD_OUT_OF_MEMORY));

    let event = expect_event(&mut events, "keepalive failure", |e| {
        matches!(e, SessionEvent::KeepAliveFailure { .. })
    })
    .await;
    match event {
        SessionEvent::KeepAliveFailure { reason } => assert!(!reason.is_empty()),
        other => panic!("unexpected {other:?}"),
    }

    let monitor_session = session.clone();
    wait_until("monitor stops", move || {
        !monitor_session.keepalive().is_running()
    })
    .await;
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.keepalive().count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_check_skips_after_recent_traffic() {
    let harness = quiet_harness(false).await;
    let session = harness.open_session().await;
    assert!(!session.keepalive().is_running());

    session
        .read(vec![ReadValueId::value_of(NodeFixtures::temperature())])
        .await
        .unwrap();
    let reads = harness.channel.count("Read");
    assert_eq!(
        session.keepalive().check(&session).await,
        CheckOutcome::Skipped(SkipReason::RecentTraffic)
    );
    assert_eq!(harness.channel.count("Read"), reads);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(
        session.keepalive().check(&session).await,
        CheckOutcome::Alive(ServerState::Running)
    );
    assert_eq!(harness.channel.count("Read"), reads + 1);
    assert_eq!(session.keepalive().count(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_check_is_skipped() {
    let harness = TestHarness::with_builder(
        TestClientBuilder::new()
            .session_timeout(Duration::from_millis(1_500))
            .keepalive(false),
    )
    .await;
    let session = harness.open_session().await;
    tokio::time::sleep(Duration::from_millis(550)).await;
    harness.channel.set_latency("Read", Duration::from_millis(100));

    let monitor = session.keepalive();
    let (first, second) = tokio::join!(monitor.check(&session), monitor.check(&session));
    assert_eq!(first, CheckOutcome::Alive(ServerState::Running));
    assert_eq!(second, CheckOutcome::Skipped(SkipReason::InFlight));
    assert_eq!(harness.channel.count("Read"), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_slow_check_times_out() {
    let harness = quiet_harness(false).await;
    let session = harness.open_session().await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    harness.channel.set_latency("Read", Duration::from_millis(500));

    let outcome = session.keepalive().check(&session).await;
    assert!(matches!(outcome, CheckOutcome::Failed(_)), "got {outcome:?}");
    assert_eq!(session.keepalive().count(), 0);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_check_on_closed_session_is_skipped() {
    let harness = quiet_harness(true).await;
    let session = harness.open_session().await;

    session.close(true).await.unwrap();
    assert!(!session.keepalive().is_running());
    assert_eq!(
        session.keepalive().check(&session).await,
        CheckOutcome::Skipped(SkipReason::NotActive)
    );

    harness.shutdown().await;
}
