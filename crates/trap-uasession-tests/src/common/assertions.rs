// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Assertions
//!
//! Waiting helpers for asynchronous behavior and extension traits with
//! informative failure messages.

use std::fmt::Debug;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use trap_uasession::{ErrorKind, RepairError, Session, SessionState, StatusCode, UaError, UaResult};

/// Default time allowed for an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

// =============================================================================
// Waiting
// =============================================================================

/// Waits for the first event matching `predicate`, skipping others.
///
/// # Panics
///
/// Panics if no matching event arrives within [`EVENT_TIMEOUT`].
pub async fn expect_event<T, F>(receiver: &mut broadcast::Receiver<T>, what: &str, mut predicate: F) -> T
where
    T: Clone + Debug,
    F: FnMut(&T) -> bool,
{
    let mut skipped = Vec::new();
    let wait = async {
        loop {
            match receiver.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(event) => skipped.push(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    };
    match tokio::time::timeout(EVENT_TIMEOUT, wait).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("Event channel closed while waiting for {what}; saw {skipped:?}"),
        Err(_) => panic!("Timed out waiting for {what}; saw {skipped:?}"),
    }
}

/// Asserts that no event matching `predicate` arrives within `within`.
pub async fn expect_no_event<T, F>(
    receiver: &mut broadcast::Receiver<T>,
    within: Duration,
    what: &str,
    mut predicate: F,
) where
    T: Clone + Debug,
    F: FnMut(&T) -> bool,
{
    let wait = async {
        loop {
            match receiver.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    };
    if let Ok(Some(event)) = tokio::time::timeout(within, wait).await {
        panic!("Unexpected {what}: {event:?}");
    }
}

/// Polls `condition` until it holds.
///
/// # Panics
///
/// Panics if the condition does not hold within [`EVENT_TIMEOUT`].
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    if tokio::time::timeout(EVENT_TIMEOUT, poll).await.is_err() {
        panic!("Timed out waiting until {what}");
    }
}

/// Waits until the session reaches `state`.
pub async fn wait_for_state(session: &Session, state: SessionState) {
    let mut watch = session.watch_state();
    let result = tokio::time::timeout(EVENT_TIMEOUT, watch.wait_for(|s| *s == state)).await;
    match result {
        Ok(Ok(_)) => {}
        _ => panic!(
            "Session {} did not reach {state}; currently {}",
            session.key(),
            session.state()
        ),
    }
}

/// Waits until `count` requests are queued on the session.
pub async fn wait_for_queued(session: &Session, count: usize) {
    let poll = async {
        while session.queued_transactions().await < count {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    if tokio::time::timeout(EVENT_TIMEOUT, poll).await.is_err() {
        panic!(
            "Expected {count} queued requests, found {}",
            session.queued_transactions().await
        );
    }
}

// =============================================================================
// Status assertions
// =============================================================================

/// Assertions over per-operation status arrays.
pub trait StatusAssertions {
    /// Every status is good.
    fn assert_all_good(&self);

    /// The status at `index` equals `expected`.
    fn assert_status_at(&self, index: usize, expected: StatusCode);
}

impl StatusAssertions for [StatusCode] {
    fn assert_all_good(&self) {
        let bad: Vec<(usize, &StatusCode)> = self
            .iter()
            .enumerate()
            .filter(|(_, status)| !status.is_good())
            .collect();
        assert!(bad.is_empty(), "Expected all good statuses, bad at {bad:?}");
    }

    fn assert_status_at(&self, index: usize, expected: StatusCode) {
        let actual = self
            .get(index)
            .unwrap_or_else(|| panic!("No status at index {index}, only {}", self.len()));
        assert_eq!(*actual, expected, "Unexpected status at index {index}");
    }
}

impl StatusAssertions for Vec<StatusCode> {
    fn assert_all_good(&self) {
        self.as_slice().assert_all_good();
    }

    fn assert_status_at(&self, index: usize, expected: StatusCode) {
        self.as_slice().assert_status_at(index, expected);
    }
}

// =============================================================================
// Error assertions
// =============================================================================

/// Assertions over failed results.
pub trait ErrorAssertions<T> {
    /// The result failed with `status`.
    fn expect_status(self, status: StatusCode) -> UaError;

    /// The result failed with an error of `kind`.
    fn expect_kind(self, kind: ErrorKind) -> UaError;

    /// The result failed because a repair was cancelled.
    fn expect_cancelled(self);
}

impl<T: Debug> ErrorAssertions<T> for UaResult<T> {
    fn expect_status(self, status: StatusCode) -> UaError {
        match self {
            Ok(value) => panic!("Expected {status}, got Ok({value:?})"),
            Err(error) => {
                assert!(
                    error.has_status(status),
                    "Expected {status}, got {error:?}"
                );
                error
            }
        }
    }

    fn expect_kind(self, kind: ErrorKind) -> UaError {
        match self {
            Ok(value) => panic!("Expected {kind:?} error, got Ok({value:?})"),
            Err(error) => {
                assert_eq!(error.kind(), kind, "Unexpected error: {error:?}");
                error
            }
        }
    }

    fn expect_cancelled(self) {
        match self {
            Err(UaError::Repair(RepairError::Cancelled)) => {}
            other => panic!("Expected a cancelled repair, got {other:?}"),
        }
    }
}
