// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Keep-alive monitor.
//!
//! Each session runs one monitor that reads `ServerStatus_State` on a
//! self-correcting timer. After a check the timer re-arms for
//! `max(1 ms, check_interval - elapsed)`, so a slow read shortens the next
//! wait instead of stacking checks.
//!
//! A check is skipped, without any network read, when a response arrived
//! within the ping timeout, when a check is already in flight, or when the
//! session is reconnecting or closed. Skips are not failures and do not
//! advance the counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Weak;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{TimeoutError, UaError};
use crate::events::SessionEvent;
use crate::messages::ReadRequest;
use crate::session::{Route, Session, SessionInner, SessionState};
use crate::types::{NodeId, ReadValueId, ServerState, StatusCode, TimestampsToReturn};

/// Upper bound of both the ping timeout and the check interval.
const MAX_KEEPALIVE_PERIOD: Duration = Duration::from_millis(20_000);
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(50);
const MIN_REARM_DELAY: Duration = Duration::from_millis(1);

// =============================================================================
// KeepAliveTiming
// =============================================================================

/// Check timing derived from the session timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveTiming {
    /// Timeout of one check; also the "recent traffic" window.
    pub ping_timeout: Duration,
    /// Nominal period between checks.
    pub check_interval: Duration,
}

impl KeepAliveTiming {
    /// `ping_timeout = min(t / 3, 20 s)`, `check_interval = clamp(2t / 3, 50 ms, 20 s)`.
    pub fn from_session_timeout(session_timeout: Duration) -> Self {
        let ping_timeout = (session_timeout / 3).min(MAX_KEEPALIVE_PERIOD);
        let check_interval =
            (session_timeout * 2 / 3).clamp(MIN_CHECK_INTERVAL, MAX_KEEPALIVE_PERIOD);
        Self {
            ping_timeout,
            check_interval,
        }
    }

    /// Delay before the next check given how long the last one took.
    pub fn rearm_delay(&self, elapsed: Duration) -> Duration {
        self.check_interval
            .saturating_sub(elapsed)
            .max(MIN_REARM_DELAY)
    }
}

/// Why a check did not hit the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A response arrived within the ping timeout.
    RecentTraffic,
    /// Another check is still running.
    InFlight,
    /// The session is reconnecting or closed.
    NotActive,
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// No read was issued.
    Skipped(SkipReason),
    /// The server answered.
    Alive(ServerState),
    /// The read failed or returned a bad status.
    Failed(String),
}

// =============================================================================
// KeepAliveMonitor
// =============================================================================

/// Per-session keep-alive checker.
pub struct KeepAliveMonitor {
    session: Weak<SessionInner>,
    timing: RwLock<KeepAliveTiming>,
    in_flight: AtomicBool,
    count: AtomicU64,
    last_state: RwLock<Option<ServerState>>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl KeepAliveMonitor {
    pub(crate) fn new(session: Weak<SessionInner>, session_timeout: Duration) -> Self {
        Self {
            session,
            timing: RwLock::new(KeepAliveTiming::from_session_timeout(session_timeout)),
            in_flight: AtomicBool::new(false),
            count: AtomicU64::new(0),
            last_state: RwLock::new(None),
            task: Mutex::new(None),
        }
    }

    /// Current timing.
    pub fn timing(&self) -> KeepAliveTiming {
        *self.timing.read()
    }

    pub(crate) fn set_session_timeout(&self, session_timeout: Duration) {
        *self.timing.write() = KeepAliveTiming::from_session_timeout(session_timeout);
    }

    /// Number of successful checks.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Server state read by the last successful check.
    pub fn last_server_state(&self) -> Option<ServerState> {
        *self.last_state.read()
    }

    /// Returns `true` while the check loop runs.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }

    /// Starts the check loop, replacing a running one.
    pub fn start(&self) {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(self.session.clone(), token.clone()));
        if let Some((previous, _)) = self.task.lock().replace((token, handle)) {
            previous.cancel();
        }
        trace!(timing = ?self.timing(), "Keep-alive started");
    }

    /// Stops the check loop. Idempotent.
    pub fn stop(&self) {
        if let Some((token, _)) = self.task.lock().take() {
            token.cancel();
            trace!("Keep-alive stopped");
        }
    }

    /// Runs one check against `session`.
    pub async fn check(&self, session: &Session) -> CheckOutcome {
        if !matches!(session.state(), SessionState::Active) {
            return CheckOutcome::Skipped(SkipReason::NotActive);
        }

        let timing = self.timing();
        if session
            .last_response_age()
            .is_some_and(|age| age < timing.ping_timeout)
        {
            return CheckOutcome::Skipped(SkipReason::RecentTraffic);
        }

        if self.in_flight.swap(true, Ordering::AcqRel) {
            return CheckOutcome::Skipped(SkipReason::InFlight);
        }
        let outcome = self.read_server_state(session, timing.ping_timeout).await;
        self.in_flight.store(false, Ordering::Release);

        match outcome {
            Ok(state) => {
                *self.last_state.write() = Some(state);
                let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
                trace!(session_key = session.key(), ?state, count, "Keep-alive");
                session.emit(SessionEvent::KeepAlive { state, count });
                CheckOutcome::Alive(state)
            }
            Err(error) => CheckOutcome::Failed(error.to_string()),
        }
    }

    async fn read_server_state(
        &self,
        session: &Session,
        ping_timeout: Duration,
    ) -> Result<ServerState, UaError> {
        let request = ReadRequest {
            max_age: Duration::ZERO,
            timestamps_to_return: TimestampsToReturn::Neither,
            nodes_to_read: vec![ReadValueId::value_of(NodeId::server_state())],
        };
        let read = session.send_via(Route::Direct, request);
        let response = match tokio::time::timeout(ping_timeout, read).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(TimeoutError::KeepAlive {
                    duration: ping_timeout,
                }
                .into())
            }
        };

        let value = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| UaError::service("Read", StatusCode::BAD_UNKNOWN_RESPONSE))?;
        if value.status.is_bad() {
            return Err(UaError::service("Read", value.status));
        }
        Ok(value
            .value
            .as_i64()
            .map(ServerState::from_value)
            .unwrap_or(ServerState::Unknown))
    }
}

impl Drop for KeepAliveMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(weak: Weak<SessionInner>, token: CancellationToken) {
    let mut delay = MIN_REARM_DELAY;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(session) = Session::upgrade(&weak) else {
            break;
        };
        let monitor = session.keepalive();
        let started = Instant::now();

        match monitor.check(&session).await {
            CheckOutcome::Failed(reason) => {
                if token.is_cancelled() {
                    break;
                }
                warn!(session_key = session.key(), %reason, "Keep-alive failure");
                token.cancel();
                session.emit(SessionEvent::KeepAliveFailure { reason });
                break;
            }
            CheckOutcome::Skipped(reason) => {
                trace!(session_key = session.key(), ?reason, "Keep-alive check skipped");
            }
            CheckOutcome::Alive(_) => {}
        }

        delay = monitor.timing().rearm_delay(started.elapsed());
    }
    debug!("Keep-alive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_from_session_timeout() {
        let timing = KeepAliveTiming::from_session_timeout(Duration::from_millis(60_000));
        assert_eq!(timing.ping_timeout, Duration::from_millis(20_000));
        assert_eq!(timing.check_interval, Duration::from_millis(20_000));

        let timing = KeepAliveTiming::from_session_timeout(Duration::from_millis(3_000));
        assert_eq!(timing.ping_timeout, Duration::from_millis(1_000));
        assert_eq!(timing.check_interval, Duration::from_millis(2_000));
    }

    #[test]
    fn test_timing_clamps_interval() {
        let timing = KeepAliveTiming::from_session_timeout(Duration::from_millis(30));
        assert_eq!(timing.ping_timeout, Duration::from_millis(10));
        assert_eq!(timing.check_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_rearm_delay() {
        let timing = KeepAliveTiming::from_session_timeout(Duration::from_millis(3_000));
        assert_eq!(
            timing.rearm_delay(Duration::from_millis(500)),
            Duration::from_millis(1_500)
        );
        assert_eq!(
            timing.rearm_delay(Duration::from_millis(5_000)),
            Duration::from_millis(1)
        );
    }
}
