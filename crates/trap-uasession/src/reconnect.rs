// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Reconnection controller.
//!
//! [`Session::repair`] brings a session back after its channel was
//! re-established. Each attempt tries the cheap path first and falls back
//! to rebuilding the session on the server:
//!
//! ```text
//! Stable ─► Reconnecting ─┬─ reactivate ─► republish ─► resume ───────────────► Repaired ─┐
//!                         └─ on failure:                                                  ├─► Stable
//!                            suspend ─► create+activate ─► transfer / recreate            │
//!                                    ─► republish ─► resume ──────────────────► Recreated ┘
//! ```
//!
//! A failed attempt waits for the repair backoff and starts over, until the
//! optional attempt limit is reached (`Failed`, session closed for good).
//! Every step first checks whether the application closed the session; if
//! so the repair stops with [`RepairError::Cancelled`].
//!
//! Concurrent `repair` calls on one session share a single run and all
//! receive the same [`RepairOutcome`].

use std::fmt;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{RepairError, UaError, UaResult};
use crate::events::{SessionEvent, SessionKey};
use crate::messages::{ensure_aligned, ServiceRequest, TransferSubscriptionsRequest};
use crate::session::{Route, Session};
use crate::stats::{RepairStats, RepairStatsSnapshot};
use crate::subscription::Subscription;

// =============================================================================
// Outcome types
// =============================================================================

/// Which path restored the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairPath {
    /// The existing server session was re-activated.
    Reactivated,

    /// A new server session was created.
    Recreated {
        /// Subscriptions kept through TransferSubscriptions.
        transferred: Vec<u32>,
        /// Recreated subscriptions as `(old id, new id)`.
        recreated: Vec<(u32, u32)>,
        /// Subscriptions that could not be recreated and were dropped.
        failed: Vec<u32>,
    },
}

impl RepairPath {
    /// Returns `true` for [`RepairPath::Reactivated`].
    pub fn is_reactivation(&self) -> bool {
        matches!(self, Self::Reactivated)
    }
}

/// Result of a successful repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Path that succeeded.
    pub path: RepairPath,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Queued transactions replayed afterwards.
    pub replayed: usize,
    /// Notification messages recovered by republish.
    pub recovered: u64,
}

/// Outcome shared by every waiter of one repair run.
pub type RepairOutcome = Result<RepairReport, RepairError>;

/// Repair state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPhase {
    /// No repair running.
    #[default]
    Stable,
    /// A repair is running.
    Reconnecting,
    /// Building a new server session.
    Recreating,
    /// Re-activation succeeded; replaying queued transactions.
    Repaired,
    /// Recreation succeeded; replaying queued transactions.
    Recreated,
    /// The last repair failed.
    Failed,
}

impl fmt::Display for RepairPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "Stable"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Recreating => write!(f, "Recreating"),
            Self::Repaired => write!(f, "Repaired"),
            Self::Recreated => write!(f, "Recreated"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Aggregated outcome of repairing several sessions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    /// Outcome per session, ordered by key.
    pub outcomes: Vec<(SessionKey, RepairOutcome)>,
}

impl FanOutReport {
    /// Keys of the sessions that were repaired.
    pub fn succeeded(&self) -> Vec<SessionKey> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .map(|(key, _)| *key)
            .collect()
    }

    /// Sessions whose repair failed, with the error.
    pub fn failed(&self) -> Vec<(SessionKey, RepairError)> {
        self.outcomes
            .iter()
            .filter_map(|(key, outcome)| outcome.as_ref().err().map(|e| (*key, e.clone())))
            .collect()
    }

    /// Returns `true` if every session was repaired.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_ok())
    }

    /// Outcome of one session.
    pub fn outcome(&self, key: SessionKey) -> Option<&RepairOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, outcome)| outcome)
    }
}

// =============================================================================
// RepairCoordinator
// =============================================================================

#[derive(Default)]
struct RepairSlot {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<RepairOutcome>>,
}

/// Per-session repair serialization.
pub(crate) struct RepairCoordinator {
    slot: Mutex<RepairSlot>,
    phase: RwLock<RepairPhase>,
    stats: RepairStats,
}

impl RepairCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(RepairSlot::default()),
            phase: RwLock::new(RepairPhase::Stable),
            stats: RepairStats::default(),
        }
    }

    pub(crate) fn stats(&self) -> RepairStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn phase(&self) -> RepairPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: RepairPhase) {
        *self.phase.write() = phase;
    }

    /// Registers a waiter. Returns `true` if the caller must start the run.
    fn join(&self, waiter: oneshot::Sender<RepairOutcome>) -> bool {
        let mut slot = self.slot.lock();
        slot.waiters.push(waiter);
        if slot.in_flight {
            self.stats.record_coalesced();
            false
        } else {
            slot.in_flight = true;
            true
        }
    }

    fn complete(&self, outcome: &RepairOutcome) {
        let waiters = {
            let mut slot = self.slot.lock();
            slot.in_flight = false;
            std::mem::take(&mut slot.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

fn is_cancellation(error: &UaError) -> bool {
    matches!(error, UaError::Repair(RepairError::Cancelled))
}

// =============================================================================
// Session repair
// =============================================================================

impl Session {
    /// Repairs the session after a connection break.
    ///
    /// Joins the running repair if there is one. Application requests sent
    /// meanwhile are queued and replayed once the repair succeeds.
    pub async fn repair(&self) -> RepairOutcome {
        if self.has_been_closed() {
            return Err(RepairError::Cancelled);
        }

        let (waiter, outcome) = oneshot::channel();
        if self.repair_coordinator().join(waiter) {
            self.mark_reconnecting();
            let session = self.clone();
            tokio::spawn(async move {
                let outcome = session.run_repair().await;
                session.repair_coordinator().complete(&outcome);
            });
        } else {
            debug!(session_key = self.key(), "Joining in-flight repair");
        }

        outcome.await.unwrap_or(Err(RepairError::Cancelled))
    }

    /// Current repair phase.
    pub fn repair_phase(&self) -> RepairPhase {
        self.repair_coordinator().phase()
    }

    async fn run_repair(&self) -> RepairOutcome {
        let coordinator = self.repair_coordinator();
        coordinator.stats.record_run();
        coordinator.set_phase(RepairPhase::Reconnecting);
        info!(session_key = self.key(), "Repairing session");

        let settings = self.config().repair.clone();
        let mut attempts = 0u32;
        let result = loop {
            if self.has_been_closed() {
                break Err(RepairError::Cancelled);
            }
            attempts += 1;
            coordinator.stats.record_attempt();

            match self.repair_once().await {
                Ok(path) => break Ok(path),
                Err(error) if is_cancellation(&error) => break Err(RepairError::Cancelled),
                Err(error) => {
                    warn!(
                        session_key = self.key(),
                        attempt = attempts,
                        %error,
                        "Repair attempt failed"
                    );
                    if settings.max_attempts.is_some_and(|max| attempts >= max) {
                        break Err(RepairError::Exhausted {
                            attempts,
                            last_error: error.to_string(),
                        });
                    }
                    coordinator.set_phase(RepairPhase::Reconnecting);
                    tokio::select! {
                        _ = self.shutdown_token().cancelled() => break Err(RepairError::Cancelled),
                        _ = tokio::time::sleep(settings.backoff) => {}
                    }
                }
            }
        };

        match result {
            Ok((path, recovered)) => {
                coordinator.set_phase(if path.is_reactivation() {
                    RepairPhase::Repaired
                } else {
                    RepairPhase::Recreated
                });
                let replayed = self.resume_after_repair().await;
                coordinator.set_phase(RepairPhase::Stable);
                info!(
                    session_key = self.key(),
                    attempts,
                    replayed,
                    ?path,
                    "Session restored"
                );
                self.emit(SessionEvent::SessionRestored { path: path.clone() });
                Ok(RepairReport {
                    path,
                    attempts,
                    replayed,
                    recovered,
                })
            }
            Err(error) => {
                match error {
                    RepairError::Cancelled => coordinator.stats.record_cancellation(),
                    RepairError::Exhausted { .. } => coordinator.stats.record_failure(),
                }
                coordinator.set_phase(RepairPhase::Failed);
                warn!(session_key = self.key(), %error, "Repair abandoned");
                self.abandon_repair(&error).await;
                Err(error)
            }
        }
    }

    fn ensure_not_closed(&self) -> UaResult<()> {
        if self.has_been_closed() {
            Err(RepairError::Cancelled.into())
        } else {
            Ok(())
        }
    }

    /// One attempt. Returns the path taken and the messages recovered.
    async fn repair_once(&self) -> UaResult<(RepairPath, u64)> {
        self.ensure_not_closed()?;
        match self.reactivate_in_place().await {
            Ok(recovered) => {
                self.repair_coordinator().stats.record_reactivation();
                return Ok((RepairPath::Reactivated, recovered));
            }
            Err(error) if is_cancellation(&error) => return Err(error),
            Err(error) => {
                debug!(
                    session_key = self.key(),
                    %error,
                    "Re-activation failed, recreating session"
                );
            }
        }

        let result = self.recreate_and_transfer().await?;
        self.repair_coordinator().stats.record_recreation();
        Ok(result)
    }

    async fn reactivate_in_place(&self) -> UaResult<u64> {
        self.reactivate().await?;
        self.ensure_not_closed()?;
        let recovered = self.republish_after_repair().await?;
        self.ensure_not_closed()?;
        self.publish_engine().suspend(false);
        Ok(recovered)
    }

    async fn recreate_and_transfer(&self) -> UaResult<(RepairPath, u64)> {
        let coordinator = self.repair_coordinator();
        let engine = self.publish_engine();

        self.ensure_not_closed()?;
        engine.suspend(true);
        coordinator.set_phase(RepairPhase::Recreating);

        self.ensure_not_closed()?;
        let info = self.establish().await?;
        if self.has_been_closed() {
            self.discard(&info).await;
            return Err(RepairError::Cancelled.into());
        }
        debug!(
            session_key = self.key(),
            session_id = %info.session_id,
            "Replacement session activated"
        );
        self.install(info);

        let mut transferred = Vec::new();
        let mut recreated = Vec::new();
        let mut failed = Vec::new();

        let subscription_ids = engine.get_subscription_ids();
        if !subscription_ids.is_empty() {
            self.ensure_not_closed()?;
            let to_recreate = self
                .transfer_or_select(&subscription_ids, &mut transferred)
                .await;

            self.ensure_not_closed()?;
            let results = join_all(to_recreate.iter().map(|subscription| async move {
                (subscription.id(), subscription.recreate(self).await)
            }))
            .await;

            for ((old_id, result), subscription) in results.into_iter().zip(&to_recreate) {
                match result {
                    Ok(new_id) => recreated.push((old_id, new_id)),
                    Err(error) => {
                        warn!(
                            session_key = self.key(),
                            subscription_id = old_id,
                            %error,
                            "Subscription recreation failed"
                        );
                        engine.unregister_exact(subscription);
                        subscription.mark_terminated();
                        failed.push(old_id);
                    }
                }
            }
        }

        self.ensure_not_closed()?;
        let recovered = self.republish_after_repair().await?;
        self.ensure_not_closed()?;
        engine.suspend(false);

        Ok((
            RepairPath::Recreated {
                transferred,
                recreated,
                failed,
            },
            recovered,
        ))
    }

    /// Transfers subscriptions to the new session and returns the ones that
    /// must be recreated. If the transfer call itself fails, all of them are.
    async fn transfer_or_select(
        &self,
        subscription_ids: &[u32],
        transferred: &mut Vec<u32>,
    ) -> Vec<Subscription> {
        let engine = self.publish_engine();
        let policy = &self.config().repair.policy;

        let response = self
            .send_via(
                Route::Direct,
                TransferSubscriptionsRequest {
                    subscription_ids: subscription_ids.to_vec(),
                    send_initial_values: true,
                },
            )
            .await
            .and_then(|response| {
                ensure_aligned(
                    TransferSubscriptionsRequest::NAME,
                    subscription_ids.len(),
                    response.results.len(),
                )?;
                Ok(response)
            });

        match response {
            Ok(response) => {
                let mut to_recreate = Vec::new();
                for (id, result) in subscription_ids.iter().zip(response.results) {
                    if policy.requires_recreate(result.status) {
                        if let Some(subscription) = engine.get_subscription(*id) {
                            to_recreate.push(subscription);
                        }
                    } else {
                        debug!(
                            subscription_id = id,
                            status = %result.status,
                            "Subscription transferred"
                        );
                        transferred.push(*id);
                    }
                }
                to_recreate
            }
            Err(error) => {
                warn!(
                    session_key = self.key(),
                    %error,
                    "TransferSubscriptions failed, recreating all subscriptions"
                );
                subscription_ids
                    .iter()
                    .filter_map(|id| engine.get_subscription(*id))
                    .collect()
            }
        }
    }

    async fn republish_after_repair(&self) -> UaResult<u64> {
        match self.publish_engine().republish().await {
            Ok(summary) => Ok(summary.recovered),
            Err(error) if self.config().repair.policy.republish_failure_is_fatal => Err(error),
            Err(error) => {
                warn!(
                    session_key = self.key(),
                    %error,
                    "Republish failed, resuming with possible notification loss"
                );
                Ok(0)
            }
        }
    }
}

/// Repairs every session concurrently.
///
/// One session's failure does not affect the others.
pub async fn repair_all(sessions: Vec<Session>) -> FanOutReport {
    let mut outcomes = join_all(
        sessions
            .iter()
            .map(|session| async move { (session.key(), session.repair().await) }),
    )
    .await;
    outcomes.sort_by_key(|(key, _)| *key);
    FanOutReport { outcomes }
}
