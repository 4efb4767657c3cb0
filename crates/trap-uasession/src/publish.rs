// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publish engine.
//!
//! Each session owns one engine. It keeps
//! `min(max_publish_requests, subscriptions + 1)` Publish requests
//! outstanding, routes returned notification messages to their
//! subscription, acknowledges processed sequence numbers on the next
//! request and republishes messages missing from the sequence.
//!
//! # Publish failures
//!
//! | Result                      | Reaction                                   |
//! |-----------------------------|--------------------------------------------|
//! | `BadTimeout` / timeout      | re-issue                                   |
//! | `BadNoSubscription`         | stop issuing until a subscription is added |
//! | `BadTooManyPublishRequests` | lower the outstanding target               |
//! | anything else               | stop issuing until resumed                 |
//!
//! [`PublishEngine::suspend`] withholds new requests without touching the
//! ones already in flight.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{ErrorKind, SessionError, UaError, UaResult};
use crate::messages::{
    NotificationMessage, PublishRequest, PublishResponse, RepublishRequest, RequestMessage,
    SubscriptionAcknowledgement,
};
use crate::session::{Route, Session, SessionInner};
use crate::stats::{PublishStats, PublishStatsSnapshot};
use crate::subscription::Subscription;
use crate::types::StatusCode;

/// Outcome of an explicit republish round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepublishSummary {
    /// Messages retransmitted by the server and delivered.
    pub recovered: u64,
    /// Subscriptions whose missing messages could not be retransmitted.
    pub unrecoverable: Vec<u32>,
}

/// Per-session publish request pump.
pub struct PublishEngine {
    session: Weak<SessionInner>,
    subscriptions: DashMap<u32, Subscription>,
    max_requests: u32,
    ceiling: AtomicU32,
    pending: AtomicU32,
    suspended: AtomicBool,
    halted: AtomicBool,
    terminated: AtomicBool,
    acknowledgements: Mutex<Vec<SubscriptionAcknowledgement>>,
    stats: PublishStats,
}

impl PublishEngine {
    pub(crate) fn new(session: Weak<SessionInner>, max_requests: u32) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            session,
            subscriptions: DashMap::new(),
            max_requests,
            ceiling: AtomicU32::new(max_requests),
            pending: AtomicU32::new(0),
            suspended: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            acknowledgements: Mutex::new(Vec::new()),
            stats: PublishStats::default(),
        }
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Ids of the registered subscriptions, ascending.
    pub fn get_subscription_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.subscriptions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Registered subscription with this id.
    pub fn get_subscription(&self, subscription_id: u32) -> Option<Subscription> {
        self.subscriptions
            .get(&subscription_id)
            .map(|e| e.value().clone())
    }

    /// Returns `true` if a subscription with this id is registered.
    pub fn has_subscription(&self, subscription_id: u32) -> bool {
        self.subscriptions.contains_key(&subscription_id)
    }

    /// Number of registered subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Publish requests currently outstanding.
    pub fn nb_pending_publish_requests(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Returns `true` while suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Number of requests the engine tries to keep outstanding.
    pub fn target(&self) -> u32 {
        let count = self.subscriptions.len() as u32;
        if count == 0 {
            0
        } else {
            count
                .saturating_add(1)
                .min(self.ceiling.load(Ordering::Acquire))
        }
    }

    /// Counters.
    pub fn stats(&self) -> PublishStatsSnapshot {
        self.stats.snapshot()
    }

    fn snapshot(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> =
            self.subscriptions.iter().map(|e| e.value().clone()).collect();
        subscriptions.sort_by_key(Subscription::id);
        subscriptions
    }

    pub(crate) fn register(&self, subscription: Subscription) {
        trace!(
            subscription_id = subscription.id(),
            "Registering subscription"
        );
        self.subscriptions.insert(subscription.id(), subscription);
        self.halted.store(false, Ordering::Release);
        self.replenish();
    }

    pub(crate) fn unregister(&self, subscription_id: u32) -> Option<Subscription> {
        self.subscriptions
            .remove(&subscription_id)
            .map(|(_, subscription)| subscription)
    }

    /// Removes `subscription` if it is still registered under its id.
    ///
    /// A sibling recreated under the same id is left alone.
    pub(crate) fn unregister_exact(&self, subscription: &Subscription) -> bool {
        self.subscriptions
            .remove_if(&subscription.id(), |_, registered| registered.ptr_eq(subscription))
            .is_some()
    }

    /// Registers a recreated subscription under its new id.
    ///
    /// The old entry goes only if it still belongs to this subscription:
    /// during one repair the server may hand out an id another subscription
    /// is still registered under.
    pub(crate) fn rekey(&self, old_id: u32, subscription: Subscription) {
        self.subscriptions
            .remove_if(&old_id, |_, registered| registered.ptr_eq(&subscription));
        let new_id = subscription.id();
        if let Some(displaced) = self.subscriptions.insert(new_id, subscription.clone()) {
            if !displaced.ptr_eq(&subscription) {
                debug!(
                    subscription_id = new_id,
                    "Recreated id was still held by a sibling awaiting recreation"
                );
            }
        }
        self.acknowledgements
            .lock()
            .retain(|ack| ack.subscription_id != old_id);
    }

    // =========================================================================
    // Flow control
    // =========================================================================

    /// Stops (`true`) or resumes (`false`) issuing new Publish requests.
    ///
    /// Idempotent. Requests already in flight are left alone. Resuming
    /// always tops the outstanding requests back up.
    pub fn suspend(&self, suspend: bool) {
        let was = self.suspended.swap(suspend, Ordering::AcqRel);
        if suspend {
            if !was {
                debug!("Publish engine suspended");
            }
            return;
        }
        if was {
            debug!("Publish engine resumed");
        }
        self.halted.store(false, Ordering::Release);
        self.ceiling.store(self.max_requests, Ordering::Release);
        self.replenish();
    }

    /// Stops the engine for good and terminates every subscription locally.
    pub(crate) fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscriptions = self.snapshot();
        self.subscriptions.clear();
        self.acknowledgements.lock().clear();
        for subscription in subscriptions {
            subscription.mark_terminated();
        }
        debug!("Publish engine terminated");
    }

    fn replenish(&self) {
        if self.terminated.load(Ordering::Acquire)
            || self.suspended.load(Ordering::Acquire)
            || self.halted.load(Ordering::Acquire)
        {
            return;
        }
        let Some(session) = Session::upgrade(&self.session) else {
            return;
        };

        loop {
            let pending = self.pending.load(Ordering::Acquire);
            if pending >= self.target() {
                break;
            }
            if self
                .pending
                .compare_exchange(pending, pending + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                tokio::spawn(send_publish(Arc::clone(session.publish_engine_arc())));
            }
        }
    }

    fn publish_timeout(&self, session: &Session) -> Duration {
        let longest_keep_alive = self
            .subscriptions
            .iter()
            .map(|e| e.value().keep_alive_period())
            .max()
            .unwrap_or_default();
        session.config().request_timeout + longest_keep_alive
    }

    // =========================================================================
    // Notification routing
    // =========================================================================

    async fn on_publish_response(&self, session: &Session, response: PublishResponse) {
        let subscription_id = response.subscription_id;
        let message = response.notification_message;

        let Some(subscription) = self.get_subscription(subscription_id) else {
            debug!(subscription_id, "Notification for unknown subscription");
            if !message.is_keep_alive() {
                self.acknowledge(subscription_id, message.sequence_number);
            }
            return;
        };

        let last = subscription.last_sequence_number();
        if message.is_keep_alive() {
            self.stats.record_keep_alive();
            // A keep-alive announces the next sequence number.
            if last != 0 && is_newer(message.sequence_number, next_sequence_number(last)) {
                self.recover_gap(
                    session,
                    &subscription,
                    next_sequence_number(last),
                    message.sequence_number,
                )
                .await;
            }
            subscription.on_keep_alive(message.sequence_number);
            return;
        }

        if last != 0 && !is_newer(message.sequence_number, last) {
            trace!(
                subscription_id,
                sequence_number = message.sequence_number,
                "Duplicate notification"
            );
            self.acknowledge(subscription_id, message.sequence_number);
            return;
        }
        if last != 0 && is_newer(message.sequence_number, next_sequence_number(last)) {
            self.recover_gap(
                session,
                &subscription,
                next_sequence_number(last),
                message.sequence_number,
            )
            .await;
        }
        self.deliver(&subscription, message);
    }

    fn deliver(&self, subscription: &Subscription, message: NotificationMessage) {
        let sequence_number = message.sequence_number;
        subscription.deliver(message);
        self.stats.record_notification();
        self.acknowledge(subscription.id(), sequence_number);
    }

    fn acknowledge(&self, subscription_id: u32, sequence_number: u32) {
        self.acknowledgements
            .lock()
            .push(SubscriptionAcknowledgement {
                subscription_id,
                sequence_number,
            });
    }

    /// Republishes sequence numbers from `from` up to, not including, `to`.
    async fn recover_gap(&self, session: &Session, subscription: &Subscription, from: u32, to: u32) {
        self.stats.record_gap();
        debug!(
            subscription_id = subscription.id(),
            from,
            missing = sequence_distance(from, to),
            "Sequence gap, republishing"
        );
        let mut sequence_number = from;
        while sequence_number != to {
            match self
                .republish_one(session, subscription, sequence_number)
                .await
            {
                Ok(()) => {}
                Err(error) if error.has_status(StatusCode::BAD_MESSAGE_NOT_AVAILABLE) => {
                    self.stats.record_lost(1);
                }
                Err(error) => {
                    self.stats
                        .record_lost(u64::from(sequence_distance(sequence_number, to)));
                    warn!(
                        subscription_id = subscription.id(),
                        sequence_number,
                        %error,
                        "Republish failed, notifications lost"
                    );
                    break;
                }
            }
            sequence_number = next_sequence_number(sequence_number);
        }
    }

    async fn republish_one(
        &self,
        session: &Session,
        subscription: &Subscription,
        sequence_number: u32,
    ) -> UaResult<()> {
        let response = session
            .send_via(
                Route::Direct,
                RepublishRequest {
                    subscription_id: subscription.id(),
                    retransmit_sequence_number: sequence_number,
                },
            )
            .await?;
        self.stats.record_republished();
        self.deliver(subscription, response.notification_message);
        Ok(())
    }

    /// Asks the server to retransmit every message after the last one each
    /// subscription processed.
    ///
    /// `BadMessageNotAvailable` ends the round for a subscription. Statuses
    /// the recovery policy marks as ignorable are recorded as unrecoverable
    /// data loss; any other failure is returned.
    pub async fn republish(&self) -> UaResult<RepublishSummary> {
        let session = Session::upgrade(&self.session).ok_or(SessionError::Closed)?;
        let policy = &session.config().repair.policy;
        self.stats.record_republish_call();

        let mut summary = RepublishSummary::default();
        for subscription in self.snapshot() {
            let mut next = next_sequence_number(subscription.last_sequence_number());
            loop {
                match self.republish_one(&session, &subscription, next).await {
                    Ok(()) => {
                        summary.recovered += 1;
                        next = next_sequence_number(next);
                    }
                    Err(error) if error.has_status(StatusCode::BAD_MESSAGE_NOT_AVAILABLE) => {
                        break;
                    }
                    Err(error)
                        if error
                            .status_code()
                            .is_some_and(|status| policy.is_ignorable_republish(status)) =>
                    {
                        debug!(
                            subscription_id = subscription.id(),
                            %error,
                            "Republish not possible, notifications lost"
                        );
                        summary.unrecoverable.push(subscription.id());
                        break;
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        debug!(
            recovered = summary.recovered,
            unrecoverable = summary.unrecoverable.len(),
            "Republish completed"
        );
        Ok(summary)
    }

    fn on_publish_error(&self, error: UaError, acknowledgements: Vec<SubscriptionAcknowledgement>) {
        if self.terminated.load(Ordering::Acquire) {
            return;
        }
        self.acknowledgements.lock().extend(acknowledgements);

        if matches!(error, UaError::Timeout(_)) || error.has_status(StatusCode::BAD_TIMEOUT) {
            self.stats.record_timeout();
            trace!("Publish timed out, re-issuing");
            self.replenish();
        } else if error.has_status(StatusCode::BAD_NO_SUBSCRIPTION) {
            debug!("Server has no subscription, publishing halted");
            self.halted.store(true, Ordering::Release);
        } else if error.has_status(StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS) {
            let lowered = self.pending.load(Ordering::Acquire).max(1);
            debug!(lowered, "Too many publish requests, lowering target");
            self.ceiling.store(lowered, Ordering::Release);
        } else {
            if error.kind() == ErrorKind::Transport {
                debug!(%error, "Publish failed, publishing halted");
            } else {
                warn!(%error, "Publish failed, publishing halted");
            }
            self.halted.store(true, Ordering::Release);
        }
    }
}

// =============================================================================
// Sequence numbers
// =============================================================================

/// Sequence numbers run from 1 to `u32::MAX` and wrap back to 1; 0 is never
/// used.
const SEQUENCE_SPACE: u64 = u32::MAX as u64;

/// Sequence number following `sequence_number`.
pub(crate) fn next_sequence_number(sequence_number: u32) -> u32 {
    match sequence_number.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

/// Steps from `from` forward to `to`.
fn sequence_distance(from: u32, to: u32) -> u32 {
    let from = u64::from(from.max(1)) - 1;
    let to = u64::from(to.max(1)) - 1;
    ((to + SEQUENCE_SPACE - from) % SEQUENCE_SPACE) as u32
}

/// Returns `true` if `candidate` comes after `reference`, within half the
/// sequence space.
pub(crate) fn is_newer(candidate: u32, reference: u32) -> bool {
    let distance = sequence_distance(reference, candidate);
    distance != 0 && u64::from(distance) < SEQUENCE_SPACE / 2
}

async fn send_publish(engine: Arc<PublishEngine>) {
    let Some(session) = Session::upgrade(&engine.session) else {
        engine.pending.fetch_sub(1, Ordering::AcqRel);
        return;
    };

    let acknowledgements = std::mem::take(&mut *engine.acknowledgements.lock());
    let timeout = engine.publish_timeout(&session);
    engine.stats.record_publish_request();

    let request = RequestMessage::new(PublishRequest {
        subscription_acknowledgements: acknowledgements.clone(),
    });
    let result = session
        .dispatch_with_timeout(request, timeout)
        .await
        .and_then(|response| PublishResponse::try_from(response.body));
    engine.pending.fetch_sub(1, Ordering::AcqRel);

    match result {
        Ok(response) => {
            engine.on_publish_response(&session, response).await;
            engine.replenish();
        }
        Err(error) => engine.on_publish_error(error, acknowledgements),
    }
}
