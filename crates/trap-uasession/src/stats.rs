// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Runtime statistics.
//!
//! Counters are lock-free atomics updated on the hot path; callers read them
//! through serializable snapshot structs.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn add(counter: &AtomicU64, value: u64) {
    counter.fetch_add(value, Ordering::Relaxed);
}

#[inline]
fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

// =============================================================================
// SessionStats
// =============================================================================

/// Per-session transaction counters.
#[derive(Debug, Default)]
pub struct SessionStats {
    requests: AtomicU64,
    responses: AtomicU64,
    service_faults: AtomicU64,
    transport_errors: AtomicU64,
    timeouts: AtomicU64,
    queued: AtomicU64,
    replayed: AtomicU64,
    total_response_time_us: AtomicU64,
}

impl SessionStats {
    pub(crate) fn record_request(&self) {
        bump(&self.requests);
    }

    pub(crate) fn record_response(&self, elapsed_us: u64) {
        bump(&self.responses);
        add(&self.total_response_time_us, elapsed_us);
    }

    pub(crate) fn record_service_fault(&self) {
        bump(&self.service_faults);
    }

    pub(crate) fn record_transport_error(&self) {
        bump(&self.transport_errors);
    }

    pub(crate) fn record_timeout(&self) {
        bump(&self.timeouts);
    }

    pub(crate) fn record_queued(&self) {
        bump(&self.queued);
    }

    pub(crate) fn record_replayed(&self) {
        bump(&self.replayed);
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        let responses = load(&self.responses);
        let total = load(&self.total_response_time_us);
        SessionStatsSnapshot {
            requests: load(&self.requests),
            responses,
            service_faults: load(&self.service_faults),
            transport_errors: load(&self.transport_errors),
            timeouts: load(&self.timeouts),
            queued: load(&self.queued),
            replayed: load(&self.replayed),
            avg_response_time_us: if responses == 0 { 0 } else { total / responses },
        }
    }
}

/// Snapshot of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatsSnapshot {
    pub requests: u64,
    pub responses: u64,
    pub service_faults: u64,
    pub transport_errors: u64,
    pub timeouts: u64,
    /// Transactions queued while the session was reconnecting.
    pub queued: u64,
    /// Queued transactions replayed after a repair.
    pub replayed: u64,
    pub avg_response_time_us: u64,
}

// =============================================================================
// PublishStats
// =============================================================================

/// Publish engine counters.
#[derive(Debug, Default)]
pub struct PublishStats {
    publish_requests: AtomicU64,
    notification_messages: AtomicU64,
    keep_alives: AtomicU64,
    timeouts: AtomicU64,
    sequence_gaps: AtomicU64,
    republish_calls: AtomicU64,
    republished_messages: AtomicU64,
    lost_messages: AtomicU64,
}

impl PublishStats {
    pub(crate) fn record_publish_request(&self) {
        bump(&self.publish_requests);
    }

    pub(crate) fn record_notification(&self) {
        bump(&self.notification_messages);
    }

    pub(crate) fn record_keep_alive(&self) {
        bump(&self.keep_alives);
    }

    pub(crate) fn record_timeout(&self) {
        bump(&self.timeouts);
    }

    pub(crate) fn record_gap(&self) {
        bump(&self.sequence_gaps);
    }

    pub(crate) fn record_republish_call(&self) {
        bump(&self.republish_calls);
    }

    pub(crate) fn record_republished(&self) {
        bump(&self.republished_messages);
    }

    pub(crate) fn record_lost(&self, count: u64) {
        add(&self.lost_messages, count);
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> PublishStatsSnapshot {
        PublishStatsSnapshot {
            publish_requests: load(&self.publish_requests),
            notification_messages: load(&self.notification_messages),
            keep_alives: load(&self.keep_alives),
            timeouts: load(&self.timeouts),
            sequence_gaps: load(&self.sequence_gaps),
            republish_calls: load(&self.republish_calls),
            republished_messages: load(&self.republished_messages),
            lost_messages: load(&self.lost_messages),
        }
    }
}

/// Snapshot of [`PublishStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStatsSnapshot {
    pub publish_requests: u64,
    pub notification_messages: u64,
    pub keep_alives: u64,
    pub timeouts: u64,
    pub sequence_gaps: u64,
    /// Explicit republish rounds driven by the reconnection controller.
    pub republish_calls: u64,
    pub republished_messages: u64,
    /// Messages the server could no longer retransmit.
    pub lost_messages: u64,
}

// =============================================================================
// SubscriptionStats
// =============================================================================

/// Per-subscription notification counters.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    data_changes: AtomicU64,
    events: AtomicU64,
    keep_alives: AtomicU64,
    recreations: AtomicU64,
}

impl SubscriptionStats {
    pub(crate) fn record_data_changes(&self, count: u64) {
        add(&self.data_changes, count);
    }

    pub(crate) fn record_events(&self, count: u64) {
        add(&self.events, count);
    }

    pub(crate) fn record_keep_alive(&self) {
        bump(&self.keep_alives);
    }

    pub(crate) fn record_recreation(&self) {
        bump(&self.recreations);
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> SubscriptionStatsSnapshot {
        SubscriptionStatsSnapshot {
            data_changes: load(&self.data_changes),
            events: load(&self.events),
            keep_alives: load(&self.keep_alives),
            recreations: load(&self.recreations),
        }
    }
}

/// Snapshot of [`SubscriptionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatsSnapshot {
    pub data_changes: u64,
    pub events: u64,
    pub keep_alives: u64,
    pub recreations: u64,
}

// =============================================================================
// RepairStats
// =============================================================================

/// Reconnection controller counters.
#[derive(Debug, Default)]
pub struct RepairStats {
    runs: AtomicU64,
    coalesced: AtomicU64,
    attempts: AtomicU64,
    reactivations: AtomicU64,
    recreations: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
}

impl RepairStats {
    pub(crate) fn record_run(&self) {
        bump(&self.runs);
    }

    pub(crate) fn record_coalesced(&self) {
        bump(&self.coalesced);
    }

    pub(crate) fn record_attempt(&self) {
        bump(&self.attempts);
    }

    pub(crate) fn record_reactivation(&self) {
        bump(&self.reactivations);
    }

    pub(crate) fn record_recreation(&self) {
        bump(&self.recreations);
    }

    pub(crate) fn record_failure(&self) {
        bump(&self.failures);
    }

    pub(crate) fn record_cancellation(&self) {
        bump(&self.cancellations);
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> RepairStatsSnapshot {
        RepairStatsSnapshot {
            runs: load(&self.runs),
            coalesced: load(&self.coalesced),
            attempts: load(&self.attempts),
            reactivations: load(&self.reactivations),
            recreations: load(&self.recreations),
            failures: load(&self.failures),
            cancellations: load(&self.cancellations),
        }
    }
}

/// Snapshot of [`RepairStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairStatsSnapshot {
    /// Repair sequences actually executed.
    pub runs: u64,
    /// Requests that joined an in-flight repair.
    pub coalesced: u64,
    pub attempts: u64,
    pub reactivations: u64,
    pub recreations: u64,
    pub failures: u64,
    pub cancellations: u64,
}

// =============================================================================
// ClientStats
// =============================================================================

/// Client-wide counters.
#[derive(Debug, Default)]
pub struct ClientStats {
    connections: AtomicU64,
    connection_losses: AtomicU64,
    connect_retries: AtomicU64,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    fan_out_repairs: AtomicU64,
}

impl ClientStats {
    pub(crate) fn record_connection(&self) {
        bump(&self.connections);
    }

    pub(crate) fn record_connection_loss(&self) {
        bump(&self.connection_losses);
    }

    pub(crate) fn record_connect_retry(&self) {
        bump(&self.connect_retries);
    }

    pub(crate) fn record_session_opened(&self) {
        bump(&self.sessions_opened);
    }

    pub(crate) fn record_session_closed(&self) {
        bump(&self.sessions_closed);
    }

    pub(crate) fn record_fan_out(&self) {
        bump(&self.fan_out_repairs);
    }

    /// Returns a snapshot of the counters.
    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            connections: load(&self.connections),
            connection_losses: load(&self.connection_losses),
            connect_retries: load(&self.connect_retries),
            sessions_opened: load(&self.sessions_opened),
            sessions_closed: load(&self.sessions_closed),
            fan_out_repairs: load(&self.fan_out_repairs),
        }
    }
}

/// Snapshot of [`ClientStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatsSnapshot {
    pub connections: u64,
    pub connection_losses: u64,
    pub connect_retries: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub fan_out_repairs: u64,
}
