// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Observable events of sessions, subscriptions and the client.
//!
//! Each component publishes a fixed set of events on a
//! `tokio::sync::broadcast` channel. Slow receivers may lag and miss events;
//! the runtime never blocks on them.

use std::time::Duration;

use crate::messages::EventFieldList;
use crate::reconnect::{FanOutReport, RepairPath};
use crate::types::{DataValue, ServerState, StatusCode};

/// Capacity of every event channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Key of a session inside its client.
pub type SessionKey = u64;

// =============================================================================
// SessionEvent
// =============================================================================

/// Events raised by a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A keep-alive check succeeded.
    KeepAlive {
        /// Server state read by the check.
        state: ServerState,
        /// Number of successful checks so far.
        count: u64,
    },

    /// A keep-alive check failed; the monitor has stopped.
    KeepAliveFailure {
        /// Failure description.
        reason: String,
    },

    /// The session is gone for good. Raised exactly once.
    SessionClosed {
        /// Status that closed the session.
        status: StatusCode,
    },

    /// The session has been repaired.
    SessionRestored {
        /// How it was repaired.
        path: RepairPath,
    },

    /// A repair has started.
    Reconnecting,
}

impl SessionEvent {
    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::KeepAlive { .. } => "keepalive",
            Self::KeepAliveFailure { .. } => "keepalive_failure",
            Self::SessionClosed { .. } => "session_closed",
            Self::SessionRestored { .. } => "session_restored",
            Self::Reconnecting => "reconnecting",
        }
    }
}

// =============================================================================
// SubscriptionEvent
// =============================================================================

/// Events raised by a [`Subscription`](crate::subscription::Subscription).
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// The subscription exists on the server.
    Started {
        /// Server-assigned id.
        subscription_id: u32,
        /// Revised publishing interval.
        revised_publishing_interval: Duration,
    },

    /// A keep-alive notification arrived.
    KeepAlive {
        /// Sequence number announced by the server.
        sequence_number: u32,
    },

    /// The subscription has been terminated. Raised once.
    Terminated,

    /// A monitored item was created.
    ItemAdded {
        /// Client handle of the item.
        client_handle: u32,
        /// Create result.
        status: StatusCode,
    },

    /// The server reported a status change.
    StatusChanged {
        /// New status.
        status: StatusCode,
    },

    /// A non-fatal internal failure.
    InternalError {
        /// Failure description.
        message: String,
    },

    /// A monitored value changed.
    DataChange {
        /// Client handle of the item.
        client_handle: u32,
        /// New value.
        value: DataValue,
    },

    /// An event notification arrived.
    Event {
        /// Event fields.
        fields: EventFieldList,
    },
}

impl SubscriptionEvent {
    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::KeepAlive { .. } => "keepalive",
            Self::Terminated => "terminated",
            Self::ItemAdded { .. } => "item_added",
            Self::StatusChanged { .. } => "status_changed",
            Self::InternalError { .. } => "internal_error",
            Self::DataChange { .. } => "changed",
            Self::Event { .. } => "event",
        }
    }
}

// =============================================================================
// ClientEvent
// =============================================================================

/// Events raised by a [`UaClient`](crate::client::UaClient).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The channel closed unexpectedly.
    ConnectionLost {
        /// Reason reported by the channel.
        reason: String,
    },

    /// Waiting before the next connect attempt.
    Backoff {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },

    /// The channel is open again.
    ConnectionReestablished,

    /// A session was opened.
    SessionAdded {
        /// Key of the session.
        key: SessionKey,
    },

    /// A session was removed.
    SessionRemoved {
        /// Key of the session.
        key: SessionKey,
    },

    /// A fan-out repair finished.
    RepairCompleted {
        /// Aggregated outcome.
        report: FanOutReport,
    },

    /// A non-fatal internal failure.
    InternalError {
        /// Failure description.
        message: String,
    },
}

impl ClientEvent {
    /// Event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionLost { .. } => "connection_lost",
            Self::Backoff { .. } => "backoff",
            Self::ConnectionReestablished => "connection_reestablished",
            Self::SessionAdded { .. } => "session_added",
            Self::SessionRemoved { .. } => "session_removed",
            Self::RepairCompleted { .. } => "repair_completed",
            Self::InternalError { .. } => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(
            SessionEvent::SessionClosed {
                status: StatusCode::BAD_SESSION_CLOSED
            }
            .name(),
            "session_closed"
        );
        assert_eq!(SubscriptionEvent::Terminated.name(), "terminated");
        assert_eq!(
            ClientEvent::Backoff {
                attempt: 1,
                delay: Duration::from_millis(500)
            }
            .name(),
            "backoff"
        );
    }
}
