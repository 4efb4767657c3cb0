// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel contract consumed by the session runtime.
//!
//! The runtime does not encode messages or manage security tokens. It talks
//! to an implementation of [`Channel`], which owns one secured connection
//! to an endpoint and reports lifecycle changes as [`ChannelEvent`]s.
//!
//! The [`UaClient`](crate::client::UaClient) owns the channel as an
//! `Arc<dyn Channel>`. Sessions only keep a `Weak` reference and report
//! [`ChannelError::Unavailable`](crate::error::ChannelError::Unavailable)
//! once the client is gone.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::UaResult;
use crate::messages::{RequestMessage, ResponseMessage};

// =============================================================================
// ChannelState
// =============================================================================

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Not connected.
    #[default]
    Disconnected,

    /// Establishing the connection.
    Connecting,

    /// Open and able to carry transactions.
    Open,

    /// Lost and being re-established.
    Reconnecting,

    /// Closed for good.
    Closed,
}

impl ChannelState {
    /// Returns `true` if the channel is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the channel is in a transitional state.
    #[inline]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// ChannelEvent
// =============================================================================

/// Lifecycle notifications raised by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The transport is waiting before its next connect attempt.
    Backoff {
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },

    /// The transport aborted the connection.
    Abort,

    /// The connection closed. `error` is `None` for an orderly close.
    Closed {
        /// Reason of an unexpected close.
        error: Option<String>,
    },

    /// 75% of the security token lifetime has elapsed.
    Lifetime75 {
        /// Current token id.
        token_id: u32,
    },

    /// A new security token is in use.
    SecurityTokenRenewed {
        /// New token id.
        token_id: u32,
    },
}

impl ChannelEvent {
    /// Returns `true` for an unexpected close that calls for reconnection.
    pub fn is_unexpected_close(&self) -> bool {
        matches!(self, Self::Closed { error: Some(_) })
    }
}

// =============================================================================
// Channel Trait
// =============================================================================

/// A secured transport connection to one endpoint.
///
/// Implementations must be usable through a shared reference; the client
/// and all of its sessions call into the same instance concurrently.
/// Transactions on a broken channel may complete in any order.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Opens (or re-opens) the connection to `endpoint_url`.
    async fn connect(&self, endpoint_url: &str) -> UaResult<()>;

    /// Closes the connection. Outstanding transactions fail.
    async fn close(&self) -> UaResult<()>;

    /// Sends a request and waits for its response.
    async fn perform_transaction(&self, request: RequestMessage) -> UaResult<ResponseMessage>;

    /// Returns `true` if the channel can carry transactions right now.
    fn is_valid(&self) -> bool;

    /// Returns the current state.
    fn state(&self) -> ChannelState;

    /// Subscribes to lifecycle events.
    fn events(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Endpoint URL of the channel.
    fn endpoint(&self) -> &str;

    /// Traffic counters.
    fn stats(&self) -> ChannelStatsSnapshot;
}

// =============================================================================
// ChannelStats
// =============================================================================

/// Traffic counters kept by channel implementations.
#[derive(Debug, Default)]
pub struct ChannelStats {
    transactions: AtomicU64,
    failures: AtomicU64,
    connects: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl ChannelStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed transaction.
    pub fn record_transaction(&self, sent: u64, received: u64) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(received, Ordering::Relaxed);
    }

    /// Records a failed transaction.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful connect.
    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of the counters.
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            transactions: self.transactions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ChannelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatsSnapshot {
    pub transactions: u64,
    pub failures: u64,
    pub connects: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
