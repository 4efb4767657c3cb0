// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client: channel ownership, session registry and connection supervision.
//!
//! # Example
//!
//! ```rust,ignore
//! use trap_uasession::prelude::*;
//!
//! let config = ClientConfig::builder()
//!     .endpoint("opc.tcp://plc-01:4840")
//!     .build()?;
//! let client = UaClient::new(config, channel)?;
//! client.connect().await?;
//!
//! let session = client.open_session(UserIdentity::Anonymous).await?;
//! let subscription = session.create_subscription(SubscriptionSettings::default()).await?;
//! ```
//!
//! # Supervision
//!
//! After `connect` a supervisor task watches the channel. An unexpected
//! close marks every session reconnecting, re-establishes the channel with
//! the connection strategy and repairs all sessions concurrently. The
//! repair fan-out runs in its own task, so a second break while sessions
//! are still being repaired re-establishes the channel again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::channel::{Channel, ChannelEvent};
use crate::config::ClientConfig;
use crate::error::{ChannelError, RepairError, UaError, UaResult};
use crate::events::{ClientEvent, SessionKey, EVENT_CHANNEL_CAPACITY};
use crate::reconnect::{repair_all, FanOutReport};
use crate::session::Session;
use crate::stats::{ClientStats, ClientStatsSnapshot};
use crate::types::UserIdentity;

/// OPC UA client runtime.
///
/// Cheap to clone; clones share the channel and the sessions.
#[derive(Clone)]
pub struct UaClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Arc<ClientConfig>,
    channel: Arc<dyn Channel>,
    sessions: DashMap<SessionKey, Session>,
    next_key: AtomicU64,
    events: broadcast::Sender<ClientEvent>,
    stats: ClientStats,
    supervisor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl UaClient {
    /// Creates a client over `channel`. The configuration is validated.
    pub fn new(config: ClientConfig, channel: Arc<dyn Channel>) -> UaResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(ClientInner {
                config: Arc::new(config),
                channel,
                sessions: DashMap::new(),
                next_key: AtomicU64::new(1),
                events,
                stats: ClientStats::default(),
                supervisor: Mutex::new(None),
            }),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner.channel
    }

    /// Returns `true` if the channel is usable.
    pub fn is_connected(&self) -> bool {
        self.inner.channel.is_valid()
    }

    /// Subscribes to client events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Client counters.
    pub fn stats(&self) -> ClientStatsSnapshot {
        self.inner.stats.snapshot()
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Connects the channel and starts supervising it.
    ///
    /// Failed attempts are retried according to the connection strategy,
    /// raising `backoff` before each wait.
    pub async fn connect(&self) -> UaResult<()> {
        if self.inner.channel.is_valid() && self.supervisor_running() {
            debug!("Already connected");
            return Ok(());
        }

        let token = CancellationToken::new();
        if !self.inner.channel.is_valid() {
            self.inner.connect_channel(&token).await?;
        }
        self.start_supervisor(token);
        Ok(())
    }

    /// Closes every session, stops supervision and closes the channel.
    pub async fn disconnect(&self) -> UaResult<()> {
        info!(endpoint = %self.inner.config.endpoint, "Disconnecting");
        if let Some((token, _)) = self.inner.supervisor.lock().take() {
            token.cancel();
        }

        for session in self.sessions() {
            self.remove_session(session.key());
            if let Err(error) = session.close(true).await {
                warn!(session_key = session.key(), %error, "Failed to close session");
            }
        }
        self.inner.channel.close().await
    }

    fn supervisor_running(&self) -> bool {
        self.inner
            .supervisor
            .lock()
            .as_ref()
            .is_some_and(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
    }

    fn start_supervisor(&self, token: CancellationToken) {
        let events = self.inner.channel.events();
        let handle = tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            events,
            token.clone(),
        ));
        if let Some((previous, _)) = self.inner.supervisor.lock().replace((token, handle)) {
            previous.cancel();
        }
        debug!("Channel supervisor started");
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Creates and activates a new session.
    pub async fn open_session(&self, identity: UserIdentity) -> UaResult<Session> {
        let channel = &self.inner.channel;
        if !channel.is_valid() {
            return Err(UaError::channel_not_valid(channel.endpoint()));
        }

        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        let session = Session::open(key, Arc::clone(&self.inner.config), channel, identity).await?;
        self.inner.sessions.insert(key, session.clone());
        self.inner.stats.record_session_opened();
        self.inner.emit(ClientEvent::SessionAdded { key });
        Ok(session)
    }

    /// Closes a session and removes it from the client.
    pub async fn close_session(&self, key: SessionKey, delete_subscriptions: bool) -> UaResult<()> {
        let session = self
            .remove_session(key)
            .ok_or_else(|| UaError::invalid_argument("key", format!("no session with key {key}")))?;
        session.close(delete_subscriptions).await
    }

    fn remove_session(&self, key: SessionKey) -> Option<Session> {
        let (_, session) = self.inner.sessions.remove(&key)?;
        self.inner.stats.record_session_closed();
        self.inner.emit(ClientEvent::SessionRemoved { key });
        Some(session)
    }

    /// Session with this key.
    pub fn session(&self, key: SessionKey) -> Option<Session> {
        self.inner.sessions.get(&key).map(|e| e.value().clone())
    }

    /// All sessions, ordered by key.
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.session_list()
    }

    /// Number of sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Repairs every session concurrently.
    pub async fn repair_sessions(&self) -> FanOutReport {
        let report = repair_all(self.sessions()).await;
        self.inner.stats.record_fan_out();
        self.inner.prune_closed();
        report
    }
}

impl ClientInner {
    fn emit(&self, event: ClientEvent) {
        trace!(event = event.name(), "Client event");
        let _ = self.events.send(event);
    }

    fn session_list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(Session::key);
        sessions
    }

    /// Drops sessions that were closed for good.
    fn prune_closed(&self) {
        let closed: Vec<SessionKey> = self
            .sessions
            .iter()
            .filter(|e| e.value().has_been_closed())
            .map(|e| *e.key())
            .collect();
        for key in closed {
            if self.sessions.remove(&key).is_some() {
                self.stats.record_session_closed();
                self.emit(ClientEvent::SessionRemoved { key });
            }
        }
    }

    async fn connect_channel(&self, token: &CancellationToken) -> UaResult<()> {
        let strategy = &self.config.connection;
        let endpoint = &self.config.endpoint;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.channel.connect(endpoint).await {
                Ok(()) => {
                    self.stats.record_connection();
                    info!(%endpoint, attempts, "Channel connected");
                    return Ok(());
                }
                Err(error) => {
                    if !strategy.retry_connection || !strategy.allows_attempt(attempts) {
                        warn!(%endpoint, attempts, %error, "Giving up connecting");
                        return Err(error);
                    }
                    let delay = strategy.delay_for_attempt(attempts);
                    debug!(%endpoint, attempt = attempts, ?delay, %error, "Connect failed, retrying");
                    self.stats.record_connect_retry();
                    self.emit(ClientEvent::Backoff {
                        attempt: attempts,
                        delay,
                    });

                    tokio::select! {
                        _ = token.cancelled() => return Err(ChannelError::Aborted.into()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn on_connection_lost(self: &Arc<Self>, reason: String, token: &CancellationToken) {
        if self.channel.is_valid() {
            debug!(%reason, "Close reported but channel is valid, ignoring");
            return;
        }

        warn!(%reason, "Connection lost");
        self.stats.record_connection_loss();
        self.emit(ClientEvent::ConnectionLost {
            reason: reason.clone(),
        });

        let sessions: Vec<Session> = self
            .session_list()
            .into_iter()
            .filter(|session| !session.has_been_closed())
            .collect();

        if !self.config.connection.retry_connection {
            let error = RepairError::Exhausted {
                attempts: 0,
                last_error: reason,
            };
            for session in &sessions {
                session.abandon_repair(&error).await;
            }
            self.prune_closed();
            return;
        }

        for session in &sessions {
            session.mark_reconnecting();
        }

        match self.connect_channel(token).await {
            Ok(()) => {
                info!(sessions = sessions.len(), "Connection re-established");
                self.emit(ClientEvent::ConnectionReestablished);

                // Runs beside the supervisor so a break during repair is
                // still seen. Sessions already repairing join their run.
                let weak = Arc::downgrade(self);
                tokio::spawn(async move {
                    let report = repair_all(sessions).await;
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    inner.stats.record_fan_out();
                    if !report.is_success() {
                        warn!(failed = report.failed().len(), "Some sessions could not be repaired");
                    }
                    inner.emit(ClientEvent::RepairCompleted { report });
                    inner.prune_closed();
                });
            }
            Err(_) if token.is_cancelled() => {}
            Err(connect_error) => {
                error!(error = %connect_error, "Could not re-establish the connection");
                let error = RepairError::Exhausted {
                    attempts: self.config.connection.max_retries.unwrap_or(0),
                    last_error: connect_error.to_string(),
                };
                for session in &sessions {
                    session.abandon_repair(&error).await;
                }
                self.emit(ClientEvent::InternalError {
                    message: connect_error.to_string(),
                });
                self.prune_closed();
            }
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some((token, _)) = self.supervisor.get_mut().take() {
            token.cancel();
        }
    }
}

async fn supervise(
    weak: Weak<ClientInner>,
    mut events: broadcast::Receiver<ChannelEvent>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };

        match event {
            Ok(ChannelEvent::Closed { error: Some(reason) }) => {
                inner.on_connection_lost(reason, &token).await;
            }
            Ok(ChannelEvent::Backoff { attempt, delay }) => {
                inner.emit(ClientEvent::Backoff { attempt, delay });
            }
            Ok(event) => trace!(?event, "Channel event"),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Channel events lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Channel supervisor exited");
}
