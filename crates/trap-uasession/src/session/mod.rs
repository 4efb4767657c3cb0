// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session lifecycle and transaction routing.
//!
//! A [`Session`] is a cheap, cloneable handle onto shared session state. The
//! server identity (session id and authentication token) lives behind the
//! handle, so when the reconnection controller recreates the session on the
//! server every clone of the handle becomes usable again without callers
//! swapping references.
//!
//! # Transaction routing
//!
//! ```text
//! application ──► perform_transaction ──┬─ Reconnecting ─► FIFO queue ─► replayed after repair
//!                                       └─ otherwise ────► dispatch ──► Channel
//! publish / keep-alive / repair ─────────────────────────► dispatch ──► Channel
//! ```
//!
//! `dispatch` stamps the authentication token, enforces the request timeout
//! and fails fast when the channel is not valid. A `BadSessionClosed` style
//! result on an active session latches the terminal `session_closed` event.

mod services;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::Channel;
use crate::config::ClientConfig;
use crate::error::{
    ChannelError, ContractError, RepairError, SessionError, TimeoutError, UaError, UaResult,
};
use crate::events::{SessionEvent, SessionKey, EVENT_CHANNEL_CAPACITY};
use crate::keepalive::KeepAliveMonitor;
use crate::messages::{
    ActivateSessionRequest, ActivateSessionResponse, CloseSessionRequest, CreateSessionRequest,
    CreateSessionResponse, RequestMessage, ResponseMessage,
};
use crate::publish::PublishEngine;
use crate::reconnect::RepairCoordinator;
use crate::stats::{RepairStatsSnapshot, SessionStatsSnapshot, SessionStats};
use crate::types::{NodeId, StatusCode, UserIdentity};

/// Reserved client handle. Never assigned, rejected when supplied.
pub const INVALID_CLIENT_HANDLE: u32 = u32::MAX;

// =============================================================================
// SessionState
// =============================================================================

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// CreateSession/ActivateSession in progress.
    #[default]
    Creating,

    /// Usable.
    Active,

    /// A repair is pending or running; application requests are queued.
    Reconnecting,

    /// Close in progress.
    Closing,

    /// Closed for good.
    Closed,
}

impl SessionState {
    /// Returns `true` if the session is usable.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns `true` if the session is closing or closed.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "Creating"),
            Self::Active => write!(f, "Active"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// SessionInfo
// =============================================================================

/// Server-assigned identity of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Session id.
    pub session_id: NodeId,
    /// Token stamped into every request header.
    pub authentication_token: NodeId,
    /// Session timeout revised by the server.
    pub revised_timeout: Duration,
    /// Last nonce returned by the server.
    pub server_nonce: Vec<u8>,
}

impl SessionInfo {
    fn from_response(response: CreateSessionResponse) -> Self {
        Self {
            session_id: response.session_id,
            authentication_token: response.authentication_token,
            revised_timeout: response.revised_session_timeout,
            server_nonce: response.server_nonce,
        }
    }
}

/// Which path a transaction takes through the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// Application traffic: queued while reconnecting.
    Queued,
    /// Runtime traffic (publish, keep-alive, repair): sent immediately.
    Direct,
}

struct PendingTransaction {
    request: RequestMessage,
    reply: oneshot::Sender<UaResult<ResponseMessage>>,
}

// =============================================================================
// Session
// =============================================================================

/// Handle to a session.
///
/// Clones share the same state. See the module documentation.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    key: SessionKey,
    config: Arc<ClientConfig>,
    channel: Weak<dyn Channel>,
    identity: UserIdentity,
    session_name: String,
    info: RwLock<Option<SessionInfo>>,
    state: watch::Sender<SessionState>,
    /// Set by `close`.
    closed: AtomicBool,
    /// Latch guarding the single `session_closed` event.
    terminal: AtomicBool,
    shutdown: CancellationToken,
    clock: Instant,
    last_request_ms: AtomicU64,
    last_response_ms: AtomicU64,
    pending: Mutex<VecDeque<PendingTransaction>>,
    request_handles: AtomicU32,
    client_handles: AtomicU32,
    events: broadcast::Sender<SessionEvent>,
    publish: Arc<PublishEngine>,
    keepalive: KeepAliveMonitor,
    repair: RepairCoordinator,
    stats: SessionStats,
}

impl Session {
    fn new(
        key: SessionKey,
        config: Arc<ClientConfig>,
        channel: &Arc<dyn Channel>,
        identity: UserIdentity,
    ) -> Self {
        let session_name = config.session_name_for(key);
        let (state, _) = watch::channel(SessionState::Creating);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| SessionInner {
            key,
            publish: Arc::new(PublishEngine::new(
                weak.clone(),
                config.publish.max_publish_requests,
            )),
            keepalive: KeepAliveMonitor::new(weak.clone(), config.session_timeout),
            repair: RepairCoordinator::new(),
            config,
            channel: Arc::downgrade(channel),
            identity,
            session_name,
            info: RwLock::new(None),
            state,
            closed: AtomicBool::new(false),
            terminal: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            clock: Instant::now(),
            last_request_ms: AtomicU64::new(0),
            last_response_ms: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            request_handles: AtomicU32::new(1),
            client_handles: AtomicU32::new(1),
            events,
            stats: SessionStats::default(),
        });
        Self { inner }
    }

    /// Creates and activates a session on the server.
    pub(crate) async fn open(
        key: SessionKey,
        config: Arc<ClientConfig>,
        channel: &Arc<dyn Channel>,
        identity: UserIdentity,
    ) -> UaResult<Self> {
        debug!(
            session_key = key,
            identity = identity.type_name(),
            "Opening session"
        );

        let session = Self::new(key, config, channel, identity);
        let info = session.establish().await?;
        info!(
            session_key = key,
            session_id = %info.session_id,
            revised_timeout_ms = info.revised_timeout.as_millis() as u64,
            "Session activated"
        );
        session.install(info);
        session.inner.state.send_replace(SessionState::Active);

        if session.inner.config.keepalive_enabled {
            session.inner.keepalive.start();
        }
        Ok(session)
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn upgrade(weak: &Weak<SessionInner>) -> Option<Self> {
        weak.upgrade().map(Self::from_inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Key of this session inside its client.
    pub fn key(&self) -> SessionKey {
        self.inner.key
    }

    /// Session name sent on creation.
    pub fn name(&self) -> &str {
        &self.inner.session_name
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watches state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Current server identity.
    pub fn info(&self) -> Option<SessionInfo> {
        self.inner.info.read().clone()
    }

    /// Current session id.
    pub fn session_id(&self) -> Option<NodeId> {
        self.inner.info.read().as_ref().map(|i| i.session_id.clone())
    }

    /// Current authentication token.
    pub fn authentication_token(&self) -> Option<NodeId> {
        self.inner
            .info
            .read()
            .as_ref()
            .map(|i| i.authentication_token.clone())
    }

    /// Timeout revised by the server, or the requested one before creation.
    pub fn revised_timeout(&self) -> Duration {
        self.inner
            .info
            .read()
            .as_ref()
            .map(|i| i.revised_timeout)
            .unwrap_or(self.inner.config.session_timeout)
    }

    /// Identity presented on activation.
    pub fn identity(&self) -> &UserIdentity {
        &self.inner.identity
    }

    /// Runtime configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns `true` once the session was closed by the application or
    /// reported closed for good.
    pub fn has_been_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.terminal.load(Ordering::Acquire)
    }

    /// Returns `true` while a repair is pending or running.
    pub fn is_reconnecting(&self) -> bool {
        self.state() == SessionState::Reconnecting
    }

    /// Subscribes to session events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The publish engine of this session.
    pub fn publish_engine(&self) -> &PublishEngine {
        &self.inner.publish
    }

    pub(crate) fn publish_engine_arc(&self) -> &Arc<PublishEngine> {
        &self.inner.publish
    }

    /// The keep-alive monitor of this session.
    pub fn keepalive(&self) -> &KeepAliveMonitor {
        &self.inner.keepalive
    }

    pub(crate) fn repair_coordinator(&self) -> &RepairCoordinator {
        &self.inner.repair
    }

    /// Transaction counters.
    pub fn stats(&self) -> SessionStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Repair counters.
    pub fn repair_stats(&self) -> RepairStatsSnapshot {
        self.inner.repair.stats()
    }

    /// Number of transactions waiting for a repair.
    pub async fn queued_transactions(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Time since the last response, if any arrived.
    pub fn last_response_age(&self) -> Option<Duration> {
        self.age_of(&self.inner.last_response_ms)
    }

    /// Time since the last request, if any was sent.
    pub fn last_request_age(&self) -> Option<Duration> {
        self.age_of(&self.inner.last_request_ms)
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        trace!(session_key = self.inner.key, event = event.name(), "Session event");
        let _ = self.inner.events.send(event);
    }

    fn now_ms(&self) -> u64 {
        // Offset by one so that zero means "never".
        self.inner.clock.elapsed().as_millis() as u64 + 1
    }

    fn age_of(&self, stamp: &AtomicU64) -> Option<Duration> {
        match stamp.load(Ordering::Acquire) {
            0 => None,
            at => Some(Duration::from_millis(self.now_ms().saturating_sub(at))),
        }
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Allocates a client handle, never 0 and never [`INVALID_CLIENT_HANDLE`].
    pub fn next_client_handle(&self) -> u32 {
        loop {
            let handle = self.inner.client_handles.fetch_add(1, Ordering::Relaxed);
            if handle != 0 && handle != INVALID_CLIENT_HANDLE {
                return handle;
            }
        }
    }

    /// Rejects the reserved client handle.
    pub fn validate_client_handle(handle: u32) -> UaResult<()> {
        if handle == INVALID_CLIENT_HANDLE {
            return Err(ContractError::InvalidClientHandle { handle }.into());
        }
        Ok(())
    }

    fn next_request_handle(&self) -> u32 {
        loop {
            let handle = self.inner.request_handles.fetch_add(1, Ordering::Relaxed);
            if handle != 0 {
                return handle;
            }
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Sends a request on behalf of the application.
    ///
    /// While the session is reconnecting the request is queued and replayed,
    /// in submission order, once the repair succeeds. If the repair fails
    /// for good the request fails with the repair error.
    pub async fn perform_transaction(&self, request: RequestMessage) -> UaResult<ResponseMessage> {
        if self.has_been_closed() {
            return Err(SessionError::Closed.into());
        }

        let mut pending = self.inner.pending.lock().await;
        if self.state() == SessionState::Reconnecting {
            if self.has_been_closed() {
                return Err(SessionError::Closed.into());
            }
            let (reply, receiver) = oneshot::channel();
            trace!(
                session_key = self.inner.key,
                service = request.service(),
                position = pending.len(),
                "Queueing transaction until repair completes"
            );
            pending.push_back(PendingTransaction { request, reply });
            self.inner.stats.record_queued();
            drop(pending);

            return receiver
                .await
                .unwrap_or_else(|_| Err(RepairError::Cancelled.into()));
        }
        drop(pending);

        self.dispatch(request).await
    }

    pub(crate) async fn transact(
        &self,
        request: RequestMessage,
        route: Route,
    ) -> UaResult<ResponseMessage> {
        match route {
            Route::Queued => self.perform_transaction(request).await,
            Route::Direct => self.dispatch(request).await,
        }
    }

    /// Sends a request immediately with the current token.
    pub(crate) async fn dispatch(&self, request: RequestMessage) -> UaResult<ResponseMessage> {
        self.dispatch_with_timeout(request, self.inner.config.request_timeout)
            .await
    }

    pub(crate) async fn dispatch_with_timeout(
        &self,
        request: RequestMessage,
        timeout: Duration,
    ) -> UaResult<ResponseMessage> {
        let token = self.authentication_token();
        self.dispatch_with_token(request, token, timeout).await
    }

    async fn dispatch_with_token(
        &self,
        mut request: RequestMessage,
        token: Option<NodeId>,
        timeout: Duration,
    ) -> UaResult<ResponseMessage> {
        if self.state() == SessionState::Closed {
            return Err(SessionError::Closed.into());
        }

        let channel = self
            .inner
            .channel
            .upgrade()
            .ok_or(ChannelError::Unavailable)?;
        if !channel.is_valid() {
            self.inner.stats.record_transport_error();
            return Err(UaError::channel_not_valid(channel.endpoint()));
        }

        let service = request.service();
        request.header.authentication_token = token;
        request.header.request_handle = self.next_request_handle();
        request.header.timestamp = Utc::now();
        request.header.timeout_hint = timeout;

        self.inner
            .last_request_ms
            .store(self.now_ms(), Ordering::Release);
        self.inner.stats.record_request();
        let started = Instant::now();

        let response =
            match tokio::time::timeout(timeout, channel.perform_transaction(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(error)) => {
                    self.inner.stats.record_transport_error();
                    return Err(error);
                }
                Err(_) => {
                    self.inner.stats.record_timeout();
                    return Err(TimeoutError::Request {
                        service,
                        duration: timeout,
                    }
                    .into());
                }
            };

        self.inner
            .last_response_ms
            .store(self.now_ms(), Ordering::Release);
        self.inner
            .stats
            .record_response(started.elapsed().as_micros() as u64);

        let status = response.header.service_result;
        if status.is_bad() {
            self.inner.stats.record_service_fault();
            if self.inner.config.repair.policy.closes_session(status) {
                self.on_closed_by_server(status).await;
            }
            return Err(UaError::service(service, status));
        }
        Ok(response)
    }

    // =========================================================================
    // Server identity
    // =========================================================================

    /// Runs CreateSession and ActivateSession without touching the current
    /// identity. A session that fails activation is closed on the server.
    pub(crate) async fn establish(&self) -> UaResult<SessionInfo> {
        let config = &self.inner.config;
        let timeout = config.request_timeout;
        let endpoint_url = self
            .inner
            .channel
            .upgrade()
            .map(|c| c.endpoint().to_string())
            .ok_or(ChannelError::Unavailable)?;

        let create = CreateSessionRequest {
            application_name: config.application_name.clone(),
            session_name: self.inner.session_name.clone(),
            endpoint_url,
            requested_session_timeout: config.session_timeout,
            client_nonce: Vec::new(),
        };
        let response = self
            .dispatch_with_token(RequestMessage::new(create), None, timeout)
            .await
            .map_err(|error| establishment_error(error, |message, status| {
                SessionError::creation_failed(message, status)
            }))?;
        let mut info = SessionInfo::from_response(CreateSessionResponse::try_from(response.body)?);
        debug!(
            session_key = self.inner.key,
            session_id = %info.session_id,
            "Session created, activating"
        );

        let token = info.authentication_token.clone();
        let activate = ActivateSessionRequest {
            user_identity: self.inner.identity.clone(),
            locale_ids: Vec::new(),
        };
        let activated = match self
            .dispatch_with_token(RequestMessage::new(activate), Some(token.clone()), timeout)
            .await
        {
            Ok(response) => ActivateSessionResponse::try_from(response.body),
            Err(error) => Err(establishment_error(error, |message, status| {
                SessionError::activation_failed(message, status)
            })),
        };

        match activated {
            Ok(body) => {
                info.server_nonce = body.server_nonce;
                Ok(info)
            }
            Err(error) => {
                warn!(
                    session_key = self.inner.key,
                    session_id = %info.session_id,
                    %error,
                    "Activation failed, closing half-created session"
                );
                let close = CloseSessionRequest {
                    delete_subscriptions: true,
                };
                if let Err(close_error) = self
                    .dispatch_with_token(RequestMessage::new(close), Some(token), timeout)
                    .await
                {
                    warn!(
                        session_key = self.inner.key,
                        error = %close_error,
                        "Failed to close half-created session"
                    );
                }
                Err(error)
            }
        }
    }

    /// Re-activates the current server session with the same identity.
    pub(crate) async fn reactivate(&self) -> UaResult<()> {
        let token = self.authentication_token().ok_or(SessionError::NotActivated)?;
        let activate = ActivateSessionRequest {
            user_identity: self.inner.identity.clone(),
            locale_ids: Vec::new(),
        };
        let response = self
            .dispatch_with_token(
                RequestMessage::new(activate),
                Some(token),
                self.inner.config.request_timeout,
            )
            .await
            .map_err(|error| establishment_error(error, |message, status| {
                SessionError::activation_failed(message, status)
            }))?;
        let body = ActivateSessionResponse::try_from(response.body)?;
        if let Some(info) = self.inner.info.write().as_mut() {
            info.server_nonce = body.server_nonce;
        }
        Ok(())
    }

    /// Installs a new server identity behind this handle.
    pub(crate) fn install(&self, info: SessionInfo) {
        self.inner.keepalive.set_session_timeout(info.revised_timeout);
        *self.inner.info.write() = Some(info);
    }

    /// Closes a server session that was never installed. Errors are logged.
    pub(crate) async fn discard(&self, info: &SessionInfo) {
        let close = CloseSessionRequest {
            delete_subscriptions: true,
        };
        if let Err(error) = self
            .dispatch_with_token(
                RequestMessage::new(close),
                Some(info.authentication_token.clone()),
                self.inner.config.request_timeout,
            )
            .await
        {
            warn!(
                session_key = self.inner.key,
                session_id = %info.session_id,
                %error,
                "Failed to discard replacement session"
            );
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Closes the session.
    ///
    /// Stops keep-alive and publishing, cancels any running repair, sends
    /// CloseSession when the channel allows it and raises `session_closed`.
    /// A second call is a no-op.
    pub async fn close(&self, delete_subscriptions: bool) -> UaResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(session_key = self.inner.key, "Session already closed");
            return Ok(());
        }

        info!(
            session_key = self.inner.key,
            delete_subscriptions, "Closing session"
        );
        self.inner.shutdown.cancel();
        self.inner.keepalive.stop();
        self.inner.publish.suspend(true);

        if !self.inner.terminal.load(Ordering::Acquire) {
            self.inner.state.send_replace(SessionState::Closing);
            if self.inner.info.read().is_some() {
                let request = RequestMessage::new(CloseSessionRequest {
                    delete_subscriptions,
                });
                if let Err(error) = self.dispatch(request).await {
                    warn!(
                        session_key = self.inner.key,
                        %error,
                        "CloseSession failed, closing locally"
                    );
                }
            }
        }

        self.terminate(StatusCode::GOOD, RepairError::Cancelled.into())
            .await;
        Ok(())
    }

    /// Moves an active session to `Reconnecting`.
    ///
    /// Keep-alive stops and publishing is suspended; application requests
    /// are queued from now on.
    pub(crate) fn mark_reconnecting(&self) -> bool {
        if self.has_been_closed() {
            return false;
        }
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Active {
                *state = SessionState::Reconnecting;
                true
            } else {
                false
            }
        });
        if changed {
            info!(session_key = self.inner.key, "Session reconnecting");
            self.inner.keepalive.stop();
            self.inner.publish.suspend(true);
            self.emit(SessionEvent::Reconnecting);
        }
        changed
    }

    /// Replays queued transactions in order and reopens the session to
    /// application traffic.
    pub(crate) async fn resume_after_repair(&self) -> usize {
        let mut pending = self.inner.pending.lock().await;
        let mut replayed = 0;
        while let Some(transaction) = pending.pop_front() {
            if self.has_been_closed() {
                let _ = transaction.reply.send(Err(RepairError::Cancelled.into()));
                continue;
            }
            let result = self.dispatch(transaction.request).await;
            self.inner.stats.record_replayed();
            replayed += 1;
            let _ = transaction.reply.send(result);
        }

        self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Reconnecting {
                *state = SessionState::Active;
                true
            } else {
                false
            }
        });
        drop(pending);

        if replayed > 0 {
            debug!(
                session_key = self.inner.key,
                replayed, "Replayed queued transactions"
            );
        }
        if self.inner.config.keepalive_enabled && self.state().is_active() {
            self.inner.keepalive.start();
        }
        replayed
    }

    /// Releases queued transactions after a failed repair.
    pub(crate) async fn abandon_repair(&self, error: &RepairError) {
        match error {
            RepairError::Cancelled => self.fail_pending(error.clone().into()).await,
            RepairError::Exhausted { .. } => {
                self.terminate(StatusCode::BAD_CONNECTION_CLOSED, error.clone().into())
                    .await;
            }
        }
    }

    async fn on_closed_by_server(&self, status: StatusCode) {
        if self.state() != SessionState::Active {
            return;
        }
        self.terminate(status, SessionError::ClosedByServer { status }.into())
            .await;
    }

    /// Tears the session down and raises `session_closed` once.
    async fn terminate(&self, status: StatusCode, error: UaError) -> bool {
        if self.inner.terminal.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.inner.state.send_replace(SessionState::Closed);
        self.inner.shutdown.cancel();
        self.inner.keepalive.stop();
        self.inner.publish.terminate();
        self.fail_pending(error).await;

        if status.is_good() {
            info!(session_key = self.inner.key, "Session closed");
        } else {
            warn!(session_key = self.inner.key, %status, "Session closed");
        }
        self.emit(SessionEvent::SessionClosed { status });
        true
    }

    async fn fail_pending(&self, error: UaError) {
        let drained: Vec<_> = self.inner.pending.lock().await.drain(..).collect();
        if !drained.is_empty() {
            debug!(
                session_key = self.inner.key,
                count = drained.len(),
                %error,
                "Releasing queued transactions"
            );
        }
        for transaction in drained {
            let _ = transaction.reply.send(Err(error.clone()));
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.inner.key)
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Wraps a service fault of CreateSession or ActivateSession into the
/// matching session error. Transport errors and timeouts pass through.
fn establishment_error(
    error: UaError,
    wrap: fn(String, Option<StatusCode>) -> SessionError,
) -> UaError {
    match error {
        UaError::Service(fault) => wrap(fault.to_string(), Some(fault.status)).into(),
        other => other,
    }
}
