// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Channel
//!
//! [`MockChannel`] implements [`Channel`] on top of a small in-memory OPC UA
//! server. It keeps sessions keyed by authentication token, subscriptions
//! with retransmission queues and monitored items, and parks Publish
//! requests until the test produces a notification.
//!
//! ## Controls
//!
//! - `break_connection` drops the transport and raises an unexpected close
//! - `expire_sessions` / `expire_everything` / `drop_subscription`
//!   simulate server-side loss
//! - `inject_fault` / `set_persistent_fault` answer a service with a status
//! - `hold` / `release` park every request of a service at the door
//! - `set_latency` delays a service
//! - `reject_node`, `misalign_next_create`, `refuse_connects`
//!
//! Every request is recorded, so tests can verify order, tokens and
//! acknowledgements.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};

use trap_uasession::channel::{Channel, ChannelEvent, ChannelState, ChannelStats, ChannelStatsSnapshot};
use trap_uasession::error::{ChannelError, UaResult};
use trap_uasession::messages::*;
use trap_uasession::types::{
    DataValue, FilterResult, NodeId, ReadValueId, StatusCode, Variant,
};

// =============================================================================
// Server model
// =============================================================================

#[derive(Debug)]
struct ServerSession {
    session_id: NodeId,
    activated: bool,
}

#[derive(Debug)]
struct ServerItem {
    client_handle: u32,
    item_to_monitor: ReadValueId,
}

#[derive(Debug)]
struct ServerSubscription {
    owner: Option<NodeId>,
    next_sequence_number: u32,
    retransmission: BTreeMap<u32, NotificationMessage>,
    items: BTreeMap<u32, ServerItem>,
    publishing_enabled: bool,
}

impl ServerSubscription {
    fn new(owner: NodeId, publishing_enabled: bool) -> Self {
        Self {
            owner: Some(owner),
            next_sequence_number: 1,
            retransmission: BTreeMap::new(),
            items: BTreeMap::new(),
            publishing_enabled,
        }
    }

    fn allocate(&mut self) -> u32 {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number = match sequence_number.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        sequence_number
    }
}

struct ParkedPublish {
    owner: NodeId,
    request_handle: u32,
    reply: oneshot::Sender<ResponseMessage>,
}

enum Handled {
    Respond(ResponseMessage),
    Park(oneshot::Receiver<ResponseMessage>),
}

struct ServerState {
    next_session: u32,
    sessions: HashMap<NodeId, ServerSession>,
    next_subscription_id: u32,
    subscriptions: BTreeMap<u32, ServerSubscription>,
    next_item_id: u32,
    ready: VecDeque<(u32, NotificationMessage)>,
    parked: Vec<ParkedPublish>,
    values: HashMap<NodeId, Variant>,
    rejected_nodes: HashSet<NodeId>,
    server_state: i32,
    faults: VecDeque<(&'static str, StatusCode)>,
    persistent_faults: HashMap<&'static str, StatusCode>,
    latency: HashMap<&'static str, Duration>,
    misalign_next_create: bool,
    log: Vec<RequestMessage>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            next_session: 0,
            sessions: HashMap::new(),
            next_subscription_id: 100,
            subscriptions: BTreeMap::new(),
            next_item_id: 1000,
            ready: VecDeque::new(),
            parked: Vec::new(),
            values: HashMap::new(),
            rejected_nodes: HashSet::new(),
            server_state: 0,
            faults: VecDeque::new(),
            persistent_faults: HashMap::new(),
            latency: HashMap::new(),
            misalign_next_create: false,
            log: Vec::new(),
        }
    }
}

fn fault(handle: u32, status: StatusCode) -> Handled {
    Handled::Respond(ResponseMessage::fault(handle, status))
}

fn respond(handle: u32, body: impl Into<Response>) -> Handled {
    Handled::Respond(ResponseMessage::new(handle, body))
}

impl ServerState {
    fn handle(&mut self, request: RequestMessage) -> Handled {
        let handle = request.header.request_handle;
        let service = request.body.name();

        if let Some(position) = self.faults.iter().position(|(s, _)| *s == service) {
            if let Some((_, status)) = self.faults.remove(position) {
                return fault(handle, status);
            }
        }
        if let Some(status) = self.persistent_faults.get(service) {
            return fault(handle, *status);
        }

        let token = request.header.authentication_token;
        match request.body {
            Request::CreateSession(body) => self.create_session(handle, body),
            Request::ActivateSession(_) => self.activate_session(handle, token),
            // Allowed before activation.
            Request::CloseSession(body) => match token.filter(|t| self.sessions.contains_key(t)) {
                Some(token) => self.close_session(handle, &token, body),
                None => fault(handle, StatusCode::BAD_SESSION_ID_INVALID),
            },
            body => match self.check_session(token) {
                Ok(token) => self.dispatch(handle, token, body),
                Err(status) => fault(handle, status),
            },
        }
    }

    fn check_session(&self, token: Option<NodeId>) -> Result<NodeId, StatusCode> {
        let token = token.ok_or(StatusCode::BAD_SESSION_ID_INVALID)?;
        match self.sessions.get(&token) {
            None => Err(StatusCode::BAD_SESSION_ID_INVALID),
            Some(session) if !session.activated => Err(StatusCode::BAD_SESSION_NOT_ACTIVATED),
            Some(_) => Ok(token),
        }
    }

    fn dispatch(&mut self, handle: u32, token: NodeId, body: Request) -> Handled {
        match body {
            Request::Read(body) => self.read(handle, body),
            Request::Write(body) => self.write(handle, body),
            Request::Browse(body) => respond(
                handle,
                BrowseResponse {
                    results: body
                        .nodes_to_browse
                        .iter()
                        .map(|_| BrowseResult {
                            status: StatusCode::GOOD,
                            references: Vec::new(),
                        })
                        .collect(),
                },
            ),
            Request::Call(body) => respond(
                handle,
                CallResponse {
                    results: body
                        .methods_to_call
                        .into_iter()
                        .map(|method| CallMethodResult {
                            status: StatusCode::GOOD,
                            output_arguments: method.input_arguments,
                        })
                        .collect(),
                },
            ),
            Request::CreateSubscription(body) => self.create_subscription(handle, token, body),
            Request::ModifySubscription(body) => {
                if !self.subscriptions.contains_key(&body.subscription_id) {
                    return fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                }
                respond(
                    handle,
                    ModifySubscriptionResponse {
                        revised_publishing_interval: body.requested_publishing_interval,
                        revised_lifetime_count: body.requested_lifetime_count,
                        revised_max_keep_alive_count: body.requested_max_keep_alive_count,
                    },
                )
            }
            Request::SetPublishingMode(body) => {
                let results = body
                    .subscription_ids
                    .iter()
                    .map(|id| match self.subscriptions.get_mut(id) {
                        Some(subscription) => {
                            subscription.publishing_enabled = body.publishing_enabled;
                            StatusCode::GOOD
                        }
                        None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                    })
                    .collect();
                respond(handle, SetPublishingModeResponse { results })
            }
            Request::DeleteSubscriptions(body) => {
                let results = body
                    .subscription_ids
                    .iter()
                    .map(|id| match self.subscriptions.remove(id) {
                        Some(_) => StatusCode::GOOD,
                        None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                    })
                    .collect();
                self.ready
                    .retain(|(id, _)| !body.subscription_ids.contains(id));
                if !self.owns_subscriptions(&token) {
                    self.answer_parked(&token, StatusCode::BAD_NO_SUBSCRIPTION);
                }
                respond(handle, DeleteSubscriptionsResponse { results })
            }
            Request::TransferSubscriptions(body) => {
                let results = body
                    .subscription_ids
                    .iter()
                    .map(|id| match self.subscriptions.get_mut(id) {
                        Some(subscription) => {
                            subscription.owner = Some(token.clone());
                            TransferResult {
                                status: StatusCode::GOOD,
                                available_sequence_numbers: subscription
                                    .retransmission
                                    .keys()
                                    .copied()
                                    .collect(),
                            }
                        }
                        None => TransferResult {
                            status: StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                            available_sequence_numbers: Vec::new(),
                        },
                    })
                    .collect();
                respond(handle, TransferSubscriptionsResponse { results })
            }
            Request::CreateMonitoredItems(body) => self.create_monitored_items(handle, body),
            Request::ModifyMonitoredItems(body) => {
                let Some(subscription) = self.subscriptions.get(&body.subscription_id) else {
                    return fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                };
                let results = body
                    .items_to_modify
                    .iter()
                    .map(|item| {
                        if subscription.items.contains_key(&item.monitored_item_id) {
                            MonitoredItemModifyResult {
                                status: StatusCode::GOOD,
                                revised_sampling_interval: item
                                    .requested_parameters
                                    .sampling_interval,
                                revised_queue_size: item.requested_parameters.queue_size,
                                filter_result: FilterResult::None,
                            }
                        } else {
                            MonitoredItemModifyResult {
                                status: StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                                revised_sampling_interval: Duration::ZERO,
                                revised_queue_size: 0,
                                filter_result: FilterResult::None,
                            }
                        }
                    })
                    .collect();
                respond(handle, ModifyMonitoredItemsResponse { results })
            }
            Request::SetMonitoringMode(body) => {
                let Some(subscription) = self.subscriptions.get(&body.subscription_id) else {
                    return fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                };
                let results = item_results(&body.monitored_item_ids, |id| {
                    subscription.items.contains_key(id)
                });
                respond(handle, SetMonitoringModeResponse { results })
            }
            Request::SetTriggering(body) => {
                let Some(subscription) = self.subscriptions.get(&body.subscription_id) else {
                    return fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                };
                if !subscription.items.contains_key(&body.triggering_item_id) {
                    return fault(handle, StatusCode::BAD_MONITORED_ITEM_ID_INVALID);
                }
                let known = |id: &u32| subscription.items.contains_key(id);
                respond(
                    handle,
                    SetTriggeringResponse {
                        add_results: item_results(&body.links_to_add, known),
                        remove_results: item_results(&body.links_to_remove, known),
                    },
                )
            }
            Request::DeleteMonitoredItems(body) => {
                let Some(subscription) = self.subscriptions.get_mut(&body.subscription_id) else {
                    return fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                };
                let results = body
                    .monitored_item_ids
                    .iter()
                    .map(|id| match subscription.items.remove(id) {
                        Some(_) => StatusCode::GOOD,
                        None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                    })
                    .collect();
                respond(handle, DeleteMonitoredItemsResponse { results })
            }
            Request::Publish(body) => self.publish(handle, token, body),
            Request::Republish(body) => {
                let Some(subscription) = self.subscriptions.get(&body.subscription_id) else {
                    return fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
                };
                match subscription
                    .retransmission
                    .get(&body.retransmit_sequence_number)
                {
                    Some(message) => respond(
                        handle,
                        RepublishResponse {
                            notification_message: message.clone(),
                        },
                    ),
                    None => fault(handle, StatusCode::BAD_MESSAGE_NOT_AVAILABLE),
                }
            }
            Request::CreateSession(_) | Request::ActivateSession(_) | Request::CloseSession(_) => {
                fault(handle, StatusCode::BAD_INTERNAL_ERROR)
            }
        }
    }

    fn create_session(&mut self, handle: u32, body: CreateSessionRequest) -> Handled {
        self.next_session += 1;
        let n = self.next_session;
        let token = NodeId::numeric(1, 10_000 + n);
        let session_id = NodeId::numeric(1, n);
        self.sessions.insert(
            token.clone(),
            ServerSession {
                session_id: session_id.clone(),
                activated: false,
            },
        );
        respond(
            handle,
            CreateSessionResponse {
                session_id,
                authentication_token: token,
                revised_session_timeout: body.requested_session_timeout,
                server_nonce: vec![n as u8; 4],
            },
        )
    }

    fn activate_session(&mut self, handle: u32, token: Option<NodeId>) -> Handled {
        let Some(session) = token.and_then(|t| self.sessions.get_mut(&t)) else {
            return fault(handle, StatusCode::BAD_SESSION_ID_INVALID);
        };
        session.activated = true;
        respond(
            handle,
            ActivateSessionResponse {
                server_nonce: vec![0xA5; 4],
                results: Vec::new(),
            },
        )
    }

    fn close_session(&mut self, handle: u32, token: &NodeId, body: CloseSessionRequest) -> Handled {
        self.sessions.remove(token);
        self.answer_parked(token, StatusCode::BAD_SESSION_CLOSED);
        if body.delete_subscriptions {
            let owned: Vec<u32> = self
                .subscriptions
                .iter()
                .filter(|(_, s)| s.owner.as_ref() == Some(token))
                .map(|(id, _)| *id)
                .collect();
            for id in owned {
                self.subscriptions.remove(&id);
            }
        } else {
            for subscription in self.subscriptions.values_mut() {
                if subscription.owner.as_ref() == Some(token) {
                    subscription.owner = None;
                }
            }
        }
        respond(handle, CloseSessionResponse)
    }

    fn read(&mut self, handle: u32, body: ReadRequest) -> Handled {
        let server_state = NodeId::server_state();
        let results = body
            .nodes_to_read
            .iter()
            .map(|node| {
                if self.rejected_nodes.contains(&node.node_id) {
                    DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN)
                } else if node.node_id == server_state {
                    DataValue::new(Variant::Int32(self.server_state))
                } else {
                    match self.values.get(&node.node_id) {
                        Some(value) => DataValue::new(value.clone()),
                        None => DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN),
                    }
                }
            })
            .collect();
        respond(handle, ReadResponse { results })
    }

    fn write(&mut self, handle: u32, body: WriteRequest) -> Handled {
        let results = body
            .nodes_to_write
            .into_iter()
            .map(|write| {
                if self.rejected_nodes.contains(&write.node_id) {
                    StatusCode::BAD_NODE_ID_UNKNOWN
                } else {
                    self.values.insert(write.node_id, write.value.value);
                    StatusCode::GOOD
                }
            })
            .collect();
        respond(handle, WriteResponse { results })
    }

    fn create_subscription(
        &mut self,
        handle: u32,
        token: NodeId,
        body: CreateSubscriptionRequest,
    ) -> Handled {
        self.next_subscription_id += 1;
        let id = self.next_subscription_id;
        self.subscriptions
            .insert(id, ServerSubscription::new(token, body.publishing_enabled));
        respond(
            handle,
            CreateSubscriptionResponse {
                subscription_id: id,
                revised_publishing_interval: body.requested_publishing_interval,
                revised_lifetime_count: body
                    .requested_lifetime_count
                    .max(body.requested_max_keep_alive_count * 3),
                revised_max_keep_alive_count: body.requested_max_keep_alive_count,
            },
        )
    }

    fn create_monitored_items(&mut self, handle: u32, body: CreateMonitoredItemsRequest) -> Handled {
        let Some(subscription) = self.subscriptions.get_mut(&body.subscription_id) else {
            return fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
        };

        let mut results = Vec::with_capacity(body.items_to_create.len());
        for item in body.items_to_create {
            if self.rejected_nodes.contains(&item.item_to_monitor.node_id) {
                results.push(MonitoredItemCreateResult {
                    status: StatusCode::BAD_NODE_ID_UNKNOWN,
                    monitored_item_id: 0,
                    revised_sampling_interval: Duration::ZERO,
                    revised_queue_size: 0,
                    filter_result: FilterResult::None,
                });
                continue;
            }
            self.next_item_id += 1;
            subscription.items.insert(
                self.next_item_id,
                ServerItem {
                    client_handle: item.requested_parameters.client_handle,
                    item_to_monitor: item.item_to_monitor,
                },
            );
            results.push(MonitoredItemCreateResult {
                status: StatusCode::GOOD,
                monitored_item_id: self.next_item_id,
                revised_sampling_interval: item.requested_parameters.sampling_interval,
                revised_queue_size: item.requested_parameters.queue_size.max(1),
                filter_result: FilterResult::None,
            });
        }

        if std::mem::take(&mut self.misalign_next_create) {
            results.pop();
        }
        respond(handle, CreateMonitoredItemsResponse { results })
    }

    fn publish(&mut self, handle: u32, token: NodeId, body: PublishRequest) -> Handled {
        let results = body
            .subscription_acknowledgements
            .iter()
            .map(|ack| {
                match self
                    .subscriptions
                    .get_mut(&ack.subscription_id)
                    .and_then(|s| s.retransmission.remove(&ack.sequence_number))
                {
                    Some(_) => StatusCode::GOOD,
                    None => StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN,
                }
            })
            .collect::<Vec<_>>();

        if !self.owns_subscriptions(&token) {
            return fault(handle, StatusCode::BAD_NO_SUBSCRIPTION);
        }

        let owned = |id: &u32| {
            self.subscriptions
                .get(id)
                .is_some_and(|s| s.owner.as_ref() == Some(&token))
        };
        if let Some(position) = self.ready.iter().position(|(id, _)| owned(id)) {
            if let Some((subscription_id, message)) = self.ready.remove(position) {
                return Handled::Respond(self.publish_response(
                    handle,
                    subscription_id,
                    message,
                    results,
                ));
            }
        }

        let (reply, receiver) = oneshot::channel();
        self.parked.push(ParkedPublish {
            owner: token,
            request_handle: handle,
            reply,
        });
        Handled::Park(receiver)
    }

    fn publish_response(
        &self,
        handle: u32,
        subscription_id: u32,
        notification_message: NotificationMessage,
        results: Vec<StatusCode>,
    ) -> ResponseMessage {
        let available_sequence_numbers = self
            .subscriptions
            .get(&subscription_id)
            .map(|s| s.retransmission.keys().copied().collect())
            .unwrap_or_default();
        ResponseMessage::new(
            handle,
            PublishResponse {
                subscription_id,
                available_sequence_numbers,
                more_notifications: false,
                notification_message,
                results,
            },
        )
    }

    fn owns_subscriptions(&self, token: &NodeId) -> bool {
        self.subscriptions
            .values()
            .any(|s| s.owner.as_ref() == Some(token))
    }

    fn answer_parked(&mut self, token: &NodeId, status: StatusCode) {
        let (answered, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|p| &p.owner == token);
        self.parked = kept;
        for parked in answered {
            let _ = parked
                .reply
                .send(ResponseMessage::fault(parked.request_handle, status));
        }
    }

    /// Hands `message` to a parked Publish of the owner, or queues it.
    fn enqueue(&mut self, subscription_id: u32, message: NotificationMessage) {
        let owner = self
            .subscriptions
            .get(&subscription_id)
            .and_then(|s| s.owner.clone());
        if let Some(owner) = owner {
            while let Some(position) = self.parked.iter().position(|p| p.owner == owner) {
                let parked = self.parked.remove(position);
                let response = self.publish_response(
                    parked.request_handle,
                    subscription_id,
                    message.clone(),
                    Vec::new(),
                );
                if parked.reply.send(response).is_ok() {
                    return;
                }
            }
        }
        self.ready.push_back((subscription_id, message));
    }
}

fn item_results(ids: &[u32], known: impl Fn(&u32) -> bool) -> Vec<StatusCode> {
    ids.iter()
        .map(|id| {
            if known(id) {
                StatusCode::GOOD
            } else {
                StatusCode::BAD_MONITORED_ITEM_ID_INVALID
            }
        })
        .collect()
}

// =============================================================================
// MockChannel
// =============================================================================

/// In-memory channel and server.
pub struct MockChannel {
    endpoint: String,
    connected: AtomicBool,
    refuse_connects: AtomicU32,
    events: broadcast::Sender<ChannelEvent>,
    server: Mutex<ServerState>,
    gate: watch::Sender<HashSet<&'static str>>,
    stats: ChannelStats,
}

impl MockChannel {
    /// Creates a disconnected channel for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        let (gate, _) = watch::channel(HashSet::new());
        Self {
            endpoint: endpoint.into(),
            connected: AtomicBool::new(false),
            refuse_connects: AtomicU32::new(0),
            events,
            server: Mutex::new(ServerState::default()),
            gate,
            stats: ChannelStats::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Transport control
    // -------------------------------------------------------------------------

    /// Drops the transport: parked publishes fail and an unexpected close is
    /// reported. Server-side sessions survive.
    pub fn break_connection(&self) {
        self.connected.store(false, Ordering::Release);
        self.server.lock().parked.clear();
        let _ = self.events.send(ChannelEvent::Closed {
            error: Some("connection reset by peer".to_string()),
        });
    }

    /// Drops the transport and forgets every session in one step, like a
    /// server restart. Subscriptions survive when `keep_subscriptions` is
    /// set, so they can be transferred.
    pub fn restart(&self, keep_subscriptions: bool) {
        self.connected.store(false, Ordering::Release);
        {
            let mut server = self.server.lock();
            server.parked.clear();
            server.sessions.clear();
            if keep_subscriptions {
                for subscription in server.subscriptions.values_mut() {
                    subscription.owner = None;
                }
            } else {
                server.subscriptions.clear();
                server.ready.clear();
            }
        }
        let _ = self.events.send(ChannelEvent::Closed {
            error: Some("server restarted".to_string()),
        });
    }

    /// Refuses the next `count` connect attempts.
    pub fn refuse_connects(&self, count: u32) {
        self.refuse_connects.store(count, Ordering::Release);
    }

    /// Raises a channel event.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    /// Parks every request of `service` until [`release`](Self::release).
    pub fn hold(&self, service: &'static str) {
        self.gate.send_modify(|held| {
            held.insert(service);
        });
    }

    /// Lets held requests of `service` through.
    pub fn release(&self, service: &'static str) {
        self.gate.send_modify(|held| {
            held.remove(service);
        });
    }

    /// Delays every request of `service`.
    pub fn set_latency(&self, service: &'static str, latency: Duration) {
        self.server.lock().latency.insert(service, latency);
    }

    // -------------------------------------------------------------------------
    // Server control
    // -------------------------------------------------------------------------

    /// Answers the next request of `service` with a fault.
    pub fn inject_fault(&self, service: &'static str, status: StatusCode) {
        self.server.lock().faults.push_back((service, status));
    }

    /// Answers every request of `service` with a fault, or stops doing so.
    pub fn set_persistent_fault(&self, service: &'static str, status: Option<StatusCode>) {
        let mut server = self.server.lock();
        match status {
            Some(status) => server.persistent_faults.insert(service, status),
            None => server.persistent_faults.remove(service),
        };
    }

    /// Makes reads, writes and item creation fail for `node`.
    pub fn reject_node(&self, node: NodeId) {
        self.server.lock().rejected_nodes.insert(node);
    }

    /// Drops the last result of the next CreateMonitoredItems response.
    pub fn misalign_next_create(&self) {
        self.server.lock().misalign_next_create = true;
    }

    /// Sets the value returned for `node`.
    pub fn set_value(&self, node: NodeId, value: Variant) {
        self.server.lock().values.insert(node, value);
    }

    /// Value last written to `node`.
    pub fn value(&self, node: &NodeId) -> Option<Variant> {
        self.server.lock().values.get(node).cloned()
    }

    /// Sets the `ServerStatus_State` value.
    pub fn set_server_state(&self, state: i32) {
        self.server.lock().server_state = state;
    }

    /// Forgets every session. Subscriptions survive for transfer.
    pub fn expire_sessions(&self) {
        let mut server = self.server.lock();
        let tokens: Vec<NodeId> = server.sessions.keys().cloned().collect();
        for token in &tokens {
            server.answer_parked(token, StatusCode::BAD_SESSION_ID_INVALID);
        }
        server.sessions.clear();
        for subscription in server.subscriptions.values_mut() {
            subscription.owner = None;
        }
    }

    /// Forgets one session. Its subscriptions survive for transfer.
    pub fn expire_session(&self, token: &NodeId) {
        let mut server = self.server.lock();
        server.answer_parked(token, StatusCode::BAD_SESSION_ID_INVALID);
        server.sessions.remove(token);
        for subscription in server.subscriptions.values_mut() {
            if subscription.owner.as_ref() == Some(token) {
                subscription.owner = None;
            }
        }
    }

    /// Forgets one subscription without notifying anyone.
    pub fn drop_subscription(&self, subscription_id: u32) {
        let mut server = self.server.lock();
        server.subscriptions.remove(&subscription_id);
        server.ready.retain(|(id, _)| *id != subscription_id);
    }

    /// Makes the next CreateSubscription return `subscription_id`.
    pub fn set_next_subscription_id(&self, subscription_id: u32) {
        self.server.lock().next_subscription_id = subscription_id.saturating_sub(1);
    }

    /// Forgets every session and subscription.
    pub fn expire_everything(&self) {
        self.expire_sessions();
        let mut server = self.server.lock();
        server.subscriptions.clear();
        server.ready.clear();
    }

    /// Closes a session on the server side; its parked publishes fail with
    /// `BadSessionClosed`.
    pub fn close_session_server_side(&self, token: &NodeId) {
        let mut server = self.server.lock();
        server.sessions.remove(token);
        server.answer_parked(token, StatusCode::BAD_SESSION_CLOSED);
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    /// Publishes a notification message. Returns its sequence number.
    pub fn notify(&self, subscription_id: u32, data: Vec<NotificationData>) -> Option<u32> {
        let mut server = self.server.lock();
        let subscription = server.subscriptions.get_mut(&subscription_id)?;
        let sequence_number = subscription.allocate();
        let message = NotificationMessage {
            sequence_number,
            publish_time: Utc::now(),
            notification_data: data,
        };
        subscription
            .retransmission
            .insert(sequence_number, message.clone());
        server.enqueue(subscription_id, message);
        Some(sequence_number)
    }

    /// Publishes one data change per `(client_handle, value)`.
    pub fn notify_data_change(
        &self,
        subscription_id: u32,
        changes: &[(u32, Variant)],
    ) -> Option<u32> {
        let notifications = changes
            .iter()
            .map(|(client_handle, value)| MonitoredItemNotification {
                client_handle: *client_handle,
                value: DataValue::new(value.clone()),
            })
            .collect();
        self.notify(
            subscription_id,
            vec![NotificationData::DataChange(notifications)],
        )
    }

    /// Allocates a sequence number whose message is only available through
    /// Republish.
    pub fn lose_next(&self, subscription_id: u32, data: Vec<NotificationData>) -> Option<u32> {
        let mut server = self.server.lock();
        let subscription = server.subscriptions.get_mut(&subscription_id)?;
        let sequence_number = subscription.allocate();
        subscription.retransmission.insert(
            sequence_number,
            NotificationMessage {
                sequence_number,
                publish_time: Utc::now(),
                notification_data: data,
            },
        );
        Some(sequence_number)
    }

    /// Makes the next message of a subscription carry `sequence_number`.
    pub fn set_next_sequence_number(&self, subscription_id: u32, sequence_number: u32) {
        if let Some(subscription) = self.server.lock().subscriptions.get_mut(&subscription_id) {
            subscription.next_sequence_number = sequence_number;
        }
    }

    /// Removes a message from the retransmission queue.
    pub fn forget(&self, subscription_id: u32, sequence_number: u32) {
        if let Some(subscription) = self.server.lock().subscriptions.get_mut(&subscription_id) {
            subscription.retransmission.remove(&sequence_number);
        }
    }

    /// Sends a keep-alive for a subscription.
    pub fn keep_alive(&self, subscription_id: u32) -> bool {
        let mut server = self.server.lock();
        let Some(subscription) = server.subscriptions.get(&subscription_id) else {
            return false;
        };
        let message = NotificationMessage::keep_alive(subscription.next_sequence_number);
        server.enqueue(subscription_id, message);
        true
    }

    /// Sends a status change and drops the subscription.
    pub fn end_subscription(&self, subscription_id: u32, status: StatusCode) {
        self.notify(subscription_id, vec![NotificationData::StatusChange(status)]);
        self.server.lock().subscriptions.remove(&subscription_id);
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Number of sessions on the server.
    pub fn session_count(&self) -> usize {
        self.server.lock().sessions.len()
    }

    /// Returns `true` if the server knows the session token.
    pub fn has_session(&self, token: &NodeId) -> bool {
        self.server.lock().sessions.contains_key(token)
    }

    /// Server-side session id of a token.
    pub fn session_id_of(&self, token: &NodeId) -> Option<NodeId> {
        self.server
            .lock()
            .sessions
            .get(token)
            .map(|s| s.session_id.clone())
    }

    /// Subscription ids on the server.
    pub fn subscription_ids(&self) -> Vec<u32> {
        self.server.lock().subscriptions.keys().copied().collect()
    }

    /// Session token owning a subscription.
    pub fn subscription_owner(&self, subscription_id: u32) -> Option<NodeId> {
        self.server
            .lock()
            .subscriptions
            .get(&subscription_id)
            .and_then(|s| s.owner.clone())
    }

    /// Client handles of the items of a subscription, ascending.
    pub fn item_handles(&self, subscription_id: u32) -> Vec<u32> {
        let server = self.server.lock();
        let mut handles: Vec<u32> = server
            .subscriptions
            .get(&subscription_id)
            .map(|s| s.items.values().map(|i| i.client_handle).collect())
            .unwrap_or_default();
        handles.sort_unstable();
        handles
    }

    /// Nodes monitored by a subscription.
    pub fn monitored_nodes(&self, subscription_id: u32) -> Vec<NodeId> {
        self.server
            .lock()
            .subscriptions
            .get(&subscription_id)
            .map(|s| {
                s.items
                    .values()
                    .map(|i| i.item_to_monitor.node_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Publishing flag of a subscription.
    pub fn publishing_enabled(&self, subscription_id: u32) -> Option<bool> {
        self.server
            .lock()
            .subscriptions
            .get(&subscription_id)
            .map(|s| s.publishing_enabled)
    }

    /// Sequence numbers still held for retransmission.
    pub fn retained(&self, subscription_id: u32) -> Vec<u32> {
        self.server
            .lock()
            .subscriptions
            .get(&subscription_id)
            .map(|s| s.retransmission.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Publish requests currently parked.
    pub fn parked_publishes(&self) -> usize {
        self.server.lock().parked.len()
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<RequestMessage> {
        self.server.lock().log.clone()
    }

    /// Requests of one service, in arrival order.
    pub fn requests_of(&self, service: &str) -> Vec<RequestMessage> {
        self.server
            .lock()
            .log
            .iter()
            .filter(|r| r.service() == service)
            .cloned()
            .collect()
    }

    /// Number of requests of one service.
    pub fn count(&self, service: &str) -> usize {
        self.server
            .lock()
            .log
            .iter()
            .filter(|r| r.service() == service)
            .count()
    }

    /// Clears the request log.
    pub fn clear_log(&self) {
        self.server.lock().log.clear();
    }

    /// Acknowledgements carried by every Publish request so far.
    pub fn acknowledgements(&self) -> Vec<SubscriptionAcknowledgement> {
        self.server
            .lock()
            .log
            .iter()
            .filter_map(|r| match &r.body {
                Request::Publish(body) => Some(body.subscription_acknowledgements.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    async fn wait_gate(&self, service: &'static str) {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|held| !held.contains(service)).await;
    }

    fn transport_error(&self) -> trap_uasession::UaError {
        self.stats.record_failure();
        ChannelError::closed("connection reset by peer").into()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn connect(&self, endpoint_url: &str) -> UaResult<()> {
        let refused = self
            .refuse_connects
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChannelError::connect_failed(endpoint_url, "connection refused").into());
        }
        self.connected.store(true, Ordering::Release);
        self.stats.record_connect();
        Ok(())
    }

    async fn close(&self) -> UaResult<()> {
        self.connected.store(false, Ordering::Release);
        self.server.lock().parked.clear();
        let _ = self.events.send(ChannelEvent::Closed { error: None });
        Ok(())
    }

    async fn perform_transaction(&self, request: RequestMessage) -> UaResult<ResponseMessage> {
        let service = request.service();
        self.server.lock().log.push(request.clone());
        self.wait_gate(service).await;

        let latency = self.server.lock().latency.get(service).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.is_valid() {
            return Err(self.transport_error());
        }

        let handled = self.server.lock().handle(request);
        let response = match handled {
            Handled::Respond(response) => response,
            Handled::Park(receiver) => match receiver.await {
                Ok(response) => response,
                Err(_) => return Err(self.transport_error()),
            },
        };
        self.stats.record_transaction(1, 1);
        Ok(response)
    }

    fn is_valid(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn state(&self) -> ChannelState {
        if self.is_valid() {
            ChannelState::Open
        } else {
            ChannelState::Disconnected
        }
    }

    fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}
