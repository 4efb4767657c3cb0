// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Structured service messages exchanged over a [`Channel`](crate::channel::Channel).
//!
//! The runtime never looks at encoded bytes. It only depends on:
//!
//! - a request header carrying the authentication token,
//! - a response header carrying the service result,
//! - index-aligned result arrays for batched services.
//!
//! Every request body implements [`ServiceRequest`], which ties it to its
//! response body so callers get typed responses:
//!
//! ```
//! use trap_uasession::messages::{ReadRequest, ReadResponse, Response, ServiceRequest};
//!
//! assert_eq!(<ReadRequest as ServiceRequest>::NAME, "Read");
//! let body = ReadResponse::try_from(Response::Read(ReadResponse::default())).unwrap();
//! assert!(body.results.is_empty());
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{ContractError, UaError, UaResult};
use crate::types::{
    AttributeId, DataValue, FilterResult, MonitoringMode, MonitoringParameters, NodeId,
    ReadValueId, StatusCode, TimestampsToReturn, UserIdentity, Variant,
};

// =============================================================================
// Headers
// =============================================================================

/// Header of every request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeader {
    /// Session authentication token; `None` before a session exists.
    pub authentication_token: Option<NodeId>,
    /// Client-assigned request handle.
    pub request_handle: u32,
    /// Time the request was sent.
    pub timestamp: DateTime<Utc>,
    /// Hint for the server-side timeout.
    pub timeout_hint: Duration,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self {
            authentication_token: None,
            request_handle: 0,
            timestamp: Utc::now(),
            timeout_hint: Duration::ZERO,
        }
    }
}

/// Header of every response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeader {
    /// Echo of the request handle.
    pub request_handle: u32,
    /// Time the response was produced.
    pub timestamp: DateTime<Utc>,
    /// Service-level result.
    pub service_result: StatusCode,
}

impl ResponseHeader {
    /// A good response header.
    pub fn good(request_handle: u32) -> Self {
        Self::with_status(request_handle, StatusCode::GOOD)
    }

    /// A response header with an explicit service result.
    pub fn with_status(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            request_handle,
            timestamp: Utc::now(),
            service_result,
        }
    }
}

/// A request travelling over a channel.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub header: RequestHeader,
    pub body: Request,
}

impl RequestMessage {
    /// Wraps a body with a default header.
    pub fn new(body: impl Into<Request>) -> Self {
        Self {
            header: RequestHeader::default(),
            body: body.into(),
        }
    }

    /// Service name of the body.
    pub fn service(&self) -> &'static str {
        self.body.name()
    }
}

/// A response travelling over a channel.
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub header: ResponseHeader,
    pub body: Response,
}

impl ResponseMessage {
    /// A good response for the given request handle.
    pub fn new(request_handle: u32, body: impl Into<Response>) -> Self {
        Self {
            header: ResponseHeader::good(request_handle),
            body: body.into(),
        }
    }

    /// A service fault carrying only a status.
    pub fn fault(request_handle: u32, status: StatusCode) -> Self {
        Self {
            header: ResponseHeader::with_status(request_handle, status),
            body: Response::ServiceFault,
        }
    }
}

// =============================================================================
// Session services
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSessionRequest {
    pub application_name: String,
    pub session_name: String,
    pub endpoint_url: String,
    pub requested_session_timeout: Duration,
    pub client_nonce: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSessionResponse {
    pub session_id: NodeId,
    pub authentication_token: NodeId,
    pub revised_session_timeout: Duration,
    pub server_nonce: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivateSessionRequest {
    pub user_identity: UserIdentity,
    pub locale_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivateSessionResponse {
    pub server_nonce: Vec<u8>,
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseSessionRequest {
    pub delete_subscriptions: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseSessionResponse;

// =============================================================================
// Attribute and method services
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadRequest {
    pub max_age: Duration,
    pub timestamps_to_return: TimestampsToReturn,
    pub nodes_to_read: Vec<ReadValueId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResponse {
    pub results: Vec<DataValue>,
}

/// A single value to write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteValue {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub value: DataValue,
}

impl WriteValue {
    /// Writes the value attribute of a node.
    pub fn value(node_id: NodeId, value: Variant) -> Self {
        Self {
            node_id,
            attribute_id: AttributeId::Value,
            value: DataValue {
                value,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteRequest {
    pub nodes_to_write: Vec<WriteValue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResponse {
    pub results: Vec<StatusCode>,
}

/// Node to browse.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseDescription {
    pub node_id: NodeId,
    pub include_subtypes: bool,
}

/// A reference returned by Browse.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceDescription {
    pub node_id: NodeId,
    pub browse_name: String,
    pub display_name: String,
}

/// Result of browsing one node.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowseResult {
    pub status: StatusCode,
    pub references: Vec<ReferenceDescription>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseRequest {
    pub requested_max_references_per_node: u32,
    pub nodes_to_browse: Vec<BrowseDescription>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseResponse {
    pub results: Vec<BrowseResult>,
}

/// Method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMethodRequest {
    pub object_id: NodeId,
    pub method_id: NodeId,
    pub input_arguments: Vec<Variant>,
}

/// Result of a method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMethodResult {
    pub status: StatusCode,
    pub output_arguments: Vec<Variant>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRequest {
    pub methods_to_call: Vec<CallMethodRequest>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResponse {
    pub results: Vec<CallMethodResult>,
}

// =============================================================================
// Subscription services
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSubscriptionRequest {
    pub requested_publishing_interval: Duration,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateSubscriptionResponse {
    pub subscription_id: u32,
    pub revised_publishing_interval: Duration,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifySubscriptionRequest {
    pub subscription_id: u32,
    pub requested_publishing_interval: Duration,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub priority: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifySubscriptionResponse {
    pub revised_publishing_interval: Duration,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetPublishingModeRequest {
    pub publishing_enabled: bool,
    pub subscription_ids: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetPublishingModeResponse {
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteSubscriptionsRequest {
    pub subscription_ids: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteSubscriptionsResponse {
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferSubscriptionsRequest {
    pub subscription_ids: Vec<u32>,
    pub send_initial_values: bool,
}

/// Per-subscription transfer outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    pub status: StatusCode,
    /// Sequence numbers the server still holds for retransmission.
    pub available_sequence_numbers: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferSubscriptionsResponse {
    pub results: Vec<TransferResult>,
}

// =============================================================================
// Monitored item services
// =============================================================================

/// One item of a CreateMonitoredItems request.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateRequest {
    pub item_to_monitor: ReadValueId,
    pub monitoring_mode: MonitoringMode,
    pub requested_parameters: MonitoringParameters,
}

/// Result for one created monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemCreateResult {
    pub status: StatusCode,
    pub monitored_item_id: u32,
    pub revised_sampling_interval: Duration,
    pub revised_queue_size: u32,
    pub filter_result: FilterResult,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateMonitoredItemsRequest {
    pub subscription_id: u32,
    pub timestamps_to_return: TimestampsToReturn,
    pub items_to_create: Vec<MonitoredItemCreateRequest>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateMonitoredItemsResponse {
    pub results: Vec<MonitoredItemCreateResult>,
}

/// One item of a ModifyMonitoredItems request.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemModifyRequest {
    pub monitored_item_id: u32,
    pub requested_parameters: MonitoringParameters,
}

/// Result for one modified monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemModifyResult {
    pub status: StatusCode,
    pub revised_sampling_interval: Duration,
    pub revised_queue_size: u32,
    pub filter_result: FilterResult,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifyMonitoredItemsRequest {
    pub subscription_id: u32,
    pub timestamps_to_return: TimestampsToReturn,
    pub items_to_modify: Vec<MonitoredItemModifyRequest>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifyMonitoredItemsResponse {
    pub results: Vec<MonitoredItemModifyResult>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetMonitoringModeRequest {
    pub subscription_id: u32,
    pub monitoring_mode: MonitoringMode,
    pub monitored_item_ids: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetMonitoringModeResponse {
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetTriggeringRequest {
    pub subscription_id: u32,
    pub triggering_item_id: u32,
    pub links_to_add: Vec<u32>,
    pub links_to_remove: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetTriggeringResponse {
    pub add_results: Vec<StatusCode>,
    pub remove_results: Vec<StatusCode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteMonitoredItemsRequest {
    pub subscription_id: u32,
    pub monitored_item_ids: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteMonitoredItemsResponse {
    pub results: Vec<StatusCode>,
}

// =============================================================================
// Publish services
// =============================================================================

/// Acknowledges a processed notification message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionAcknowledgement {
    pub subscription_id: u32,
    pub sequence_number: u32,
}

/// Value change of one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

/// Event fields reported for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFieldList {
    pub client_handle: u32,
    pub event_fields: Vec<Variant>,
}

/// Payload of a notification message.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationData {
    DataChange(Vec<MonitoredItemNotification>),
    Event(Vec<EventFieldList>),
    StatusChange(StatusCode),
}

/// A numbered batch of notifications for one subscription.
///
/// An empty `notification_data` is a keep-alive.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub sequence_number: u32,
    pub publish_time: DateTime<Utc>,
    pub notification_data: Vec<NotificationData>,
}

impl NotificationMessage {
    /// A keep-alive message announcing the next sequence number.
    pub fn keep_alive(next_sequence_number: u32) -> Self {
        Self {
            sequence_number: next_sequence_number,
            publish_time: Utc::now(),
            notification_data: Vec::new(),
        }
    }

    /// Returns `true` for keep-alive messages.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishRequest {
    pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishResponse {
    pub subscription_id: u32,
    pub available_sequence_numbers: Vec<u32>,
    pub more_notifications: bool,
    pub notification_message: NotificationMessage,
    /// Results of the acknowledgements carried by the request.
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepublishRequest {
    pub subscription_id: u32,
    pub retransmit_sequence_number: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepublishResponse {
    pub notification_message: NotificationMessage,
}

// =============================================================================
// Request / Response envelopes
// =============================================================================

/// Ties a request body to its response body.
pub trait ServiceRequest: Into<Request> + Send + 'static {
    /// Response body type.
    type Response: TryFrom<Response, Error = UaError> + Send;

    /// Service name.
    const NAME: &'static str;
}

macro_rules! services {
    ($($service:ident: $request:ident => $response:ident),* $(,)?) => {
        /// Request body of any service.
        #[derive(Debug, Clone)]
        pub enum Request {
            $(
                #[doc = concat!(stringify!($service), " request.")]
                $service($request),
            )*
        }

        /// Response body of any service.
        #[derive(Debug, Clone)]
        pub enum Response {
            $(
                #[doc = concat!(stringify!($service), " response.")]
                $service($response),
            )*
            /// Service-level failure; the header carries the status.
            ServiceFault,
        }

        impl Request {
            /// Service name.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$service(_) => stringify!($service),)*
                }
            }
        }

        impl Response {
            /// Service name, or `ServiceFault`.
            pub fn name(&self) -> &'static str {
                match self {
                    $(Self::$service(_) => stringify!($service),)*
                    Self::ServiceFault => "ServiceFault",
                }
            }
        }

        $(
            impl From<$request> for Request {
                fn from(body: $request) -> Self {
                    Self::$service(body)
                }
            }

            impl From<$response> for Response {
                fn from(body: $response) -> Self {
                    Self::$service(body)
                }
            }

            impl TryFrom<Response> for $response {
                type Error = UaError;

                fn try_from(response: Response) -> Result<Self, Self::Error> {
                    match response {
                        Response::$service(body) => Ok(body),
                        other => Err(ContractError::UnexpectedResponse {
                            service: stringify!($service),
                            actual: other.name(),
                        }
                        .into()),
                    }
                }
            }

            impl ServiceRequest for $request {
                type Response = $response;
                const NAME: &'static str = stringify!($service);
            }
        )*
    };
}

services! {
    CreateSession: CreateSessionRequest => CreateSessionResponse,
    ActivateSession: ActivateSessionRequest => ActivateSessionResponse,
    CloseSession: CloseSessionRequest => CloseSessionResponse,
    Read: ReadRequest => ReadResponse,
    Write: WriteRequest => WriteResponse,
    Browse: BrowseRequest => BrowseResponse,
    Call: CallRequest => CallResponse,
    CreateSubscription: CreateSubscriptionRequest => CreateSubscriptionResponse,
    ModifySubscription: ModifySubscriptionRequest => ModifySubscriptionResponse,
    SetPublishingMode: SetPublishingModeRequest => SetPublishingModeResponse,
    DeleteSubscriptions: DeleteSubscriptionsRequest => DeleteSubscriptionsResponse,
    TransferSubscriptions: TransferSubscriptionsRequest => TransferSubscriptionsResponse,
    CreateMonitoredItems: CreateMonitoredItemsRequest => CreateMonitoredItemsResponse,
    ModifyMonitoredItems: ModifyMonitoredItemsRequest => ModifyMonitoredItemsResponse,
    SetMonitoringMode: SetMonitoringModeRequest => SetMonitoringModeResponse,
    SetTriggering: SetTriggeringRequest => SetTriggeringResponse,
    DeleteMonitoredItems: DeleteMonitoredItemsRequest => DeleteMonitoredItemsResponse,
    Publish: PublishRequest => PublishResponse,
    Republish: RepublishRequest => RepublishResponse,
}

/// Verifies that a result array lines up with its request array.
pub fn ensure_aligned(service: &'static str, expected: usize, actual: usize) -> UaResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ContractError::IndexMisalignment {
            service,
            expected,
            actual,
        }
        .into())
    }
}
