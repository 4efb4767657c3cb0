// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol data types shared by every layer of the session runtime.
//!
//! - **StatusCode**: service and operation results with severity classification
//! - **NodeId**: numeric and string node identifiers with parsing
//! - **Variant/DataValue**: values carried by reads and notifications
//! - **ReadValueId/MonitoringParameters**: what to monitor and how
//! - **UserIdentity**: credentials presented on session activation
//!
//! # Examples
//!
//! ```
//! use trap_uasession::types::{NodeId, StatusCode};
//!
//! let node: NodeId = "ns=2;s=Boiler.Temperature".parse().unwrap();
//! assert_eq!(node.namespace_index, 2);
//!
//! assert!(StatusCode::BAD_SESSION_CLOSED.is_bad());
//! assert_eq!(StatusCode::BAD_SESSION_CLOSED.name(), "BadSessionClosed");
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, UaError};

// =============================================================================
// StatusCode
// =============================================================================

/// OPC UA status code.
///
/// The two most significant bits carry the severity: `00` good,
/// `01` uncertain, `10` bad.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StatusCode(u32);

impl StatusCode {
    /// Operation succeeded.
    pub const GOOD: Self = Self(0x0000_0000);
    /// Generic uncertain result.
    pub const UNCERTAIN: Self = Self(0x4000_0000);
    /// Generic bad result.
    pub const BAD: Self = Self(0x8000_0000);

    pub const BAD_UNEXPECTED_ERROR: Self = Self(0x8001_0000);
    pub const BAD_INTERNAL_ERROR: Self = Self(0x8002_0000);
    pub const BAD_OUT_OF_MEMORY: Self = Self(0x8003_0000);
    pub const BAD_RESOURCE_UNAVAILABLE: Self = Self(0x8004_0000);
    pub const BAD_COMMUNICATION_ERROR: Self = Self(0x8005_0000);
    pub const BAD_ENCODING_ERROR: Self = Self(0x8006_0000);
    pub const BAD_DECODING_ERROR: Self = Self(0x8007_0000);
    pub const BAD_UNKNOWN_RESPONSE: Self = Self(0x8009_0000);
    pub const BAD_TIMEOUT: Self = Self(0x800A_0000);
    pub const BAD_SERVICE_UNSUPPORTED: Self = Self(0x800B_0000);
    pub const BAD_SHUTDOWN: Self = Self(0x800C_0000);
    pub const BAD_SERVER_NOT_CONNECTED: Self = Self(0x800D_0000);
    pub const BAD_SERVER_HALTED: Self = Self(0x800E_0000);
    pub const BAD_NOTHING_TO_DO: Self = Self(0x800F_0000);
    pub const BAD_TOO_MANY_OPERATIONS: Self = Self(0x8010_0000);
    pub const BAD_USER_ACCESS_DENIED: Self = Self(0x801F_0000);
    pub const BAD_IDENTITY_TOKEN_INVALID: Self = Self(0x8020_0000);
    pub const BAD_IDENTITY_TOKEN_REJECTED: Self = Self(0x8021_0000);
    pub const BAD_SECURE_CHANNEL_ID_INVALID: Self = Self(0x8022_0000);
    pub const BAD_NONCE_INVALID: Self = Self(0x8024_0000);
    pub const BAD_SESSION_ID_INVALID: Self = Self(0x8025_0000);
    pub const BAD_SESSION_CLOSED: Self = Self(0x8026_0000);
    pub const BAD_SESSION_NOT_ACTIVATED: Self = Self(0x8027_0000);
    pub const BAD_SUBSCRIPTION_ID_INVALID: Self = Self(0x8028_0000);
    pub const BAD_REQUEST_HEADER_INVALID: Self = Self(0x802A_0000);
    pub const BAD_TIMESTAMPS_TO_RETURN_INVALID: Self = Self(0x802B_0000);
    pub const BAD_REQUEST_CANCELLED_BY_CLIENT: Self = Self(0x802C_0000);
    pub const BAD_NODE_ID_INVALID: Self = Self(0x8033_0000);
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8034_0000);
    pub const BAD_ATTRIBUTE_ID_INVALID: Self = Self(0x8035_0000);
    pub const BAD_NOT_READABLE: Self = Self(0x803A_0000);
    pub const BAD_NOT_WRITABLE: Self = Self(0x803B_0000);
    pub const BAD_OUT_OF_RANGE: Self = Self(0x803C_0000);
    pub const BAD_NOT_SUPPORTED: Self = Self(0x803D_0000);
    pub const BAD_NOT_FOUND: Self = Self(0x803E_0000);
    pub const BAD_MONITORING_MODE_INVALID: Self = Self(0x8041_0000);
    pub const BAD_MONITORED_ITEM_ID_INVALID: Self = Self(0x8042_0000);
    pub const BAD_MONITORED_ITEM_FILTER_INVALID: Self = Self(0x8043_0000);
    pub const BAD_MONITORED_ITEM_FILTER_UNSUPPORTED: Self = Self(0x8044_0000);
    pub const BAD_TOO_MANY_SESSIONS: Self = Self(0x8056_0000);
    pub const BAD_TOO_MANY_SUBSCRIPTIONS: Self = Self(0x8077_0000);
    pub const BAD_TOO_MANY_PUBLISH_REQUESTS: Self = Self(0x8078_0000);
    pub const BAD_NO_SUBSCRIPTION: Self = Self(0x8079_0000);
    pub const BAD_SEQUENCE_NUMBER_UNKNOWN: Self = Self(0x807A_0000);
    pub const BAD_MESSAGE_NOT_AVAILABLE: Self = Self(0x807B_0000);
    pub const BAD_SECURE_CHANNEL_CLOSED: Self = Self(0x8086_0000);
    pub const BAD_NOT_CONNECTED: Self = Self(0x808A_0000);
    pub const BAD_INVALID_ARGUMENT: Self = Self(0x80AB_0000);
    pub const BAD_CONNECTION_CLOSED: Self = Self(0x80AE_0000);
    pub const BAD_TOO_MANY_MONITORED_ITEMS: Self = Self(0x80DB_0000);

    /// Creates a status code from its raw value.
    #[inline]
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw 32-bit value.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns `true` if the severity bits are good.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity bits are uncertain.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` if the severity bits are bad.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the status without the info bits (lower 16 bits).
    #[inline]
    pub const fn sub_code(&self) -> Self {
        Self(self.0 & 0xFFFF_0000)
    }

    /// Returns the symbolic name of this status code.
    pub fn name(&self) -> &'static str {
        match self.sub_code().0 {
            0x0000_0000 => "Good",
            0x4000_0000 => "Uncertain",
            0x8000_0000 => "Bad",
            0x8001_0000 => "BadUnexpectedError",
            0x8002_0000 => "BadInternalError",
            0x8003_0000 => "BadOutOfMemory",
            0x8004_0000 => "BadResourceUnavailable",
            0x8005_0000 => "BadCommunicationError",
            0x8006_0000 => "BadEncodingError",
            0x8007_0000 => "BadDecodingError",
            0x8009_0000 => "BadUnknownResponse",
            0x800A_0000 => "BadTimeout",
            0x800B_0000 => "BadServiceUnsupported",
            0x800C_0000 => "BadShutdown",
            0x800D_0000 => "BadServerNotConnected",
            0x800E_0000 => "BadServerHalted",
            0x800F_0000 => "BadNothingToDo",
            0x8010_0000 => "BadTooManyOperations",
            0x801F_0000 => "BadUserAccessDenied",
            0x8020_0000 => "BadIdentityTokenInvalid",
            0x8021_0000 => "BadIdentityTokenRejected",
            0x8022_0000 => "BadSecureChannelIdInvalid",
            0x8024_0000 => "BadNonceInvalid",
            0x8025_0000 => "BadSessionIdInvalid",
            0x8026_0000 => "BadSessionClosed",
            0x8027_0000 => "BadSessionNotActivated",
            0x8028_0000 => "BadSubscriptionIdInvalid",
            0x802A_0000 => "BadRequestHeaderInvalid",
            0x802B_0000 => "BadTimestampsToReturnInvalid",
            0x802C_0000 => "BadRequestCancelledByClient",
            0x8033_0000 => "BadNodeIdInvalid",
            0x8034_0000 => "BadNodeIdUnknown",
            0x8035_0000 => "BadAttributeIdInvalid",
            0x803A_0000 => "BadNotReadable",
            0x803B_0000 => "BadNotWritable",
            0x803C_0000 => "BadOutOfRange",
            0x803D_0000 => "BadNotSupported",
            0x803E_0000 => "BadNotFound",
            0x8041_0000 => "BadMonitoringModeInvalid",
            0x8042_0000 => "BadMonitoredItemIdInvalid",
            0x8043_0000 => "BadMonitoredItemFilterInvalid",
            0x8044_0000 => "BadMonitoredItemFilterUnsupported",
            0x8056_0000 => "BadTooManySessions",
            0x8077_0000 => "BadTooManySubscriptions",
            0x8078_0000 => "BadTooManyPublishRequests",
            0x8079_0000 => "BadNoSubscription",
            0x807A_0000 => "BadSequenceNumberUnknown",
            0x807B_0000 => "BadMessageNotAvailable",
            0x8086_0000 => "BadSecureChannelClosed",
            0x808A_0000 => "BadNotConnected",
            0x80AB_0000 => "BadInvalidArgument",
            0x80AE_0000 => "BadConnectionClosed",
            0x80DB_0000 => "BadTooManyMonitoredItems",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusCode({})", self)
    }
}

impl From<u32> for StatusCode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

// =============================================================================
// NodeId
// =============================================================================

/// OPC UA node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

/// Identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),
    /// String identifier.
    String(String),
}

impl NodeId {
    /// `Server_ServerStatus_State`, read by the keep-alive monitor.
    pub const SERVER_STATUS_STATE: u32 = 2259;

    /// Creates a numeric node ID.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// The null node (`i=0`).
    #[inline]
    pub fn null() -> Self {
        Self::numeric(0, 0)
    }

    /// The server state variable read for liveness.
    #[inline]
    pub fn server_state() -> Self {
        Self::numeric(0, Self::SERVER_STATUS_STATE)
    }

    /// Returns `true` for the null node.
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && self.identifier == NodeIdentifier::Numeric(0)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index != 0 {
            write!(f, "ns={};", self.namespace_index)?;
        }
        match &self.identifier {
            NodeIdentifier::Numeric(v) => write!(f, "i={}", v),
            NodeIdentifier::String(v) => write!(f, "s={}", v),
        }
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parses `ns=2;i=1001`, `ns=2;s=Name`, `i=2259` or `s=Name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: &str| {
            UaError::from(ConfigurationError::invalid_value("node_id", format!("{s}: {reason}")))
        };

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, ident) = rest
                    .split_once(';')
                    .ok_or_else(|| invalid("missing identifier after namespace"))?;
                let ns: u16 = ns.parse().map_err(|_| invalid("invalid namespace index"))?;
                (ns, ident)
            }
            None => (0, s),
        };

        let identifier = if let Some(id) = identifier_part.strip_prefix("i=") {
            NodeIdentifier::Numeric(id.parse().map_err(|_| invalid("invalid numeric identifier"))?)
        } else if let Some(id) = identifier_part.strip_prefix("s=") {
            NodeIdentifier::String(id.to_string())
        } else {
            return Err(invalid("expected i= or s= identifier"));
        };

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

// =============================================================================
// AttributeId
// =============================================================================

/// Node attribute addressed by reads and monitored items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    NodeId,
    BrowseName,
    DisplayName,
    EventNotifier,
    #[default]
    Value,
    DataType,
}

impl AttributeId {
    /// Returns the numeric attribute id.
    pub const fn value(&self) -> u32 {
        match self {
            Self::NodeId => 1,
            Self::BrowseName => 3,
            Self::DisplayName => 4,
            Self::EventNotifier => 12,
            Self::Value => 13,
            Self::DataType => 14,
        }
    }
}

// =============================================================================
// Variant / DataValue
// =============================================================================

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value")]
pub enum Variant {
    #[default]
    Null,
    Boolean(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    StatusCode(StatusCode),
    Array(Vec<Variant>),
}

impl Variant {
    /// Returns the value as `i64` when it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(i64::from(*v)),
            Self::UInt32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `f64` when it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns `true` if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A value with its status and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DataValue {
    pub value: Variant,
    pub status: StatusCode,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl DataValue {
    /// A good value stamped with the current time.
    pub fn new(value: Variant) -> Self {
        let now = Utc::now();
        Self {
            value,
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
        }
    }

    /// A value-less result carrying only a status.
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

// =============================================================================
// ServerState
// =============================================================================

/// Server state as reported by `ServerStatus_State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerState {
    Running,
    Failed,
    NoConfiguration,
    Suspended,
    Shutdown,
    Test,
    CommunicationFault,
    Unknown,
}

impl ServerState {
    /// Maps the enumeration value of `ServerStateType`.
    pub fn from_value(value: i64) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Failed,
            2 => Self::NoConfiguration,
            3 => Self::Suspended,
            4 => Self::Shutdown,
            5 => Self::Test,
            6 => Self::CommunicationFault,
            _ => Self::Unknown,
        }
    }
}

// =============================================================================
// Monitoring
// =============================================================================

/// Which timestamps the server returns with values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampsToReturn {
    Source,
    Server,
    #[default]
    Both,
    Neither,
}

/// OPC UA monitoring mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Monitoring disabled.
    Disabled,

    /// Sampling enabled, reporting disabled.
    Sampling,

    /// Sampling and reporting enabled.
    #[default]
    Reporting,
}

/// Deadband filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeadbandSettings {
    /// No deadband filtering.
    #[default]
    None,

    /// Report if change exceeds an absolute value.
    Absolute {
        /// Absolute change threshold.
        value: f64,
    },

    /// Report if change exceeds a percentage of the EU range.
    Percent {
        /// Percentage of engineering unit range (0-100).
        percent: f64,
    },
}

/// Trigger of a data change filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataChangeTrigger {
    Status,
    #[default]
    StatusValue,
    StatusValueTimestamp,
}

/// Filter attached to a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitoringFilter {
    #[default]
    None,
    DataChange {
        trigger: DataChangeTrigger,
        deadband: DeadbandSettings,
    },
    Event {
        /// Browse paths of the selected event fields.
        select_clauses: Vec<String>,
    },
}

/// Server response to a requested filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum FilterResult {
    #[default]
    None,
    Event {
        select_clause_results: Vec<StatusCode>,
    },
}

/// Sampling and queueing parameters of a monitored item.
///
/// `client_handle` is assigned by the monitored item toolbox before the
/// create request is sent; values supplied by callers are overwritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringParameters {
    pub client_handle: u32,
    #[serde(with = "humantime_serde")]
    pub sampling_interval: Duration,
    pub filter: MonitoringFilter,
    pub queue_size: u32,
    pub discard_oldest: bool,
}

impl Default for MonitoringParameters {
    fn default() -> Self {
        Self {
            client_handle: 0,
            sampling_interval: Duration::from_millis(250),
            filter: MonitoringFilter::None,
            queue_size: 10,
            discard_oldest: true,
        }
    }
}

impl MonitoringParameters {
    /// Parameters with a custom sampling interval.
    pub fn with_sampling_interval(interval: Duration) -> Self {
        Self {
            sampling_interval: interval,
            ..Default::default()
        }
    }

    /// Sets the queue size.
    pub fn queue_size(mut self, size: u32) -> Self {
        self.queue_size = size;
        self
    }

    /// Sets the filter.
    pub fn filter(mut self, filter: MonitoringFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Identifies the attribute watched by a monitored item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadValueId {
    pub node_id: NodeId,
    pub attribute_id: AttributeId,
    pub index_range: Option<String>,
}

impl ReadValueId {
    /// Watches the value attribute of a node.
    pub fn value_of(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute_id: AttributeId::Value,
            index_range: None,
        }
    }

    /// Watches the event notifier of a node.
    pub fn events_of(node_id: NodeId) -> Self {
        Self {
            node_id,
            attribute_id: AttributeId::EventNotifier,
            index_range: None,
        }
    }
}

impl From<NodeId> for ReadValueId {
    fn from(node_id: NodeId) -> Self {
        Self::value_of(node_id)
    }
}

// =============================================================================
// Security and identity
// =============================================================================

/// OPC UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// No security.
    #[default]
    None,

    /// Messages are signed but not encrypted.
    Sign,

    /// Messages are signed and encrypted.
    SignAndEncrypt,
}

/// OPC UA security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityPolicy {
    #[default]
    None,
    Basic256Sha256,
    Aes128Sha256RsaOaep,
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    /// Returns the OPC UA policy URI.
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            Self::Basic256Sha256 => "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256",
            Self::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            Self::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }
}

/// User identity presented when activating a session.
///
/// The same identity is replayed on reactivation and on recreation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserIdentity {
    #[default]
    Anonymous,
    UserName {
        username: String,
        password: String,
    },
    Certificate {
        certificate_path: String,
        private_key_path: String,
    },
}

impl UserIdentity {
    /// Username/password identity.
    pub fn user_name(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UserName {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the token type name.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Anonymous => "Anonymous",
            Self::UserName { .. } => "UserName",
            Self::Certificate { .. } => "Certificate",
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => write!(f, "UserName({username}, ***)"),
            Self::Certificate {
                certificate_path, ..
            } => write!(f, "Certificate({certificate_path})"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
