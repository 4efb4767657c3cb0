// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the session runtime.
//!
//! Errors are grouped by the layer that raised them and classified into the
//! four kinds the reconnection logic cares about:
//!
//! ```text
//! UaError
//! ├── Channel        - Transport unusable or aborted          (Transport)
//! ├── Timeout        - Request or check exceeded its deadline (Transport)
//! ├── Service        - Non-good status in a response          (Protocol)
//! ├── Session        - Session lifecycle failures             (Protocol / Contract)
//! ├── Subscription   - Subscription and monitored item errors (Protocol / Contract)
//! ├── Contract       - Invalid arguments, broken invariants   (Contract)
//! ├── Configuration  - Invalid settings                       (Contract)
//! └── Repair         - Reconnection exhausted or cancelled    (RepairExhaustion)
//! ```
//!
//! # Examples
//!
//! ```
//! use trap_uasession::error::{ErrorKind, ServiceError, UaError};
//! use trap_uasession::types::StatusCode;
//!
//! let error = UaError::from(ServiceError::new("Read", StatusCode::BAD_SESSION_CLOSED));
//! assert_eq!(error.kind(), ErrorKind::Protocol);
//! assert_eq!(error.status_code(), Some(StatusCode::BAD_SESSION_CLOSED));
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::types::StatusCode;

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for session runtime operations.
#[derive(Debug, Clone, Error)]
pub enum UaError {
    /// Transport errors.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// Service results carrying a bad status code.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Session lifecycle errors.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Subscription and monitored item errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Programming and contract errors.
    #[error("{0}")]
    Contract(#[from] ContractError),

    /// Reconnection failures.
    #[error("{0}")]
    Repair(#[from] RepairError),

    /// Timeout errors.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

/// Coarse classification used by callers deciding how to react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Channel unusable or aborted; retried per connection strategy.
    Transport,
    /// Non-good status code returned by the server.
    Protocol,
    /// Invalid arguments or broken invariants; never retried.
    Contract,
    /// Reconnection exhausted or cancelled; terminal.
    RepairExhaustion,
}

impl UaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a service error.
    #[inline]
    pub fn service(service: &'static str, status: StatusCode) -> Self {
        Self::Service(ServiceError::new(service, status))
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Contract(ContractError::invalid_argument(name, reason))
    }

    /// Creates a channel-not-valid error.
    #[inline]
    pub fn channel_not_valid(endpoint: impl Into<String>) -> Self {
        Self::Channel(ChannelError::NotValid {
            endpoint: endpoint.into(),
        })
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns the taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Channel(_) | Self::Timeout(_) => ErrorKind::Transport,
            Self::Service(_) => ErrorKind::Protocol,
            Self::Session(e) => e.kind(),
            Self::Subscription(e) => e.kind(),
            Self::Contract(_) | Self::Configuration(_) => ErrorKind::Contract,
            Self::Repair(_) => ErrorKind::RepairExhaustion,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Channel(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::Service(e) => e.is_retryable(),
            Self::Session(e) => e.is_retryable(),
            Self::Subscription(_) => false,
            Self::Contract(_) | Self::Configuration(_) | Self::Repair(_) => false,
        }
    }

    /// Returns the status code carried by this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Service(e) => Some(e.status),
            Self::Session(SessionError::ClosedByServer { status }) => Some(*status),
            Self::Session(
                SessionError::CreationFailed { status, .. }
                | SessionError::ActivationFailed { status, .. },
            ) => *status,
            Self::Subscription(SubscriptionError::MonitoredItemFailed { status, .. }) => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Returns `true` if this error carries the given status code.
    pub fn has_status(&self, status: StatusCode) -> bool {
        self.status_code().map(|s| s.sub_code()) == Some(status.sub_code())
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Channel(_) | Self::Timeout(_) => ErrorSeverity::Warning,
            Self::Service(_) => ErrorSeverity::Warning,
            Self::Session(SessionError::Closed) => ErrorSeverity::Info,
            Self::Session(_) => ErrorSeverity::Error,
            Self::Subscription(_) => ErrorSeverity::Warning,
            Self::Contract(_) => ErrorSeverity::Error,
            Self::Repair(RepairError::Cancelled) => ErrorSeverity::Info,
            Self::Repair(_) => ErrorSeverity::Critical,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Channel(_) => "channel",
            Self::Service(_) => "service",
            Self::Session(_) => "session",
            Self::Subscription(_) => "subscription",
            Self::Contract(_) => "contract",
            Self::Repair(_) => "repair",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Channel(e) => ErrorCode::new(1, e.code()),
            Self::Session(e) => ErrorCode::new(2, e.code()),
            Self::Service(_) => ErrorCode::new(3, 1),
            Self::Subscription(e) => ErrorCode::new(4, e.code()),
            Self::Contract(e) => ErrorCode::new(5, e.code()),
            Self::Repair(e) => ErrorCode::new(6, e.code()),
            Self::Timeout(e) => ErrorCode::new(7, e.code()),
            Self::Configuration(_) => ErrorCode::new(8, 1),
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();
        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ChannelError
// =============================================================================

/// Transport-level errors.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The channel was never connected.
    #[error("Channel is not connected")]
    NotConnected,

    /// The channel exists but cannot carry transactions right now.
    #[error("Channel to {endpoint} is not valid")]
    NotValid {
        /// Endpoint URL.
        endpoint: String,
    },

    /// The owning client dropped the channel.
    #[error("Channel is no longer available")]
    Unavailable,

    /// The connection closed while a transaction was outstanding.
    #[error("Channel closed: {}", reason.as_deref().unwrap_or("no reason given"))]
    Closed {
        /// Reason reported by the transport.
        reason: Option<String>,
    },

    /// The transport aborted the connection.
    #[error("Channel aborted")]
    Aborted,

    /// Connecting to the endpoint failed.
    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectFailed {
        /// Endpoint URL.
        endpoint: String,
        /// Error message.
        message: String,
    },
}

impl ChannelError {
    /// Creates a closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: Some(reason.into()),
        }
    }

    /// Creates a connect failure.
    pub fn connect_failed(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Transport errors are always retryable, except a dropped channel.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    fn code(&self) -> u8 {
        match self {
            Self::NotConnected => 1,
            Self::NotValid { .. } => 2,
            Self::Unavailable => 3,
            Self::Closed { .. } => 4,
            Self::Aborted => 5,
            Self::ConnectFailed { .. } => 6,
        }
    }
}

// =============================================================================
// ServiceError
// =============================================================================

/// A service call whose response carried a bad status.
#[derive(Debug, Clone, Error)]
#[error("{service} failed with {status}")]
pub struct ServiceError {
    /// Name of the service.
    pub service: &'static str,
    /// Status returned by the server.
    pub status: StatusCode,
}

impl ServiceError {
    /// Creates a new service error.
    pub fn new(service: &'static str, status: StatusCode) -> Self {
        Self { service, status }
    }

    /// Returns `true` if the server might accept the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status.sub_code(),
            StatusCode::BAD_TIMEOUT
                | StatusCode::BAD_TOO_MANY_OPERATIONS
                | StatusCode::BAD_RESOURCE_UNAVAILABLE
                | StatusCode::BAD_COMMUNICATION_ERROR
                | StatusCode::BAD_SERVER_NOT_CONNECTED
        )
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Session lifecycle errors.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// CreateSession failed.
    #[error("Failed to create session: {message}")]
    CreationFailed {
        /// Error message.
        message: String,
        /// Status returned by the server, if any.
        status: Option<StatusCode>,
    },

    /// ActivateSession failed.
    #[error("Failed to activate session: {message}")]
    ActivationFailed {
        /// Error message.
        message: String,
        /// Status returned by the server, if any.
        status: Option<StatusCode>,
    },

    /// The session was closed by the application.
    #[error("Session has been closed")]
    Closed,

    /// The server reported the session closed or unknown.
    #[error("Session closed by server: {status}")]
    ClosedByServer {
        /// Status that triggered the closure.
        status: StatusCode,
    },

    /// The session has no server identity yet.
    #[error("Session not activated")]
    NotActivated,
}

impl SessionError {
    /// Creates a creation failure.
    pub fn creation_failed(message: impl Into<String>, status: Option<StatusCode>) -> Self {
        Self::CreationFailed {
            message: message.into(),
            status,
        }
    }

    /// Creates an activation failure.
    pub fn activation_failed(message: impl Into<String>, status: Option<StatusCode>) -> Self {
        Self::ActivationFailed {
            message: message.into(),
            status,
        }
    }

    /// Returns the taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Closed | Self::NotActivated => ErrorKind::Contract,
            _ => ErrorKind::Protocol,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CreationFailed { .. } | Self::ActivationFailed { .. })
    }

    fn code(&self) -> u8 {
        match self {
            Self::CreationFailed { .. } => 1,
            Self::ActivationFailed { .. } => 2,
            Self::Closed => 3,
            Self::ClosedByServer { .. } => 4,
            Self::NotActivated => 5,
        }
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// No subscription with this id is registered.
    #[error("Subscription not found: {subscription_id}")]
    NotFound {
        /// Subscription ID.
        subscription_id: u32,
    },

    /// The subscription has been terminated.
    #[error("Subscription {subscription_id} has been terminated")]
    Terminated {
        /// Subscription ID.
        subscription_id: u32,
    },

    /// A single-item monitored item request failed.
    #[error("Monitored item {client_handle} failed: {status}")]
    MonitoredItemFailed {
        /// Client handle of the item.
        client_handle: u32,
        /// Status returned by the server.
        status: StatusCode,
    },

    /// No monitored item with this client handle exists.
    #[error("Monitored item not found: {client_handle}")]
    MonitoredItemNotFound {
        /// Client handle.
        client_handle: u32,
    },
}

impl SubscriptionError {
    /// Returns the taxonomy kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MonitoredItemFailed { .. } => ErrorKind::Protocol,
            _ => ErrorKind::Contract,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::NotFound { .. } => 1,
            Self::Terminated { .. } => 2,
            Self::MonitoredItemFailed { .. } => 3,
            Self::MonitoredItemNotFound { .. } => 4,
        }
    }
}

// =============================================================================
// ContractError
// =============================================================================

/// Programming and contract errors. Never retried.
#[derive(Debug, Clone, Error)]
pub enum ContractError {
    /// The reserved client handle was supplied.
    #[error("Invalid client handle: 0x{handle:08X}")]
    InvalidClientHandle {
        /// The offending handle.
        handle: u32,
    },

    /// A response array did not line up with its request array.
    #[error("{service} returned {actual} results for {expected} items")]
    IndexMisalignment {
        /// Service name.
        service: &'static str,
        /// Number of request items.
        expected: usize,
        /// Number of results received.
        actual: usize,
    },

    /// An argument was rejected before sending.
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// Reason.
        reason: String,
    },

    /// The response body did not match the request.
    #[error("Unexpected response to {service}: got {actual}")]
    UnexpectedResponse {
        /// Service name.
        service: &'static str,
        /// Received response kind.
        actual: &'static str,
    },
}

impl ContractError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::InvalidClientHandle { .. } => 1,
            Self::IndexMisalignment { .. } => 2,
            Self::InvalidArgument { .. } => 3,
            Self::UnexpectedResponse { .. } => 4,
        }
    }
}

// =============================================================================
// RepairError
// =============================================================================

/// Terminal reconnection outcomes, shared by every waiter of a repair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepairError {
    /// Every attempt failed.
    #[error("Reconnection failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Message of the last failure.
        last_error: String,
    },

    /// The session was closed while the repair was running.
    #[error("Reconnection cancelled due to termination")]
    Cancelled,
}

impl RepairError {
    fn code(&self) -> u8 {
        match self {
            Self::Exhausted { .. } => 1,
            Self::Cancelled => 2,
        }
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// Timeout errors.
#[derive(Debug, Clone, Error)]
pub enum TimeoutError {
    /// A request exceeded the request timeout.
    #[error("{service} timed out after {duration:?}")]
    Request {
        /// Service name.
        service: &'static str,
        /// Timeout that elapsed.
        duration: Duration,
    },

    /// A keep-alive check exceeded the ping timeout.
    #[error("Keep-alive check timed out after {duration:?}")]
    KeepAlive {
        /// Timeout that elapsed.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Returns the elapsed timeout.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Request { duration, .. } | Self::KeepAlive { duration } => *duration,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::Request { .. } => 1,
            Self::KeepAlive { .. } => 2,
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid settings.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// Required field is missing.
    #[error("Missing required configuration field: {field}")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// A value is out of range or malformed.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Reason.
        reason: String,
    },
}

impl ConfigurationError {
    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Severity levels for errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code, formatted as `UA-XXYY`.
///
/// Categories: 1 channel, 2 session, 3 service, 4 subscription,
/// 5 contract, 6 repair, 7 timeout, 8 configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category.
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with UaError.
pub type UaResult<T> = Result<T, UaError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_kinds() {
        assert_eq!(
            UaError::from(ChannelError::Aborted).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            UaError::service("Read", StatusCode::BAD_NODE_ID_UNKNOWN).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(
            UaError::from(ContractError::InvalidClientHandle { handle: u32::MAX }).kind(),
            ErrorKind::Contract
        );
        assert_eq!(
            UaError::from(RepairError::Cancelled).kind(),
            ErrorKind::RepairExhaustion
        );
        assert_eq!(
            UaError::from(SessionError::Closed).kind(),
            ErrorKind::Contract
        );
    }

    #[test]
    fn test_retryability() {
        assert!(UaError::channel_not_valid("opc.tcp://localhost:4840").is_retryable());
        assert!(!UaError::from(ChannelError::Unavailable).is_retryable());
        assert!(UaError::service("Read", StatusCode::BAD_TIMEOUT).is_retryable());
        assert!(!UaError::service("Read", StatusCode::BAD_NODE_ID_UNKNOWN).is_retryable());
        assert!(!UaError::invalid_argument("items", "empty").is_retryable());
        assert!(!UaError::from(RepairError::Cancelled).is_retryable());
    }

    #[test]
    fn test_status_code_access() {
        let error = UaError::service("Publish", StatusCode::BAD_NO_SUBSCRIPTION);
        assert!(error.has_status(StatusCode::BAD_NO_SUBSCRIPTION));
        assert!(!error.has_status(StatusCode::BAD_TIMEOUT));

        let error = UaError::from(SessionError::ClosedByServer {
            status: StatusCode::BAD_SESSION_CLOSED,
        });
        assert_eq!(error.status_code(), Some(StatusCode::BAD_SESSION_CLOSED));
        assert_eq!(UaError::from(ChannelError::Aborted).status_code(), None);
    }

    #[test]
    fn test_session_establishment_errors_keep_status() {
        let error = UaError::from(SessionError::creation_failed(
            "CreateSession failed with BadTooManySessions",
            Some(StatusCode::BAD_TOO_MANY_SESSIONS),
        ));
        assert!(error.has_status(StatusCode::BAD_TOO_MANY_SESSIONS));
        assert_eq!(error.kind(), ErrorKind::Protocol);
        assert!(error.is_retryable());

        let error = UaError::from(SessionError::activation_failed("rejected", None));
        assert_eq!(error.status_code(), None);
        assert!(error.to_string().starts_with("Failed to activate session"));
    }

    #[test]
    fn test_repair_error_messages() {
        assert_eq!(
            RepairError::Cancelled.to_string(),
            "Reconnection cancelled due to termination"
        );
        let exhausted = RepairError::Exhausted {
            attempts: 3,
            last_error: "Channel aborted".into(),
        };
        assert!(exhausted.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn test_error_code_format() {
        let code = ErrorCode::new(6, 2);
        assert_eq!(code.to_string(), "UA-0602");
        assert_eq!(code.as_u16(), 0x0602);
        assert_eq!(UaError::from(RepairError::Cancelled).error_code(), code);
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(
            UaError::from(RepairError::Exhausted {
                attempts: 1,
                last_error: String::new()
            })
            .tracing_level(),
            Level::ERROR
        );
        assert_eq!(UaError::from(SessionError::Closed).severity(), ErrorSeverity::Info);
        assert!(ErrorSeverity::Critical > ErrorSeverity::Warning);
    }
}
