// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client runtime configuration.
//!
//! [`ClientConfig`] gathers everything the session runtime needs: endpoint
//! and security selection, session and request timeouts, the connection
//! strategy used to re-establish a broken channel, the repair settings of
//! the reconnection controller and the defaults applied to new
//! subscriptions.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use trap_uasession::config::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .endpoint("opc.tcp://localhost:4840")
//!     .session_timeout(Duration::from_secs(60))
//!     .repair_backoff(Duration::from_millis(2000))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.repair.backoff, Duration::from_millis(2000));
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, UaResult};
use crate::types::{SecurityMode, SecurityPolicy, StatusCode};

// =============================================================================
// ClientConfig
// =============================================================================

/// Configuration of a [`UaClient`](crate::client::UaClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server endpoint URL (e.g., "opc.tcp://localhost:4840").
    pub endpoint: String,

    /// Application name sent in CreateSession.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Session name prefix. Defaults to the application name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// Security mode of the channel.
    #[serde(default)]
    pub security_mode: SecurityMode,

    /// Security policy of the channel.
    #[serde(default)]
    pub security_policy: SecurityPolicy,

    /// Requested session timeout. The server may revise it.
    #[serde(default = "default_session_timeout", with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Timeout applied to each transaction.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Whether sessions run a keep-alive monitor.
    #[serde(default = "default_true")]
    pub keepalive_enabled: bool,

    /// How a broken channel is re-established.
    #[serde(default)]
    pub connection: ConnectionStrategy,

    /// How sessions are repaired once the channel is back.
    #[serde(default)]
    pub repair: RepairSettings,

    /// Publish engine settings.
    #[serde(default)]
    pub publish: PublishSettings,

    /// Defaults for new subscriptions.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Upper bound of monitored items sent in one create request.
    #[serde(default = "default_max_monitored_items_per_call")]
    pub max_monitored_items_per_call: usize,
}

fn default_application_name() -> String {
    "TRAP OPC UA Client".to_string()
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_max_monitored_items_per_call() -> usize {
    1000
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Creates a configuration with just the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Validates this configuration.
    pub fn validate(&self) -> UaResult<()> {
        if self.endpoint.is_empty() {
            return Err(ConfigurationError::missing_field("endpoint").into());
        }

        if !self.endpoint.starts_with("opc.tcp://") {
            return Err(ConfigurationError::invalid_value(
                "endpoint",
                format!("'{}' must start with opc.tcp://", self.endpoint),
            )
            .into());
        }

        if (self.security_mode == SecurityMode::None) != (self.security_policy == SecurityPolicy::None)
        {
            return Err(ConfigurationError::invalid_value(
                "security_policy",
                "security mode and policy must both be None or both be set",
            )
            .into());
        }

        if self.session_timeout.is_zero() {
            return Err(
                ConfigurationError::invalid_value("session_timeout", "must be greater than 0")
                    .into(),
            );
        }

        if self.request_timeout.is_zero() {
            return Err(
                ConfigurationError::invalid_value("request_timeout", "must be greater than 0")
                    .into(),
            );
        }

        if self.max_monitored_items_per_call == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_monitored_items_per_call",
                "must be greater than 0",
            )
            .into());
        }

        if self.publish.max_publish_requests == 0 {
            return Err(ConfigurationError::invalid_value(
                "publish.max_publish_requests",
                "must be greater than 0",
            )
            .into());
        }

        if self.repair.max_attempts == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "repair.max_attempts",
                "must be greater than 0 when set",
            )
            .into());
        }

        self.subscription.validate()
    }

    /// Returns the session name used for the n-th session.
    pub fn session_name_for(&self, index: u64) -> String {
        let base = self
            .session_name
            .as_deref()
            .unwrap_or(self.application_name.as_str());
        format!("{base}-{index}")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            application_name: default_application_name(),
            session_name: None,
            security_mode: SecurityMode::default(),
            security_policy: SecurityPolicy::default(),
            session_timeout: default_session_timeout(),
            request_timeout: default_request_timeout(),
            keepalive_enabled: true,
            connection: ConnectionStrategy::default(),
            repair: RepairSettings::default(),
            publish: PublishSettings::default(),
            subscription: SubscriptionSettings::default(),
            max_monitored_items_per_call: default_max_monitored_items_per_call(),
        }
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Sets the endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Sets the session name prefix.
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = Some(name.into());
        self
    }

    /// Sets channel security.
    pub fn security(mut self, mode: SecurityMode, policy: SecurityPolicy) -> Self {
        self.config.security_mode = mode;
        self.config.security_policy = policy;
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Sets the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Enables or disables the keep-alive monitor.
    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.config.keepalive_enabled = enabled;
        self
    }

    /// Sets the connection strategy.
    pub fn connection(mut self, strategy: ConnectionStrategy) -> Self {
        self.config.connection = strategy;
        self
    }

    /// Sets the delay between repair attempts.
    pub fn repair_backoff(mut self, backoff: Duration) -> Self {
        self.config.repair.backoff = backoff;
        self
    }

    /// Limits the number of repair attempts.
    pub fn repair_max_attempts(mut self, attempts: u32) -> Self {
        self.config.repair.max_attempts = Some(attempts);
        self
    }

    /// Sets the recovery policy.
    pub fn recovery_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.config.repair.policy = policy;
        self
    }

    /// Sets the maximum number of outstanding publish requests.
    pub fn max_publish_requests(mut self, max: u32) -> Self {
        self.config.publish.max_publish_requests = max;
        self
    }

    /// Sets the default subscription settings.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.config.subscription = settings;
        self
    }

    /// Sets the monitored item batch size.
    pub fn max_monitored_items_per_call(mut self, max: usize) -> Self {
        self.config.max_monitored_items_per_call = max;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> UaResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// =============================================================================
// ConnectionStrategy
// =============================================================================

/// Strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Fixed delay between retries.
    Fixed,

    /// Linear backoff (delay * attempt).
    Linear,

    /// Exponential backoff (delay * 2^attempt).
    #[default]
    Exponential,
}

impl RetryStrategy {
    /// Calculates the delay for a given attempt.
    pub fn delay(&self, base_delay: Duration, attempt: u32) -> Duration {
        match self {
            Self::Fixed => base_delay,
            Self::Linear => base_delay.saturating_mul(attempt.saturating_add(1)),
            Self::Exponential => base_delay.saturating_mul(2u32.saturating_pow(attempt)),
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "Fixed"),
            Self::Linear => write!(f, "Linear"),
            Self::Exponential => write!(f, "Exponential"),
        }
    }
}

/// How the client re-establishes its channel after an unexpected close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStrategy {
    /// Whether an unexpected close triggers reconnection at all.
    #[serde(default = "default_true")]
    pub retry_connection: bool,

    /// Maximum connect attempts per break. `None` retries until disconnected.
    #[serde(default = "default_max_retries")]
    pub max_retries: Option<u32>,

    /// Base delay between attempts.
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Retry strategy.
    #[serde(default)]
    pub strategy: RetryStrategy,
}

fn default_max_retries() -> Option<u32> {
    Some(10)
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for ConnectionStrategy {
    fn default() -> Self {
        Self {
            retry_connection: true,
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            strategy: RetryStrategy::Exponential,
        }
    }
}

impl ConnectionStrategy {
    /// Strategy that never reconnects.
    pub fn no_retry() -> Self {
        Self {
            retry_connection: false,
            max_retries: Some(0),
            ..Default::default()
        }
    }

    /// Fixed-delay strategy.
    pub fn fixed(delay: Duration, max_retries: Option<u32>) -> Self {
        Self {
            retry_connection: true,
            max_retries,
            base_delay: delay,
            max_delay: delay,
            strategy: RetryStrategy::Fixed,
        }
    }

    /// Calculates the delay for a given attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.strategy.delay(self.base_delay, attempt).min(self.max_delay)
    }

    /// Returns `true` if another attempt is allowed after `attempts` failures.
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        self.max_retries.map_or(true, |max| attempts < max)
    }
}

// =============================================================================
// RepairSettings / RecoveryPolicy
// =============================================================================

/// Settings of the reconnection controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSettings {
    /// Fixed delay between repair attempts.
    #[serde(default = "default_repair_backoff", with = "humantime_serde")]
    pub backoff: Duration,

    /// Attempt limit. `None` repairs until the session is closed.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Status classification used while repairing.
    #[serde(default)]
    pub policy: RecoveryPolicy,
}

fn default_repair_backoff() -> Duration {
    Duration::from_millis(2000)
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            backoff: default_repair_backoff(),
            max_attempts: None,
            policy: RecoveryPolicy::default(),
        }
    }
}

/// Which statuses are ignorable data loss and which force recreation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Transfer results that force a full subscription recreation.
    #[serde(default = "default_recreate_statuses")]
    pub recreate_on: Vec<StatusCode>,

    /// Republish failures accepted as permanent notification loss.
    #[serde(default = "default_ignorable_republish")]
    pub ignorable_republish: Vec<StatusCode>,

    /// Whether any other republish failure fails the repair attempt.
    #[serde(default)]
    pub republish_failure_is_fatal: bool,

    /// Statuses that mean the server dropped the session.
    #[serde(default = "default_session_closed_statuses")]
    pub session_closed_on: Vec<StatusCode>,
}

fn default_recreate_statuses() -> Vec<StatusCode> {
    vec![StatusCode::BAD_SUBSCRIPTION_ID_INVALID]
}

fn default_ignorable_republish() -> Vec<StatusCode> {
    vec![
        StatusCode::BAD_MESSAGE_NOT_AVAILABLE,
        StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN,
        StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
        StatusCode::BAD_NO_SUBSCRIPTION,
    ]
}

fn default_session_closed_statuses() -> Vec<StatusCode> {
    vec![StatusCode::BAD_SESSION_CLOSED, StatusCode::BAD_SESSION_ID_INVALID]
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            recreate_on: default_recreate_statuses(),
            ignorable_republish: default_ignorable_republish(),
            republish_failure_is_fatal: false,
            session_closed_on: default_session_closed_statuses(),
        }
    }
}

impl RecoveryPolicy {
    /// Returns `true` if a transfer result requires recreating the subscription.
    pub fn requires_recreate(&self, status: StatusCode) -> bool {
        contains(&self.recreate_on, status)
    }

    /// Returns `true` if a republish failure is accepted as data loss.
    pub fn is_ignorable_republish(&self, status: StatusCode) -> bool {
        contains(&self.ignorable_republish, status)
    }

    /// Returns `true` if the status means the server dropped the session.
    pub fn closes_session(&self, status: StatusCode) -> bool {
        contains(&self.session_closed_on, status)
    }
}

fn contains(set: &[StatusCode], status: StatusCode) -> bool {
    set.iter().any(|s| s.sub_code() == status.sub_code())
}

// =============================================================================
// PublishSettings
// =============================================================================

/// Publish engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Upper bound on outstanding publish requests per session.
    #[serde(default = "default_max_publish_requests")]
    pub max_publish_requests: u32,
}

fn default_max_publish_requests() -> u32 {
    5
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_publish_requests: default_max_publish_requests(),
        }
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Requested parameters of a subscription.
///
/// The server may revise interval and counts; the revised values are what
/// the runtime uses afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(default = "default_publishing_interval", with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Lifetime count (publishing intervals before the subscription expires).
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Max keep-alive count.
    #[serde(default = "default_keepalive_count")]
    pub keepalive_count: u32,

    /// Maximum notifications per publish (0 = unlimited).
    #[serde(default)]
    pub max_notifications_per_publish: u32,

    /// Priority (0-255, higher is more important).
    #[serde(default)]
    pub priority: u8,

    /// Publishing enabled.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lifetime_count() -> u32 {
    60
}

fn default_keepalive_count() -> u32 {
    10
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            keepalive_count: default_keepalive_count(),
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }
}

impl SubscriptionSettings {
    /// Settings with a custom publishing interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            publishing_interval: interval,
            ..Default::default()
        }
    }

    /// Validates the requested parameters.
    pub fn validate(&self) -> UaResult<()> {
        if self.publishing_interval.is_zero() {
            return Err(ConfigurationError::invalid_value(
                "subscription.publishing_interval",
                "must be greater than 0",
            )
            .into());
        }
        if self.keepalive_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "subscription.keepalive_count",
                "must be greater than 0",
            )
            .into());
        }
        if self.lifetime_count < self.keepalive_count.saturating_mul(3) {
            return Err(ConfigurationError::invalid_value(
                "subscription.lifetime_count",
                "must be at least three times the keep-alive count",
            )
            .into());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_builder_defaults() {
        let config = ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .build()
            .unwrap();

        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert_eq!(config.repair.backoff, Duration::from_millis(2000));
        assert_eq!(config.repair.max_attempts, None);
        assert!(config.keepalive_enabled);
        assert_eq!(config.publish.max_publish_requests, 5);
    }

    #[test]
    fn test_validation_errors() {
        assert_err!(ClientConfig::builder().build());
        assert_err!(ClientConfig::builder().endpoint("http://x").build());
        assert_err!(ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .security(SecurityMode::Sign, SecurityPolicy::None)
            .build());
        assert_err!(ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .repair_max_attempts(0)
            .build());
        assert_err!(ClientConfig::builder()
            .endpoint("opc.tcp://localhost:4840")
            .max_monitored_items_per_call(0)
            .build());
    }

    #[test]
    fn test_subscription_settings_validation() {
        let mut settings = SubscriptionSettings::default();
        assert_ok!(settings.validate());

        settings.lifetime_count = 20;
        assert_err!(settings.validate());

        settings = SubscriptionSettings::with_interval(Duration::ZERO);
        assert_err!(settings.validate());
    }

    #[test]
    fn test_retry_strategy_delays() {
        let base = Duration::from_millis(100);
        assert_eq!(RetryStrategy::Fixed.delay(base, 3), base);
        assert_eq!(RetryStrategy::Linear.delay(base, 2), Duration::from_millis(300));
        assert_eq!(
            RetryStrategy::Exponential.delay(base, 3),
            Duration::from_millis(800)
        );

        let strategy = ConnectionStrategy::default();
        assert_eq!(strategy.delay_for_attempt(20), strategy.max_delay);
    }

    #[test]
    fn test_connection_strategy_attempts() {
        let bounded = ConnectionStrategy::fixed(Duration::from_millis(10), Some(2));
        assert!(bounded.allows_attempt(0));
        assert!(bounded.allows_attempt(1));
        assert!(!bounded.allows_attempt(2));

        let unbounded = ConnectionStrategy::fixed(Duration::from_millis(10), None);
        assert!(unbounded.allows_attempt(u32::MAX - 1));

        assert!(!ConnectionStrategy::no_retry().retry_connection);
    }

    #[test]
    fn test_recovery_policy_defaults() {
        let policy = RecoveryPolicy::default();
        assert!(policy.requires_recreate(StatusCode::BAD_SUBSCRIPTION_ID_INVALID));
        assert!(!policy.requires_recreate(StatusCode::GOOD));
        assert!(policy.is_ignorable_republish(StatusCode::BAD_MESSAGE_NOT_AVAILABLE));
        assert!(!policy.is_ignorable_republish(StatusCode::BAD_TIMEOUT));
        assert!(policy.closes_session(StatusCode::BAD_SESSION_CLOSED));
        assert!(policy.closes_session(StatusCode::BAD_SESSION_ID_INVALID));
        assert!(!policy.republish_failure_is_fatal);
    }

    #[test]
    fn test_config_serde_humantime() {
        let json = r#"{
            "endpoint": "opc.tcp://plc:4840",
            "session_timeout": "30s",
            "repair": { "backoff": "250ms", "max_attempts": 4 }
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.session_timeout, Duration::from_secs(30));
        assert_eq!(config.repair.backoff, Duration::from_millis(250));
        assert_eq!(config.repair.max_attempts, Some(4));
        assert_eq!(config.subscription.keepalive_count, 10);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_session_name() {
        let config = ClientConfig::new("opc.tcp://localhost:4840");
        assert_eq!(config.session_name_for(3), "TRAP OPC UA Client-3");
    }
}
