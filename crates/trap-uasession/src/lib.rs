// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client session, subscription and reconnection runtime for TRAP.
//!
//! This crate sits between a secure-channel transport (the [`Channel`]
//! trait) and application code. It keeps server sessions, subscriptions and
//! monitored items alive across network interruptions.
//!
//! # Features
//!
//! - Session creation, activation and close with authentication token
//!   stamping and request timeouts
//! - Self-correcting keep-alive checks of the server state
//! - Publish engine with acknowledgement, sequence gap detection and
//!   republish
//! - Subscriptions and batched monitored item management with strict
//!   request/result index alignment
//! - Reconnection controller: in-place re-activation, then recreate and
//!   transfer, with request queueing, coalescing and fan-out
//!
//! # Error Handling
//!
//! ```text
//! UaError
//! ├── Channel       - channel unusable, aborted, connect failures   (transport)
//! ├── Service       - non-good status code in a response            (protocol)
//! ├── Session       - session lifecycle failures                    (protocol)
//! ├── Subscription  - subscription and monitored item failures      (protocol)
//! ├── Contract      - invalid arguments, misaligned results          (contract)
//! ├── Repair        - reconnection exhausted or cancelled            (repair)
//! ├── Timeout       - request or check timeouts                      (transport)
//! └── Configuration - invalid settings                               (contract)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trap_uasession::prelude::*;
//!
//! let config = ClientConfig::builder()
//!     .endpoint("opc.tcp://localhost:4840")
//!     .build()?;
//! let client = UaClient::new(config, channel)?;
//! client.connect().await?;
//!
//! let session = client.open_session(UserIdentity::Anonymous).await?;
//! let subscription = session
//!     .create_subscription(SubscriptionSettings::default())
//!     .await?;
//! let item = subscription
//!     .monitor(
//!         ReadValueId::value_of(NodeId::string(2, "Line1.Speed")),
//!         MonitoringParameters::default(),
//!         TimestampsToReturn::Both,
//!         MonitoringMode::Reporting,
//!     )
//!     .await?;
//!
//! let mut events = subscription.events();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod keepalive;
pub mod messages;
pub mod monitored_item;
pub mod publish;
pub mod reconnect;
pub mod session;
pub mod stats;
pub mod subscription;
pub mod types;

// Re-export commonly used types
pub use channel::{Channel, ChannelEvent, ChannelState, ChannelStats, ChannelStatsSnapshot};
pub use client::UaClient;
pub use config::{
    ClientConfig, ClientConfigBuilder, ConnectionStrategy, PublishSettings, RecoveryPolicy,
    RepairSettings, RetryStrategy, SubscriptionSettings,
};
pub use error::{
    ChannelError, ConfigurationError, ContractError, ErrorCode, ErrorKind, ErrorSeverity,
    RepairError, ServiceError, SessionError, SubscriptionError, TimeoutError, UaError, UaResult,
};
pub use events::{ClientEvent, SessionEvent, SessionKey, SubscriptionEvent};
pub use keepalive::{KeepAliveMonitor, KeepAliveTiming, CheckOutcome, SkipReason};
pub use monitored_item::{MonitoredItem, MonitoredItemGroup, MonitoredItemState};
pub use publish::{PublishEngine, RepublishSummary};
pub use reconnect::{repair_all, FanOutReport, RepairOutcome, RepairPath, RepairPhase, RepairReport};
pub use session::{Session, SessionInfo, SessionState, INVALID_CLIENT_HANDLE};
pub use stats::{
    ClientStatsSnapshot, PublishStatsSnapshot, RepairStatsSnapshot, SessionStatsSnapshot,
    SubscriptionStatsSnapshot,
};
pub use subscription::{RevisedParameters, Subscription};
pub use types::{
    AttributeId, DataChangeTrigger, DataValue, DeadbandSettings, FilterResult, MonitoringFilter,
    MonitoringMode, MonitoringParameters, NodeId, NodeIdentifier, ReadValueId, SecurityMode,
    SecurityPolicy, ServerState, StatusCode, TimestampsToReturn, UserIdentity, Variant,
};

/// Everything an application usually needs.
pub mod prelude {
    pub use crate::channel::{Channel, ChannelEvent, ChannelState};
    pub use crate::client::UaClient;
    pub use crate::config::{ClientConfig, ConnectionStrategy, RecoveryPolicy, SubscriptionSettings};
    pub use crate::error::{ErrorKind, RepairError, UaError, UaResult};
    pub use crate::events::{ClientEvent, SessionEvent, SubscriptionEvent};
    pub use crate::monitored_item::{MonitoredItem, MonitoredItemGroup};
    pub use crate::reconnect::{FanOutReport, RepairPath, RepairReport};
    pub use crate::session::{Session, SessionState};
    pub use crate::subscription::Subscription;
    pub use crate::types::{
        DataValue, MonitoringMode, MonitoringParameters, NodeId, ReadValueId, StatusCode,
        TimestampsToReturn, UserIdentity, Variant,
    };
}
