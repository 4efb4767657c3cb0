// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # trap-uasession Integration Tests
//!
//! Integration tests and test utilities for the OPC UA session runtime.
//! Everything runs against [`MockChannel`](common::mocks::MockChannel), an
//! in-memory server that tracks sessions, subscriptions and monitored items
//! and lets tests drop the connection or expire server state on demand.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `fixtures`: Node ids, configurations and settings used across suites
//!   - `builders`: Builders for clients and notification payloads
//!   - `assertions`: Event and status helpers with timeouts
//!   - `mocks`: The in-memory channel and server
//!   - `harness`: Connected client plus channel, ready for a test
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p trap-uasession-tests
//! cargo test -p trap-uasession-tests --test integration_reconnect
//! cargo test -p trap-uasession-tests -- --nocapture
//! ```
//!
//! ## Test Suites
//!
//! ### Session (`integration_session.rs`)
//! - Create/activate/close lifecycle
//! - Request handles and authentication tokens
//! - Server-side closure and request timeouts
//!
//! ### Subscription (`integration_subscription.rs`)
//! - Creation, modification, publishing mode, termination
//! - Monitored items in batches of 1, 5 and 100, chunking
//! - Notification routing, acknowledgements, sequence gaps
//!
//! ### Keep-alive (`integration_keepalive.rs`)
//! - Check timing derived from the session timeout
//! - Skips for recent traffic and in-flight checks
//! - Failure reporting
//!
//! ### Reconnect (`integration_reconnect.rs`)
//! - Re-activation and recreation paths
//! - Transfer and recreate fallback
//! - Queued request replay order, coalescing, cancellation
//! - Fan-out over several sessions
//!
//! ### Scenario (`integration_scenario.rs`)
//! - End-to-end runs mixing data flow and outages
//!
//! ### Config (`integration_config.rs`)
//! - Loading files and driving a client from them
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use trap_uasession_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::start().await;
//!     let (session, subscription) = harness.session_with_subscription().await;
//!     // ...
//!     harness.shutdown().await;
//! }
//! ```

pub mod common;

/// Everything a test file usually needs.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::builders::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::mocks::*;
    pub use crate::common::{init_test_logging, temp_test_dir, unique_test_id};

    pub use trap_uasession::messages::{NotificationData, WriteValue};
    pub use trap_uasession::prelude::*;
}
