// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration files and logging setup for `trap-uasession`.
//!
//! ```no_run
//! use trap_uasession_config::{init_logging, load_config};
//!
//! let config = load_config("ua.yaml").unwrap();
//! init_logging(&config.logging);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod loader;
pub mod logging;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    load_config, load_config_str, resolve_env_placeholders, ConfigFormat, ConfigLoader,
    ConfigLoaderBuilder, DEFAULT_ENV_PREFIX,
};
pub use logging::{build_filter, init_logging, parse_level};
pub use schema::{LogFormat, LogLevel, LoggingConfig, RuntimeConfig};
