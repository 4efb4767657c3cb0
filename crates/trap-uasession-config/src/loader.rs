// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Loading of [`RuntimeConfig`] from YAML, TOML or JSON files.
//!
//! # Loading Pipeline
//!
//! 1. Read the file and resolve `${VAR}` / `${VAR:default}` placeholders
//! 2. Parse according to the file extension
//! 3. Apply `TRAP_UA_*` environment overrides
//! 4. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! TRAP_UA_ENDPOINT=opc.tcp://plc-02:4840
//! TRAP_UA_SESSION_TIMEOUT_MS=30000
//! TRAP_UA_REQUEST_TIMEOUT_MS=5000
//! TRAP_UA_REPAIR_BACKOFF_MS=1000
//! TRAP_UA_REPAIR_MAX_ATTEMPTS=10
//! TRAP_UA_RETRY_CONNECTION=false
//! TRAP_UA_LOG_LEVEL=debug
//! TRAP_UA_LOG_FORMAT=json
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{LogFormat, LogLevel, RuntimeConfig};

/// Default prefix of override variables.
pub const DEFAULT_ENV_PREFIX: &str = "TRAP_UA";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads and validates runtime configuration.
///
/// ```no_run
/// use trap_uasession_config::ConfigLoader;
///
/// let config = ConfigLoader::new().load("ua.yaml").unwrap();
/// println!("{}", config.client.endpoint);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `TRAP_UA` prefix and placeholder resolution on.
    pub fn new() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Creates a builder.
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder::new()
    }

    /// Sets the override prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables placeholders and overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<RuntimeConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let content = self.read_file(path)?;
        let format = ConfigFormat::from_path(path)?;
        let content = self.expand(&content)?;

        let mut config: RuntimeConfig = parse_str(&content, format).map_err(|e| match e {
            ConfigError::Serialization { message } => ConfigError::parse(path, message),
            other => other,
        })?;
        self.finish(&mut config)?;

        debug!(
            endpoint = %config.client.endpoint,
            level = config.logging.level.as_str(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<RuntimeConfig> {
        let content = self.expand(content)?;
        let mut config: RuntimeConfig = parse_str(&content, format)?;
        self.finish(&mut config)?;
        Ok(config)
    }

    fn finish(&self, config: &mut RuntimeConfig) -> ConfigResult<()> {
        if self.resolve_env_vars {
            self.apply_env_overrides(config)?;
        }
        config.validate()
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
    }

    fn expand(&self, content: &str) -> ConfigResult<String> {
        if self.resolve_env_vars {
            Ok(resolve_env_placeholders(content))
        } else {
            Ok(content.to_string())
        }
    }

    fn var(&self, suffix: &str) -> Option<(String, String)> {
        let name = format!("{}_{}", self.env_prefix, suffix);
        env::var(&name).ok().map(|value| (name, value))
    }

    fn apply_env_overrides(&self, config: &mut RuntimeConfig) -> ConfigResult<()> {
        let client = &mut config.client;

        if let Some((_, value)) = self.var("ENDPOINT") {
            client.endpoint = value;
        }
        if let Some((name, value)) = self.var("SESSION_TIMEOUT_MS") {
            client.session_timeout = parse_millis(&name, &value)?;
        }
        if let Some((name, value)) = self.var("REQUEST_TIMEOUT_MS") {
            client.request_timeout = parse_millis(&name, &value)?;
        }
        if let Some((name, value)) = self.var("REPAIR_BACKOFF_MS") {
            client.repair.backoff = parse_millis(&name, &value)?;
        }
        if let Some((name, value)) = self.var("REPAIR_MAX_ATTEMPTS") {
            let attempts: u32 = value
                .parse()
                .map_err(|_| ConfigError::invalid_env_var(name, "expected a number"))?;
            client.repair.max_attempts = (attempts > 0).then_some(attempts);
        }
        if let Some((_, value)) = self.var("RETRY_CONNECTION") {
            client.connection.retry_connection = parse_bool(&value);
        }
        if let Some((_, value)) = self.var("KEEPALIVE") {
            client.keepalive_enabled = parse_bool(&value);
        }

        if let Some((name, value)) = self.var("LOG_LEVEL") {
            match LogLevel::parse(&value) {
                Some(level) => config.logging.level = level,
                None => warn!(%name, %value, "Ignoring unknown log level"),
            }
        }
        if let Some((name, value)) = self.var("LOG_FORMAT") {
            match LogFormat::parse(&value) {
                Some(format) => config.logging.format = format,
                None => warn!(%name, %value, "Ignoring unknown log format"),
            }
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigLoaderBuilder
// =============================================================================

/// Builder for [`ConfigLoader`].
#[derive(Debug, Default)]
pub struct ConfigLoaderBuilder {
    env_prefix: Option<String>,
    resolve_env_vars: Option<bool>,
}

impl ConfigLoaderBuilder {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the override prefix.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Enables or disables placeholders and overrides.
    pub fn resolve_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = Some(enabled);
        self
    }

    /// Builds the loader.
    pub fn build(self) -> ConfigLoader {
        let mut loader = ConfigLoader::new();
        if let Some(prefix) = self.env_prefix {
            loader.env_prefix = prefix;
        }
        if let Some(enabled) = self.resolve_env_vars {
            loader.resolve_env_vars = enabled;
        }
        loader
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML.
    Yaml,
    /// TOML.
    Toml,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML goes through the `config` crate.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .and_then(|config| config.try_deserialize())
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

/// Replaces `${VAR}` and `${VAR:default}`.
///
/// Unknown variables without a default and unterminated placeholders are
/// kept verbatim.
pub fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };

        let body = &after[..end];
        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };
        match (env::var(name), default) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!(variable = name, "Environment variable not found");
                result.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

fn parse_millis(name: &str, value: &str) -> ConfigResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::invalid_env_var(name, "expected milliseconds"))
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<RuntimeConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with default settings.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<RuntimeConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Prefix no test process sets, so overrides stay inert.
    fn isolated() -> ConfigLoader {
        ConfigLoader::new().with_env_prefix("TRAP_UA_LOADER_UNIT")
    }

    const TOML: &str = r#"
[client]
endpoint = "opc.tcp://plc-01:4840"
session_timeout = "30s"
request_timeout = "5s"

[client.repair]
backoff = "250ms"
max_attempts = 3

[logging]
level = "debug"
format = "json"
"#;

    #[test]
    fn test_load_toml_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(TOML.as_bytes()).unwrap();

        let config = isolated().load(file.path()).unwrap();
        assert_eq!(config.client.endpoint, "opc.tcp://plc-01:4840");
        assert_eq!(config.client.session_timeout, Duration::from_secs(30));
        assert_eq!(config.client.repair.backoff, Duration::from_millis(250));
        assert_eq!(config.client.repair.max_attempts, Some(3));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_json_str() {
        let config = isolated()
            .load_from_str(
                r#"{"client": {"endpoint": "opc.tcp://127.0.0.1:4840", "request_timeout": "2s"}}"#,
                ConfigFormat::Json,
            )
            .unwrap();
        assert_eq!(config.client.request_timeout, Duration::from_secs(2));
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_invalid_client_is_rejected() {
        let result = isolated().load_from_str(r#"{"client": {"endpoint": ""}}"#, ConfigFormat::Json);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(b"{ not json").unwrap();

        let err = isolated().load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = load_config("/nonexistent/trap-ua.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")).unwrap(), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::Json.extension(), "json");
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_placeholder_default() {
        let out = resolve_env_placeholders("endpoint: ${TRAP_UA_UNIT_UNSET_VAR:opc.tcp://x:4840}");
        assert_eq!(out, "endpoint: opc.tcp://x:4840");
    }

    #[test]
    fn test_placeholder_kept_when_unknown() {
        let out = resolve_env_placeholders("a: ${TRAP_UA_UNIT_UNSET_VAR} b: ${open");
        assert_eq!(out, "a: ${TRAP_UA_UNIT_UNSET_VAR} b: ${open");
    }

    #[test]
    fn test_placeholder_resolves_set_variable() {
        env::set_var("TRAP_UA_UNIT_PLACEHOLDER", "plc-07");
        let out = resolve_env_placeholders("host=${TRAP_UA_UNIT_PLACEHOLDER:fallback};");
        assert_eq!(out, "host=plc-07;");
        env::remove_var("TRAP_UA_UNIT_PLACEHOLDER");
    }

    #[test]
    fn test_env_overrides() {
        let prefix = "TRAP_UA_UNIT_OVERRIDE";
        env::set_var(format!("{prefix}_ENDPOINT"), "opc.tcp://override:4840");
        env::set_var(format!("{prefix}_SESSION_TIMEOUT_MS"), "12000");
        env::set_var(format!("{prefix}_REPAIR_MAX_ATTEMPTS"), "0");
        env::set_var(format!("{prefix}_LOG_LEVEL"), "warn");

        let config = ConfigLoader::new()
            .with_env_prefix(prefix)
            .load_from_str(TOML, ConfigFormat::Toml)
            .unwrap();
        assert_eq!(config.client.endpoint, "opc.tcp://override:4840");
        assert_eq!(config.client.session_timeout, Duration::from_secs(12));
        assert_eq!(config.client.repair.max_attempts, None);
        assert_eq!(config.logging.level, LogLevel::Warn);

        for suffix in ["ENDPOINT", "SESSION_TIMEOUT_MS", "REPAIR_MAX_ATTEMPTS", "LOG_LEVEL"] {
            env::remove_var(format!("{prefix}_{suffix}"));
        }
    }

    #[test]
    fn test_invalid_override_value() {
        let prefix = "TRAP_UA_UNIT_BAD_OVERRIDE";
        env::set_var(format!("{prefix}_REQUEST_TIMEOUT_MS"), "soon");

        let err = ConfigLoader::new()
            .with_env_prefix(prefix)
            .load_from_str(TOML, ConfigFormat::Toml)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));

        env::remove_var(format!("{prefix}_REQUEST_TIMEOUT_MS"));
    }

    #[test]
    fn test_overrides_disabled() {
        let loader = ConfigLoader::builder()
            .env_prefix("TRAP_UA_UNIT_DISABLED")
            .resolve_env_vars(false)
            .build();
        let config = loader
            .load_from_str(
                r#"{"client": {"endpoint": "opc.tcp://${TRAP_UA_UNIT_UNSET:plc}:4840"}}"#,
                ConfigFormat::Json,
            )
            .unwrap();
        assert_eq!(config.client.endpoint, "opc.tcp://${TRAP_UA_UNIT_UNSET:plc}:4840");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("yes"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("off"));
    }
}
