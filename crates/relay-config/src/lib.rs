// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading and validation for the stream relay.
//!
//! [`RelayConfig`] is built once at startup: an optional TOML file, then
//! environment overrides, then command-line overrides applied by the
//! binary. After validation it is treated as immutable and handed to every
//! component explicitly.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use relay_error::{Classify, ErrorCode};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The configuration file exists but could not be read.
    #[error("cannot read config file {path}")]
    Read {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {}", reasons.join("; "))]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

impl Classify for ConfigError {
    fn code(&self) -> ErrorCode {
        ErrorCode::ConfigInvalid
    }
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// The shutdown flush timeout is unusually large.
    LargeFlushTimeout {
        /// Timeout value in seconds.
        secs: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeFlushTimeout { secs } => {
                write!(f, "flush timeout of {secs}s delays shutdown")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// A credential. `Debug` and `Serialize` never reveal the value.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The credential itself.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the credential is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(REDACTED)
    }
}

const REDACTED: &str = "***";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    /// Destination log settings.
    pub log: LogSettings,

    /// Stream provider settings.
    pub provider: ProviderSettings,

    /// Path of the desired rule file (TOML or JSON).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<String>,

    /// Delete every remote rule before adding the desired ones.
    pub reset_rules: bool,

    /// Deadlines for remote calls and shutdown.
    pub timeouts: Timeouts,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Destination log (topic) settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    /// Base URL of the log service's REST endpoint.
    pub bootstrap_url: String,
    /// Cluster identifier used in REST paths.
    pub cluster_id: String,
    /// API key for the log service.
    pub api_key: Secret,
    /// API secret for the log service.
    pub api_secret: Secret,
    /// Target topic.
    pub topic: String,
    /// Partition count used when the topic has to be created.
    pub partitions: u32,
    /// Replication factor used when the topic has to be created.
    pub replication_factor: u32,
    /// Constant key attached to every record.
    pub message_key: String,
    /// Key records by event id instead of the constant key.
    pub key_by_event_id: bool,
    /// Capacity of the producer's local queue.
    pub queue_capacity: usize,
    /// Records the producer keeps in flight at once.
    pub max_in_flight: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            bootstrap_url: String::new(),
            cluster_id: String::new(),
            api_key: Secret::default(),
            api_secret: Secret::default(),
            topic: String::new(),
            partitions: 1,
            replication_factor: 3,
            message_key: DEFAULT_MESSAGE_KEY.into(),
            key_by_event_id: false,
            queue_capacity: 10_000,
            max_in_flight: 16,
        }
    }
}

/// Stream provider settings.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderSettings {
    /// API key used for the client-credentials exchange.
    pub api_key: Secret,
    /// API secret used for the client-credentials exchange.
    pub api_secret: Secret,
    /// OAuth2 token endpoint.
    pub token_url: String,
    /// Base URL of the provider API.
    pub api_url: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key: Secret::default(),
            api_secret: Secret::default(),
            token_url: DEFAULT_TOKEN_URL.into(),
            api_url: DEFAULT_API_URL.into(),
        }
    }
}

/// Deadlines, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    /// Ceiling for topic-admin and rule-store calls.
    pub admin_secs: u64,
    /// Time allowed to flush buffered records at shutdown.
    pub flush_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            admin_secs: 60,
            flush_secs: 15,
        }
    }
}

impl Timeouts {
    /// [`admin_secs`](Self::admin_secs) as a [`Duration`].
    pub fn admin(&self) -> Duration {
        Duration::from_secs(self.admin_secs)
    }

    /// [`flush_secs`](Self::flush_secs) as a [`Duration`].
    pub fn flush(&self) -> Duration {
        Duration::from_secs(self.flush_secs)
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default OAuth2 token endpoint of the provider.
pub const DEFAULT_TOKEN_URL: &str = "https://api.twitter.com/oauth2/token";

/// Default provider API base URL.
pub const DEFAULT_API_URL: &str = "https://api.twitter.com";

/// Default record key.
pub const DEFAULT_MESSAGE_KEY: &str = "tweet";

/// Maximum deadline for admin calls.
const MAX_ADMIN_SECS: u64 = 3_600;

/// Maximum flush timeout.
const MAX_FLUSH_SECS: u64 = 600;

/// Flush timeouts above this produce a warning.
const LARGE_FLUSH_THRESHOLD: u64 = 60;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`RelayConfig`] from an optional TOML file path, then apply
/// environment overrides from the process environment.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Like [`load_config`], with `lookup` standing in for the environment.
pub fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => parse_toml(&read_file(p)?)?,
        None => RelayConfig::default(),
    };
    apply_env_overrides_with(&mut config, lookup);
    Ok(config)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| {
        let path = path.display().to_string();
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound { path }
        } else {
            ConfigError::Read { path, source }
        }
    })
}

/// Parse a TOML string into a [`RelayConfig`].
pub fn parse_toml(content: &str) -> Result<RelayConfig, ConfigError> {
    toml::from_str::<RelayConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// JSON Schema describing the configuration file.
pub fn json_schema() -> schemars::Schema {
    schemars::schema_for!(RelayConfig)
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply overrides from the process environment.
///
/// Recognised variables:
/// - `CONFLUENT_API_KEY`, `CONFLUENT_API_SECRET`
/// - `KAFKA_BOOTSTRAP_SERVERS`, `KAFKA_CLUSTER_ID`, `KAFKA_TOPIC`
/// - `TWITTER_API_KEY`, `TWITTER_API_SECRET`, `TWITTER_TOKEN_URL`, `TWITTER_API_URL`
/// - `RELAY_MESSAGE_KEY`, `RELAY_RULES_FILE`, `RELAY_RESET_RULES`, `RELAY_LOG_LEVEL`
pub fn apply_env_overrides(config: &mut RelayConfig) {
    apply_env_overrides_with(config, |key| std::env::var(key).ok());
}

/// Apply overrides using `lookup` as the environment.
pub fn apply_env_overrides_with<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("CONFLUENT_API_KEY") {
        config.log.api_key = Secret::new(val);
    }
    if let Some(val) = lookup("CONFLUENT_API_SECRET") {
        config.log.api_secret = Secret::new(val);
    }
    if let Some(val) = lookup("KAFKA_BOOTSTRAP_SERVERS") {
        config.log.bootstrap_url = val;
    }
    if let Some(val) = lookup("KAFKA_CLUSTER_ID") {
        config.log.cluster_id = val;
    }
    if let Some(val) = lookup("KAFKA_TOPIC") {
        config.log.topic = val;
    }
    if let Some(val) = lookup("RELAY_MESSAGE_KEY") {
        config.log.message_key = val;
    }
    if let Some(val) = lookup("TWITTER_API_KEY") {
        config.provider.api_key = Secret::new(val);
    }
    if let Some(val) = lookup("TWITTER_API_SECRET") {
        config.provider.api_secret = Secret::new(val);
    }
    if let Some(val) = lookup("TWITTER_TOKEN_URL") {
        config.provider.token_url = val;
    }
    if let Some(val) = lookup("TWITTER_API_URL") {
        config.provider.api_url = val;
    }
    if let Some(val) = lookup("RELAY_RULES_FILE") {
        config.rules_file = Some(val);
    }
    if let Some(val) = lookup("RELAY_RESET_RULES") {
        config.reset_rules = parse_flag(&val);
    }
    if let Some(val) = lookup("RELAY_LOG_LEVEL") {
        config.log_level = Some(val);
    }
}

fn parse_flag(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a configuration, returning advisory warnings.
///
/// Missing credentials, malformed URLs, and out-of-range numbers are hard
/// errors collected into a single [`ConfigError::ValidationError`].
pub fn validate_config(config: &RelayConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    let log = &config.log;
    check_url(&mut errors, "log.bootstrap_url", &log.bootstrap_url);
    check_present(&mut errors, "log.cluster_id", &log.cluster_id);
    check_present(&mut errors, "log.topic", &log.topic);
    if log.api_key.is_blank() {
        errors.push("log.api_key must be set".into());
    }
    if log.api_secret.is_blank() {
        errors.push("log.api_secret must be set".into());
    }
    if log.partitions == 0 {
        errors.push("log.partitions must be at least 1".into());
    }
    if log.replication_factor == 0 {
        errors.push("log.replication_factor must be at least 1".into());
    }
    if log.queue_capacity == 0 {
        errors.push("log.queue_capacity must be at least 1".into());
    }
    if log.max_in_flight == 0 {
        errors.push("log.max_in_flight must be at least 1".into());
    }
    if !log.key_by_event_id && log.message_key.is_empty() {
        errors.push("log.message_key must not be empty".into());
    }

    let provider = &config.provider;
    if provider.api_key.is_blank() {
        errors.push("provider.api_key must be set".into());
    }
    if provider.api_secret.is_blank() {
        errors.push("provider.api_secret must be set".into());
    }
    check_url(&mut errors, "provider.token_url", &provider.token_url);
    check_url(&mut errors, "provider.api_url", &provider.api_url);

    let t = &config.timeouts;
    if t.admin_secs == 0 || t.admin_secs > MAX_ADMIN_SECS {
        errors.push(format!(
            "timeouts.admin_secs {} out of range (1..={MAX_ADMIN_SECS})",
            t.admin_secs
        ));
    }
    if t.flush_secs > MAX_FLUSH_SECS {
        errors.push(format!(
            "timeouts.flush_secs {} out of range (0..={MAX_FLUSH_SECS})",
            t.flush_secs
        ));
    } else if t.flush_secs > LARGE_FLUSH_THRESHOLD {
        warnings.push(ConfigWarning::LargeFlushTimeout { secs: t.flush_secs });
    }

    if let Some(ref level) = config.log_level {
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(format!("invalid log_level '{level}'"));
        }
    }

    if config.rules_file.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "rules_file".into(),
            hint: "`run` refuses to start without a rule file".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

fn check_present(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{field} must be set"));
    }
}

fn check_url(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{field} must be set"));
    } else if !(value.starts_with("http://") || value.starts_with("https://")) {
        errors.push(format!("{field} '{value}' must be an http(s) URL"));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn complete() -> RelayConfig {
        let mut cfg = RelayConfig::default();
        apply_env_overrides_with(
            &mut cfg,
            env(&[
                ("CONFLUENT_API_KEY", "ck"),
                ("CONFLUENT_API_SECRET", "cs"),
                ("KAFKA_BOOTSTRAP_SERVERS", "https://pkc.example.cloud:443"),
                ("KAFKA_CLUSTER_ID", "lkc-123"),
                ("KAFKA_TOPIC", "tweets"),
                ("TWITTER_API_KEY", "tk"),
                ("TWITTER_API_SECRET", "ts"),
                ("RELAY_RULES_FILE", "rules.toml"),
            ]),
        );
        cfg
    }

    #[test]
    fn defaults() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.provider.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(cfg.log.partitions, 1);
        assert_eq!(cfg.log.replication_factor, 3);
        assert_eq!(cfg.timeouts.admin(), Duration::from_secs(60));
        assert_eq!(cfg.timeouts.flush(), Duration::from_secs(15));
        assert!(!cfg.reset_rules);
    }

    #[test]
    fn default_config_is_invalid_without_credentials() {
        let err = validate_config(&RelayConfig::default()).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("log.api_key")));
                assert!(reasons.iter().any(|r| r.contains("provider.api_secret")));
                assert!(reasons.iter().any(|r| r.contains("log.topic")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn env_overrides_complete_the_config() {
        let cfg = complete();
        assert_eq!(cfg.log.topic, "tweets");
        assert_eq!(cfg.provider.api_key.expose(), "tk");
        let warnings = validate_config(&cfg).expect("valid");
        assert!(warnings.is_empty());
    }

    #[test]
    fn reset_flag_parsing() {
        let mut cfg = RelayConfig::default();
        apply_env_overrides_with(&mut cfg, env(&[("RELAY_RESET_RULES", "TRUE")]));
        assert!(cfg.reset_rules);
        apply_env_overrides_with(&mut cfg, env(&[("RELAY_RESET_RULES", "0")]));
        assert!(!cfg.reset_rules);
    }

    #[test]
    fn non_http_url_is_rejected() {
        let mut cfg = complete();
        cfg.log.bootstrap_url = "pkc.example.cloud:9092".into();
        let err = validate_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("must be an http(s) URL"));
    }

    #[test]
    fn zero_admin_timeout_is_rejected() {
        let mut cfg = complete();
        cfg.timeouts.admin_secs = 0;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn large_flush_timeout_warns() {
        let mut cfg = complete();
        cfg.timeouts.flush_secs = 120;
        let warnings = validate_config(&cfg).unwrap();
        assert_eq!(warnings, vec![ConfigWarning::LargeFlushTimeout { secs: 120 }]);
    }

    #[test]
    fn missing_rules_file_warns() {
        let mut cfg = complete();
        cfg.rules_file = None;
        let warnings = validate_config(&cfg).unwrap();
        assert!(matches!(
            warnings.as_slice(),
            [ConfigWarning::MissingOptionalField { field, .. }] if field == "rules_file"
        ));
    }

    #[test]
    fn invalid_log_level() {
        let mut cfg = complete();
        cfg.log_level = Some("verbose".into());
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn secrets_are_redacted() {
        let cfg = complete();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("\"ck\""));
        assert!(dbg.contains("***"));
        let toml = toml::to_string(&cfg).unwrap();
        assert!(!toml.contains("\"cs\""));
    }

    #[test]
    fn parse_partial_toml_keeps_defaults() {
        let cfg = parse_toml(
            r#"
            reset_rules = true
            [log]
            topic = "tweets"
            max_in_flight = 4
            [timeouts]
            flush_secs = 5
            "#,
        )
        .unwrap();
        assert!(cfg.reset_rules);
        assert_eq!(cfg.log.topic, "tweets");
        assert_eq!(cfg.log.max_in_flight, 4);
        assert_eq!(cfg.log.queue_capacity, 10_000);
        assert_eq!(cfg.timeouts.admin_secs, 60);
        assert_eq!(cfg.timeouts.flush_secs, 5);
    }

    #[test]
    fn parse_wrong_types_gives_parse_error() {
        let err = parse_toml("reset_rules = 42").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn schema_lists_top_level_sections() {
        let schema = serde_json::to_value(json_schema()).unwrap();
        let props = schema["properties"].as_object().expect("properties");
        for key in ["log", "provider", "timeouts", "rules_file", "reset_rules"] {
            assert!(props.contains_key(key), "missing {key}");
        }
    }

    // -- Loading from disk --

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn load_reads_file() {
        let f = write_config("[log]\ntopic = \"tweets\"\npartitions = 6\n");
        let cfg = load_config_with(Some(f.path()), env(&[])).unwrap();
        assert_eq!(cfg.log.topic, "tweets");
        assert_eq!(cfg.log.partitions, 6);
    }

    #[test]
    fn load_missing_file_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_config_with(Some(&path), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }), "{err:?}");
    }

    #[test]
    fn load_unreadable_path_keeps_io_source() {
        // A directory exists but cannot be read as a file.
        let dir = tempfile::tempdir().unwrap();
        let err = load_config_with(Some(dir.path()), env(&[])).unwrap_err();
        match &err {
            ConfigError::Read { path, .. } => assert_eq!(path, &dir.path().display().to_string()),
            other => panic!("expected Read, got {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn load_malformed_file_is_parse_error() {
        let f = write_config("[log\ntopic = ");
        let err = load_config_with(Some(f.path()), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }), "{err:?}");
    }

    #[test]
    fn env_overrides_win_over_file() {
        let f = write_config("[log]\ntopic = \"from-file\"\ncluster_id = \"lkc-file\"\n");
        let cfg = load_config_with(Some(f.path()), env(&[("KAFKA_TOPIC", "from-env")])).unwrap();
        assert_eq!(cfg.log.topic, "from-env");
        assert_eq!(cfg.log.cluster_id, "lkc-file");
    }

    #[test]
    fn config_errors_classify_as_config_invalid() {
        let err = ConfigError::FileNotFound { path: "x".into() };
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
        assert_eq!(err.code().exit_code(), 2);
    }
}
