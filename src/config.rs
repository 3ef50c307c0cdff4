//! Configuration loading.
//!
//! A run is described by one TOML file:
//!
//! ```toml
//! credentials_file = "Credentials/kore_credentials.json"
//!
//! [harvest]
//! on_failure = "discard"
//! delivery = "batch"
//!
//! [harvest.backoff]
//! initial_secs = 60
//! max_retries = 8
//!
//! [sink]
//! kind = "csv"
//! path = "agent_status_hourly.csv"
//! ```
//!
//! Credentials come either from an inline `[credentials]` table or from a
//! JSON file using the platform's key names (`host`, `account_id`,
//! `jwt_token`, `app_id`). `HARVEST_AUTH_TOKEN` overrides the token.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::harvest::pipeline::PausePolicy;
use crate::harvest::transport::BackoffPolicy;

/// Environment variable that replaces the configured auth token.
pub const AUTH_TOKEN_ENV: &str = "HARVEST_AUTH_TOKEN";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Failed to read credentials file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid credentials file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Credential field '{0}' is empty")]
    Empty(&'static str),
    #[error("No credentials configured: set credentials_file or [credentials]")]
    NotConfigured,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

// ============================================================================
// Credentials
// ============================================================================

/// Connection parameters for one analytics account.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,

    #[serde(alias = "accountId")]
    pub account_id: String,

    #[serde(alias = "jwt_token", alias = "authToken")]
    pub auth_token: String,

    #[serde(alias = "app_id", alias = "botId")]
    pub bot_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("account_id", &self.account_id)
            .field("auth_token", &"<redacted>")
            .field("bot_id", &self.bot_id)
            .finish()
    }
}

impl Credentials {
    pub fn from_file(path: &Path) -> Result<Self, CredentialError> {
        let content = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let credentials: Credentials =
            serde_json::from_str(&content).map_err(|source| CredentialError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn validate(&self) -> Result<(), CredentialError> {
        let fields = [
            ("host", &self.host),
            ("account_id", &self.account_id),
            ("auth_token", &self.auth_token),
            ("bot_id", &self.bot_id),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(CredentialError::Empty(name));
            }
        }
        Ok(())
    }

    /// Replaces the auth token when `token` is set and non-empty.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.auth_token = token;
        }
        self
    }
}

// ============================================================================
// Harvest Settings
// ============================================================================

/// What happens to rows gathered before a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartialFailurePolicy {
    /// Drop them; the sink is not called.
    Discard,
    /// Hand them to the sink anyway.
    FlushPartial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMode {
    /// One sink write after the last page.
    #[default]
    Batch,
    /// One sink write per processed page.
    Streaming,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial")]
    pub initial_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub max_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// 0 retries forever.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_backoff_initial() -> u64 {
    60
}
fn default_backoff_max() -> u64 {
    900
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    8
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: default_backoff_initial(),
            max_secs: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
            jitter: true,
            max_retries: default_max_retries(),
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(self.initial_secs),
            max_delay: Duration::from_secs(self.max_secs),
            multiplier: self.multiplier,
            jitter: self.jitter,
            max_retries: (self.max_retries > 0).then_some(self.max_retries),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HarvestSettings {
    pub on_failure: PartialFailurePolicy,
    #[serde(default)]
    pub delivery: DeliveryMode,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub time_zone_offset: Option<i32>,
    #[serde(default = "default_pause_after")]
    pub pause_after_requests: u32,
    #[serde(default = "default_pause_secs")]
    pub pause_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_pause_after() -> u32 {
    60
}
fn default_pause_secs() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    30
}

impl HarvestSettings {
    pub fn pause_policy(&self) -> PausePolicy {
        PausePolicy {
            after_requests: self.pause_after_requests,
            interval: Duration::from_secs(self.pause_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Sink Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Csv,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,
    pub path: PathBuf,
    #[serde(default)]
    pub uppercase_columns: bool,
    #[serde(default = "default_chunk_rows")]
    pub chunk_rows: usize,
}

fn default_chunk_rows() -> usize {
    10_000
}

impl SinkKind {
    /// Kind named by a file extension (`.csv`, `.json`), if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(SinkKind::Csv),
            "json" => Some(SinkKind::Json),
            _ => None,
        }
    }
}

impl SinkConfig {
    /// Points the sink at `path`. A recognized extension also switches the
    /// kind; otherwise the configured kind stays.
    pub fn with_path(mut self, path: PathBuf) -> Self {
        if let Some(kind) = SinkKind::from_path(&path) {
            self.kind = kind;
        }
        self.path = path;
        self
    }
}

// ============================================================================
// Top-level Config
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    pub harvest: HarvestSettings,
    pub sink: SinkConfig,
}

impl Config {
    /// Resolves credentials from the inline table or the credentials file,
    /// then applies [`AUTH_TOKEN_ENV`].
    pub fn resolve_credentials(&self) -> Result<Credentials, CredentialError> {
        let credentials = match (&self.credentials, &self.credentials_file) {
            (Some(inline), _) => {
                inline.validate()?;
                inline.clone()
            }
            (None, Some(path)) => Credentials::from_file(path)?,
            (None, None) => return Err(CredentialError::NotConfigured),
        };
        Ok(credentials.with_auth_token(std::env::var(AUTH_TOKEN_ENV).ok()))
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;

    if config.credentials.is_some() && config.credentials_file.is_some() {
        return Err(ConfigError::Invalid(
            "set either credentials_file or [credentials], not both".to_string(),
        ));
    }

    // Validate harvest
    if config.harvest.page_size == Some(0) {
        return Err(ConfigError::Invalid(
            "harvest.page_size must be > 0".to_string(),
        ));
    }
    if config.harvest.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "harvest.request_timeout_secs must be > 0".to_string(),
        ));
    }

    let backoff = &config.harvest.backoff;
    if backoff.multiplier < 1.0 {
        return Err(ConfigError::Invalid(
            "harvest.backoff.multiplier must be >= 1.0".to_string(),
        ));
    }
    if backoff.initial_secs > backoff.max_secs {
        return Err(ConfigError::Invalid(format!(
            "harvest.backoff.initial_secs ({}) exceeds max_secs ({})",
            backoff.initial_secs, backoff.max_secs
        )));
    }

    // Validate sink
    if config.sink.chunk_rows == 0 {
        return Err(ConfigError::Invalid("sink.chunk_rows must be > 0".to_string()));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [credentials]
        host = "platform.test"
        account_id = "acct"
        auth_token = "token"
        bot_id = "bot"

        [harvest]
        on_failure = "flush-partial"

        [sink]
        path = "out.csv"
    "#;

    #[test]
    fn test_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.harvest.on_failure, PartialFailurePolicy::FlushPartial);
        assert_eq!(config.harvest.delivery, DeliveryMode::Batch);
        assert_eq!(config.harvest.pause_policy(), PausePolicy::default());
        assert_eq!(config.harvest.backoff.policy(), BackoffPolicy::default());
        assert_eq!(config.sink.kind, SinkKind::Csv);
        assert_eq!(config.sink.chunk_rows, 10_000);
    }

    #[test]
    fn test_on_failure_is_required() {
        let without = MINIMAL.replace("on_failure = \"flush-partial\"", "");
        assert!(matches!(parse_config(&without), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unbounded_retries() {
        let text = format!("{MINIMAL}\n[harvest.backoff]\nmax_retries = 0\n");
        let config = parse_config(&text).unwrap();
        assert_eq!(config.harvest.backoff.policy().max_retries, None);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let text = MINIMAL.replace("[sink]", "page_size = 0\n[sink]");
        assert!(matches!(parse_config(&text), Err(ConfigError::Invalid(_))));

        let text = format!("{MINIMAL}\n[harvest.backoff]\ninitial_secs = 600\nmax_secs = 60\n");
        assert!(matches!(parse_config(&text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_credentials_file_uses_platform_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"host": "platform.test", "account_id": "acct", "jwt_token": "jwt", "app_id": "st-1"}}"#
        )
        .unwrap();

        let credentials = Credentials::from_file(file.path()).unwrap();
        assert_eq!(credentials.auth_token, "jwt");
        assert_eq!(credentials.bot_id, "st-1");
        assert!(!format!("{credentials:?}").contains("jwt"));
    }

    #[test]
    fn test_credential_errors() {
        let missing = Credentials::from_file(Path::new("/nonexistent/creds.json"));
        assert!(matches!(missing, Err(CredentialError::Read { .. })));

        let blank = Credentials {
            host: "h".into(),
            account_id: " ".into(),
            auth_token: "t".into(),
            bot_id: "b".into(),
        };
        assert!(matches!(
            blank.validate(),
            Err(CredentialError::Empty("account_id"))
        ));

        let text = MINIMAL.replace("[credentials]", "[unused]");
        let config = parse_config(&text).unwrap();
        assert!(matches!(
            config.resolve_credentials(),
            Err(CredentialError::NotConfigured)
        ));
    }

    #[test]
    fn test_output_path_selects_sink_kind() {
        let sink = parse_config(MINIMAL).unwrap().sink;
        assert_eq!(sink.kind, SinkKind::Csv);

        let json = sink.clone().with_path(PathBuf::from("calls.JSON"));
        assert_eq!(json.kind, SinkKind::Json);
        assert_eq!(json.path, PathBuf::from("calls.JSON"));

        let back = json.clone().with_path(PathBuf::from("Data/calls.csv"));
        assert_eq!(back.kind, SinkKind::Csv);

        let unknown = json.with_path(PathBuf::from("calls.out"));
        assert_eq!(unknown.kind, SinkKind::Json);
    }

    #[test]
    fn test_auth_token_override() {
        let config = parse_config(MINIMAL).unwrap();
        let credentials = config.credentials.unwrap();
        assert_eq!(
            credentials.clone().with_auth_token(Some("fresh".into())).auth_token,
            "fresh"
        );
        assert_eq!(credentials.with_auth_token(Some("".into())).auth_token, "token");
    }
}
