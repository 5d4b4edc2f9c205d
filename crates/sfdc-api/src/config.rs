//! Connection and replay settings.
//!
//! Settings live under a `salesforce` section, either in a TOML document
//! (`[salesforce]` table) or in a JSON object handed over by the host:
//!
//! ```toml
//! [salesforce]
//! username = "integration@example.com"
//! password = "..."
//! security_token = "..."
//! sandbox = false
//! api_version = "37.0"
//!
//! [salesforce.replay]
//! enabled = true
//! storage_uri = "sqlite:///var/lib/sfdc/replay.db"
//! ttl_secs = 43200
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::DEFAULT_API_VERSION;

/// Name of the settings section.
pub const CONFIG_SECTION: &str = "salesforce";

/// Default Bayeux protocol version.
pub const DEFAULT_BAYEUX_VERSION: &str = "1.0";

/// Default replay cursor time to live (12 hours).
pub const DEFAULT_REPLAY_TTL: Duration = Duration::from_secs(60 * 60 * 12);

/// Upper bound for the replay cursor TTL.
///
/// Salesforce keeps events for 24 hours; subscribing with an older replay
/// id fails.
pub const MAX_REPLAY_TTL: Duration = Duration::from_secs(60 * 60 * 24);

const PRODUCTION_LOGIN_URL: &str = "https://login.salesforce.com";
const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";

/// Configuration errors. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings section is absent.
    #[error("`salesforce` config key not found")]
    MissingSection,

    /// A mandatory key is absent.
    #[error("`salesforce` configuration does not contain mandatory `{0}` key")]
    MissingKey(&'static str),

    /// Replay tracking was enabled without a storage location.
    #[error(
        "`salesforce` must have `replay.storage_uri` defined if `replay.enabled` is set to `true`"
    )]
    MissingReplayStorage,

    /// A value is present but unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The document could not be parsed.
    #[error("Configuration parse error: {0}")]
    Parse(String),

    /// The document could not be read.
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Replay cursor tracking settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Whether the last processed replay id is persisted per channel.
    pub enabled: bool,
    /// Storage location (`sqlite://<path>`, `sqlite::memory:`, `memory://`).
    pub storage_uri: Option<String>,
    /// Time to live of a stored cursor, refreshed on every write.
    pub ttl: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            storage_uri: None,
            ttl: DEFAULT_REPLAY_TTL,
        }
    }
}

/// Salesforce connection settings.
#[derive(Clone)]
pub struct SalesforceConfig {
    /// API username.
    pub username: String,
    /// API password.
    pub password: String,
    /// Security token appended to the password on login.
    pub security_token: String,
    /// Connect to a sandbox organisation.
    pub sandbox: bool,
    /// REST API version, e.g. `37.0`.
    pub api_version: String,
    /// Login endpoint override.
    pub login_url: Option<String>,
    /// Bayeux protocol version.
    pub bayeux_version: String,
    /// Oldest Bayeux protocol version the client accepts.
    pub bayeux_minimum_version: String,
    /// Replay tracking.
    pub replay: ReplayConfig,
}

impl fmt::Debug for SalesforceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SalesforceConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("security_token", &"<redacted>")
            .field("sandbox", &self.sandbox)
            .field("api_version", &self.api_version)
            .field("login_url", &self.login_url)
            .field("bayeux_version", &self.bayeux_version)
            .field("bayeux_minimum_version", &self.bayeux_minimum_version)
            .field("replay", &self.replay)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    salesforce: Option<RawConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    username: Option<String>,
    password: Option<String>,
    security_token: Option<String>,
    sandbox: Option<bool>,
    api_version: Option<String>,
    login_url: Option<String>,
    bayeux_version: Option<String>,
    bayeux_minimum_version: Option<String>,
    #[serde(default)]
    replay: RawReplayConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawReplayConfig {
    enabled: Option<bool>,
    storage_uri: Option<String>,
    ttl_secs: Option<u64>,
}

impl SalesforceConfig {
    /// Build a configuration with defaults for every optional setting.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        security_token: impl Into<String>,
        sandbox: bool,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            security_token: security_token.into(),
            sandbox,
            api_version: DEFAULT_API_VERSION.to_string(),
            login_url: None,
            bayeux_version: DEFAULT_BAYEUX_VERSION.to_string(),
            bayeux_minimum_version: DEFAULT_BAYEUX_VERSION.to_string(),
            replay: ReplayConfig::default(),
        }
    }

    /// Builder: set the API version.
    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Builder: override the login endpoint.
    #[must_use]
    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = Some(login_url.into());
        self
    }

    /// Builder: set replay tracking.
    #[must_use]
    pub fn with_replay(mut self, replay: ReplayConfig) -> Self {
        self.replay = replay;
        self
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the document is malformed or incomplete.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let doc: RawDocument =
            toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(doc.salesforce.ok_or(ConfigError::MissingSection)?)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate host-supplied settings (`{"salesforce": {...}}`).
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the value is malformed or incomplete.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let doc: RawDocument = serde_json::from_value(value.clone())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_raw(doc.salesforce.ok_or(ConfigError::MissingSection)?)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let config = Self {
            username: raw.username.ok_or(ConfigError::MissingKey("username"))?,
            password: raw.password.ok_or(ConfigError::MissingKey("password"))?,
            security_token: raw
                .security_token
                .ok_or(ConfigError::MissingKey("security_token"))?,
            sandbox: raw.sandbox.ok_or(ConfigError::MissingKey("sandbox"))?,
            api_version: raw
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            login_url: raw.login_url,
            bayeux_version: raw
                .bayeux_version
                .unwrap_or_else(|| DEFAULT_BAYEUX_VERSION.to_string()),
            bayeux_minimum_version: raw
                .bayeux_minimum_version
                .unwrap_or_else(|| DEFAULT_BAYEUX_VERSION.to_string()),
            replay: ReplayConfig {
                enabled: raw.replay.enabled.unwrap_or(false),
                storage_uri: raw.replay.storage_uri,
                ttl: raw
                    .replay
                    .ttl_secs
                    .map_or(DEFAULT_REPLAY_TTL, Duration::from_secs),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`ConfigError`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid("username cannot be empty".into()));
        }

        if self.api_version.trim().is_empty() {
            return Err(ConfigError::Invalid("api_version cannot be empty".into()));
        }

        if let Some(login_url) = &self.login_url {
            let parsed = url::Url::parse(login_url)
                .map_err(|e| ConfigError::Invalid(format!("Invalid login_url: {e}")))?;
            if !matches!(parsed.scheme(), "https" | "http") {
                return Err(ConfigError::Invalid(
                    "login_url must be http or https".into(),
                ));
            }
        }

        if self.replay.enabled && self.replay.storage_uri.is_none() {
            return Err(ConfigError::MissingReplayStorage);
        }

        if self.replay.ttl.is_zero() || self.replay.ttl > MAX_REPLAY_TTL {
            return Err(ConfigError::Invalid(format!(
                "replay ttl must be between 1s and {}s",
                MAX_REPLAY_TTL.as_secs()
            )));
        }

        Ok(())
    }

    /// Login endpoint, derived from the sandbox flag unless overridden.
    #[must_use]
    pub fn login_url(&self) -> &str {
        self.login_url.as_deref().map_or_else(
            || {
                if self.sandbox {
                    SANDBOX_LOGIN_URL
                } else {
                    PRODUCTION_LOGIN_URL
                }
            },
            |url| url.trim_end_matches('/'),
        )
    }
}
