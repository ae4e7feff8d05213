//! Network-server connection configuration.
//!
//! The configuration is owned by the caller and handed to an adapter once at
//! construction. It can be built in code, deserialized from JSON/TOML
//! (camelCase keys, snake_case accepted), or read from environment variables.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    MissingField(&'static str),

    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Environment variable suffixes read by [`ServerConfig::from_env`].
///
/// Each name is prefixed with the caller-supplied prefix and an underscore,
/// e.g. `CHIRPSTACK_API_URL`.
pub mod env_vars {
    pub const API_URL: &str = "API_URL";
    pub const TOKEN: &str = "TOKEN";
    pub const NS_RELAY_URL: &str = "NS_RELAY_URL";
    pub const APP_ID: &str = "APP_ID";
    pub const APP_URL: &str = "APP_URL";
    pub const REQUEST_TIMEOUT_SECS: &str = "REQUEST_TIMEOUT_SECS";
}

/// Connection parameters for one network-server adapter instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Backend REST API base URL
    #[serde(alias = "api_url")]
    pub api_url: String,
    /// Bearer token for the backend API
    pub token: String,
    /// ns-relay base URL (downlink delivery and uplink SSE)
    #[serde(default, alias = "ns_relay_url")]
    pub ns_relay_url: Option<String>,
    /// Application identifier (TTN)
    #[serde(default, alias = "app_id")]
    pub app_id: Option<String>,
    /// Application console URL, used to derive `app_id` when it is absent (TTN)
    #[serde(default, alias = "app_url")]
    pub app_url: Option<String>,
    /// Per-request timeout; `None` leaves requests unbounded
    #[serde(default, alias = "request_timeout_secs")]
    pub request_timeout_secs: Option<u64>,
}

impl ServerConfig {
    /// Create a configuration with the two mandatory backend parameters.
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: token.into(),
            ns_relay_url: None,
            app_id: None,
            app_url: None,
            request_timeout_secs: None,
        }
    }

    /// Set the ns-relay base URL.
    pub fn with_ns_relay_url(mut self, url: impl Into<String>) -> Self {
        self.ns_relay_url = Some(url.into());
        self
    }

    /// Set the application identifier.
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    /// Set the application URL.
    pub fn with_app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = Some(app_url.into());
        self
    }

    /// Bound every request to `secs` seconds.
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Read `{prefix}_API_URL`, `{prefix}_TOKEN` and the optional
    /// `{prefix}_NS_RELAY_URL`, `{prefix}_APP_ID`, `{prefix}_APP_URL`,
    /// `{prefix}_REQUEST_TIMEOUT_SECS`.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{}_{}", prefix, suffix)).filter(|v| !v.trim().is_empty())
        };

        let request_timeout_secs = match var(env_vars::REQUEST_TIMEOUT_SECS) {
            Some(v) => Some(v.trim().parse::<u64>().map_err(|e| {
                ConfigError::Parse(format!("{}_{}: {}", prefix, env_vars::REQUEST_TIMEOUT_SECS, e))
            })?),
            None => None,
        };

        Ok(Self {
            api_url: var(env_vars::API_URL).ok_or(ConfigError::MissingField("apiUrl"))?,
            token: var(env_vars::TOKEN).ok_or(ConfigError::MissingField("token"))?,
            ns_relay_url: var(env_vars::NS_RELAY_URL),
            app_id: var(env_vars::APP_ID),
            app_url: var(env_vars::APP_URL),
            request_timeout_secs,
        })
    }

    /// Backend API base URL, normalized to end with `/` so that endpoint paths
    /// join below it instead of replacing its last segment.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        let mut url = parse_url("apiUrl", &self.api_url)?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// ns-relay base URL.
    pub fn relay_base(&self) -> Result<Url, ConfigError> {
        let raw = self
            .ns_relay_url
            .as_deref()
            .ok_or(ConfigError::MissingField("nsRelayUrl"))?;
        parse_url("nsRelayUrl", raw)
    }

    /// Effective application identifier: `app_id` when set, otherwise the last
    /// path segment of `app_url`.
    pub fn resolve_app_id(&self) -> Result<String, ConfigError> {
        if let Some(app_id) = self.app_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(app_id.to_string());
        }

        self.app_url
            .as_deref()
            .and_then(|url| url.trim_end_matches('/').rsplit('/').next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or(ConfigError::MissingField("appId"))
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })
}
