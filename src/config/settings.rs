//! Configuration structures for the client

use crate::{LogflareError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default ingestion API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://api.logflare.app";

/// Default number of queued events that triggers a flush
pub const DEFAULT_BATCH_MAX_SIZE: usize = 100;

/// Default flush timer period in milliseconds
pub const DEFAULT_BATCH_FLUSH_INTERVAL_MS: u64 = 1000;

/// Prefix of environment variables read by [`ClientConfig::load`]
pub const ENV_PREFIX: &str = "LOGFLARE";

/// Which ingestion route events are posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// `/logs`
    #[default]
    Logs,
    /// `/logs/typecasts`, where the service applies its own typecasting
    Typecasting,
}

impl Endpoint {
    /// URL path of this route
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Logs => "/logs",
            Endpoint::Typecasting => "/logs/typecasts",
        }
    }
}

/// When queued events are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Queue events; flush on size threshold or timer
    #[default]
    Batched,
    /// Send every call to `add_log_event` right away
    Immediate,
}

/// Local payload transforms
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transforms {
    /// Rewrite numeric metadata leaves to strings before queueing
    #[serde(alias = "js_numbers")]
    pub numbers_to_floats: bool,
}

/// Ingestion source identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Source UUID token, sent as `source`
    Token(String),
    /// Source name, sent as `source_name`
    Name(String),
}

impl Source {
    /// Query parameter name and value identifying this source
    pub fn query_pair(&self) -> (&'static str, &str) {
        match self {
            Source::Token(token) => ("source", token.as_str()),
            Source::Name(name) => ("source_name", name.as_str()),
        }
    }

    /// The token, if this source is identified by one
    pub fn token(&self) -> Option<&str> {
        match self {
            Source::Token(token) => Some(token.as_str()),
            Source::Name(_) => None,
        }
    }
}

/// A validated destination for log events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionTarget {
    /// Source the events belong to
    pub source: Source,
    /// API key for the account
    pub api_key: String,
    /// Base URL of the ingestion API
    pub api_base_url: Url,
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Source token; exactly one of this and `source_name` must be set
    pub source_token: Option<String>,
    /// Source name; exactly one of this and `source_token` must be set
    pub source_name: Option<String>,
    /// API key, required
    pub api_key: String,
    /// Base URL of the ingestion API
    pub api_base_url: String,
    /// Queued events that trigger an immediate flush
    pub batch_max_size: usize,
    /// Flush timer period in milliseconds
    pub batch_flush_interval_ms: u64,
    /// Batched or immediate sending
    pub flush_policy: FlushPolicy,
    /// Ingestion route
    pub endpoint: Endpoint,
    /// Send the API key as a query parameter instead of a header
    pub from_browser: bool,
    /// Emit diagnostics for failed requests
    pub debug: bool,
    /// Transport timeout in milliseconds; none by default
    pub request_timeout_ms: Option<u64>,
    /// Local payload transforms
    pub transforms: Transforms,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            source_token: None,
            source_name: None,
            api_key: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
            batch_flush_interval_ms: DEFAULT_BATCH_FLUSH_INTERVAL_MS,
            flush_policy: FlushPolicy::default(),
            endpoint: Endpoint::default(),
            from_browser: false,
            debug: false,
            request_timeout_ms: None,
            transforms: Transforms::default(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl ClientConfig {
    /// Load configuration from an optional TOML file overlaid with `LOGFLARE_*` variables
    ///
    /// Nested keys use a double underscore, e.g. `LOGFLARE_TRANSFORMS__NUMBERS_TO_FLOATS`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`ClientConfig::load`] but without validation, for callers that apply their own
    /// overrides first
    pub fn read(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| LogflareError::Config(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| LogflareError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(content)
            .map_err(|e| LogflareError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Render as TOML with the API key masked
    pub fn to_toml_string(&self) -> Result<String> {
        let mut redacted = self.clone();
        if !redacted.api_key.is_empty() {
            redacted.api_key = "<redacted>".to_string();
        }
        toml::to_string_pretty(&redacted)
            .map_err(|e| LogflareError::Config(format!("Failed to render config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.target().map(|_| ())
    }

    /// Validate and resolve the ingestion destination
    pub fn target(&self) -> Result<IngestionTarget> {
        let source = match (non_empty(&self.source_token), non_empty(&self.source_name)) {
            (Some(token), None) => Source::Token(token.to_string()),
            (None, Some(name)) => Source::Name(name.to_string()),
            (None, None) => {
                return Err(LogflareError::Config(
                    "Ingestion source is not configured. source_token or source_name is not set."
                        .to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(LogflareError::Config(
                    "Only one of source_name or source_token can be set.".to_string(),
                ))
            }
        };

        if self.api_key.is_empty() {
            return Err(LogflareError::Config(
                "Ingestion API key is not configured.".to_string(),
            ));
        }
        if self.batch_max_size == 0 {
            return Err(LogflareError::Config(
                "batch_max_size must be greater than zero".to_string(),
            ));
        }
        if self.batch_flush_interval_ms == 0 {
            return Err(LogflareError::Config(
                "batch_flush_interval_ms must be greater than zero".to_string(),
            ));
        }

        let api_base_url = Url::parse(&self.api_base_url).map_err(|e| {
            LogflareError::Config(format!("Invalid api_base_url {:?}: {}", self.api_base_url, e))
        })?;

        Ok(IngestionTarget {
            source,
            api_key: self.api_key.clone(),
            api_base_url,
        })
    }

    /// Flush timer period
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_flush_interval_ms)
    }

    /// Transport timeout, if configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}
