//! Single-request ingestion protocol
//!
//! Builds the request for one batch, performs it through a [`Transport`] and interprets the
//! answer. Failures are returned as values, reported once to the `on_error` hook and, when
//! `debug` is set, written to the log.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error};
use url::Url;

use crate::client::transport::{HttpRequest, Transport};
use crate::config::{ClientConfig, Endpoint, IngestionTarget};
use crate::types::LogEvent;
use crate::{LogflareError, NetworkError, Result};

/// `Accept` header sent with every request
pub const ACCEPT: &str = "application/json, text/plain, */*";

/// Header carrying the API key outside browser mode
pub const API_KEY_HEADER: &str = "X-API-Key";

/// The batch a failed request was carrying
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchPayload {
    /// Events in send order
    pub batch: Vec<LogEvent>,
}

/// Hook invoked once per failed request
pub type ErrorCallback = Arc<dyn Fn(&BatchPayload, &LogflareError) + Send + Sync>;

/// Sends batches to the ingestion API
#[derive(Clone)]
pub struct IngestClient {
    target: IngestionTarget,
    endpoint: Endpoint,
    from_browser: bool,
    debug: bool,
    on_error: Option<ErrorCallback>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for IngestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestClient")
            .field("source", &self.target.source)
            .field("api_base_url", &self.target.api_base_url.as_str())
            .field("endpoint", &self.endpoint)
            .field("from_browser", &self.from_browser)
            .field("debug", &self.debug)
            .field("on_error", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}

impl IngestClient {
    /// Create an ingest client; fails if the configuration is invalid
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Ok(Self {
            target: config.target()?,
            endpoint: config.endpoint,
            from_browser: config.from_browser,
            debug: config.debug,
            on_error: None,
            transport,
        })
    }

    /// Install the failure hook
    pub fn with_error_handler(mut self, on_error: ErrorCallback) -> Self {
        self.on_error = Some(on_error);
        self
    }

    /// URL every batch is posted to
    pub fn url(&self) -> Result<Url> {
        let mut url = self.target.api_base_url.join(self.endpoint.path())?;
        {
            let mut query = url.query_pairs_mut();
            let (name, value) = self.target.source.query_pair();
            query.append_pair(name, value);
            if self.from_browser {
                query.append_pair("api_key", &self.target.api_key);
            }
        }
        Ok(url)
    }

    /// Build the request for `batch` without sending it
    pub fn build_request(&self, batch: &[LogEvent]) -> Result<HttpRequest> {
        let mut body = Map::new();
        body.insert("batch".to_string(), serde_json::to_value(batch)?);

        let mut headers = vec![
            ("Accept", ACCEPT.to_string()),
            ("Content-Type", "application/json".to_string()),
        ];

        if !self.from_browser {
            headers.push((API_KEY_HEADER, self.target.api_key.clone()));
            if let Some(token) = self.target.source.token() {
                body.insert("source".to_string(), Value::String(token.to_string()));
            }
        }

        Ok(HttpRequest {
            url: self.url()?,
            headers,
            body: Value::Object(body),
        })
    }

    /// Post one batch, returning the parsed success body or the failure
    pub async fn post_log_events(&self, batch: Vec<LogEvent>) -> Result<Value> {
        let payload = BatchPayload { batch };

        match self.send(&payload).await {
            Ok(body) => Ok(body),
            Err(err) => {
                self.report(&payload, &err);
                Err(err)
            }
        }
    }

    async fn send(&self, payload: &BatchPayload) -> Result<Value> {
        let request = self.build_request(&payload.batch)?;
        debug!(url = %request.url, events = payload.batch.len(), "Posting log events");

        let response = self.transport.post(&request).await?;
        if !response.is_success() {
            return Err(NetworkError {
                status: response.status,
                data: response.body,
                url: request.url.to_string(),
            }
            .into());
        }

        Ok(response.body)
    }

    fn report(&self, payload: &BatchPayload, err: &LogflareError) {
        if self.debug {
            match err {
                LogflareError::Network(e) => error!(
                    "Logflare API request failed with {} status: {}",
                    e.status, e.data
                ),
                LogflareError::Transport(e) => error!("{}", e),
                other => error!("{}", other),
            }
        }

        if let Some(on_error) = &self.on_error {
            on_error(payload, err);
        }
    }
}
