//! HTTP transport used by the ingest client
//!
//! The client only needs "POST this JSON, give me the status and the JSON answer". That seam
//! is the [`Transport`] trait so hosts and tests can substitute their own.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;
use url::Url;

use crate::TransportError;

/// One outbound JSON POST
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Fully built request URL, query included
    pub url: Url,
    /// Header name/value pairs, in send order
    pub headers: Vec<(&'static str, String)>,
    /// JSON body
    pub body: Value,
}

impl HttpRequest {
    /// Value of the first header named `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status and decoded body of a response
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Body parsed as JSON
    pub body: Value,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a JSON POST and decodes the JSON answer
///
/// Implementations decode the body regardless of status. A body that is not JSON is a
/// [`TransportError::Decode`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the request
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport, optionally bounding every request by `timeout`
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.post(request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        let builder = builder.json(&request.body);

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        trace!(status, len = bytes.len(), "Ingest response received");

        let body = serde_json::from_slice(&bytes)?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_range() {
        let response = |status| HttpResponse {
            status,
            body: Value::Null,
        };

        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(response(299).is_success());
        assert!(!response(199).is_success());
        assert!(!response(301).is_success());
        assert!(!response(406).is_success());
        assert!(!response(500).is_success());
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let request = HttpRequest {
            url: Url::parse("http://localhost/logs").unwrap(),
            headers: vec![("X-API-Key", "key".to_string())],
            body: json!({}),
        };

        assert_eq!(request.header("x-api-key"), Some("key"));
        assert_eq!(request.header("Accept"), None);
    }

    #[test]
    fn test_reqwest_transport_builds() {
        assert!(ReqwestTransport::new(None).is_ok());
        assert!(ReqwestTransport::new(Some(Duration::from_secs(5))).is_ok());
    }
}
