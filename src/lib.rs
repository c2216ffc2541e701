//! # Logflare - Batching Log Event Client
//!
//! A client library that accepts application log events, batches them in memory and ships
//! them to the Logflare ingestion HTTP API.
//!
//! ## Features
//!
//! - **Batching**: size and interval based flushing, or one request per event
//! - **Typed failures**: non-2xx responses come back as [`NetworkError`] values
//! - **Error hooks**: optional `on_error` callback and debug diagnostics
//! - **Typecasting**: numeric metadata leaves rewritten to strings with a cast manifest
//! - **Pluggable transport**: reqwest by default, any [`client::Transport`] in tests
//!
//! ## Quick Start
//!
//! ```no_run
//! use logflare::client::LogClient;
//! use logflare::config::ClientConfig;
//! use logflare::types::LogEvent;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig {
//!         source_token: Some("2222-2222".to_string()),
//!         api_key: "my-api-key".to_string(),
//!         ..Default::default()
//!     };
//!     let client = LogClient::new(config)?;
//!
//!     let event = LogEvent::new("user signed in").with_metadata(json!({ "user_id": 42 }));
//!     client.add_log_event(event).await?;
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod transform;
pub mod types;

/// Common error types used throughout the client
pub mod error {
    use serde_json::Value;
    use thiserror::Error;

    /// Client error types
    #[derive(Debug, Error)]
    pub enum LogflareError {
        /// Configuration rejected at construction or while loading
        #[error("Configuration error: {0}")]
        Config(String),

        /// Ingestion API answered with a non-2xx status
        #[error(transparent)]
        Network(#[from] NetworkError),

        /// Request never produced a usable response
        #[error("Transport error: {0}")]
        Transport(#[from] TransportError),

        /// Request payload could not be serialized
        #[error("Serialization error: {0}")]
        Serialization(#[from] serde_json::Error),

        /// Request URL could not be built
        #[error("Invalid URL: {0}")]
        Url(#[from] url::ParseError),

        /// Event sink is full (non-blocking send failed)
        #[error("Event sink full, event dropped")]
        SinkFull,

        /// Event sink's drain task has stopped
        #[error("Event sink is closed")]
        SinkClosed,
    }

    impl LogflareError {
        /// The HTTP failure carried by this error, if the API answered at all
        pub fn as_network(&self) -> Option<&NetworkError> {
            match self {
                LogflareError::Network(e) => Some(e),
                _ => None,
            }
        }
    }

    /// A non-2xx answer from the ingestion API
    #[derive(Debug, Clone, PartialEq, Error)]
    #[error("Network response was not ok for \"{url}\"")]
    pub struct NetworkError {
        /// HTTP status code of the response
        pub status: u16,
        /// Parsed JSON body of the response
        pub data: Value,
        /// URL the request was sent to
        pub url: String,
    }

    /// Failures below the HTTP status level
    #[derive(Debug, Error)]
    pub enum TransportError {
        /// Connection, DNS, TLS or timeout failure
        #[error("HTTP request failed: {0}")]
        Http(#[from] reqwest::Error),

        /// Response body was not valid JSON
        #[error("Malformed response body: {0}")]
        Decode(#[from] serde_json::Error),

        /// Failure reported by a custom transport
        #[error("{0}")]
        Other(String),
    }

    /// Result type alias for client operations
    pub type Result<T> = std::result::Result<T, LogflareError>;
}

pub use error::{LogflareError, NetworkError, Result, TransportError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{ClientBuilder, EventSink, LogClient, Transport};
    pub use crate::config::{ClientConfig, Endpoint, FlushPolicy, Transforms};
    pub use crate::transform::{TypecastRecord, Typecasted};
    pub use crate::types::LogEvent;
    pub use crate::{LogflareError, NetworkError, Result, TransportError};
}
