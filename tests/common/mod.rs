//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use logflare::client::{HttpRequest, HttpResponse, Transport};
use logflare::config::ClientConfig;
use logflare::TransportError;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

pub const TEST_API_KEY: &str = "testApiKey";
pub const TEST_BASE_URL: &str = "http://non-existing.domain";
pub const TEST_SOURCE_TOKEN: &str = "2222-2222";
pub const TEST_SOURCE_NAME: &str = "test-source-name";

pub fn token_config() -> ClientConfig {
    ClientConfig {
        source_token: Some(TEST_SOURCE_TOKEN.to_string()),
        api_key: TEST_API_KEY.to_string(),
        api_base_url: TEST_BASE_URL.to_string(),
        ..Default::default()
    }
}

pub fn name_config() -> ClientConfig {
    ClientConfig {
        source_token: None,
        source_name: Some(TEST_SOURCE_NAME.to_string()),
        ..token_config()
    }
}

/// Transport returning one canned response and recording every request
pub struct MockTransport {
    status: u16,
    body: Value,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new(status: u16, body: Value) -> Arc<Self> {
        Arc::new(Self {
            status,
            body,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn logged() -> Arc<Self> {
        Self::new(200, json!({"message": "Logged!"}))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        Ok(HttpResponse {
            status: self.status,
            body: self.body.clone(),
        })
    }
}
