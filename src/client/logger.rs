//! Batching client that queues log events and flushes them to the ingestion API

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::ingest::{BatchPayload, ErrorCallback, IngestClient};
use crate::client::transport::{ReqwestTransport, Transport};
use crate::config::{ClientConfig, FlushPolicy};
use crate::transform::{apply_number_to_string_typecasting, Typecasted};
use crate::types::LogEvent;
use crate::{LogflareError, Result};

/// Builder for [`LogClient`] carrying the parts that cannot live in a config file
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    on_error: Option<ErrorCallback>,
}

impl ClientBuilder {
    /// Send requests through `transport` instead of the default reqwest client
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Call `on_error` once for every failed request
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&BatchPayload, &LogflareError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Validate the configuration and start the client
    ///
    /// A batched client starts its flush timer on the current Tokio runtime and fails if
    /// there is none.
    pub fn build(self) -> Result<LogClient> {
        let Self {
            config,
            transport,
            on_error,
        } = self;

        let transport: Arc<dyn Transport> = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(config.request_timeout())?),
        };

        let mut ingest = IngestClient::new(&config, transport)?;
        if let Some(on_error) = on_error {
            ingest = ingest.with_error_handler(on_error);
        }

        let runtime = match config.flush_policy {
            FlushPolicy::Batched => Some(Handle::try_current().map_err(|_| {
                LogflareError::Config(
                    "Batched flushing requires a Tokio runtime for the flush timer".to_string(),
                )
            })?),
            FlushPolicy::Immediate => None,
        };

        let inner = Arc::new(Inner {
            ingest,
            policy: config.flush_policy,
            max_batch_size: config.batch_max_size,
            numbers_to_strings: config.transforms.numbers_to_floats,
            batch: Mutex::new(Vec::new()),
            send_gate: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
            timer: Mutex::new(None),
        });

        if let Some(runtime) = runtime {
            let timer = spawn_flush_timer(
                &runtime,
                Arc::downgrade(&inner),
                config.flush_interval(),
                inner.shutdown.clone(),
            );
            *inner.timer.lock() = Some(timer);
        }

        Ok(LogClient { inner })
    }
}

/// Client for shipping log events to the ingestion API
///
/// Cheap to clone; all clones share one queue and one flush timer. The timer stops when
/// [`LogClient::shutdown`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct LogClient {
    inner: Arc<Inner>,
}

struct Inner {
    ingest: IngestClient,
    policy: FlushPolicy,
    max_batch_size: usize,
    numbers_to_strings: bool,
    batch: Mutex<Vec<LogEvent>>,
    /// Held from detaching a batch until its request completes, so batches leave in order
    send_gate: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Inner {
    fn prepare(&self, event: LogEvent) -> LogEvent {
        if !self.numbers_to_strings {
            return event;
        }

        let Typecasted { body, typecasts } = apply_number_to_string_typecasting(&event);
        if !typecasts.is_empty() {
            trace!(count = typecasts.len(), "Metadata numbers cast to strings");
        }
        body
    }

    /// Append to the live batch; true once it holds at least one full batch
    fn append(&self, events: Vec<LogEvent>) -> bool {
        let mut batch = self.batch.lock();
        batch.extend(events);
        batch.len() >= self.max_batch_size
    }

    /// Detach every full batch, leaving the remainder queued
    fn detach_full(&self) -> Vec<Vec<LogEvent>> {
        let mut batch = self.batch.lock();
        let mut ready = Vec::new();
        while batch.len() >= self.max_batch_size {
            let rest = batch.split_off(self.max_batch_size);
            ready.push(std::mem::replace(&mut *batch, rest));
        }
        ready
    }

    async fn enqueue(&self, events: Vec<LogEvent>) -> Result<Option<Value>> {
        if !self.append(events) {
            return Ok(None);
        }

        let _gate = self.send_gate.lock().await;
        let ready = self.detach_full();
        if !ready.is_empty() {
            debug!(batches = ready.len(), "Batch size threshold reached");
        }
        self.send_all(ready).await
    }

    /// Send batches in order; the first failure wins, otherwise the last body
    async fn send_all(&self, ready: Vec<Vec<LogEvent>>) -> Result<Option<Value>> {
        let mut outcome = Ok(None);
        for batch in ready {
            let result = self.ingest.post_log_events(batch).await.map(Some);
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    }

    async fn flush(&self) -> Result<Option<Value>> {
        let _gate = self.send_gate.lock().await;
        let mut in_flight = std::mem::take(&mut *self.batch.lock());
        if in_flight.is_empty() {
            return Ok(None);
        }

        debug!(events = in_flight.len(), "Flushing batch");
        let mut chunks = Vec::new();
        while in_flight.len() > self.max_batch_size {
            let rest = in_flight.split_off(self.max_batch_size);
            chunks.push(std::mem::replace(&mut in_flight, rest));
        }
        chunks.push(in_flight);
        self.send_all(chunks).await
    }
}

fn spawn_flush_timer(
    runtime: &Handle,
    inner: Weak<Inner>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        debug!(interval_ms = period.as_millis() as u64, "Flush timer started");

        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    // Failures were already reported by the ingest client.
                    let _ = inner.flush().await;
                }
            }
        }

        debug!("Flush timer stopped");
    })
}

impl LogClient {
    /// Create a client with the default transport and no error hook
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building a client
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            on_error: None,
        }
    }

    /// Add one log event
    ///
    /// Returns the response body when this call caused a request, `None` when the event was
    /// only queued.
    pub async fn add_log_event(&self, event: LogEvent) -> Result<Option<Value>> {
        self.add_log_events(vec![event]).await
    }

    /// Add several log events, keeping their order
    ///
    /// In batched mode every batch that reaches `batch_max_size` is sent before returning;
    /// the first failure wins, otherwise the last response body is returned. Batches are sent
    /// one at a time in the order they were filled, including those sent by the flush timer.
    pub async fn add_log_events(&self, events: Vec<LogEvent>) -> Result<Option<Value>> {
        if events.is_empty() {
            return Ok(None);
        }

        let events: Vec<LogEvent> = events
            .into_iter()
            .map(|event| self.inner.prepare(event))
            .collect();

        match self.inner.policy {
            FlushPolicy::Immediate => self.inner.ingest.post_log_events(events).await.map(Some),
            FlushPolicy::Batched => self.inner.enqueue(events).await,
        }
    }

    /// Send whatever is queued; a no-op returning `None` when the queue is empty
    pub async fn flush(&self) -> Result<Option<Value>> {
        self.inner.flush().await
    }

    /// Number of queued events
    pub fn pending(&self) -> usize {
        self.inner.batch.lock().len()
    }

    /// The underlying single-request client
    pub fn ingest(&self) -> &IngestClient {
        &self.inner.ingest
    }

    /// Stop the flush timer and send what is queued
    pub async fn shutdown(&self) -> Result<Option<Value>> {
        self.inner.shutdown.cancel();

        let timer = self.inner.timer.lock().take();
        if let Some(timer) = timer {
            if let Err(e) = timer.await {
                warn!(error = %e, "Flush timer task failed");
            }
        }

        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_support::StaticTransport;
    use serde_json::json;

    fn config(policy: FlushPolicy) -> ClientConfig {
        ClientConfig {
            source_token: Some("2222-2222".to_string()),
            api_key: "testApiKey".to_string(),
            api_base_url: "http://non-existing.domain".to_string(),
            batch_max_size: 5,
            flush_policy: policy,
            ..Default::default()
        }
    }

    fn client(config: ClientConfig, transport: &Arc<StaticTransport>) -> LogClient {
        LogClient::builder(config)
            .transport(transport.clone())
            .build()
            .unwrap()
    }

    fn events(n: usize) -> Vec<LogEvent> {
        (0..n)
            .map(|i| LogEvent::new(format!("event {}", i)))
            .collect()
    }

    fn batch_len(body: &Value) -> usize {
        body["batch"].as_array().map(Vec::len).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_immediate_add_returns_response() {
        let transport = StaticTransport::ok();
        let client = client(config(FlushPolicy::Immediate), &transport);

        let event = LogEvent::new("m").with_metadata(json!({"p1": "v1"}));
        let response = client.add_log_event(event).await.unwrap();

        assert_eq!(response, Some(json!({"message": "Logged!"})));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_immediate_add_returns_network_error() {
        let transport = StaticTransport::respond(406, json!({"message": "Schema validation error"}));
        let client = client(config(FlushPolicy::Immediate), &transport);

        let err = client.add_log_event(LogEvent::new("m")).await.unwrap_err();
        let network = err.as_network().expect("network error");
        assert_eq!(network.data, json!({"message": "Schema validation error"}));
    }

    #[tokio::test]
    async fn test_size_threshold_flushes_exactly_once() {
        let transport = StaticTransport::ok();
        let client = client(config(FlushPolicy::Batched), &transport);

        for event in events(4) {
            assert_eq!(client.add_log_event(event).await.unwrap(), None);
        }
        assert!(transport.requests().is_empty());
        assert_eq!(client.pending(), 4);

        let response = client.add_log_event(LogEvent::new("fifth")).await.unwrap();
        assert_eq!(response, Some(json!({"message": "Logged!"})));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(batch_len(&requests[0].body), 5);
        assert_eq!(requests[0].body["batch"][4]["message"], "fifth");
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_large_add_is_split_into_full_batches() {
        let transport = StaticTransport::ok();
        let client = client(config(FlushPolicy::Batched), &transport);

        client.add_log_events(events(12)).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(batch_len(&requests[0].body), 5);
        assert_eq!(batch_len(&requests[1].body), 5);
        assert_eq!(requests[1].body["batch"][0]["message"], "event 5");
        assert_eq!(client.pending(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped_not_requeued() {
        let transport = StaticTransport::respond(500, json!({"error": "boom"}));
        let client = client(config(FlushPolicy::Batched), &transport);

        let result = client.add_log_events(events(5)).await;
        assert!(result.is_err());
        assert_eq!(client.pending(), 0);
        assert_eq!(client.flush().await.unwrap(), None);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_of_empty_batch_sends_nothing() {
        let transport = StaticTransport::ok();
        let client = client(config(FlushPolicy::Batched), &transport);

        assert_eq!(client.flush().await.unwrap(), None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flush_waits_for_interval() {
        let transport = StaticTransport::ok();
        let client = client(config(FlushPolicy::Batched), &transport);

        client.add_log_events(events(3)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(transport.requests().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(batch_len(&requests[0].body), 3);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_with_empty_batch_sends_nothing() {
        let transport = StaticTransport::ok();
        let _client = client(config(FlushPolicy::Batched), &transport);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_stops_timer() {
        let transport = StaticTransport::ok();
        let client = client(config(FlushPolicy::Batched), &transport);

        client.add_log_events(events(2)).await.unwrap();
        let response = client.shutdown().await.unwrap();
        assert_eq!(response, Some(json!({"message": "Logged!"})));
        assert_eq!(transport.requests().len(), 1);

        client.add_log_event(LogEvent::new("late")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(client.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flush_waits_behind_size_triggered_batches() {
        let transport = StaticTransport::ok_after(Duration::from_millis(800));
        let client = client(config(FlushPolicy::Batched), &transport);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let events: Vec<LogEvent> = (0..12)
            .map(|i| LogEvent::new(format!("e{}", i)))
            .collect();
        client.add_log_events(events).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let first: Vec<String> = transport
            .requests()
            .iter()
            .map(|r| r.body["batch"][0]["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(first, vec!["e0", "e5", "e10"]);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_adds_keep_call_order() {
        let transport = StaticTransport::ok_after(Duration::from_millis(800));
        let client = client(config(FlushPolicy::Batched), &transport);

        client.add_log_events(events(4)).await.unwrap();
        let filling = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .add_log_events(vec![LogEvent::new("a1"), LogEvent::new("a2")])
                    .await
            })
        };
        tokio::task::yield_now().await;
        client.add_log_event(LogEvent::new("b1")).await.unwrap();
        filling.await.unwrap().unwrap();
        client.shutdown().await.unwrap();

        let messages: Vec<String> = transport
            .requests()
            .iter()
            .flat_map(|r| r.body["batch"].as_array().cloned().unwrap_or_default())
            .map(|e| e["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            messages,
            vec!["event 0", "event 1", "event 2", "event 3", "a1", "a2", "b1"]
        );
        assert_eq!(batch_len(&transport.requests()[0].body), 5);
    }

    #[tokio::test]
    async fn test_numbers_transform_applied_before_queueing() {
        let transport = StaticTransport::ok();
        let mut config = config(FlushPolicy::Immediate);
        config.transforms.numbers_to_floats = true;
        let client = client(config, &transport);

        let event = LogEvent::new("m").with_metadata(json!({"count": 5, "tags": ["a", 7]}));
        client.add_log_event(event).await.unwrap();

        let requests = transport.requests();
        assert_eq!(
            requests[0].body["batch"][0]["metadata"],
            json!({"count": "5", "tags": ["a", "7"]})
        );
    }

    #[tokio::test]
    async fn test_on_error_hook_is_wired() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let transport = StaticTransport::respond(406, json!({"message": "Schema validation error"}));
        let client = LogClient::builder(config(FlushPolicy::Immediate))
            .transport(transport)
            .on_error(move |payload, _| sink.lock().push(payload.batch.len()))
            .build()
            .unwrap();

        let _ = client.add_log_events(events(3)).await;
        assert_eq!(*calls.lock(), vec![3]);
    }

    #[test]
    fn test_batched_client_needs_runtime() {
        let transport = StaticTransport::ok();
        match LogClient::builder(config(FlushPolicy::Batched))
            .transport(transport.clone())
            .build()
        {
            Err(LogflareError::Config(msg)) => assert!(msg.contains("Tokio runtime")),
            Err(e) => panic!("Expected Config error, got {:?}", e),
            Ok(_) => panic!("Expected Config error, got a client"),
        }

        assert!(client(config(FlushPolicy::Immediate), &transport).pending() == 0);
    }

    #[test]
    fn test_invalid_config_fails_at_construction() {
        let config = ClientConfig {
            source_token: None,
            ..config(FlushPolicy::Immediate)
        };
        assert!(matches!(LogClient::new(config), Err(LogflareError::Config(_))));
    }
}
