//! Channel-backed event stream feeding a [`LogClient`]

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::client::LogClient;
use crate::types::LogEvent;
use crate::{LogflareError, Result};

/// Writable end of an event stream
///
/// Events are handed to the client in the order they were sent. Sending waits while the
/// channel is full.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<LogEvent>,
}

impl EventSink {
    /// Queue an event, waiting for capacity
    pub async fn send(&self, event: LogEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| LogflareError::SinkClosed)
    }

    /// Queue an event without waiting
    pub fn try_send(&self, event: LogEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => LogflareError::SinkFull,
            TrySendError::Closed(_) => LogflareError::SinkClosed,
        })
    }
}

impl LogClient {
    /// Open an event stream into this client
    ///
    /// Returns the sink and the task draining it. The task ends once every clone of the
    /// sink is dropped. Fails outside a Tokio runtime.
    pub fn sink(&self, capacity: usize) -> Result<(EventSink, JoinHandle<()>)> {
        let runtime = Handle::try_current().map_err(|_| {
            LogflareError::Config(
                "Event sink requires a Tokio runtime for its drain task".to_string(),
            )
        })?;
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let client = self.clone();

        let drain = runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                // Failures already went to on_error and the debug log.
                let _ = client.add_log_event(event).await;
            }
            trace!("Event sink closed");
        });

        Ok((EventSink { tx }, drain))
    }
}
