//! Client implementation: transport seam, single-request ingestion and batching

pub mod ingest;
pub mod logger;
pub mod sink;
pub mod transport;

pub use ingest::{BatchPayload, ErrorCallback, IngestClient};
pub use logger::{ClientBuilder, LogClient};
pub use sink::EventSink;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
