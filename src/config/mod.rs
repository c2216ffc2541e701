//! Configuration management for the client

pub mod settings;

pub use settings::{
    ClientConfig, Endpoint, FlushPolicy, IngestionTarget, Source, Transforms,
    DEFAULT_API_BASE_URL, DEFAULT_BATCH_FLUSH_INTERVAL_MS, DEFAULT_BATCH_MAX_SIZE,
};
