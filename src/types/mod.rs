//! Core data types

pub mod log_event;

pub use log_event::LogEvent;
