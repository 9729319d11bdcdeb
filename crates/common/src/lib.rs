//! Common utilities shared across sluice crates.
//!
//! - **Configuration**: Strongly typed application configuration (`config`).
//! - **Resilience**: Exponential backoff retry loop (`retry`).
//! - **Logging**: Subscriber setup (`telemetry`) and SQL literal redaction (`scrubber`).
pub mod config;
pub mod retry;
pub mod scrubber;
pub mod telemetry;
