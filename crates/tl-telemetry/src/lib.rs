//! Logging and span helpers for tasklink.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`
//! - **Tracing**: trace ids and per-event spans for correlating the handling
//!   of one inbound event across the reconciliation pipeline

pub mod logging;
pub mod tracing_setup;
