//! Domain types and configuration shared by the tasklink crates.
//!
//! - [`types`]: tasks, chat messages, and the in-flight stream map
//! - [`config`]: TOML configuration loaded from `~/.tasklink/config.toml`

pub mod config;
pub mod types;
