//! Shared building blocks for the padterm server.
//!
//! - [`config`]: TOML configuration with per-section defaults
//! - [`history`]: the persisted command-history log
//! - [`shutdown`]: cooperative shutdown signal shared by the server and bridges

pub mod config;
pub mod history;
pub mod shutdown;
