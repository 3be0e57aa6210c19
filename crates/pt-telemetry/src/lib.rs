//! Logging setup shared by padterm binaries and tests.
//!
//! Output is either human-readable or JSON, both through `tracing-subscriber`
//! with an `EnvFilter` so `RUST_LOG` always wins over the configured level.

pub mod logging;

pub use logging::{init, init_logging, init_logging_json, LogFormat};
