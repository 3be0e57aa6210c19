//! Network side of padterm: the WebSocket terminal bridge and the HTTP API.
//!
//! - [`protocol`]: JSON frames exchanged with the browser, UTF-8 output decoding
//! - [`bridge`]: the per-connection loop between a socket and a session
//! - [`terminal_ws`]: the `/ws/terminal` upgrade handler
//! - [`http_api`]: router, shared state and REST handlers
//! - [`line_capture`]: command line reconstruction for the history
//! - [`origin_validation`]: `Origin` allowlist for the upgrade and CORS

pub mod api_error;
pub mod bridge;
pub mod http_api;
pub mod line_capture;
pub mod origin_validation;
pub mod protocol;
pub mod terminal_ws;

pub use bridge::{BridgeError, BridgeOutcome, BridgeSettings, DuplexBridge};
pub use http_api::{api_router, ApiState};
