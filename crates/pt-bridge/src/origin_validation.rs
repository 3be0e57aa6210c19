//! Origin checks for the terminal WebSocket.
//!
//! Browsers do not apply CORS to WebSocket upgrades; they only send an
//! `Origin` header and leave the decision to the server. Without this check
//! any page the user visits could open a shell on a local padterm.

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Whether `origin` matches an allowlist entry, either exactly or as the
/// entry followed by `:<port>`. A `"*"` entry matches everything.
pub fn origin_allowed(origin: &str, allowed_origins: &[String]) -> bool {
    allowed_origins.iter().any(|allowed| {
        if allowed == "*" || origin == allowed {
            return true;
        }
        match origin.strip_prefix(allowed.as_str()).and_then(|r| r.strip_prefix(':')) {
            Some(port) => !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()),
            None => false,
        }
    })
}

/// Check the `Origin` of an upgrade request. A missing or non-UTF-8 header
/// is refused like a foreign origin.
pub fn validate_websocket_origin(
    headers: &HeaderMap,
    allowed_origins: &[String],
) -> Result<(), StatusCode> {
    let origin = headers
        .get("origin")
        .ok_or(StatusCode::FORBIDDEN)?
        .to_str()
        .map_err(|_| StatusCode::FORBIDDEN)?;

    if origin_allowed(origin, allowed_origins) {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// CORS for the REST routes, driven by the same allowlist.
pub fn cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &axum::http::request::Parts| {
                origin
                    .to_str()
                    .map(|o| origin_allowed(o, &allowed_origins))
                    .unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}
