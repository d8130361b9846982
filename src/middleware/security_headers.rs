//! Default security response headers.
//!
//! Applied to every response, including 401s from the gate, and only when the
//! handler has not set the header itself:
//! - no caching of (possibly authenticated) responses
//! - MIME sniffing protection
//! - clickjacking protection
//! - legacy XSS auditor disabled
//! - no referrer leakage

use axum::Router;
use axum::http::header::{self, HeaderName, HeaderValue};
use tower_http::set_header::SetResponseHeaderLayer;

fn defaults() -> [(HeaderName, &'static str); 7] {
    [
        (
            header::CACHE_CONTROL,
            "no-cache, no-store, max-age=0, must-revalidate",
        ),
        (header::PRAGMA, "no-cache"),
        (header::EXPIRES, "0"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        (header::X_FRAME_OPTIONS, "DENY"),
        (header::X_XSS_PROTECTION, "0"),
        (header::REFERRER_POLICY, "no-referrer"),
    ]
}

pub fn apply(router: Router) -> Router {
    defaults().into_iter().fold(router, |router, (name, value)| {
        router.layer(SetResponseHeaderLayer::if_not_present(
            name,
            HeaderValue::from_static(value),
        ))
    })
}
