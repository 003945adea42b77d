//! Browser hardening headers added to every response.
//!
//! Headers a handler already set are left alone.

use axum::{
    http::{header, HeaderName, HeaderValue},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::SecurityConfig;

pub const CONTENT_SECURITY_POLICY: &str =
    "default-src 'self'; img-src 'self' data:; style-src 'self' 'unsafe-inline'; script-src 'self' 'unsafe-inline'";

const STATIC_HEADERS: [(HeaderName, &str); 8] = [
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "SAMEORIGIN"),
    (header::CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
    (
        HeaderName::from_static("permissions-policy"),
        "camera=(), microphone=(), geolocation=()",
    ),
    (
        HeaderName::from_static("cross-origin-opener-policy"),
        "same-origin",
    ),
    (
        HeaderName::from_static("cross-origin-resource-policy"),
        "same-origin",
    ),
];

/// `Strict-Transport-Security` value, or `None` when HSTS is disabled.
pub fn hsts_value(max_age_secs: u64) -> Option<String> {
    (max_age_secs > 0).then(|| format!("max-age={}; includeSubDomains", max_age_secs))
}

pub fn with_security_headers(mut router: Router, security: &SecurityConfig) -> Router {
    for (name, value) in &STATIC_HEADERS {
        router = router.layer(SetResponseHeaderLayer::if_not_present(
            name.clone(),
            HeaderValue::from_static(*value),
        ));
    }

    if let Some(hsts) = hsts_value(security.hsts_max_age_secs) {
        match HeaderValue::from_str(&hsts) {
            Ok(value) => {
                router = router.layer(SetResponseHeaderLayer::if_not_present(
                    header::STRICT_TRANSPORT_SECURITY,
                    value,
                ));
            }
            Err(e) => tracing::error!("Skipping invalid HSTS header: {}", e),
        }
    }

    router
}
