use std::sync::Arc;

use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

/// CORS layer from `PARLEY_CORS_ORIGINS`.
///
/// The widget is embedded on arbitrary host pages, so the default is any
/// origin. An allow-list restricts it; entries that do not parse as header
/// values are skipped, and a list with no valid entry falls back to any.
pub fn cors_layer(state: Arc<AppState>) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_allowed_origins
        .as_deref()
        .map(|list| list.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();

    let layer = CorsLayer::new().allow_headers(Any).allow_methods(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    }
}
