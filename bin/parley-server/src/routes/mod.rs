//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional OpenAPI document (disable with `PARLEY_ENABLE_DOCS=false`)
//! - Health route
//! - `/api` routes used by the widget: chat relay and analytics

mod analytics;
mod chat;
pub mod doc;
mod health;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router, middleware};
use tower::ServiceBuilder;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Path of the served OpenAPI document.
pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new().merge(chat::router()).merge(analytics::router());

    let mut app = Router::new().merge(health::router()).nest("/api", api_router);

    if state.config.enable_docs {
        let api_doc = doc::get_docs();
        app = app.route(OPENAPI_PATH, get(move || async move { Json(api_doc) }));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn_with_state(state.clone(), trace::trace_middleware))
        .with_state(state)
}
