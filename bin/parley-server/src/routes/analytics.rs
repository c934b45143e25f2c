//! Widget analytics collector (`POST /api/analytics`).
//!
//! Events are written to the log with the client address attached; forward
//! them to a real analytics store by subscribing to the `parley::analytics`
//! target.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::HeaderMap;
use axum::routing::post;
use parley_types::{AnalyticsAck, AnalyticsEvent};
use tracing::info;
use utoipa::OpenApi;

use crate::state::AppState;

const UNKNOWN_CLIENT: &str = "unknown";

#[derive(OpenApi)]
#[openapi(paths(collect), components(schemas(AnalyticsEvent, AnalyticsAck)))]
pub struct AnalyticsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/analytics", post(collect))
}

/// Record one widget lifecycle event.
#[utoipa::path(
    post,
    path = "/api/analytics",
    tag = "analytics",
    request_body = AnalyticsEvent,
    responses(
        (status = 200, description = "Event recorded", body = AnalyticsAck),
    )
)]
pub async fn collect(headers: HeaderMap, Json(event): Json<AnalyticsEvent>) -> Json<AnalyticsAck> {
    let client_ip = client_ip(&headers);
    info!(
        target: "parley::analytics",
        event = %event.event,
        data = %event.data,
        timestamp = %event.timestamp.to_rfc3339(),
        url = %event.url,
        user_agent = %event.user_agent,
        ip = %client_ip,
        "widget analytics"
    );
    Json(AnalyticsAck { success: true })
}

/// Client address from `x-forwarded-for`, else `x-real-ip`.
fn client_ip(headers: &HeaderMap) -> String {
    ["x-forwarded-for", "x-real-ip"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::OpenAiCompatBackend;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(client_ip(&headers), "10.0.0.2");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.7, 10.0.0.1");
    }

    #[tokio::test]
    async fn accepts_event_and_acknowledges() {
        let config = Config::default();
        let state = Arc::new(AppState {
            backend: Arc::new(OpenAiCompatBackend::from_config(&config)),
            config: Arc::new(config),
        });
        let body = serde_json::json!({
            "event": "feedback_given",
            "data": { "messageId": "5f1c", "feedback": "positive" },
            "timestamp": "2026-10-19T09:30:00.000Z",
            "url": "https://shop.test/cart",
            "userAgent": "Mozilla/5.0"
        });
        let response = crate::routes::build(state)
            .oneshot(
                Request::post("/api/analytics")
                    .header("content-type", "application/json")
                    .header("x-forwarded-for", "203.0.113.7")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&bytes).unwrap(), serde_json::json!({ "success": true }));
    }
}
