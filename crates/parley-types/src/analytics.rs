//! Analytics egress payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Lifecycle events the loader reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    ChatOpened,
    WidgetLoaded,
    FeedbackGiven,
}

/// Body of `POST /api/analytics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub event: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub user_agent: String,
}

impl AnalyticsEvent {
    /// Build an event stamped with the current time.
    pub fn now(
        event: LifecycleEvent,
        data: serde_json::Value,
        url: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            event: event.to_string(),
            data,
            timestamp: Utc::now(),
            url: url.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Success response of the analytics endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AnalyticsAck {
    pub success: bool,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn event_serializes_with_camel_case_fields() {
        let event = AnalyticsEvent::now(
            LifecycleEvent::ChatOpened,
            serde_json::json!({}),
            "https://shop.test/cart",
            "agent/1.0",
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "chat_opened");
        assert_eq!(value["userAgent"], "agent/1.0");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}
