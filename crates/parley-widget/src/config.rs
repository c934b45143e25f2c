//! Widget configuration.
//!
//! The loader serializes the whole [`WidgetConfig`] into the frame's load URL
//! (`{hostUrl}/widget?config=<json>`); the in-frame runtime parses it back.
//! Parsing is strict per field: anything missing, mistyped or outside its
//! domain is replaced by that field's default and logged, the rest of the
//! document is still honored. Fields outside the known set are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};
use tracing::warn;
use url::Url;

use crate::error::ConfigParseError;

/// Name of the load-URL query parameter carrying the config.
pub const CONFIG_QUERY_PARAM: &str = "config";

const DEFAULT_HOST_URL: &str = "http://localhost:3000";
const DEFAULT_CHAT_PATH: &str = "api/chat";
const ANALYTICS_PATH: &str = "api/analytics";
const WIDGET_PATH: &str = "widget";

const KNOWN_FIELDS: &[&str] = &[
    "apiEndpoint",
    "theme",
    "position",
    "size",
    "welcomeMessage",
    "placeholder",
    "hostUrl",
    "enableAnalytics",
    "zIndex",
];

/// Corner of the viewport the widget is anchored to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Position {
    #[default]
    BottomRight,
    BottomLeft,
    TopRight,
    TopLeft,
}

/// Size class of the opened conversation surface.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WidgetSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub primary_color: String,
    pub secondary_color: String,
    pub accent_color: String,
    pub company_name: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary_color: "#3b82f6".into(),
            secondary_color: "#8b5cf6".into(),
            accent_color: "#ec4899".into(),
            company_name: "Customer Support".into(),
        }
    }
}

/// Complete embedding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    /// Chat endpoint; absolute, or relative to `host_url`.  `None` means
    /// `{host_url}/api/chat`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    pub theme: Theme,
    pub position: Position,
    pub size: WidgetSize,
    pub welcome_message: String,
    pub placeholder: String,
    /// Origin serving the widget frame; also the trust anchor for inbound
    /// messages on the host page.
    pub host_url: String,
    pub enable_analytics: bool,
    pub z_index: i64,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            theme: Theme::default(),
            position: Position::default(),
            size: WidgetSize::default(),
            welcome_message: "Welcome to support! How can I help you today?".into(),
            placeholder: "Type your message...".into(),
            host_url: DEFAULT_HOST_URL.into(),
            enable_analytics: true,
            z_index: 9999,
        }
    }
}

impl WidgetConfig {
    /// Parse a config document field by field.
    pub fn from_value(value: &Value) -> Self {
        let mut config = Self::default();
        let Some(object) = value.as_object() else {
            warn!(error = %ConfigParseError::NotAnObject, "using default widget config");
            return config;
        };

        for key in object.keys().filter(|k| !KNOWN_FIELDS.contains(&k.as_str())) {
            warn!(field = %key, "ignoring unrecognized widget config field");
        }

        if let Some(value) = object.get("apiEndpoint") {
            match value {
                Value::Null => {}
                other => apply(non_empty_string("apiEndpoint", other).map(|s| config.api_endpoint = Some(s))),
            }
        }
        if let Some(value) = object.get("theme") {
            match value.as_object() {
                Some(theme) => apply_theme(&mut config.theme, theme),
                None => apply(Err(invalid("theme", "expected an object"))),
            }
        }
        if let Some(value) = object.get("position") {
            apply(enum_field::<Position>("position", value).map(|p| config.position = p));
        }
        if let Some(value) = object.get("size") {
            apply(enum_field::<WidgetSize>("size", value).map(|s| config.size = s));
        }
        if let Some(value) = object.get("welcomeMessage") {
            apply(non_empty_string("welcomeMessage", value).map(|s| config.welcome_message = s));
        }
        if let Some(value) = object.get("placeholder") {
            apply(non_empty_string("placeholder", value).map(|s| config.placeholder = s));
        }
        if let Some(value) = object.get("hostUrl") {
            apply(host_url(value).map(|s| config.host_url = s));
        }
        if let Some(value) = object.get("enableAnalytics") {
            match value.as_bool() {
                Some(b) => config.enable_analytics = b,
                None => apply(Err(invalid("enableAnalytics", "expected a boolean"))),
            }
        }
        if let Some(value) = object.get("zIndex") {
            match value.as_i64() {
                Some(z) => config.z_index = z,
                None => apply(Err(invalid("zIndex", "expected an integer"))),
            }
        }

        config
    }

    /// Parse the config carried by a frame load URL.
    ///
    /// A missing or undecodable parameter yields the default config.
    pub fn from_load_url(url: &Url) -> Self {
        match config_document(url) {
            Ok(value) => Self::from_value(&value),
            Err(e) => {
                warn!(error = %e, "using default widget config");
                Self::default()
            }
        }
    }

    /// URL the host page loads into the widget frame.
    pub fn frame_url(&self) -> Result<Url, ConfigParseError> {
        let mut url = self
            .base_url()?
            .join(WIDGET_PATH)
            .map_err(|e| invalid("hostUrl", e.to_string()))?;
        let encoded = serde_json::to_string(self)?;
        url.query_pairs_mut().append_pair(CONFIG_QUERY_PARAM, &encoded);
        Ok(url)
    }

    /// Resolved chat endpoint.
    pub fn chat_endpoint(&self) -> Result<Url, ConfigParseError> {
        let path = self.api_endpoint.as_deref().unwrap_or(DEFAULT_CHAT_PATH);
        self.base_url()?
            .join(path)
            .map_err(|e| invalid("apiEndpoint", e.to_string()))
    }

    /// Analytics collection endpoint.
    pub fn analytics_endpoint(&self) -> Result<Url, ConfigParseError> {
        self.base_url()?
            .join(ANALYTICS_PATH)
            .map_err(|e| invalid("hostUrl", e.to_string()))
    }

    /// Origin of `host_url` in the serialized form browsers report for
    /// cross-document messages: no path and no trailing slash.
    pub fn host_origin(&self) -> Result<String, ConfigParseError> {
        let url = Url::parse(&self.host_url).map_err(|_| ConfigParseError::HostUrl(self.host_url.clone()))?;
        if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
            return Err(ConfigParseError::HostUrl(self.host_url.clone()));
        }
        Ok(url.origin().ascii_serialization())
    }

    // Host URL with a trailing slash so relative joins append to its path.
    fn base_url(&self) -> Result<Url, ConfigParseError> {
        Url::parse(&format!("{}/", self.host_url))
            .map_err(|_| ConfigParseError::HostUrl(self.host_url.clone()))
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn apply(result: Result<(), ConfigParseError>) {
    if let Err(e) = result {
        warn!(error = %e, "substituting default for widget config field");
    }
}

fn apply_theme(theme: &mut Theme, object: &Map<String, Value>) {
    let fields: [(&'static str, &mut String); 4] = [
        ("primaryColor", &mut theme.primary_color),
        ("secondaryColor", &mut theme.secondary_color),
        ("accentColor", &mut theme.accent_color),
        ("companyName", &mut theme.company_name),
    ];
    for (name, target) in fields {
        if let Some(value) = object.get(name) {
            apply(non_empty_string(name, value).map(|s| *target = s));
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigParseError {
    ConfigParseError::InvalidField { field, reason: reason.into() }
}

fn non_empty_string(field: &'static str, value: &Value) -> Result<String, ConfigParseError> {
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s.to_owned()),
        Some(_) => Err(invalid(field, "must not be empty")),
        None => Err(invalid(field, "expected a string")),
    }
}

fn enum_field<T: std::str::FromStr>(field: &'static str, value: &Value) -> Result<T, ConfigParseError> {
    let raw = value.as_str().ok_or_else(|| invalid(field, "expected a string"))?;
    raw.parse::<T>()
        .map_err(|_| invalid(field, format!("`{raw}` is not a recognized value")))
}

fn host_url(value: &Value) -> Result<String, ConfigParseError> {
    let raw = non_empty_string("hostUrl", value)?;
    let trimmed = raw.trim_end_matches('/');
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(trimmed.to_owned()),
        _ => Err(ConfigParseError::HostUrl(raw)),
    }
}

fn config_document(url: &Url) -> Result<Value, ConfigParseError> {
    let raw = url
        .query_pairs()
        .find(|(key, _)| key == CONFIG_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .ok_or(ConfigParseError::MissingParameter)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(WidgetConfig::from_value(&json!({})), WidgetConfig::default());
        assert_eq!(WidgetConfig::from_value(&json!("nope")), WidgetConfig::default());
    }

    #[test]
    fn valid_fields_are_taken_as_given() {
        let config = WidgetConfig::from_value(&json!({
            "apiEndpoint": "https://api.shop.test/chat",
            "theme": { "primaryColor": "#000000", "companyName": "Shop" },
            "position": "top-left",
            "size": "large",
            "welcomeMessage": "Hi!",
            "placeholder": "Ask away",
            "hostUrl": "https://widget.shop.test/",
            "enableAnalytics": false,
            "zIndex": 42
        }));
        assert_eq!(config.api_endpoint.as_deref(), Some("https://api.shop.test/chat"));
        assert_eq!(config.theme.primary_color, "#000000");
        assert_eq!(config.theme.secondary_color, Theme::default().secondary_color);
        assert_eq!(config.theme.company_name, "Shop");
        assert_eq!(config.position, Position::TopLeft);
        assert_eq!(config.size, WidgetSize::Large);
        assert_eq!(config.welcome_message, "Hi!");
        assert_eq!(config.placeholder, "Ask away");
        assert_eq!(config.host_url, "https://widget.shop.test");
        assert!(!config.enable_analytics);
        assert_eq!(config.z_index, 42);
    }

    #[test]
    fn out_of_domain_fields_fall_back_individually() {
        let config = WidgetConfig::from_value(&json!({
            "position": "middle",
            "size": 3,
            "hostUrl": "javascript:alert(1)",
            "enableAnalytics": "yes",
            "zIndex": 1.5,
            "welcomeMessage": "Still honored",
            "customCSS": "body { display: none }"
        }));
        let defaults = WidgetConfig::default();
        assert_eq!(config.position, defaults.position);
        assert_eq!(config.size, defaults.size);
        assert_eq!(config.host_url, defaults.host_url);
        assert_eq!(config.enable_analytics, defaults.enable_analytics);
        assert_eq!(config.z_index, defaults.z_index);
        assert_eq!(config.welcome_message, "Still honored");
    }

    #[test]
    fn frame_url_round_trips_through_load_url() {
        let config = WidgetConfig {
            host_url: "https://a.test".into(),
            welcome_message: "Hello & welcome, 100% of you!".into(),
            position: Position::BottomLeft,
            ..WidgetConfig::default()
        };
        let url = config.frame_url().unwrap();
        assert_eq!(url.path(), "/widget");
        assert!(url.as_str().starts_with("https://a.test/widget?config="));
        assert_eq!(WidgetConfig::from_load_url(&url), config);
    }

    #[test]
    fn load_url_without_config_uses_defaults() {
        let url = Url::parse("https://a.test/widget?other=1").unwrap();
        assert_eq!(WidgetConfig::from_load_url(&url), WidgetConfig::default());
        let broken = Url::parse("https://a.test/widget?config=%7Bnot-json").unwrap();
        assert_eq!(WidgetConfig::from_load_url(&broken), WidgetConfig::default());
    }

    #[test]
    fn host_origin_drops_path_and_slash() {
        let origin = |host: &str| WidgetConfig { host_url: host.into(), ..Default::default() }.host_origin();
        assert_eq!(origin("https://a.test").unwrap(), "https://a.test");
        assert_eq!(origin("https://a.test/").unwrap(), "https://a.test");
        assert_eq!(origin("https://a.test:8443/support/").unwrap(), "https://a.test:8443");
        assert_eq!(origin("https://a.test:443").unwrap(), "https://a.test");
        assert!(origin("not a url").is_err());
        assert!(origin("ftp://a.test").is_err());
    }

    #[test]
    fn endpoints_resolve_against_host_url() {
        let mut config = WidgetConfig { host_url: "https://a.test".into(), ..Default::default() };
        assert_eq!(config.chat_endpoint().unwrap().as_str(), "https://a.test/api/chat");
        assert_eq!(config.analytics_endpoint().unwrap().as_str(), "https://a.test/api/analytics");

        config.api_endpoint = Some("/v2/chat".into());
        assert_eq!(config.chat_endpoint().unwrap().as_str(), "https://a.test/v2/chat");
        config.api_endpoint = Some("https://llm.test/chat".into());
        assert_eq!(config.chat_endpoint().unwrap().as_str(), "https://llm.test/chat");
    }
}
