//! Host-page side of the embedding protocol.
//!
//! An [`EmbedBridge`] drives one widget instance on an untrusted host page:
//! it mounts the launcher bubble, lazily creates the conversation frame, and
//! accepts intents posted back from the frame. The page itself is abstracted
//! behind [`HostPage`] so the state machine runs without a DOM.
//!
//! ```text
//! Uninitialized --page_ready--> Bubble --activate--> Open
//!                                  ^                  |
//!                                  +-minimize/close---+
//! any state --destroy--> Uninitialized
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use parley_types::{AnalyticsEvent, BridgeMessage, LifecycleEvent};
use serde::Deserialize;
use serde_json::{Value, json};
use strum::{AsRefStr, Display};
use tracing::{debug, info, warn};
use url::Url;

use crate::analytics::{AnalyticsSink, HttpAnalytics};
use crate::config::{Position, WidgetConfig, WidgetSize};
use crate::error::ProtocolError;

/// Distance between the widget and the viewport edges, in CSS pixels.
pub const EDGE_OFFSET_PX: u32 = 20;

// ── placement ────────────────────────────────────────────────────────────────

/// Where and how large the widget surfaces are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub position: Position,
    pub offset: u32,
    pub width: u32,
    pub height: u32,
    pub z_index: i64,
}

impl Placement {
    /// Placement of the launcher bubble.
    pub fn bubble(config: &WidgetConfig) -> Self {
        Self {
            position: config.position,
            offset: EDGE_OFFSET_PX,
            width: 280,
            height: 80,
            z_index: config.z_index,
        }
    }

    /// Placement of the conversation frame; always stacked above the bubble.
    pub fn frame(config: &WidgetConfig) -> Self {
        let (width, height) = frame_dimensions(config.size);
        Self {
            position: config.position,
            offset: EDGE_OFFSET_PX,
            width,
            height,
            z_index: config.z_index.saturating_add(1),
        }
    }
}

pub fn frame_dimensions(size: WidgetSize) -> (u32, u32) {
    match size {
        WidgetSize::Small => (320, 480),
        WidgetSize::Medium => (384, 600),
        WidgetSize::Large => (448, 700),
    }
}

// ── host page ────────────────────────────────────────────────────────────────

/// The document operations the bridge needs from its host page.
pub trait HostPage: Send {
    fn mount_bubble(&mut self, placement: &Placement);
    fn set_bubble_visible(&mut self, visible: bool);
    fn unmount_bubble(&mut self);

    fn mount_frame(&mut self, url: &Url, placement: &Placement);
    fn set_frame_visible(&mut self, visible: bool);
    fn unmount_frame(&mut self);

    /// Address of the host page, reported with analytics events.
    fn page_url(&self) -> String;
    fn user_agent(&self) -> String;
}

// ── bridge ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum EmbedState {
    Uninitialized,
    Bubble,
    Open,
}

pub struct EmbedBridge<P> {
    config: WidgetConfig,
    page: P,
    analytics: Arc<dyn AnalyticsSink>,
    trusted_origin: Option<String>,
    state: EmbedState,
    frame_mounted: bool,
    frame_loaded: bool,
}

impl<P> std::fmt::Debug for EmbedBridge<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbedBridge")
            .field("host_url", &self.config.host_url)
            .field("trusted_origin", &self.trusted_origin)
            .field("state", &self.state)
            .field("frame_mounted", &self.frame_mounted)
            .finish()
    }
}

impl<P: HostPage> EmbedBridge<P> {
    /// Inbound messages are trusted only from the origin of
    /// `config.host_url`. An unusable host URL trusts nothing.
    pub fn new(config: WidgetConfig, page: P, analytics: Arc<dyn AnalyticsSink>) -> Self {
        let trusted_origin = match config.host_origin() {
            Ok(origin) => Some(origin),
            Err(e) => {
                warn!(error = %e, "host URL unusable; inbound messages will be dropped");
                None
            }
        };
        Self {
            config,
            page,
            analytics,
            trusted_origin,
            state: EmbedState::Uninitialized,
            frame_mounted: false,
            frame_loaded: false,
        }
    }

    /// Bridge reporting analytics to `{hostUrl}/api/analytics`.
    ///
    /// An unusable host URL disables analytics instead of failing.
    pub fn with_http_analytics(config: WidgetConfig, page: P) -> Self {
        let analytics: Arc<dyn AnalyticsSink> = match config.analytics_endpoint() {
            Ok(endpoint) => Arc::new(HttpAnalytics::new(endpoint)),
            Err(e) => {
                warn!(error = %e, "analytics endpoint unusable; events will be dropped");
                Arc::new(NoAnalytics)
            }
        };
        Self::new(config, page, analytics)
    }

    pub fn state(&self) -> EmbedState {
        self.state
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    /// Mount the bubble once the host document is ready.
    pub fn page_ready(&mut self) {
        if self.state != EmbedState::Uninitialized {
            debug!(state = %self.state, "page_ready ignored");
            return;
        }
        self.page.mount_bubble(&Placement::bubble(&self.config));
        self.state = EmbedState::Bubble;
        info!(host_url = %self.config.host_url, "chat widget bubble mounted");
    }

    /// Open the conversation surface, creating the frame on first use.
    pub fn activate(&mut self) {
        if self.state != EmbedState::Bubble {
            debug!(state = %self.state, "activate ignored");
            return;
        }
        if self.frame_mounted {
            self.page.set_frame_visible(true);
        } else {
            let url = match self.config.frame_url() {
                Ok(url) => url,
                Err(e) => {
                    warn!(error = %e, "cannot build widget frame URL");
                    return;
                }
            };
            self.page.mount_frame(&url, &Placement::frame(&self.config));
            self.frame_mounted = true;
            self.frame_loaded = false;
        }
        self.page.set_bubble_visible(false);
        self.state = EmbedState::Open;
        self.track(LifecycleEvent::ChatOpened, json!({}));
    }

    /// The frame finished loading its document.
    pub fn frame_loaded(&mut self) {
        if !self.frame_mounted || self.frame_loaded {
            return;
        }
        self.frame_loaded = true;
        self.track(LifecycleEvent::WidgetLoaded, json!({}));
    }

    /// Handle a message posted to the host page. Returns the accepted
    /// message; anything untrusted or unrecognized is dropped.
    pub fn handle_message(&mut self, origin: &str, payload: &Value) -> Option<BridgeMessage> {
        let message = match self.accept(origin, payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "inbound message dropped");
                return None;
            }
        };
        match &message {
            BridgeMessage::Feedback { .. } => {
                let data = payload.get("data").cloned().unwrap_or(Value::Null);
                self.track(LifecycleEvent::FeedbackGiven, data);
            }
            BridgeMessage::Minimize => self.minimize(),
            BridgeMessage::Close => self.close(),
        }
        Some(message)
    }

    /// Collapse the surface back to the bubble. The frame is kept.
    pub fn minimize(&mut self) {
        if self.state != EmbedState::Open {
            return;
        }
        self.page.set_frame_visible(false);
        self.page.set_bubble_visible(true);
        self.state = EmbedState::Bubble;
    }

    pub fn close(&mut self) {
        self.minimize();
    }

    /// Re-display the bubble.
    pub fn show(&mut self) {
        if self.state == EmbedState::Bubble {
            self.page.set_bubble_visible(true);
        }
    }

    /// Hide every surface. An open conversation returns to the bubble state.
    pub fn hide(&mut self) {
        match self.state {
            EmbedState::Uninitialized => {}
            EmbedState::Bubble => self.page.set_bubble_visible(false),
            EmbedState::Open => {
                self.page.set_frame_visible(false);
                self.page.set_bubble_visible(false);
                self.state = EmbedState::Bubble;
            }
        }
    }

    /// Remove everything from the page.
    pub fn destroy(&mut self) {
        if self.state == EmbedState::Uninitialized {
            return;
        }
        self.page.unmount_bubble();
        if self.frame_mounted {
            self.page.unmount_frame();
        }
        self.frame_mounted = false;
        self.frame_loaded = false;
        self.state = EmbedState::Uninitialized;
        info!(host_url = %self.config.host_url, "chat widget destroyed");
    }

    fn accept(&self, origin: &str, payload: &Value) -> Result<BridgeMessage, ProtocolError> {
        if self.state == EmbedState::Uninitialized {
            return Err(ProtocolError::Inactive);
        }
        let trusted = self.trusted_origin.as_deref().ok_or(ProtocolError::NoTrustAnchor)?;
        if origin != trusted {
            return Err(ProtocolError::UntrustedOrigin { origin: origin.to_owned() });
        }
        Ok(BridgeMessage::deserialize(payload)?)
    }

    fn track(&self, event: LifecycleEvent, data: Value) {
        if !self.config.enable_analytics {
            return;
        }
        self.analytics.dispatch(AnalyticsEvent::now(
            event,
            data,
            self.page.page_url(),
            self.page.user_agent(),
        ));
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnalytics;

impl AnalyticsSink for NoAnalytics {
    fn dispatch(&self, _event: AnalyticsEvent) {}
}

// ── registry ─────────────────────────────────────────────────────────────────

pub type EmbedHandle<P> = Arc<Mutex<EmbedBridge<P>>>;

/// Keeps at most one bridge per key.
pub struct EmbedRegistry<P> {
    instances: Mutex<HashMap<String, EmbedHandle<P>>>,
}

impl<P> Default for EmbedRegistry<P> {
    fn default() -> Self {
        Self { instances: Mutex::new(HashMap::new()) }
    }
}

impl<P: HostPage> EmbedRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bridge registered under `key`, creating it with `init` when absent.
    /// `init` runs at most once per key.
    pub fn get_or_init<F>(&self, key: &str, init: F) -> EmbedHandle<P>
    where
        F: FnOnce() -> EmbedBridge<P>,
    {
        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances
            .entry(key.to_owned())
            .or_insert_with(|| {
                debug!(key, "registering chat widget instance");
                Arc::new(Mutex::new(init()))
            })
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<EmbedHandle<P>> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.get(key).cloned()
    }

    /// Destroy and forget the bridge under `key`.
    pub fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
            instances.remove(key)
        };
        match removed {
            Some(handle) => {
                handle.lock().unwrap_or_else(PoisonError::into_inner).destroy();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analytics::RecordingAnalytics;
    use parley_types::FeedbackKind;
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct FakePage {
        bubble_mounted: bool,
        bubble_visible: bool,
        frame_url: Option<Url>,
        frame_placement: Option<Placement>,
        frame_visible: bool,
        frame_mounts: usize,
    }

    impl HostPage for FakePage {
        fn mount_bubble(&mut self, _placement: &Placement) {
            self.bubble_mounted = true;
            self.bubble_visible = true;
        }
        fn set_bubble_visible(&mut self, visible: bool) {
            self.bubble_visible = visible;
        }
        fn unmount_bubble(&mut self) {
            self.bubble_mounted = false;
            self.bubble_visible = false;
        }
        fn mount_frame(&mut self, url: &Url, placement: &Placement) {
            self.frame_url = Some(url.clone());
            self.frame_placement = Some(*placement);
            self.frame_visible = true;
            self.frame_mounts += 1;
        }
        fn set_frame_visible(&mut self, visible: bool) {
            self.frame_visible = visible;
        }
        fn unmount_frame(&mut self) {
            self.frame_url = None;
            self.frame_visible = false;
        }
        fn page_url(&self) -> String {
            "https://shop.test/cart".into()
        }
        fn user_agent(&self) -> String {
            "test-agent".into()
        }
    }

    fn config() -> WidgetConfig {
        WidgetConfig { host_url: "https://a.test".into(), ..Default::default() }
    }

    fn bridge() -> (EmbedBridge<FakePage>, RecordingAnalytics) {
        let analytics = RecordingAnalytics::new();
        let bridge = EmbedBridge::new(config(), FakePage::default(), Arc::new(analytics.clone()));
        (bridge, analytics)
    }

    fn feedback() -> Value {
        json!({
            "type": "chat-widget-feedback",
            "data": { "messageId": Uuid::new_v4(), "feedback": "positive" }
        })
    }

    #[test]
    fn frame_is_created_once_and_toggled_afterwards() {
        let (mut bridge, analytics) = bridge();
        bridge.activate();
        assert_eq!(bridge.state(), EmbedState::Uninitialized);

        bridge.page_ready();
        assert!(bridge.page().bubble_visible);

        bridge.activate();
        assert_eq!(bridge.state(), EmbedState::Open);
        assert!(!bridge.page().bubble_visible);
        let url = bridge.page().frame_url.clone().unwrap();
        assert!(url.as_str().starts_with("https://a.test/widget?config="));

        bridge.minimize();
        assert_eq!(bridge.state(), EmbedState::Bubble);
        assert!(bridge.page().bubble_visible);
        assert!(!bridge.page().frame_visible);
        assert!(bridge.page().frame_url.is_some());

        bridge.activate();
        assert!(bridge.page().frame_visible);
        assert_eq!(bridge.page().frame_mounts, 1);
        assert_eq!(analytics.names(), vec!["chat_opened", "chat_opened"]);
    }

    #[test]
    fn widget_loaded_is_reported_once() {
        let (mut bridge, analytics) = bridge();
        bridge.frame_loaded();
        bridge.page_ready();
        bridge.activate();
        bridge.frame_loaded();
        bridge.frame_loaded();
        assert_eq!(analytics.names(), vec!["chat_opened", "widget_loaded"]);
        assert_eq!(analytics.events()[1].url, "https://shop.test/cart");
    }

    #[test]
    fn foreign_origin_is_dropped() {
        let (mut bridge, analytics) = bridge();
        bridge.page_ready();
        assert!(bridge.handle_message("https://evil.test", &feedback()).is_none());
        assert!(analytics.events().is_empty());

        let accepted = bridge.handle_message("https://a.test", &feedback()).unwrap();
        assert!(matches!(accepted, BridgeMessage::Feedback { feedback: FeedbackKind::Positive, .. }));
        assert_eq!(analytics.names(), vec!["feedback_given"]);
        assert_eq!(analytics.events()[0].data["feedback"], "positive");
    }

    #[test]
    fn unknown_kinds_are_dropped() {
        let (mut bridge, _) = bridge();
        bridge.page_ready();
        bridge.activate();
        assert!(bridge.handle_message("https://a.test", &json!({ "type": "resize" })).is_none());
        assert!(bridge.handle_message("https://a.test", &json!("chat-widget-close")).is_none());
        assert_eq!(bridge.state(), EmbedState::Open);
    }

    #[test]
    fn minimize_and_close_intents_return_to_bubble() {
        let (mut bridge, _) = bridge();
        bridge.page_ready();
        bridge.activate();
        bridge.handle_message("https://a.test", &json!({ "type": "chat-widget-minimize" }));
        assert_eq!(bridge.state(), EmbedState::Bubble);

        bridge.activate();
        bridge.handle_message("https://a.test", &json!({ "type": "chat-widget-close", "data": {} }));
        assert_eq!(bridge.state(), EmbedState::Bubble);
        assert_eq!(bridge.page().frame_mounts, 1);
    }

    #[test]
    fn messages_after_destroy_are_dropped() {
        let (mut bridge, analytics) = bridge();
        assert!(bridge.handle_message("https://a.test", &feedback()).is_none());

        bridge.page_ready();
        bridge.activate();
        bridge.destroy();
        assert!(bridge.handle_message("https://a.test", &feedback()).is_none());
        assert!(bridge.handle_message("https://a.test", &json!({ "type": "chat-widget-close" })).is_none());
        assert_eq!(bridge.state(), EmbedState::Uninitialized);
        assert_eq!(analytics.names(), vec!["chat_opened"]);
    }

    #[test]
    fn trust_anchor_is_the_host_origin() {
        for host_url in ["https://a.test/", "https://a.test/support/widget"] {
            let analytics = RecordingAnalytics::new();
            let config = WidgetConfig { host_url: host_url.into(), ..Default::default() };
            let mut bridge = EmbedBridge::new(config, FakePage::default(), Arc::new(analytics.clone()));
            bridge.page_ready();
            assert!(bridge.handle_message("https://a.test", &feedback()).is_some());
            assert!(bridge.handle_message("https://a.test/", &feedback()).is_none());
            assert!(bridge.handle_message("https://evil.test", &feedback()).is_none());
            assert_eq!(analytics.names(), vec!["feedback_given"]);
        }
    }

    #[test]
    fn unusable_host_url_trusts_nothing() {
        let config = WidgetConfig { host_url: "not a url".into(), ..Default::default() };
        let mut bridge = EmbedBridge::new(config, FakePage::default(), Arc::new(NoAnalytics));
        bridge.page_ready();
        assert!(bridge.handle_message("not a url", &feedback()).is_none());
        assert!(bridge.handle_message("null", &feedback()).is_none());
    }

    #[test]
    fn analytics_disabled_sends_nothing() {
        let analytics = RecordingAnalytics::new();
        let config = WidgetConfig { enable_analytics: false, ..config() };
        let mut bridge = EmbedBridge::new(config, FakePage::default(), Arc::new(analytics.clone()));
        bridge.page_ready();
        bridge.activate();
        bridge.frame_loaded();
        bridge.handle_message("https://a.test", &feedback());
        assert!(analytics.events().is_empty());
    }

    #[test]
    fn hide_show_and_destroy() {
        let (mut bridge, _) = bridge();
        bridge.page_ready();
        bridge.activate();
        bridge.hide();
        assert_eq!(bridge.state(), EmbedState::Bubble);
        assert!(!bridge.page().bubble_visible);
        assert!(!bridge.page().frame_visible);

        bridge.show();
        assert!(bridge.page().bubble_visible);

        bridge.destroy();
        assert_eq!(bridge.state(), EmbedState::Uninitialized);
        assert!(!bridge.page().bubble_mounted);
        assert!(bridge.page().frame_url.is_none());

        bridge.page_ready();
        bridge.activate();
        assert_eq!(bridge.page().frame_mounts, 2);
    }

    #[test]
    fn http_analytics_bridge_runs_without_a_runtime() {
        let mut bridge = EmbedBridge::with_http_analytics(config(), FakePage::default());
        bridge.page_ready();
        bridge.activate();
        bridge.frame_loaded();
        assert_eq!(bridge.state(), EmbedState::Open);
        assert_eq!(bridge.config().host_url, "https://a.test");
    }

    #[test]
    fn frame_stacks_above_bubble() {
        let config = WidgetConfig { z_index: 50, size: WidgetSize::Small, ..config() };
        assert_eq!(Placement::bubble(&config).z_index, 50);
        let frame = Placement::frame(&config);
        assert_eq!(frame.z_index, 51);
        assert_eq!((frame.width, frame.height), (320, 480));
        assert_eq!(frame_dimensions(WidgetSize::Large), (448, 700));
    }

    #[test]
    fn registry_is_idempotent_per_key() {
        let registry = EmbedRegistry::<FakePage>::new();
        let mut inits = 0;
        let first = registry.get_or_init("shop", || {
            inits += 1;
            EmbedBridge::new(config(), FakePage::default(), Arc::new(NoAnalytics))
        });
        let second = registry.get_or_init("shop", || {
            inits += 1;
            EmbedBridge::new(config(), FakePage::default(), Arc::new(NoAnalytics))
        });
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(inits, 1);
        assert_eq!(registry.len(), 1);

        first.lock().unwrap().page_ready();
        assert!(registry.remove("shop"));
        assert_eq!(first.lock().unwrap().state(), EmbedState::Uninitialized);
        assert!(registry.is_empty());
        assert!(!registry.remove("shop"));
    }
}
