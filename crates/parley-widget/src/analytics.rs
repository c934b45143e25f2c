//! Best-effort analytics side channel.

use std::sync::{Arc, Mutex};

use parley_types::AnalyticsEvent;
use reqwest::{Client, StatusCode};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use url::Url;

/// Receiver of lifecycle events.
///
/// Dispatch never blocks and never fails from the caller's point of view.
pub trait AnalyticsSink: Send + Sync {
    fn dispatch(&self, event: AnalyticsEvent);
}

/// Posts events to the analytics endpoint on a detached task.
#[derive(Debug, Clone)]
pub struct HttpAnalytics {
    client: Client,
    endpoint: Url,
}

impl HttpAnalytics {
    pub fn new(endpoint: Url) -> Self {
        Self { client: Client::new(), endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// POST one event and wait for the response status.
    pub async fn deliver(&self, event: &AnalyticsEvent) -> Result<StatusCode, reqwest::Error> {
        let response = self.client.post(self.endpoint.clone()).json(event).send().await?;
        Ok(response.status())
    }

    fn spawn_delivery(&self, handle: &Handle, event: AnalyticsEvent) -> JoinHandle<()> {
        let sink = self.clone();
        handle.spawn(async move {
            match sink.deliver(&event).await {
                Ok(status) => trace!(event = %event.event, %status, "analytics event sent"),
                Err(e) => debug!(event = %event.event, error = %e, "analytics event failed"),
            }
        })
    }
}

impl AnalyticsSink for HttpAnalytics {
    fn dispatch(&self, event: AnalyticsEvent) {
        let Ok(handle) = Handle::try_current() else {
            debug!(event = %event.event, "no async runtime; analytics event dropped");
            return;
        };
        self.spawn_delivery(&handle, event);
    }
}

/// Keeps every dispatched event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingAnalytics {
    events: Arc<Mutex<Vec<AnalyticsEvent>>>,
}

impl RecordingAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Names of the recorded events, in dispatch order.
    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.event).collect()
    }
}

impl AnalyticsSink for RecordingAnalytics {
    fn dispatch(&self, event: AnalyticsEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
