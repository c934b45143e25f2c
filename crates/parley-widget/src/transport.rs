//! Opening a turn against the chat endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use parley_types::TurnRequest;
use parley_types::sse::EVENT_STREAM_MIME;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::WidgetConfig;
use crate::error::TransportError;

const USER_AGENT: &str = concat!("parley-widget/", env!("CARGO_PKG_VERSION"));

/// Response body of a turn, as raw byte chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Capability to open one streamed request/response turn.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_turn(&self, request: &TurnRequest) -> Result<ByteStream, TransportError>;
}

/// [`ChatTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(endpoint: Url) -> Result<Self, TransportError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client, endpoint })
    }

    /// Transport for the endpoint a widget config resolves to.
    pub fn from_config(config: &WidgetConfig) -> Result<Self, TransportError> {
        let endpoint = config
            .chat_endpoint()
            .map_err(|e| TransportError::Endpoint(e.to_string()))?;
        Self::new(endpoint)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open_turn(&self, request: &TurnRequest) -> Result<ByteStream, TransportError> {
        debug!(endpoint = %self.endpoint, messages = request.messages.len(), "opening chat turn");
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, EVENT_STREAM_MIME)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16() });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed())
    }
}
