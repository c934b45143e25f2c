//! OpenAI-compatible streaming chat completions over `reqwest`.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parley_types::sse::{DONE_SENTINEL, data_payload};
use parley_types::{LineDecoder, WireMessage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{BackendError, CompletionBackend, DeltaStream};
use crate::config::Config;

/// Longest upstream error body carried into a [`BackendError::Status`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Clone)]
pub struct OpenAiCompatBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiCompatBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatBackend {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: cfg.llm_base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.llm_api_key.clone(),
            model: cfg.llm_model.clone(),
            temperature: cfg.llm_temperature,
            max_tokens: cfg.llm_max_tokens,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[async_trait]
impl CompletionBackend for OpenAiCompatBackend {
    fn name(&self) -> &'static str {
        "openai-compat"
    }

    async fn stream_completion(&self, messages: Vec<WireMessage>) -> Result<DeltaStream, BackendError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        };
        debug!(model = %self.model, messages = messages.len(), "opening upstream completion");

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if text.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
                text.truncate(cut);
            }
            return Err(BackendError::Status { status: status.as_u16(), body: text });
        }

        Ok(deltas(response.bytes_stream().boxed()))
    }
}

// ── upstream decoding ────────────────────────────────────────────────────────

struct DeltaState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: LineDecoder,
    pending: VecDeque<String>,
    finished: bool,
}

impl DeltaState {
    // Returns true on the upstream sentinel.
    fn absorb(&mut self, line: &str) -> bool {
        let Some(payload) = data_payload(line) else {
            return false;
        };
        if payload.trim() == DONE_SENTINEL {
            return true;
        }
        match serde_json::from_str::<CompletionChunk>(payload) {
            Ok(chunk) => {
                let content = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .unwrap_or_default();
                if !content.is_empty() {
                    self.pending.push_back(content);
                }
            }
            Err(e) => trace!(error = %e, "skipping undecodable upstream line"),
        }
        false
    }
}

fn deltas(body: BoxStream<'static, reqwest::Result<Bytes>>) -> DeltaStream {
    let state = DeltaState {
        body,
        decoder: LineDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(delta) = st.pending.pop_front() {
                return Some((Ok(delta), st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    for line in st.decoder.push(&bytes) {
                        if st.absorb(&line) {
                            st.finished = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(BackendError::Http(e)), st));
                }
                None => {
                    if let Some(line) = st.decoder.finish() {
                        st.absorb(&line);
                    }
                    st.finished = true;
                }
            }
        }
    })
    .boxed()
}
