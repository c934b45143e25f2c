//! Streaming chat relay (`POST /api/chat`).
//!
//! Stateless: each request carries the whole conversation. The fixed system
//! directive is prepended, the backend is asked for a streaming completion,
//! and every non-empty delta is forwarded as one event-stream frame. A
//! normal end is marked with the `[DONE]` sentinel; a backend failure
//! mid-stream aborts the body without it.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use futures::stream;
use parley_types::sse::{EVENT_STREAM_MIME, encode_content_frame, encode_done_frame};
use parley_types::{ContentChunk, Role, TurnRequest, WireMessage};
use tracing::{debug, info, warn};
use utoipa::OpenApi;

use crate::backend::{BackendError, DeltaStream};
use crate::error::ServerError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(chat),
    components(schemas(TurnRequest, WireMessage, Role, ContentChunk))
)]
pub struct ChatApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

/// Relay one conversation turn as an event stream.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = TurnRequest,
    responses(
        (status = 200, description = "Event stream of `{content}` frames terminated by `[DONE]`", body = String, content_type = "text/event-stream"),
        (status = 400, description = "Bad request"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TurnRequest>,
) -> Result<Response, ServerError> {
    if req.messages.is_empty() {
        return Err(ServerError::BadRequest("messages must not be empty".into()));
    }
    debug!(messages = req.messages.len(), backend = state.backend.name(), "chat turn request");

    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    messages.push(WireMessage::new(Role::System, state.config.system_prompt.clone()));
    messages.extend(req.messages);

    let deltas = state.backend.stream_completion(messages).await?;

    Ok((
        [
            (header::CONTENT_TYPE, EVENT_STREAM_MIME),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(relay(deltas)),
    )
        .into_response())
}

struct RelayState {
    deltas: DeltaStream,
    frames: usize,
    finished: bool,
}

/// Frame the backend deltas; the sentinel follows only a clean end.
fn relay(deltas: DeltaStream) -> impl futures::Stream<Item = Result<Bytes, BackendError>> + Send {
    let state = RelayState { deltas, frames: 0, finished: false };
    stream::unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            match st.deltas.next().await {
                Some(Ok(delta)) if delta.is_empty() => continue,
                Some(Ok(delta)) => {
                    let frame = encode_content_frame(&ContentChunk { content: delta })
                        .map(Bytes::from)
                        .map_err(|e| BackendError::Decode(e.to_string()));
                    st.frames += 1;
                    return Some((frame, st));
                }
                Some(Err(e)) => {
                    warn!(error = %e, frames = st.frames, "chat stream aborted");
                    st.finished = true;
                    return Some((Err(e), st));
                }
                None => {
                    info!(frames = st.frames, "chat stream complete");
                    st.finished = true;
                    return Some((Ok(Bytes::from(encode_done_frame())), st));
                }
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::CompletionBackend;
    use crate::config::Config;
    use crate::routes::build;
    use async_trait::async_trait;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use tracing_test::traced_test;

    enum Script {
        Deltas(Vec<&'static str>),
        FailAfter(Vec<&'static str>),
        RefuseToOpen,
    }

    struct ScriptedBackend {
        script: Script,
        seen: Mutex<Vec<Vec<WireMessage>>>,
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn stream_completion(&self, messages: Vec<WireMessage>) -> Result<DeltaStream, BackendError> {
            self.seen.lock().unwrap().push(messages);
            let items: Vec<Result<String, BackendError>> = match &self.script {
                Script::Deltas(d) => d.iter().map(|s| Ok(s.to_string())).collect(),
                Script::FailAfter(d) => d
                    .iter()
                    .map(|s| Ok(s.to_string()))
                    .chain(std::iter::once(Err(BackendError::Decode("upstream reset".into()))))
                    .collect(),
                Script::RefuseToOpen => {
                    return Err(BackendError::Status { status: 401, body: "bad key".into() });
                }
            };
            Ok(stream::iter(items).boxed())
        }
    }

    fn app(script: Script) -> (Router, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend { script, seen: Mutex::new(Vec::new()) });
        let state = Arc::new(AppState {
            config: Arc::new(Config { system_prompt: "be nice".into(), ..Config::default() }),
            backend: backend.clone(),
        });
        (build(state), backend)
    }

    fn turn(body: serde_json::Value) -> Request<Body> {
        Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn hello() -> serde_json::Value {
        serde_json::json!({ "messages": [{ "role": "user", "content": "hello" }] })
    }

    #[tokio::test]
    async fn relays_frames_then_sentinel() {
        let (app, backend) = app(Script::Deltas(vec!["Hel", "", "lo"]));
        let response = app.oneshot(turn(hello())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], EVENT_STREAM_MIME);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            &bytes[..],
            b"data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo\"}\n\ndata: [DONE]\n\n"
        );

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0][0], WireMessage::new(Role::System, "be nice"));
        assert_eq!(seen[0][1], WireMessage::new(Role::User, "hello"));
    }

    #[tokio::test]
    #[traced_test]
    async fn mid_stream_failure_aborts_without_sentinel() {
        let (app, _) = app(Script::FailAfter(vec!["partial"]));
        let response = app.oneshot(turn(hello())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body();
        let mut received = Vec::new();
        let mut failed = false;
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Some(data) = frame.data_ref() {
                        received.extend_from_slice(data);
                    }
                }
                Err(_) => {
                    failed = true;
                    break;
                }
            }
        }

        assert!(failed);
        assert_eq!(received, b"data: {\"content\":\"partial\"}\n\n");
        assert!(logs_contain("chat stream aborted"));
    }

    #[tokio::test]
    async fn open_failure_is_a_generic_500() {
        let (app, _) = app(Script::RefuseToOpen);
        let response = app.oneshot(turn(hello())).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Failed to process chat request" }));
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let (app, backend) = app(Script::Deltas(vec![]));
        let response = app.oneshot(turn(serde_json::json!({ "messages": [] }))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_completion_still_ends_with_sentinel() {
        let (app, _) = app(Script::Deltas(vec![]));
        let response = app.oneshot(turn(hello())).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"data: [DONE]\n\n");
    }
}
