//! Client side of the streaming transport.
//!
//! [`consume`] drains one response body into the session store. The growing
//! assistant reply is tracked by an explicit [`InFlightMessage`] handle that
//! the loop owns for the duration of the turn; every applied chunk is
//! published through [`SessionStore::update_message_content`] so the UI can
//! re-render incrementally.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parley_types::{LineDecoder, StreamLine};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::session::{Message, MessageId, SessionId, SessionStore};

/// Text of the assistant message appended when a turn fails.
pub const TURN_ERROR_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

/// How a turn ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The sentinel arrived.
    Completed,
    /// The body ended without a sentinel; the partial reply stands.
    Closed,
    /// The transport failed; the partial reply stands and an error message
    /// follows it.
    Failed(TransportError),
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed)
    }
}

/// Accumulator for the single assistant reply of an outstanding turn.
#[derive(Debug)]
pub struct InFlightMessage {
    session_id: SessionId,
    message_id: Option<MessageId>,
    content: String,
    completed: bool,
}

impl InFlightMessage {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            message_id: None,
            content: String::new(),
            completed: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Id of the reply, once the first chunk created it.
    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Append one delta and publish the grown reply.
    ///
    /// The first non-empty delta creates the reply message; later ones
    /// replace its content with the accumulated text. Ignored once the turn
    /// is complete.
    pub fn apply(&mut self, store: &mut SessionStore, delta: &str) {
        if self.completed || delta.is_empty() {
            return;
        }
        self.content.push_str(delta);
        match self.message_id {
            Some(message_id) => {
                store.update_message_content(self.session_id, message_id, self.content.clone());
            }
            None => {
                let message = Message::assistant(self.content.clone());
                self.message_id = Some(message.id);
                store.append_message(self.session_id, message);
            }
        }
    }

    /// Mark the turn complete. Returns `false` when it already was.
    pub fn complete(&mut self) -> bool {
        !std::mem::replace(&mut self.completed, true)
    }
}

/// Append the fixed error reply for a failed turn.
pub fn report_turn_failure(store: &mut SessionStore, session_id: SessionId, error: &TransportError) {
    warn!(session_id = %session_id, error = %error, "chat turn failed");
    store.append_message(session_id, Message::assistant(TURN_ERROR_MESSAGE));
}

/// Drain a response body into `in_flight`.
///
/// Lines are handled in arrival order. Malformed lines are dropped. Reading
/// stops at the first sentinel.
pub async fn consume<S>(mut body: S, store: &mut SessionStore, in_flight: &mut InFlightMessage) -> TurnOutcome
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    let mut decoder = LineDecoder::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                report_turn_failure(store, in_flight.session_id, &e);
                return TurnOutcome::Failed(e);
            }
        };
        for line in decoder.push(&bytes) {
            if handle_line(&line, store, in_flight) {
                return TurnOutcome::Completed;
            }
        }
    }

    if let Some(line) = decoder.finish() {
        if handle_line(&line, store, in_flight) {
            return TurnOutcome::Completed;
        }
    }

    debug!(session_id = %in_flight.session_id, received = in_flight.content.len(), "stream closed without sentinel");
    TurnOutcome::Closed
}

// Returns true when the line ends the turn.
fn handle_line(line: &str, store: &mut SessionStore, in_flight: &mut InFlightMessage) -> bool {
    match StreamLine::classify(line) {
        StreamLine::Content(delta) => {
            in_flight.apply(store, &delta);
            false
        }
        StreamLine::Done => {
            if in_flight.complete() {
                debug!(session_id = %in_flight.session_id, len = in_flight.content.len(), "chat turn complete");
            }
            true
        }
        StreamLine::Malformed(payload) => {
            trace!(payload = %payload, "dropping malformed stream line");
            false
        }
        StreamLine::Ignored => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::MemoryStorage;
    use futures::stream;
    use std::sync::Arc;

    fn store() -> SessionStore {
        SessionStore::open(Arc::new(MemoryStorage::new()), "hi")
    }

    fn body(chunks: &[&'static str]) -> impl Stream<Item = Result<Bytes, TransportError>> + Unpin {
        stream::iter(chunks.iter().copied().map(|c| Ok(Bytes::from_static(c.as_bytes()))).collect::<Vec<_>>())
    }

    fn reply<'a>(store: &'a SessionStore, in_flight: &InFlightMessage) -> &'a Message {
        let session = store.session(in_flight.session_id()).unwrap();
        session.message(in_flight.message_id().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn chunks_concatenate_into_one_reply() {
        let mut store = store();
        let sid = store.current_id().unwrap();
        let mut in_flight = InFlightMessage::new(sid);

        let outcome = consume(
            body(&["data: {\"content\":\"Hel\"}\n\n", "data: {\"content\":\"lo\"}\n\ndata: [DONE]\n\n"]),
            &mut store,
            &mut in_flight,
        )
        .await;

        assert!(outcome.is_completed());
        assert!(in_flight.is_completed());
        assert_eq!(reply(&store, &in_flight).content, "Hello");
        // welcome + one reply
        assert_eq!(store.session(sid).unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn reading_stops_at_the_first_sentinel() {
        let mut store = store();
        let sid = store.current_id().unwrap();
        let mut in_flight = InFlightMessage::new(sid);

        let outcome = consume(
            body(&[
                "data: {\"content\":\"a\"}\n\ndata: [DONE]\n\n",
                "data: {\"content\":\"b\"}\n\ndata: [DONE]\n\n",
            ]),
            &mut store,
            &mut in_flight,
        )
        .await;

        assert!(outcome.is_completed());
        assert_eq!(reply(&store, &in_flight).content, "a");
        assert!(!in_flight.complete());
        in_flight.apply(&mut store, "late");
        assert_eq!(reply(&store, &in_flight).content, "a");
    }

    #[tokio::test]
    async fn noise_is_dropped_without_aborting() {
        let mut store = store();
        let sid = store.current_id().unwrap();
        let mut in_flight = InFlightMessage::new(sid);

        let outcome = consume(
            body(&[
                ": comment\n",
                "data: not json\n\n",
                "event: ping\ndata: {\"delta\":\"x\"}\n\n",
                "data: {\"content\":\"ok\"}\r\n\r\n",
                "data: {\"content\":\"\"}\n\n",
                "data: [DONE]\n\n",
            ]),
            &mut store,
            &mut in_flight,
        )
        .await;

        assert!(outcome.is_completed());
        assert_eq!(reply(&store, &in_flight).content, "ok");
    }

    #[tokio::test]
    async fn frames_split_across_reads_are_reassembled() {
        let mut store = store();
        let sid = store.current_id().unwrap();
        let mut in_flight = InFlightMessage::new(sid);

        let outcome = consume(
            body(&["da", "ta: {\"conte", "nt\":\"Hi\"}\n", "\ndata: [DO", "NE]"]),
            &mut store,
            &mut in_flight,
        )
        .await;

        assert!(outcome.is_completed());
        assert_eq!(reply(&store, &in_flight).content, "Hi");
    }

    #[tokio::test]
    async fn read_failure_keeps_partial_and_appends_error() {
        let mut store = store();
        let sid = store.current_id().unwrap();
        let mut in_flight = InFlightMessage::new(sid);

        let chunks: Vec<Result<Bytes, TransportError>> = vec![
            Ok(Bytes::from_static(b"data: {\"content\":\"partial\"}\n\n")),
            Err(TransportError::Stream("connection reset".into())),
            Ok(Bytes::from_static(b"data: {\"content\":\"never\"}\n\n")),
        ];
        let outcome = consume(stream::iter(chunks), &mut store, &mut in_flight).await;

        assert!(matches!(outcome, TurnOutcome::Failed(TransportError::Stream(_))));
        assert!(!in_flight.is_completed());
        let messages = &store.session(sid).unwrap().messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].content, "partial");
        assert_eq!(messages[2].content, TURN_ERROR_MESSAGE);
        assert_ne!(messages[1].id, messages[2].id);
    }

    #[tokio::test]
    async fn clean_close_without_sentinel_is_not_an_error() {
        let mut store = store();
        let sid = store.current_id().unwrap();
        let mut in_flight = InFlightMessage::new(sid);

        let outcome = consume(body(&["data: {\"content\":\"cut\"}\n\n"]), &mut store, &mut in_flight).await;

        assert!(matches!(outcome, TurnOutcome::Closed));
        let messages = &store.session(sid).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "cut");
    }

    #[tokio::test]
    async fn failure_before_any_chunk_only_adds_the_error_message() {
        let mut store = store();
        let sid = store.current_id().unwrap();
        let mut in_flight = InFlightMessage::new(sid);

        let chunks: Vec<Result<Bytes, TransportError>> = vec![Err(TransportError::Status { status: 502 })];
        consume(stream::iter(chunks), &mut store, &mut in_flight).await;

        assert!(in_flight.message_id().is_none());
        let messages = &store.session(sid).unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, TURN_ERROR_MESSAGE);
    }
}
