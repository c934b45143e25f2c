//! The in-frame conversation runtime.
//!
//! [`WidgetRuntime`] ties the pieces together for one widget instance: config
//! parsed from the frame's load URL, the session store, the chat transport
//! and the channel back to the host page.

use std::sync::{Arc, Mutex, PoisonError};

use parley_types::{BridgeMessage, FeedbackKind, TurnRequest};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::WidgetConfig;
use crate::error::TransportError;
use crate::session::{Message, MessageId, SessionId, SessionStore};
use crate::storage::StateStorage;
use crate::stream::{InFlightMessage, TURN_ERROR_MESSAGE, TurnOutcome, consume, report_turn_failure};
use crate::transport::{ChatTransport, HttpTransport};

/// Outbound channel from the frame to its host page.
pub trait HostChannel: Send + Sync {
    fn post(&self, message: &BridgeMessage);
}

/// Why a submission was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitRejected {
    #[error("message is empty")]
    Empty,
    #[error("a turn is already outstanding")]
    Busy,
}

/// Occupancy of the single turn slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum TurnSlot {
    #[default]
    Idle,
    Outstanding,
    /// The turn was dropped before it finished; its session still owes the
    /// user an error reply.
    Abandoned(SessionId),
}

/// Holds the turn slot for one [`PendingTurn`] and releases it on drop.
#[derive(Debug)]
struct TurnGuard {
    slot: Arc<Mutex<TurnSlot>>,
    session_id: SessionId,
    finished: bool,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = if self.finished { TurnSlot::Idle } else { TurnSlot::Abandoned(self.session_id) };
    }
}

/// A turn whose user message is recorded but whose reply has not been
/// requested yet. Dropping it without running it frees the runtime for the
/// next submission.
#[derive(Debug)]
pub struct PendingTurn {
    session_id: SessionId,
    request: TurnRequest,
    guard: TurnGuard,
}

impl PendingTurn {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn request(&self) -> &TurnRequest {
        &self.request
    }
}

pub struct WidgetRuntime<T> {
    config: WidgetConfig,
    store: SessionStore,
    transport: T,
    host: Arc<dyn HostChannel>,
    slot: Arc<Mutex<TurnSlot>>,
}

impl<T> std::fmt::Debug for WidgetRuntime<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetRuntime")
            .field("host_url", &self.config.host_url)
            .field("store", &self.store)
            .field("slot", &*self.slot.lock().unwrap_or_else(PoisonError::into_inner))
            .finish()
    }
}

impl WidgetRuntime<HttpTransport> {
    /// Runtime for a frame loaded from `load_url`, talking HTTP to the
    /// configured chat endpoint.
    pub fn over_http(
        load_url: &Url,
        storage: Arc<dyn StateStorage>,
        host: Arc<dyn HostChannel>,
    ) -> Result<Self, TransportError> {
        let config = WidgetConfig::from_load_url(load_url);
        let transport = HttpTransport::from_config(&config)?;
        Ok(Self::new(config, storage, transport, host))
    }
}

impl<T: ChatTransport> WidgetRuntime<T> {
    pub fn new(config: WidgetConfig, storage: Arc<dyn StateStorage>, transport: T, host: Arc<dyn HostChannel>) -> Self {
        let store = SessionStore::open(storage, config.welcome_message.clone());
        info!(sessions = store.len(), host_url = %config.host_url, "widget runtime ready");
        Self { config, store, transport, host, slot: Arc::default() }
    }

    pub fn from_load_url(
        load_url: &Url,
        storage: Arc<dyn StateStorage>,
        transport: T,
        host: Arc<dyn HostChannel>,
    ) -> Self {
        Self::new(WidgetConfig::from_load_url(load_url), storage, transport, host)
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Whether a turn is outstanding.
    pub fn is_busy(&self) -> bool {
        self.turn_slot() == TurnSlot::Outstanding
    }

    fn turn_slot(&self) -> TurnSlot {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── turns ────────────────────────────────────────────────────────────────

    /// Send `text` and stream the reply into the current session.
    pub async fn submit(&mut self, text: &str) -> Result<TurnOutcome, SubmitRejected> {
        let turn = self.begin_turn(text)?;
        Ok(self.run_turn(turn).await)
    }

    /// Record the user message and prepare the request carrying the full
    /// session history. The runtime stays busy until the returned turn is
    /// run to its end or dropped.
    pub fn begin_turn(&mut self, text: &str) -> Result<PendingTurn, SubmitRejected> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SubmitRejected::Empty);
        }
        self.settle_abandoned_turn();
        if self.is_busy() {
            debug!("submission rejected while a turn is outstanding");
            return Err(SubmitRejected::Busy);
        }

        let session_id = match self.store.current_id() {
            Some(id) => id,
            None => self.store.create_session(),
        };
        self.store.append_message(session_id, Message::user(text));
        self.store.rename_if_default(session_id, text);

        let messages = self
            .store
            .session(session_id)
            .map(|s| s.messages.iter().map(Message::to_wire).collect())
            .unwrap_or_default();
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = TurnSlot::Outstanding;
        let guard = TurnGuard { slot: self.slot.clone(), session_id, finished: false };
        Ok(PendingTurn { session_id, request: TurnRequest { messages }, guard })
    }

    /// Open the turn and drain its reply.
    #[instrument(skip_all, fields(session_id = %turn.session_id))]
    pub async fn run_turn(&mut self, mut turn: PendingTurn) -> TurnOutcome {
        self.settle_abandoned_turn();
        let outcome = match self.transport.open_turn(&turn.request).await {
            Ok(body) => {
                let mut in_flight = InFlightMessage::new(turn.session_id);
                consume(body, &mut self.store, &mut in_flight).await
            }
            Err(e) => {
                report_turn_failure(&mut self.store, turn.session_id, &e);
                TurnOutcome::Failed(e)
            }
        };
        turn.guard.finished = true;
        outcome
    }

    /// Give a turn that was dropped mid-flight its error reply.
    fn settle_abandoned_turn(&mut self) {
        let abandoned = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match *slot {
                TurnSlot::Abandoned(session_id) => {
                    *slot = TurnSlot::Idle;
                    Some(session_id)
                }
                _ => None,
            }
        };
        if let Some(session_id) = abandoned {
            warn!(session_id = %session_id, "chat turn abandoned before it finished");
            self.store.append_message(session_id, Message::assistant(TURN_ERROR_MESSAGE));
        }
    }

    // ── session navigation ───────────────────────────────────────────────────

    pub fn new_chat(&mut self) -> SessionId {
        self.settle_abandoned_turn();
        self.store.create_session()
    }

    pub fn select_session(&mut self, session_id: SessionId) -> bool {
        self.settle_abandoned_turn();
        self.store.select_session(session_id)
    }

    pub fn delete_session(&mut self, session_id: SessionId) -> bool {
        self.settle_abandoned_turn();
        self.store.delete_session(session_id)
    }

    pub fn clear_history(&mut self) -> SessionId {
        self.settle_abandoned_turn();
        self.store.clear_all()
    }

    // ── host intents ─────────────────────────────────────────────────────────

    pub fn report_feedback(&self, message_id: MessageId, feedback: FeedbackKind) {
        self.host.post(&BridgeMessage::Feedback { message_id, feedback });
    }

    pub fn request_minimize(&self) {
        self.host.post(&BridgeMessage::Minimize);
    }

    pub fn request_close(&self) {
        self.host.post(&BridgeMessage::Close);
    }
}
