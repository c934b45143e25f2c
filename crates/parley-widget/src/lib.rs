//! Client half of parley.
//!
//! - [`runtime`]: the in-frame conversation runtime.
//! - [`session`] and [`storage`]: chat sessions and where they persist.
//! - [`stream`] and [`transport`]: opening a turn and reassembling its
//!   streamed reply.
//! - [`embed`]: the host-page bridge that mounts the widget and accepts
//!   intents from its frame.

pub mod analytics;
pub mod config;
pub mod embed;
pub mod error;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod stream;
pub mod transport;

pub use analytics::{AnalyticsSink, HttpAnalytics, RecordingAnalytics};
pub use config::{Position, Theme, WidgetConfig, WidgetSize};
pub use embed::{EmbedBridge, EmbedHandle, EmbedRegistry, EmbedState, HostPage, Placement};
pub use error::{ConfigParseError, PersistenceError, ProtocolError, TransportError};
pub use runtime::{HostChannel, PendingTurn, SubmitRejected, WidgetRuntime};
pub use session::{ChatSession, Message, MessageId, SessionId, SessionStore};
pub use storage::{FileStorage, MemoryStorage, StateStorage};
pub use stream::{InFlightMessage, TurnOutcome};
pub use transport::{ByteStream, ChatTransport, HttpTransport};
