//! Shared wire types for parley.
//!
//! Everything that crosses a process or document boundary lives here so the
//! relay server and the widget agree on a single definition:
//!
//! - [`chat`]: turn requests and streamed content chunks.
//! - [`sse`]: `data:` framing, the `[DONE]` sentinel and an incremental line
//!   decoder.
//! - [`analytics`]: the analytics egress payload.
//! - [`bridge`]: frame → host messages of the embedding protocol.

pub mod analytics;
pub mod bridge;
pub mod chat;
pub mod sse;

pub use analytics::{AnalyticsAck, AnalyticsEvent, LifecycleEvent};
pub use bridge::{BridgeMessage, FeedbackKind};
pub use chat::{ContentChunk, Role, TurnRequest, WireMessage};
pub use sse::{DONE_SENTINEL, LineDecoder, StreamLine};
