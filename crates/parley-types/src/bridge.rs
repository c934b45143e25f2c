//! Frame → host messages of the embedding protocol.
//!
//! Every message is an envelope `{"type": <kind>, "data": <payload>}`. The
//! host accepts exactly the kinds below; anything else fails to deserialize
//! and is dropped by the receiver. `data` is ignored for the minimize and
//! close intents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

const FEEDBACK: &str = "chat-widget-feedback";
const MINIMIZE: &str = "chat-widget-minimize";
const CLOSE: &str = "chat-widget-close";

/// User verdict attached to a feedback report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeedbackKind {
    Positive,
    Negative,
}

/// A message posted from the widget frame to its host page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum BridgeMessage {
    #[serde(rename = "chat-widget-feedback", rename_all = "camelCase")]
    Feedback { message_id: Uuid, feedback: FeedbackKind },
    #[serde(rename = "chat-widget-minimize")]
    Minimize,
    #[serde(rename = "chat-widget-close")]
    Close,
}

impl BridgeMessage {
    /// Wire name of the message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeMessage::Feedback { .. } => FEEDBACK,
            BridgeMessage::Minimize => MINIMIZE,
            BridgeMessage::Close => CLOSE,
        }
    }
}

/// Inbound form of a message, before its kind is checked.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackData {
    message_id: Uuid,
    feedback: FeedbackKind,
}

impl TryFrom<Envelope> for BridgeMessage {
    type Error = String;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match envelope.kind.as_str() {
            FEEDBACK => {
                let FeedbackData { message_id, feedback } =
                    serde_json::from_value(envelope.data).map_err(|e| format!("invalid feedback data: {e}"))?;
                Ok(BridgeMessage::Feedback { message_id, feedback })
            }
            MINIMIZE => Ok(BridgeMessage::Minimize),
            CLOSE => Ok(BridgeMessage::Close),
            other => Err(format!("unknown message kind `{other}`")),
        }
    }
}

impl<'de> Deserialize<'de> for BridgeMessage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let envelope = Envelope::deserialize(deserializer)?;
        BridgeMessage::try_from(envelope).map_err(serde::de::Error::custom)
    }
}
