//! Error taxonomy of the widget side.
//!
//! Each kind is handled at the boundary where it occurs: a transport failure
//! becomes an assistant error message, a persistence failure is logged and the
//! store keeps running in memory, a config failure falls back to defaults and
//! a protocol failure drops the inbound message. None of them reaches the
//! caller as a panic or an unwinding error.

use thiserror::Error;

/// Network or backend failure during a turn.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP transport failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("chat endpoint returned status {status}")]
    Status { status: u16 },

    /// The endpoint URL could not be resolved.
    #[error("invalid chat endpoint: {0}")]
    Endpoint(String),

    /// The body stream failed for a reason other than HTTP.
    #[error("stream read failed: {0}")]
    Stream(String),
}

/// Storage read/write failure.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persisted state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The storage lock was poisoned by a panicking writer.
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
}

/// Malformed or missing embedding configuration.
#[derive(Debug, Error)]
pub enum ConfigParseError {
    #[error("load URL has no `config` parameter")]
    MissingParameter,

    #[error("config parameter is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config is not a JSON object")]
    NotAnObject,

    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("host URL `{0}` is not an absolute http(s) URL")]
    HostUrl(String),
}

/// Inbound cross-document message that must be dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bridge is not mounted")]
    Inactive,

    #[error("host URL is unusable; no origin is trusted")]
    NoTrustAnchor,

    #[error("message origin `{origin}` does not match the trust anchor")]
    UntrustedOrigin { origin: String },

    #[error("unrecognized message: {0}")]
    Unrecognized(#[from] serde_json::Error),
}
