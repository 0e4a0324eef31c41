//! Error types
//!
//! Failures are grouped by the stage they abort: audio input, session
//! configuration, connection setup and mid-session transport.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while producing audio frames.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported audio format in {}: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// No usable capture device or sample rate.
    #[error("audio configuration error: {0}")]
    Configuration(String),

    #[error("capture device error: {0}")]
    Device(String),

    #[error("audio source closed")]
    Closed,
}

/// Errors raised by a protocol session.
#[derive(Error, Debug)]
pub enum AsrError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Source(#[from] AudioError),

    #[error("invalid endpoint {uri}: {source}")]
    Endpoint {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("connection to {uri} failed: {source}")]
    Connection {
        uri: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("interrupted while {0}")]
    Interrupted(&'static str),
}

/// A single inbound message that could not be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("binary message is not UTF-8")]
    NotUtf8,
}

pub type Result<T> = std::result::Result<T, AsrError>;
