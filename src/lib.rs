//! Speech recognition streaming client
//!
//! Streams audio from a file or a capture device to a remote recognition
//! service over WebSocket, using either the continuous streaming protocol or
//! the start/stop bracketed oneshot protocol, and reports results as they
//! arrive.

pub mod asr;
pub mod audio;
pub mod data;
pub mod error;

pub use asr::{LogSink, Protocol, ProtocolSession, ResultEvent, ResultSink, RunLimits, RunReport};
pub use audio::{AudioSource, FileSource, LiveSource, PcmFrame, Resampler};
pub use data::AppConfig;
pub use error::{AsrError, AudioError, DecodeError};
