//! ASR (Automatic Speech Recognition) module
//!
//! Speaks the two recognition protocols over a WebSocket connection:
//! continuous streaming and start/stop bracketed oneshot.

mod client;
mod constants;
mod protocol;
mod sink;
mod transport;

pub use client::{ProtocolSession, RunLimits, RunReport, SessionState, SessionTiming};
pub use constants::*;
pub use protocol::{
    Command, ControlMessage, OutboundMessage, Protocol, RecognitionResult, ResultEvent,
    SegmentResult,
};
pub use sink::{LogSink, ResultSink};
pub use transport::{connect_uri, Connection, Connector, FrameSink, FrameStream, WsConnector};
