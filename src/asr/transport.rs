//! WebSocket transport
//!
//! The session only sees a boxed sink/stream pair so the connection can be
//! replaced by a scripted one in tests.

use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

use super::constants::SAMPLE_RATE_PARAM;

/// Outbound half of a connection
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Inbound half of a connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// An open, message-oriented connection
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens connections to a URI
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<Connection, WsError>;
}

/// `tokio-tungstenite` connector
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, uri: &str) -> Result<Connection, WsError> {
        let (ws_stream, _) = connect_async(uri).await?;
        let (write, read) = ws_stream.split();
        Ok(Connection::new(Box::pin(write), Box::pin(read)))
    }
}

/// Append the target sample rate to an endpoint as a query parameter
pub fn connect_uri(endpoint: &str, sample_rate: u32) -> Result<String, url::ParseError> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut()
        .append_pair(SAMPLE_RATE_PARAM, &sample_rate.to_string());
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_is_appended_as_query() {
        assert_eq!(
            connect_uri("ws://localhost:8000/sttRealtime", 16000).unwrap(),
            "ws://localhost:8000/sttRealtime?samplerate=16000"
        );
        assert_eq!(
            connect_uri("ws://localhost:8000/oneshot?lang=zh", 8000).unwrap(),
            "ws://localhost:8000/oneshot?lang=zh&samplerate=8000"
        );
    }

    #[test]
    fn unparseable_endpoint_is_rejected() {
        assert!(connect_uri("not a uri", 16000).is_err());
    }
}
