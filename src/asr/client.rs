//! ASR Protocol Session
//!
//! One session drives one invocation: it connects, spawns a writer, a
//! receiver and a dispatcher task, pumps audio from a source into the writer,
//! then waits for trailing results and tears everything down again.
//!
//! ```text
//! AudioSource -> encode -> [outbound queue] -> writer -> connection
//! connection -> receiver -> decode -> [event queue] -> dispatcher -> ResultSink
//! ```

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::constants::*;
use super::protocol::{OutboundMessage, Protocol, ResultEvent};
use super::sink::ResultSink;
use super::transport::{connect_uri, Connection, Connector, FrameSink, FrameStream};
use crate::audio::{encode_frame, AudioSource};
use crate::error::{AsrError, DecodeError, Result};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Delays applied by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Between audio sends from a finite source
    pub pacing: Duration,
    /// Between audio sends from a live source
    pub live_pacing: Duration,
    /// After the opening command, before the first audio packet
    pub settle: Duration,
    /// Trailing wait after a finite source is exhausted
    pub finite_trailing: Duration,
    /// Trailing wait after live capture ends
    pub live_trailing: Duration,
    /// Upper bound of a single receive poll
    pub receive_poll: Duration,
}

impl SessionTiming {
    /// Documented delays of a protocol
    pub fn for_protocol(protocol: Protocol) -> Self {
        let receive_poll = Duration::from_millis(RECEIVE_POLL_MS);
        let live_pacing = Duration::from_millis(LIVE_PACING_MS);
        match protocol {
            Protocol::Streaming => Self {
                pacing: Duration::from_millis(STREAMING_PACING_MS),
                live_pacing,
                settle: Duration::ZERO,
                finite_trailing: Duration::from_millis(FILE_GRACE_MS),
                live_trailing: Duration::from_millis(LIVE_GRACE_MS),
                receive_poll,
            },
            Protocol::Oneshot => Self {
                pacing: Duration::from_millis(ONESHOT_PACING_MS),
                live_pacing,
                settle: Duration::from_millis(ONESHOT_SETTLE_MS),
                finite_trailing: Duration::from_millis(ONESHOT_RESULT_WAIT_MS),
                live_trailing: Duration::from_millis(ONESHOT_RESULT_WAIT_MS),
                receive_poll,
            },
        }
    }

    fn pacing_for(&self, finite: bool) -> Duration {
        if finite {
            self.pacing
        } else {
            self.live_pacing
        }
    }

    fn trailing_for(&self, finite: bool) -> Duration {
        if finite {
            self.finite_trailing
        } else {
            self.live_trailing
        }
    }
}

/// Caller-side limits on how long audio is sent
#[derive(Debug, Clone, Default)]
pub struct RunLimits {
    /// Stop capturing after this long; finite sources always play out
    pub duration: Option<Duration>,
    /// Operator interrupt: abandons a pending connect, stops sending, and the
    /// trailing wait still runs
    pub interrupt: CancellationToken,
    /// Hard stop: cuts the trailing wait short and tears the session down
    pub abort: CancellationToken,
}

/// Outcome of one session run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: String,
    pub protocol: Protocol,
    /// Audio packets written to the connection
    pub packets_sent: usize,
    /// Every decoded event, partial segments included
    pub events_received: usize,
    /// Decoded events in arrival order, without partial segments
    pub events: Vec<ResultEvent>,
    pub interrupted: bool,
    /// Mid-session failure that cut the run short
    pub failure: Option<String>,
}

impl RunReport {
    /// Finished streaming segments or oneshot result text, in arrival order
    pub fn transcript(&self) -> String {
        self.events
            .iter()
            .filter_map(|event| event.final_text())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Number of events of a kind (see [`ResultEvent::kind`])
    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }
}

/// Speech recognition session for either protocol
pub struct ProtocolSession {
    connector: Box<dyn Connector>,
    endpoint: String,
    sample_rate: u32,
    protocol: Protocol,
    timing: SessionTiming,
    state: SessionState,
    sink: Option<FrameSink>,
}

impl ProtocolSession {
    pub fn new(
        connector: impl Connector + 'static,
        endpoint: impl Into<String>,
        sample_rate: u32,
        protocol: Protocol,
    ) -> Self {
        Self {
            connector: Box::new(connector),
            endpoint: endpoint.into(),
            sample_rate,
            protocol,
            timing: SessionTiming::for_protocol(protocol),
            state: SessionState::Disconnected,
            sink: None,
        }
    }

    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Configured endpoint (the protocol path is only applied during a run)
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stream `source` to the server and collect the results
    ///
    /// Connection and source problems detected before any audio is sent are
    /// returned as errors. Failures after that end the run early and are
    /// recorded in [`RunReport::failure`]. The source is closed, the
    /// connection is released and the endpoint is restored on every path.
    pub async fn run<S>(
        &mut self,
        source: &mut S,
        results: Arc<dyn ResultSink>,
        limits: RunLimits,
    ) -> Result<RunReport>
    where
        S: AudioSource + ?Sized,
    {
        if source.sample_rate() != self.sample_rate {
            source.close().await;
            return Err(AsrError::Configuration(format!(
                "source delivers {}Hz but the session expects {}Hz",
                source.sample_rate(),
                self.sample_rate
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("session", id = %&session_id[..8], protocol = %self.protocol);

        let original = self.endpoint.clone();
        self.endpoint = self.protocol.endpoint_for(&original);

        let result = self
            .run_inner(session_id, source, results, limits)
            .instrument(span.clone())
            .await;

        source.close().await;
        self.disconnect().instrument(span).await;
        self.endpoint = original;
        result
    }

    /// Close the connection if one is open; otherwise a no-op
    pub async fn disconnect(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            self.state = SessionState::Disconnecting;
            match timeout(Duration::from_millis(CLOSE_TIMEOUT_MS), sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Close handshake failed: {}", e),
                Err(_) => tracing::warn!("Close handshake timed out"),
            }
            tracing::info!("Disconnected");
        }
        self.state = SessionState::Disconnected;
    }

    async fn connect(&mut self, limits: &RunLimits) -> Result<Connection> {
        let uri = connect_uri(&self.endpoint, self.sample_rate).map_err(|source| {
            AsrError::Endpoint {
                uri: self.endpoint.clone(),
                source,
            }
        })?;

        self.state = SessionState::Connecting;
        tracing::info!("Connecting to {}", uri);
        let connected = tokio::select! {
            biased;
            connected = self.connector.connect(&uri) => Some(connected),
            _ = limits.interrupt.cancelled() => None,
            _ = limits.abort.cancelled() => None,
        };
        let Some(connected) = connected else {
            self.state = SessionState::Disconnected;
            tracing::info!("Interrupted while connecting");
            return Err(AsrError::Interrupted("connecting"));
        };
        match connected {
            Ok(connection) => {
                self.state = SessionState::Connected;
                tracing::info!("Connected");
                Ok(connection)
            }
            Err(source) => {
                self.state = SessionState::Disconnected;
                Err(AsrError::Connection { uri, source })
            }
        }
    }

    async fn run_inner<S>(
        &mut self,
        session_id: String,
        source: &mut S,
        results: Arc<dyn ResultSink>,
        limits: RunLimits,
    ) -> Result<RunReport>
    where
        S: AudioSource + ?Sized,
    {
        tracing::info!("Sending {}", source.describe());
        let Connection { sink, stream } = self.connect(&limits).await?;

        let cancel = limits.abort.child_token();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let writer = tokio::spawn(
            write_loop(sink, outbound_rx, cancel.clone(), limits.abort.clone()).in_current_span(),
        );
        let receiver = tokio::spawn(
            receive_loop(
                self.protocol,
                stream,
                event_tx,
                cancel.clone(),
                self.timing.receive_poll,
            )
            .in_current_span(),
        );
        let dispatcher = tokio::spawn(dispatch_loop(event_rx, results).in_current_span());

        let finite = source.is_finite();
        let sent = self
            .send_audio(source, &outbound_tx, &limits, &cancel)
            .await;
        source.close().await;

        let trailing = self.timing.trailing_for(finite);
        if !cancel.is_cancelled() {
            tracing::info!("Waiting {:?} for trailing results", trailing);
            tokio::select! {
                _ = sleep(trailing) => {}
                _ = cancel.cancelled() => {}
            }
        }

        cancel.cancel();
        drop(outbound_tx);

        let mut failure = sent.failure;
        let mut packets_sent = 0;
        match writer.await {
            Ok(outcome) => {
                packets_sent = outcome.packets_sent;
                self.sink = Some(outcome.sink);
                failure = failure.or(outcome.failure);
            }
            Err(e) => {
                tracing::error!("Writer task failed: {}", e);
                failure = failure.or(Some(format!("writer task failed: {}", e)));
            }
        }
        match receiver.await {
            Ok(outcome) => {
                drop(outcome.stream);
                failure = failure.or(outcome.failure);
            }
            Err(e) => tracing::error!("Receiver task failed: {}", e),
        }
        let (events_received, events) = dispatcher.await.unwrap_or_else(|e| {
            tracing::error!("Dispatcher task failed: {}", e);
            (0, Vec::new())
        });
        if limits.abort.is_cancelled() {
            tracing::info!("Session aborted");
        }

        tracing::info!(
            "Session finished: {} packets sent, {} events received",
            packets_sent,
            events_received
        );

        Ok(RunReport {
            session_id,
            protocol: self.protocol,
            packets_sent,
            events_received,
            events,
            interrupted: sent.interrupted,
            failure,
        })
    }

    async fn send_audio<S>(
        &self,
        source: &mut S,
        outbound: &mpsc::Sender<OutboundMessage>,
        limits: &RunLimits,
        cancel: &CancellationToken,
    ) -> SendOutcome
    where
        S: AudioSource + ?Sized,
    {
        let mut outcome = SendOutcome::default();
        let writer_gone = || Some("connection writer stopped".to_string());

        if let Some(command) = self.protocol.opening_command() {
            if outbound.send(OutboundMessage::Control(command)).await.is_err() {
                outcome.failure = writer_gone();
                return outcome;
            }
            tokio::select! {
                _ = sleep(self.timing.settle) => {}
                _ = limits.interrupt.cancelled() => {}
                _ = cancel.cancelled() => {}
            }
        }

        let finite = source.is_finite();
        let pacing = self.timing.pacing_for(finite);
        let deadline = match limits.duration {
            Some(duration) if !finite => Some(Instant::now() + duration),
            Some(_) => {
                tracing::debug!("Ignoring duration limit for a finite source");
                None
            }
            None => None,
        };
        let stop_at = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(stop_at);

        let mut queued = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = limits.interrupt.cancelled() => {
                    tracing::info!("Interrupted");
                    outcome.interrupted = true;
                    break;
                }
                _ = &mut stop_at => {
                    tracing::info!("Capture duration reached");
                    break;
                }
                next = source.next_frame() => next,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::debug!("Source exhausted after {} frames", queued);
                    break;
                }
                Err(e) => {
                    tracing::error!("Audio source failed: {}", e);
                    outcome.failure = Some(e.to_string());
                    break;
                }
            };

            if frame.sample_rate() != self.sample_rate {
                tracing::error!(
                    "Dropping frame at {}Hz, session expects {}Hz",
                    frame.sample_rate(),
                    self.sample_rate
                );
                outcome.failure = Some("frame at unexpected sample rate".to_string());
                break;
            }
            if frame.is_empty() {
                continue;
            }

            if outbound
                .send(OutboundMessage::Audio(encode_frame(&frame)))
                .await
                .is_err()
            {
                outcome.failure = writer_gone();
                break;
            }
            queued += 1;

            tokio::select! {
                _ = sleep(pacing) => {}
                _ = limits.interrupt.cancelled() => {}
                _ = cancel.cancelled() => {}
            }
        }

        if cancel.is_cancelled() {
            return outcome;
        }
        if let Some(command) = self.protocol.closing_command() {
            if outbound.send(OutboundMessage::Control(command)).await.is_err() {
                outcome.failure = outcome.failure.or_else(writer_gone);
            }
        }
        outcome
    }
}

#[derive(Debug, Default)]
struct SendOutcome {
    interrupted: bool,
    failure: Option<String>,
}

struct WriterOutcome {
    sink: FrameSink,
    packets_sent: usize,
    failure: Option<String>,
}

struct ReceiverOutcome {
    stream: FrameStream,
    failure: Option<String>,
}

/// Drain the outbound queue into the connection in order
///
/// Runs until the queue is closed, a send fails (which cancels the session)
/// or the run is aborted.
async fn write_loop(
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    cancel: CancellationToken,
    abort: CancellationToken,
) -> WriterOutcome {
    let mut packets_sent = 0usize;
    let mut failure = None;

    loop {
        let message = tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        let control = match &message {
            OutboundMessage::Control(control) => Some(control.to_json()),
            OutboundMessage::Audio(_) => None,
        };

        let written = tokio::select! {
            written = sink.send(Message::from(message)) => written,
            _ = abort.cancelled() => break,
        };
        if let Err(e) = written {
            tracing::error!("Failed to send: {}", e);
            failure = Some(format!("send failed: {}", e));
            cancel.cancel();
            break;
        }

        match control {
            Some(json) => tracing::info!("Sent control message {}", json),
            None => {
                packets_sent += 1;
                if packets_sent % 10 == 0 {
                    tracing::debug!("Sent {} audio packets", packets_sent);
                }
            }
        }
    }

    tracing::debug!("Writer finished after {} audio packets", packets_sent);
    WriterOutcome {
        sink,
        packets_sent,
        failure,
    }
}

/// Poll the connection with a bounded wait and decode each inbound message
async fn receive_loop(
    protocol: Protocol,
    mut stream: FrameStream,
    events: mpsc::Sender<ResultEvent>,
    cancel: CancellationToken,
    poll: Duration,
) -> ReceiverOutcome {
    let mut failure = None;

    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = timeout(poll, stream.next()) => polled,
        };

        let message = match polled {
            Err(_) => continue,
            Ok(None) => {
                tracing::info!("Server closed the connection");
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::error!("Receive failed: {}", e);
                failure = Some(format!("receive failed: {}", e));
                cancel.cancel();
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        let decoded = match message {
            Message::Text(text) => protocol.decode(&text),
            Message::Binary(bytes) => String::from_utf8(bytes)
                .map_err(|_| DecodeError::NotUtf8)
                .and_then(|text| protocol.decode(&text)),
            Message::Close(frame) => {
                tracing::info!("Server sent close: {:?}", frame);
                break;
            }
            _ => continue,
        };

        match decoded {
            Ok(event) => {
                tracing::debug!("Received {} event", event.kind());
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Skipping malformed message: {}", e),
        }
    }

    ReceiverOutcome { stream, failure }
}

/// Hand events to the sink as they arrive and keep the non-partial ones for
/// the report
async fn dispatch_loop(
    mut events: mpsc::Receiver<ResultEvent>,
    results: Arc<dyn ResultSink>,
) -> (usize, Vec<ResultEvent>) {
    let mut received = 0usize;
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        received += 1;
        results.on_event(&event);
        if !event.is_partial() {
            collected.push(event);
        }
    }
    (received, collected)
}
