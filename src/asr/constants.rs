//! ASR Protocol Constants

/// Default WebSocket endpoint (continuous streaming path)
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/sttRealtime";

/// Path segment of the continuous streaming endpoint
pub const REALTIME_PATH: &str = "/sttRealtime";

/// Path segment of the oneshot endpoint
pub const ONESHOT_PATH: &str = "/oneshot";

/// Query parameter carrying the target sample rate on connect
pub const SAMPLE_RATE_PARAM: &str = "samplerate";

/// Audio configuration
pub const SAMPLE_RATE: u32 = 16000;
pub const CHANNELS: u16 = 1;

/// Chunk duration per send
pub const STREAMING_CHUNK_MS: u64 = 100;
pub const ONESHOT_CHUNK_MS: u64 = 1000;

/// Pacing between audio sends
pub const STREAMING_PACING_MS: u64 = 100;
pub const ONESHOT_PACING_MS: u64 = 50;
pub const LIVE_PACING_MS: u64 = 10;

/// Trailing waits before the receiver is cancelled
pub const FILE_GRACE_MS: u64 = 3000;
pub const LIVE_GRACE_MS: u64 = 2000;
pub const ONESHOT_SETTLE_MS: u64 = 500;
pub const ONESHOT_RESULT_WAIT_MS: u64 = 5000;

/// Capture duration for oneshot microphone runs without an explicit duration
pub const ONESHOT_MIC_DURATION_SECS: u64 = 10;

/// Bounded wait of a single receive poll
pub const RECEIVE_POLL_MS: u64 = 100;

/// Upper bound on the WebSocket close handshake
pub const CLOSE_TIMEOUT_MS: u64 = 2000;

/// Channel depths between the session activities
pub const OUTBOUND_QUEUE_DEPTH: usize = 32;
pub const EVENT_QUEUE_DEPTH: usize = 64;
