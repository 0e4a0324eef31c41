//! Live capture source
//!
//! Capture streams are driven from a dedicated thread: the backend is built,
//! negotiated and read there, and chunks cross into async code over a bounded
//! channel.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

use super::device::{negotiate, CaptureBackend, CaptureStream, DevicePolicy, NegotiatedDevice};
use super::frame::PcmFrame;
use super::resampler::Resampler;
use super::source::AudioSource;
use crate::error::AudioError;

/// Chunks buffered between the capture thread and the session
const CHUNK_QUEUE_DEPTH: usize = 32;

/// What to capture and how to convert it
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Rate the session expects
    pub target_rate: u32,
    pub channels: u16,
    /// Samples per captured chunk
    pub chunk_size: usize,
    pub policy: DevicePolicy,
    pub resampler: Resampler,
}

type ChunkResult = Result<Vec<f32>, AudioError>;

/// Unbounded source reading from a capture device
pub struct LiveSource {
    chunks: mpsc::Receiver<ChunkResult>,
    negotiated: NegotiatedDevice,
    target_rate: u32,
    resampler: Resampler,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    closed: bool,
}

impl LiveSource {
    /// Start capturing on a backend built by `make_backend`
    ///
    /// Returns once a device and rate are negotiated and the stream is open,
    /// or with the error that prevented it.
    pub async fn start<B, F>(make_backend: F, settings: CaptureSettings) -> Result<Self, AudioError>
    where
        B: CaptureBackend + 'static,
        F: FnOnce() -> Result<B, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        let running = Arc::new(AtomicBool::new(true));

        let request = CaptureRequest {
            policy: settings.policy.clone(),
            target_rate: settings.target_rate,
            channels: settings.channels,
            chunk_size: settings.chunk_size,
        };
        let thread_running = running.clone();
        let worker = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_loop(make_backend, request, ready_tx, chunk_tx, thread_running))
            .map_err(|e| AudioError::Device(format!("failed to spawn capture thread: {}", e)))?;

        let negotiated = match ready_rx.await {
            Ok(Ok(negotiated)) => negotiated,
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || worker.join()).await;
                return Err(e);
            }
            Err(_) => {
                let _ = tokio::task::spawn_blocking(move || worker.join()).await;
                return Err(AudioError::Device(
                    "capture thread exited during startup".to_string(),
                ));
            }
        };

        if negotiated.params.sample_rate != settings.target_rate {
            tracing::info!(
                "Capturing at {}Hz, resampling to {}Hz",
                negotiated.params.sample_rate,
                settings.target_rate
            );
        }

        Ok(Self {
            chunks: chunk_rx,
            negotiated,
            target_rate: settings.target_rate,
            resampler: settings.resampler,
            running,
            worker: Some(worker),
            closed: false,
        })
    }

    /// Device and stream parameters in use
    pub fn negotiated(&self) -> &NegotiatedDevice {
        &self.negotiated
    }

    /// Rate the device actually captures at
    pub fn capture_rate(&self) -> u32 {
        self.negotiated.params.sample_rate
    }

    /// Tell the capture thread to stop without waiting for it
    fn stop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.running.store(false, Ordering::SeqCst);
        self.chunks.close();
    }
}

#[async_trait]
impl AudioSource for LiveSource {
    fn sample_rate(&self) -> u32 {
        self.target_rate
    }

    fn is_finite(&self) -> bool {
        false
    }

    async fn next_frame(&mut self) -> Result<Option<PcmFrame>, AudioError> {
        if self.closed {
            return Ok(None);
        }
        match self.chunks.recv().await {
            Some(Ok(raw)) => {
                let frame = PcmFrame::new(raw, self.capture_rate());
                if frame.sample_rate() == self.target_rate {
                    Ok(Some(frame))
                } else {
                    Ok(Some(self.resampler.resample(&frame, self.target_rate)))
                }
            }
            Some(Err(e)) => Err(e),
            None => Err(AudioError::Closed),
        }
    }

    async fn close(&mut self) {
        self.stop();
        if let Some(worker) = self.worker.take() {
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::warn!("Capture thread panicked"),
                Err(e) => tracing::warn!("Failed to join capture thread: {}", e),
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "device {} at {}Hz",
            self.negotiated.device.name,
            self.capture_rate()
        )
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.stop();
        let Some(worker) = self.worker.take() else {
            return;
        };
        // The thread exits within one read timeout; join it off the async path.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || worker.join());
            }
            Err(_) => {
                let _ = worker.join();
            }
        }
    }
}

struct CaptureRequest {
    policy: DevicePolicy,
    target_rate: u32,
    channels: u16,
    chunk_size: usize,
}

fn capture_loop<B, F>(
    make_backend: F,
    request: CaptureRequest,
    ready: oneshot::Sender<Result<NegotiatedDevice, AudioError>>,
    chunks: mpsc::Sender<ChunkResult>,
    running: Arc<AtomicBool>,
) where
    B: CaptureBackend,
    F: FnOnce() -> Result<B, AudioError>,
{
    let backend = match make_backend() {
        Ok(backend) => backend,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let opened = negotiate(
        &backend,
        &request.policy,
        request.target_rate,
        request.channels,
        request.chunk_size,
    )
    .and_then(|negotiated| {
        backend
            .open(&negotiated.device, &negotiated.params)
            .map(|stream| (negotiated, stream))
    });

    let (negotiated, mut stream) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(negotiated)).is_err() {
        stream.close();
        return;
    }

    while running.load(Ordering::SeqCst) {
        match stream.read_chunk() {
            Ok(Some(chunk)) => {
                if chunks.blocking_send(Ok(chunk)).is_err() {
                    break;
                }
            }
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("Capture read failed: {}", e);
                let _ = chunks.blocking_send(Err(e));
                break;
            }
        }
    }

    stream.close();
    tracing::debug!("Capture thread finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{DeviceInfo, StreamParams};
    use std::sync::atomic::AtomicUsize;

    /// Single-device backend producing ramps of `chunk_size` samples
    struct ScriptedBackend {
        rates: Vec<u32>,
        chunks: usize,
        closes: Arc<AtomicUsize>,
        stereo_only: bool,
    }

    struct ScriptedStream {
        remaining: usize,
        chunk_size: usize,
        closes: Arc<AtomicUsize>,
        closed: bool,
    }

    impl CaptureBackend for ScriptedBackend {
        type Stream = ScriptedStream;

        fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
            Ok(vec![DeviceInfo {
                index: 0,
                name: "pipewire".to_string(),
                max_input_channels: 1,
                default_sample_rate: 48000,
                is_default: true,
            }])
        }

        fn probe(&self, _: &DeviceInfo, params: &StreamParams) -> bool {
            self.rates.contains(&params.sample_rate) && (!self.stereo_only || params.channels == 2)
        }

        fn channel_options(&self, _: &DeviceInfo, _: u32) -> Vec<u16> {
            if self.stereo_only {
                vec![2]
            } else {
                vec![1]
            }
        }

        fn open(&self, _: &DeviceInfo, params: &StreamParams) -> Result<ScriptedStream, AudioError> {
            Ok(ScriptedStream {
                remaining: self.chunks,
                chunk_size: params.chunk_size,
                closes: self.closes.clone(),
                closed: false,
            })
        }
    }

    impl CaptureStream for ScriptedStream {
        fn read_chunk(&mut self) -> Result<Option<Vec<f32>>, AudioError> {
            if self.remaining == 0 {
                std::thread::sleep(std::time::Duration::from_millis(5));
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(
                (0..self.chunk_size)
                    .map(|i| i as f32 / self.chunk_size as f32)
                    .collect(),
            ))
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn settings() -> CaptureSettings {
        CaptureSettings {
            target_rate: 16000,
            channels: 1,
            chunk_size: 1024,
            policy: DevicePolicy::default(),
            resampler: Resampler::linear(),
        }
    }

    #[tokio::test]
    async fn native_rate_chunks_pass_through() {
        let closes = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend {
            rates: vec![16000],
            chunks: 3,
            closes: closes.clone(),
            stereo_only: false,
        };
        let mut source = LiveSource::start(move || Ok(backend), settings()).await.unwrap();
        assert_eq!(source.capture_rate(), 16000);
        assert!(!source.is_finite());

        for _ in 0..3 {
            let frame = source.next_frame().await.unwrap().unwrap();
            assert_eq!(frame.sample_rate(), 16000);
            assert_eq!(frame.len(), 1024);
        }

        source.close().await;
        source.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chunks_are_resampled_to_target_rate() {
        let backend = ScriptedBackend {
            rates: vec![48000],
            chunks: 2,
            closes: Arc::new(AtomicUsize::new(0)),
            stereo_only: false,
        };
        let mut source = LiveSource::start(move || Ok(backend), settings()).await.unwrap();
        assert_eq!(source.capture_rate(), 48000);
        assert_eq!(source.sample_rate(), 16000);

        let frame = source.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.sample_rate(), 16000);
        assert_eq!(frame.len(), 341);
        source.close().await;
    }

    #[tokio::test]
    async fn negotiation_failure_is_reported_from_start() {
        let backend = ScriptedBackend {
            rates: Vec::new(),
            chunks: 0,
            closes: Arc::new(AtomicUsize::new(0)),
            stereo_only: false,
        };
        let result = LiveSource::start(move || Ok(backend), settings()).await;
        assert!(matches!(result, Err(AudioError::Configuration(_))));
    }

    #[tokio::test]
    async fn backend_construction_failure_is_reported() {
        let result = LiveSource::start(
            || -> Result<ScriptedBackend, AudioError> {
                Err(AudioError::Device("no host".to_string()))
            },
            settings(),
        )
        .await;
        assert!(matches!(result, Err(AudioError::Device(_))));
    }

    #[tokio::test]
    async fn stereo_only_device_is_captured_as_mono() {
        let backend = ScriptedBackend {
            rates: vec![16000],
            chunks: 1,
            closes: Arc::new(AtomicUsize::new(0)),
            stereo_only: true,
        };
        let mut source = LiveSource::start(move || Ok(backend), settings()).await.unwrap();
        assert_eq!(source.negotiated().params.channels, 2);

        let frame = source.next_frame().await.unwrap().unwrap();
        assert_eq!(frame.len(), 1024);
        source.close().await;
    }

    #[tokio::test]
    async fn dropping_the_source_releases_the_stream() {
        let closes = Arc::new(AtomicUsize::new(0));
        let backend = ScriptedBackend {
            rates: vec![16000],
            chunks: 0,
            closes: closes.clone(),
            stereo_only: false,
        };
        let source = LiveSource::start(move || Ok(backend), settings()).await.unwrap();
        drop(source);

        for _ in 0..200 {
            if closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
