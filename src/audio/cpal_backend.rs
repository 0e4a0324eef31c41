//! cpal capture backend
//!
//! Streams are built in the device's native sample format, converted to f32
//! and downmixed to mono inside the audio callback. Buffers the reader does
//! not pick up in time are dropped.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, BuildStreamError, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use super::device::{mark_default, CaptureBackend, CaptureStream, DeviceInfo, StreamParams};
use crate::error::AudioError;

/// Callback buffers held before overflow drops them
const CALLBACK_QUEUE_DEPTH: usize = 64;

/// How long a read waits for the device before reporting no data
const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Capture backend over the default cpal host
pub struct CpalBackend {
    devices: Vec<cpal::Device>,
    infos: Vec<DeviceInfo>,
}

impl CpalBackend {
    /// Enumerate the input devices of the default host
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        tracing::debug!("Audio host: {:?}", host.id());

        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let inputs = host
            .input_devices()
            .map_err(|e| AudioError::Device(format!("failed to enumerate devices: {}", e)))?;

        let mut devices = Vec::new();
        let mut infos = Vec::new();
        for (index, device) in inputs.enumerate() {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let max_input_channels = device
                .supported_input_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0);
            let default_sample_rate = device
                .default_input_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(0);
            infos.push(DeviceInfo {
                index,
                name,
                max_input_channels,
                default_sample_rate,
                is_default: false,
            });
            devices.push(device);
        }
        mark_default(&mut infos, default_name.as_deref());

        Ok(Self { devices, infos })
    }

    fn device(&self, info: &DeviceInfo) -> Result<&cpal::Device, AudioError> {
        self.devices
            .get(info.index)
            .ok_or_else(|| AudioError::Device(format!("device {} is gone", info.name)))
    }
}

impl CaptureBackend for CpalBackend {
    type Stream = CpalStream;

    fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(self.infos.clone())
    }

    fn probe(&self, info: &DeviceInfo, params: &StreamParams) -> bool {
        let Ok(device) = self.device(info) else {
            return false;
        };
        // Built but never played; dropping it releases the device.
        let (tx, _rx) = mpsc::sync_channel(1);
        match build_stream(device, params, tx) {
            Ok(_stream) => true,
            Err(e) => {
                tracing::debug!("{} rejects {}Hz: {}", info.name, params.sample_rate, e);
                false
            }
        }
    }

    fn channel_options(&self, info: &DeviceInfo, sample_rate: u32) -> Vec<u16> {
        let Ok(device) = self.device(info) else {
            return Vec::new();
        };
        let Ok(configs) = device.supported_input_configs() else {
            return Vec::new();
        };
        let mut counts: Vec<u16> = configs
            .filter(|c| c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate)
            .map(|c| c.channels())
            .collect();
        // Fewest channels first
        counts.sort_unstable();
        counts.dedup();
        counts
    }

    fn open(&self, info: &DeviceInfo, params: &StreamParams) -> Result<CpalStream, AudioError> {
        let device = self.device(info)?;
        let (tx, rx) = mpsc::sync_channel(CALLBACK_QUEUE_DEPTH);
        let stream = build_stream(device, params, tx)
            .map_err(|e| AudioError::Device(format!("failed to open {}: {}", info.name, e)))?;
        stream
            .play()
            .map_err(|e| AudioError::Device(format!("failed to start {}: {}", info.name, e)))?;

        tracing::info!(
            "Capture started on {}: {}Hz, {} channel(s), {} samples per chunk",
            info.name,
            params.sample_rate,
            params.channels,
            params.chunk_size
        );

        Ok(CpalStream {
            stream: Some(stream),
            samples: rx,
            pending: Vec::with_capacity(params.chunk_size * 2),
            chunk_size: params.chunk_size.max(1),
        })
    }
}

/// Running cpal capture stream
pub struct CpalStream {
    stream: Option<cpal::Stream>,
    samples: Receiver<Vec<f32>>,
    pending: Vec<f32>,
    chunk_size: usize,
}

impl CaptureStream for CpalStream {
    fn read_chunk(&mut self) -> Result<Option<Vec<f32>>, AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::Closed);
        }
        while self.pending.len() < self.chunk_size {
            match self.samples.recv_timeout(READ_TIMEOUT) {
                Ok(buffer) => self.pending.extend_from_slice(&buffer),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(AudioError::Device("capture callback stopped".to_string()))
                }
            }
        }
        Ok(Some(self.pending.drain(..self.chunk_size).collect()))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!("Failed to pause capture stream: {}", e);
            }
            drop(stream);
            tracing::info!("Capture stream closed");
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    device: &cpal::Device,
    params: &StreamParams,
    tx: SyncSender<Vec<f32>>,
) -> Result<cpal::Stream, BuildStreamError> {
    let format = device
        .default_input_config()
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let mut config = StreamConfig {
        channels: params.channels,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: BufferSize::Fixed(params.chunk_size as u32),
    };

    match build_for_format(device, &config, format, tx.clone()) {
        Ok(stream) => Ok(stream),
        Err(_) => {
            // Some hosts refuse fixed buffer sizes; chunking happens in the reader anyway.
            config.buffer_size = BufferSize::Default;
            build_for_format(device, &config, format, tx)
        }
    }
}

fn build_for_format(
    device: &cpal::Device,
    config: &StreamConfig,
    format: SampleFormat,
    tx: SyncSender<Vec<f32>>,
) -> Result<cpal::Stream, BuildStreamError> {
    match format {
        SampleFormat::F32 => build_typed::<f32>(device, config, tx),
        SampleFormat::I16 => build_typed::<i16>(device, config, tx),
        SampleFormat::U16 => build_typed::<u16>(device, config, tx),
        SampleFormat::I32 => build_typed::<i32>(device, config, tx),
        _ => Err(BuildStreamError::StreamConfigNotSupported),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    tx: SyncSender<Vec<f32>>,
) -> Result<cpal::Stream, BuildStreamError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = data
                .chunks(channels)
                .map(|frame| {
                    frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / frame.len() as f32
                })
                .collect();
            // Overflow: the reader fell behind, drop this buffer.
            let _ = tx.try_send(mono);
        },
        |err| tracing::warn!("Capture stream error: {}", err),
        None,
    )
}
