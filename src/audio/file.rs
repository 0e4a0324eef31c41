//! File audio source
//!
//! Decodes a whole file with symphonia, downmixes it to mono, resamples it
//! once to the target rate and hands it out in fixed-duration chunks.

use async_trait::async_trait;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::frame::PcmFrame;
use super::resampler::Resampler;
use super::source::AudioSource;
use crate::error::AudioError;

/// Fully decoded mono audio at its native rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode an audio file (WAV, FLAC, MP3, OGG, ...) to normalized mono samples
pub fn decode_file(path: &Path) -> Result<DecodedAudio, AudioError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AudioError::FileNotFound(path.to_path_buf()),
        _ => AudioError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let unsupported = |reason: String| AudioError::UnsupportedFormat {
        path: path.to_path_buf(),
        reason,
    };

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| unsupported(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| unsupported("no audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| unsupported("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| unsupported(e.to_string()))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unsupported(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let channels = decoded.spec().channels.count().max(1);
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buffer.copy_interleaved_ref(decoded);
                downmix_into(buffer.samples(), channels, &mut samples);
            }
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => {
                tracing::debug!("Skipping undecodable packet in {}", path.display());
                continue;
            }
            Err(e) => return Err(unsupported(e.to_string())),
        }
    }

    tracing::info!(
        "Decoded {}: {}Hz, {} samples ({:.1}s)",
        path.display(),
        sample_rate,
        samples.len(),
        samples.len() as f64 / sample_rate as f64
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Average interleaved channels into mono samples
fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Finite, restartable source over a decoded buffer
#[derive(Debug, Clone)]
pub struct FileSource {
    name: String,
    samples: Vec<f32>,
    sample_rate: u32,
    chunk_size: usize,
    position: usize,
}

impl FileSource {
    /// Decode `path` and prepare it for `target_rate`
    pub fn open(
        path: impl AsRef<Path>,
        target_rate: u32,
        chunk_duration: Duration,
        resampler: Resampler,
    ) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let decoded = decode_file(path)?;
        Ok(Self::from_samples(
            path.display().to_string(),
            decoded.samples,
            decoded.sample_rate,
            target_rate,
            chunk_duration,
            resampler,
        ))
    }

    /// Build a source from samples already in memory
    ///
    /// The whole buffer is resampled once, so chunk boundaries carry no
    /// resampling error.
    pub fn from_samples(
        name: impl Into<String>,
        samples: Vec<f32>,
        native_rate: u32,
        target_rate: u32,
        chunk_duration: Duration,
        resampler: Resampler,
    ) -> Self {
        let samples = if native_rate != target_rate {
            tracing::info!("Resampling {}Hz -> {}Hz", native_rate, target_rate);
            resampler
                .resample(&PcmFrame::new(samples, native_rate), target_rate)
                .into_samples()
        } else {
            samples
        };

        let chunk_size = ((target_rate as f64 * chunk_duration.as_secs_f64()).round() as usize).max(1);

        Self {
            name: name.into(),
            samples,
            sample_rate: target_rate,
            chunk_size,
            position: 0,
        }
    }

    /// Samples per chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total number of chunks this source yields
    pub fn chunk_count(&self) -> usize {
        self.samples.len().div_ceil(self.chunk_size)
    }

    /// Number of samples at the target rate
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Start over from the first chunk
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    fn next_chunk(&mut self) -> Option<PcmFrame> {
        if self.position >= self.samples.len() {
            return None;
        }
        let end = (self.position + self.chunk_size).min(self.samples.len());
        let frame = PcmFrame::new(self.samples[self.position..end].to_vec(), self.sample_rate);
        self.position = end;
        Some(frame)
    }
}

#[async_trait]
impl AudioSource for FileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_finite(&self) -> bool {
        true
    }

    async fn next_frame(&mut self) -> Result<Option<PcmFrame>, AudioError> {
        Ok(self.next_chunk())
    }

    fn describe(&self) -> String {
        format!(
            "file {} ({} chunks of {} samples)",
            self.name,
            self.chunk_count(),
            self.chunk_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_buffer_once_in_order() {
        let samples: Vec<f32> = (0..2550).map(|i| i as f32 / 2550.0).collect();
        let mut source = FileSource::from_samples(
            "ramp",
            samples.clone(),
            16000,
            16000,
            Duration::from_millis(100),
            Resampler::linear(),
        );
        assert_eq!(source.chunk_size(), 1600);
        assert_eq!(source.chunk_count(), 2);

        let mut collected = Vec::new();
        let mut lengths = Vec::new();
        while let Some(frame) = source.next_chunk() {
            assert_eq!(frame.sample_rate(), 16000);
            lengths.push(frame.len());
            collected.extend_from_slice(frame.samples());
        }
        assert_eq!(lengths, vec![1600, 950]);
        assert_eq!(collected, samples);
    }

    #[test]
    fn buffer_is_resampled_once_up_front() {
        let samples = vec![0.25f32; 4410];
        let source = FileSource::from_samples(
            "tone",
            samples,
            44100,
            16000,
            Duration::from_millis(100),
            Resampler::linear(),
        );
        assert_eq!(source.len(), 1600);
        assert_eq!(source.chunk_count(), 1);
        assert_eq!(source.sample_rate, 16000);
    }

    #[test]
    fn rewind_restarts_the_sequence() {
        let mut source = FileSource::from_samples(
            "short",
            vec![0.0; 10],
            16000,
            16000,
            Duration::from_secs(1),
            Resampler::linear(),
        );
        assert!(source.next_chunk().is_some());
        assert!(source.next_chunk().is_none());
        source.rewind();
        assert_eq!(source.next_chunk().map(|f| f.len()), Some(10));
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut out = Vec::new();
        downmix_into(&[0.1, 0.3, 0.5, 0.7], 2, &mut out);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.2).abs() < 1e-6);
        assert!((out[1] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = decode_file(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, AudioError::FileNotFound(_)));
    }
}
