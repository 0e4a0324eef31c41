//! Decoding real files through the file source.

use std::path::Path;
use std::time::Duration;

use asr_stream_client::audio::{decode_file, AudioSource, FileSource, Resampler};
use asr_stream_client::error::AudioError;

fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let value = ((i % 100) as i16 - 50) * 200;
        for channel in 0..channels {
            // Right channel is silent so the downmix halves the left one.
            writer
                .write_sample(if channel == 0 { value } else { 0 })
                .unwrap();
        }
    }
    writer.finalize().unwrap();
}

#[test]
fn stereo_wav_decodes_to_mono_at_native_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo.wav");
    write_wav(&path, 22050, 2, 22050);

    let decoded = decode_file(&path).unwrap();
    assert_eq!(decoded.sample_rate, 22050);
    assert_eq!(decoded.samples.len(), 22050);

    let expected = (((1 % 100) as i16 - 50) * 200) as f32 / 32768.0 / 2.0;
    assert!((decoded.samples[1] - expected).abs() < 1e-3);
    assert!(decoded.samples.iter().all(|s| s.abs() <= 0.5));
}

#[tokio::test]
async fn file_source_resamples_and_chunks_a_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speech.wav");
    write_wav(&path, 44100, 1, 44100 * 2);

    let mut source = FileSource::open(
        &path,
        16000,
        Duration::from_millis(100),
        Resampler::linear(),
    )
    .unwrap();
    assert_eq!(source.sample_rate(), 16000);
    assert!(source.is_finite());
    assert_eq!(source.len(), 32000);
    assert_eq!(source.chunk_count(), 20);

    let mut total = 0;
    let mut chunks = 0;
    while let Some(frame) = source.next_frame().await.unwrap() {
        assert_eq!(frame.sample_rate(), 16000);
        total += frame.len();
        chunks += 1;
    }
    assert_eq!(chunks, 20);
    assert_eq!(total, source.len());

    source.rewind();
    assert!(source.next_frame().await.unwrap().is_some());
}

#[test]
fn garbage_file_is_an_unsupported_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noise.wav");
    std::fs::write(&path, b"definitely not a RIFF header").unwrap();

    let err = FileSource::open(&path, 16000, Duration::from_millis(100), Resampler::default())
        .unwrap_err();
    assert!(matches!(err, AudioError::UnsupportedFormat { .. }));
}

#[test]
fn missing_file_is_reported_as_not_found() {
    let err = FileSource::open(
        "/no/such/recording.flac",
        16000,
        Duration::from_secs(1),
        Resampler::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AudioError::FileNotFound(_)));
}
