//! PCM Wire Encoder
//!
//! Encodes normalized float frames to 16-bit little-endian PCM packets.

use super::frame::PcmFrame;

/// Full-scale value used for the float/int16 mapping
const FULL_SCALE: f32 = 32767.0;

/// Encode a frame as 16-bit little-endian PCM
///
/// Each sample maps to `round(clamp(sample, -1, 1) * 32767)`.
pub fn encode_frame(frame: &PcmFrame) -> Vec<u8> {
    encode_samples(frame.samples())
}

/// Encode raw normalized samples as 16-bit little-endian PCM
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    let mut output = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        output.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    output
}

/// Decode a 16-bit little-endian PCM packet back to normalized samples
///
/// A trailing odd byte is ignored.
pub fn decode_packet(packet: &[u8]) -> Vec<f32> {
    packet
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / FULL_SCALE)
        .collect()
}

fn sample_to_i16(sample: f32) -> i16 {
    // NaN clamps to NaN and saturates to 0 in the cast.
    (sample.clamp(-1.0, 1.0) * FULL_SCALE).round() as i16
}
