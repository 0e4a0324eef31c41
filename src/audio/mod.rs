//! Audio input: sources, capture devices, resampling and wire encoding

mod capture;
mod cpal_backend;
pub mod device;
mod encoder;
mod file;
mod frame;
mod resampler;
mod source;

pub use capture::{CaptureSettings, LiveSource};
pub use cpal_backend::{CpalBackend, CpalStream};
pub use device::{CaptureBackend, CaptureStream, DeviceInfo, DevicePolicy, DeviceRule};
pub use encoder::{decode_packet, encode_frame, encode_samples};
pub use file::{decode_file, DecodedAudio, FileSource};
pub use frame::PcmFrame;
pub use resampler::{ResampleMethod, Resampler};
pub use source::AudioSource;
