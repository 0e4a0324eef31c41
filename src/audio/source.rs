//! Audio source abstraction

use async_trait::async_trait;

use super::frame::PcmFrame;
use crate::error::AudioError;

/// Producer of mono PCM frames at a declared sample rate
///
/// Implementations:
/// - [`FileSource`](super::FileSource): finite, decoded up front
/// - [`LiveSource`](super::LiveSource): unbounded, read from a capture device
#[async_trait]
pub trait AudioSource: Send {
    /// Rate of every frame this source yields
    fn sample_rate(&self) -> u32;

    /// Whether the source ends on its own
    fn is_finite(&self) -> bool;

    /// Next frame, or `None` once the source is exhausted or closed
    async fn next_frame(&mut self) -> Result<Option<PcmFrame>, AudioError>;

    /// Release any underlying resources. Safe to call more than once.
    async fn close(&mut self) {}

    /// Name for logging
    fn describe(&self) -> String;
}
