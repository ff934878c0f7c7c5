//! Audio output abstraction
//!
//! An output owns the gain stage and the analyser, chained in series before
//! the device. Each `start` creates a one-shot playable source.

use super::DecodedAudio;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// A rendering graph: gain -> analyser -> device
pub trait AudioOutput: Send + Sync {
    /// Begin rendering `audio` from `offset` seconds
    fn start(&self, audio: &DecodedAudio, offset: f64) -> Result<Box<dyn ActiveSource>>;

    /// Set the gain applied to everything this output renders
    fn set_gain(&self, gain: f32);

    /// Current analyser frame, byte-scaled per bin
    fn frequency_data(&self) -> Vec<u8>;

    /// Release the device context. Sources started afterwards fail.
    fn close(&self);
}

/// A playing source. Sources are not seekable and cannot be restarted.
#[async_trait]
pub trait ActiveSource: Send {
    /// Signal fired once rendering stops for any reason. Carries `Ok` for
    /// a natural end or `stop`, and the failure when the device gave up.
    /// Can be taken once.
    fn take_ended(&mut self) -> Option<oneshot::Receiver<Result<()>>>;

    /// Stop rendering. Resolves once the source no longer produces audio.
    async fn stop(self: Box<Self>);
}
