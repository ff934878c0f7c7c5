//! Audio playback with gain control and frequency visualisation
//!
//! This module provides:
//! - WAV decoding via hound
//! - Loading from local files or URLs
//! - A playback session driving an output graph (gain -> analyser -> device)
//! - A silent clock-driven output, and a PipeWire output behind the
//!   `pipewire` feature

pub mod analyser;
mod decoder;
mod null_sink;
mod output;
#[cfg(feature = "pipewire")]
mod pipewire_sink;
mod playback;
mod source;

pub use decoder::{decode, DecodedAudio};
pub use null_sink::NullSink;
pub use output::{ActiveSource, AudioOutput};
#[cfg(feature = "pipewire")]
pub use pipewire_sink::PipeWireOutput;
pub use playback::{PlaybackSession, SharedPlaybackState};
pub use source::{fetch_bytes, http_client, AudioSource};
