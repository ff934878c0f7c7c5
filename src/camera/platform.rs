//! Capture platform abstraction
//!
//! Enumeration and stream acquisition are asynchronous. Every track query is
//! optional: a platform that cannot report capabilities, constraints or
//! settings returns `None` for that query alone.

use crate::error::Result;
use crate::models::{MediaDeviceInfo, TrackCapabilities, TrackConstraints, TrackSettings};
use async_trait::async_trait;

#[async_trait]
pub trait CapturePlatform: Send + Sync {
    /// All media devices in platform order
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>>;

    /// Acquire a video stream matching `request`
    async fn open_stream(&self, request: &TrackConstraints) -> Result<Box<dyn CaptureStream>>;
}

/// A live stream holding hardware until its tracks are stopped
pub trait CaptureStream: Send {
    fn id(&self) -> &str;

    fn video_track(&self) -> Option<&dyn VideoTrack>;

    fn video_track_mut(&mut self) -> Option<&mut dyn VideoTrack>;

    /// Stop every track, releasing the device
    fn stop_tracks(&mut self);
}

#[async_trait]
pub trait VideoTrack: Send {
    fn label(&self) -> String;

    fn capabilities(&self) -> Option<TrackCapabilities>;

    fn constraints(&self) -> Option<TrackConstraints>;

    fn settings(&self) -> Option<TrackSettings>;

    /// Renegotiate the fields present in `constraints`
    async fn apply_constraints(&mut self, constraints: &TrackConstraints) -> Result<()>;
}

/// Owns a stream and stops its tracks when dropped, so every exit path
/// releases the device
pub struct StreamGuard {
    stream: Box<dyn CaptureStream>,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self { stream }
    }

    pub fn id(&self) -> &str {
        self.stream.id()
    }

    pub fn track(&self) -> Option<&dyn VideoTrack> {
        self.stream.video_track()
    }

    pub fn track_mut(&mut self) -> Option<&mut dyn VideoTrack> {
        self.stream.video_track_mut()
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.stream.stop_tracks();
    }
}
