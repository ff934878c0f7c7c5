//! Camera capture with live constraint renegotiation
//!
//! This module provides:
//! - A platform abstraction for device enumeration and stream acquisition
//! - A virtual camera platform driven by configuration
//! - A capture session that owns at most one live stream
//! - Parsing of user constraint input into track requests

mod constraints;
mod platform;
mod session;
mod virtual_device;

pub use constraints::ConstraintInput;
pub use platform::{CapturePlatform, CaptureStream, StreamGuard, VideoTrack};
pub use session::{CaptureSession, CaptureState};
pub use virtual_device::{Permission, VirtualCameraPlatform};
