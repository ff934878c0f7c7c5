//! mediadeck - audio playback and camera capture sessions
//!
//! Two independent session managers: `audio::PlaybackSession` plays decoded
//! audio through a gain stage and frequency analyser, and
//! `camera::CaptureSession` owns a live camera stream and renegotiates its
//! constraints. The `app` module drives both from a line console.

pub mod app;
pub mod audio;
pub mod camera;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod settings;

pub use error::{MediaError, Result};
