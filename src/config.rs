//! Runtime configuration
//!
//! Loaded from a JSON file given on the command line, or from
//! `<config_dir>/mediadeck/config.json` when it exists. Every field has a
//! default so partial files are fine.

use crate::models::{FacingMode, NumericRange, ResizeMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Timing and analysis parameters of the playback session
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Cadence of the elapsed-time sampler
    pub position_interval_ms: u64,
    /// Cadence of the spectrum refresh loop
    pub visualizer_interval_ms: u64,
    /// Slack when deciding whether a source ended naturally
    pub end_epsilon_secs: f64,
    /// Analyser window in samples, rounded to a power of two in 32..=2048
    pub fft_size: usize,
    /// Number of bars in the waveform overview
    pub waveform_bars: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            position_interval_ms: 100,
            visualizer_interval_ms: 33,
            end_epsilon_secs: 0.1,
            fft_size: 256,
            waveform_bars: 96,
            fetch_timeout_secs: 30,
        }
    }
}

impl PlaybackConfig {
    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms.max(1))
    }

    pub fn visualizer_interval(&self) -> Duration {
        Duration::from_millis(self.visualizer_interval_ms.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Default stream request and the virtual camera set
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub default_facing_mode: FacingMode,
    pub ideal_width: f64,
    pub ideal_height: f64,
    /// Simulated delay of a device open
    pub open_latency_ms: u64,
    pub cameras: Vec<VirtualCameraConfig>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_facing_mode: FacingMode::User,
            ideal_width: 1280.0,
            ideal_height: 720.0,
            open_latency_ms: 0,
            cameras: vec![
                VirtualCameraConfig {
                    id: "integrated-0".into(),
                    label: "Integrated Camera".into(),
                    group_id: "integrated".into(),
                    facing_mode: Some(FacingMode::User),
                    width: NumericRange::new(160.0, 1920.0),
                    height: NumericRange::new(120.0, 1080.0),
                    frame_rate: NumericRange::new(1.0, 30.0),
                    zoom: Some(NumericRange::new(1.0, 4.0).with_step(0.1)),
                    focus_distance: Some(NumericRange::new(0.0, 1.0).with_step(0.01)),
                    resize_modes: vec![ResizeMode::None, ResizeMode::CropAndScale],
                },
                VirtualCameraConfig {
                    id: "usb-1".into(),
                    label: "USB Webcam".into(),
                    group_id: "usb".into(),
                    facing_mode: None,
                    width: NumericRange::new(320.0, 1280.0),
                    height: NumericRange::new(240.0, 720.0),
                    frame_rate: NumericRange::new(1.0, 30.0),
                    zoom: None,
                    focus_distance: None,
                    resize_modes: vec![ResizeMode::None],
                },
            ],
        }
    }
}

impl CaptureConfig {
    pub fn open_latency(&self) -> Duration {
        Duration::from_millis(self.open_latency_ms)
    }
}

/// One camera exposed by the virtual capture platform
#[derive(Debug, Clone, Deserialize)]
pub struct VirtualCameraConfig {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub facing_mode: Option<FacingMode>,
    pub width: NumericRange,
    pub height: NumericRange,
    pub frame_rate: NumericRange,
    #[serde(default)]
    pub zoom: Option<NumericRange>,
    #[serde(default)]
    pub focus_distance: Option<NumericRange>,
    #[serde(default = "default_resize_modes")]
    pub resize_modes: Vec<ResizeMode>,
}

fn default_resize_modes() -> Vec<ResizeMode> {
    vec![ResizeMode::None]
}

/// Default location of the configuration file
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mediadeck")
        .join("config.json")
}

/// Load the configuration. An explicit path must exist; the default path
/// falls back to built-in defaults when missing.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let p = default_path();
            if !p.exists() {
                log::debug!("No config at {:?}, using defaults", p);
                return Ok(AppConfig::default());
            }
            p
        }
    };

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read config {:?}: {}", path, e))?;
    parse(&contents).map_err(|e| anyhow::anyhow!("Failed to parse config {:?}: {}", path, e))
}

pub fn parse(contents: &str) -> Result<AppConfig, serde_json::Error> {
    serde_json::from_str(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = parse(r#"{ "playback": { "position_interval_ms": 250 } }"#).unwrap();
        assert_eq!(config.playback.position_interval_ms, 250);
        assert_eq!(config.playback.end_epsilon_secs, 0.1);
        assert_eq!(config.capture.cameras.len(), 2);
    }

    #[test]
    fn test_camera_definitions() {
        let config = parse(
            r#"{
                "capture": {
                    "default_facing_mode": "environment",
                    "cameras": [{
                        "id": "rear",
                        "label": "Rear Camera",
                        "width": { "min": 640, "max": 4096 },
                        "height": { "min": 480, "max": 2160 },
                        "frame_rate": { "min": 1, "max": 60 },
                        "zoom": { "min": 1, "max": 8, "step": 0.5 }
                    }]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.capture.default_facing_mode, FacingMode::Environment);
        let cam = &config.capture.cameras[0];
        assert_eq!(cam.zoom.unwrap().step, Some(0.5));
        assert_eq!(cam.resize_modes, vec![ResizeMode::None]);
        assert!(cam.focus_distance.is_none());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(load(Some(Path::new("/nonexistent/mediadeck.json"))).is_err());
    }
}
