//! Capture session
//!
//! Owns at most one live camera stream and keeps the device list and track
//! snapshots in step with it. A replacement stream is only requested after
//! the previous one has been released.

use super::constraints::ConstraintInput;
use super::platform::{CapturePlatform, StreamGuard};
use crate::config::CaptureConfig;
use crate::error::{MediaError, Result};
use crate::models::{
    Constrain, DeviceInfo, DeviceKind, TrackCapabilities, TrackConstraints, TrackSettings,
};
use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Current state of the capture session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Live,
    Switching,
    Stopping,
    /// Last acquisition failed; holds no stream
    Error,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Starting => "starting",
            CaptureState::Live => "live",
            CaptureState::Switching => "switching",
            CaptureState::Stopping => "stopping",
            CaptureState::Error => "error",
        };
        f.write_str(name)
    }
}

pub struct CaptureSession {
    id: Uuid,
    platform: Arc<dyn CapturePlatform>,
    config: CaptureConfig,
    state: CaptureState,
    stream: Option<StreamGuard>,
    devices: Vec<DeviceInfo>,
    selected_device_id: Option<String>,
    capabilities: Option<TrackCapabilities>,
    constraints: Option<TrackConstraints>,
    settings: Option<TrackSettings>,
    error: Option<String>,
}

impl CaptureSession {
    pub fn new(platform: Arc<dyn CapturePlatform>, config: CaptureConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform,
            config,
            state: CaptureState::Idle,
            stream: None,
            devices: Vec::new(),
            selected_device_id: None,
            capabilities: None,
            constraints: None,
            settings: None,
            error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.id())
    }

    /// Label of the active track as the platform reports it
    pub fn track_label(&self) -> Option<String> {
        self.stream.as_ref()?.track().map(|t| t.label())
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn selected_device_id(&self) -> Option<&str> {
        self.selected_device_id.as_deref()
    }

    pub fn capabilities(&self) -> Option<&TrackCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn constraints(&self) -> Option<&TrackConstraints> {
        self.constraints.as_ref()
    }

    pub fn settings(&self) -> Option<&TrackSettings> {
        self.settings.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Refresh the video input list. Devices without a label (no permission
    /// granted yet) are named "Camera N". Selects the first device when
    /// nothing valid is selected.
    pub async fn list_devices(&mut self) -> Result<&[DeviceInfo]> {
        let all = match self.platform.enumerate_devices().await {
            Ok(all) => all,
            Err(e) => {
                warn!("[capture {}] Device enumeration failed: {}", self.id, e);
                self.error = Some(e.to_string());
                return Err(e);
            }
        };

        self.devices = all
            .into_iter()
            .filter(|d| d.kind == DeviceKind::VideoInput)
            .enumerate()
            .map(|(i, d)| DeviceInfo {
                label: if d.label.is_empty() {
                    format!("Camera {}", i + 1)
                } else {
                    d.label
                },
                id: d.device_id,
                group_id: d.group_id,
            })
            .collect();

        let selection_valid = self
            .selected_device_id
            .as_ref()
            .is_some_and(|id| self.devices.iter().any(|d| &d.id == id));
        if !selection_valid {
            self.selected_device_id = self.devices.first().map(|d| d.id.clone());
        }

        debug!(
            "[capture {}] {} camera(s), selected {:?}",
            self.id,
            self.devices.len(),
            self.selected_device_id
        );
        Ok(self.devices.as_slice())
    }

    /// Open a stream on `device_id`, or on the default facing mode when
    /// none is given. Any active stream is released first.
    pub async fn start(&mut self, device_id: Option<&str>) -> Result<()> {
        self.acquire(device_id.map(str::to_string), CaptureState::Starting)
            .await
    }

    /// Change the selected camera. A live session reopens on the new device;
    /// otherwise only the selection changes.
    pub async fn switch_device(&mut self, device_id: &str) -> Result<()> {
        self.selected_device_id = Some(device_id.to_string());
        if self.state != CaptureState::Live {
            debug!("[capture {}] Selected {:?} for next start", self.id, device_id);
            return Ok(());
        }
        self.acquire(Some(device_id.to_string()), CaptureState::Switching)
            .await
    }

    /// Release the stream and return to idle
    pub fn stop(&mut self) {
        if self.stream.is_none() {
            if self.state == CaptureState::Error {
                self.state = CaptureState::Idle;
            }
            return;
        }
        self.release();
        self.state = CaptureState::Idle;
        info!("[capture {}] Stopped", self.id);
    }

    /// Re-read capabilities, constraints and settings from the active track.
    /// Each is independently optional.
    pub fn refresh_track_info(&mut self) {
        let track = self.stream.as_ref().and_then(|s| s.track());
        let (capabilities, constraints, settings) = match track {
            Some(track) => (track.capabilities(), track.constraints(), track.settings()),
            None => (None, None, None),
        };
        self.capabilities = capabilities;
        self.constraints = constraints;
        self.settings = settings;
    }

    /// Renegotiate the fields set in `input` on the live track. Invalid
    /// values are dropped; an empty request never reaches the track.
    pub async fn apply_constraint(&mut self, input: &ConstraintInput) -> Result<()> {
        let request = input.to_request(self.capabilities.as_ref());
        if request.is_empty() {
            debug!("[capture {}] Nothing to apply", self.id);
            return Ok(());
        }

        let Some(track) = self.stream.as_mut().and_then(|s| s.track_mut()) else {
            debug!("[capture {}] No active track, ignoring constraints", self.id);
            return Ok(());
        };

        match track.apply_constraints(&request).await {
            Ok(()) => {
                debug!("[capture {}] Applied {:?}", self.id, request);
                self.error = None;
                self.refresh_track_info();
                Ok(())
            }
            Err(e) => {
                let e = match e {
                    MediaError::Constraint(_) => e,
                    other => MediaError::Constraint(other.to_string()),
                };
                warn!("[capture {}] {}", self.id, e);
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Stop the stream, if any
    pub fn close(mut self) {
        self.stop();
    }

    async fn acquire(&mut self, device_id: Option<String>, transition: CaptureState) -> Result<()> {
        self.release();
        self.state = transition;

        let request = self.stream_request(device_id.as_deref());
        let stream = match self.platform.open_stream(&request).await {
            Ok(stream) => StreamGuard::new(stream),
            Err(e) => {
                warn!("[capture {}] Failed to open camera: {}", self.id, e);
                let e = match e {
                    MediaError::DeviceAcquisition(_) => e,
                    other => MediaError::DeviceAcquisition(other.to_string()),
                };
                self.state = CaptureState::Error;
                self.error = Some(e.to_string());
                return Err(e);
            }
        };

        let opened = device_id.or_else(|| {
            stream
                .track()
                .and_then(|t| t.settings())
                .and_then(|s| s.device_id)
        });
        info!(
            "[capture {}] Live on {:?} (stream {})",
            self.id,
            opened,
            stream.id()
        );
        self.stream = Some(stream);
        self.state = CaptureState::Live;
        self.error = None;
        if opened.is_some() {
            self.selected_device_id = opened;
        }

        // Labels only become available once access was granted
        if let Err(e) = self.list_devices().await {
            warn!("[capture {}] Could not refresh devices: {}", self.id, e);
        }
        self.refresh_track_info();
        Ok(())
    }

    /// Drop the active stream, stopping its tracks
    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.state = CaptureState::Stopping;
            debug!("[capture {}] Releasing stream {}", self.id, stream.id());
            drop(stream);
        }
        self.capabilities = None;
        self.constraints = None;
        self.settings = None;
    }

    fn stream_request(&self, device_id: Option<&str>) -> TrackConstraints {
        let mut request = TrackConstraints {
            width: Some(Constrain::Ideal(self.config.ideal_width)),
            height: Some(Constrain::Ideal(self.config.ideal_height)),
            ..Default::default()
        };
        match device_id {
            Some(id) => request.device_id = Some(Constrain::Exact(id.to_string())),
            None => request.facing_mode = Some(Constrain::Ideal(self.config.default_facing_mode)),
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::virtual_device::{Permission, VirtualCameraPlatform};
    use crate::models::ResizeMode;

    fn session() -> (CaptureSession, VirtualCameraPlatform) {
        let config = CaptureConfig::default();
        let platform = VirtualCameraPlatform::from_config(&config);
        let session = CaptureSession::new(Arc::new(platform.clone()), config);
        (session, platform)
    }

    #[tokio::test]
    async fn test_list_devices_before_permission() {
        let (mut session, platform) = session();

        let devices = session.list_devices().await.unwrap().to_vec();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].label, "Camera 1");
        assert_eq!(devices[1].label, "Camera 2");
        assert_eq!(devices[1].id, "usb-1");
        assert_eq!(session.selected_device_id(), Some("integrated-0"));
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(platform.open_track_count(), 0);
    }

    #[tokio::test]
    async fn test_start_default_goes_live() {
        let (mut session, _platform) = session();

        session.start(None).await.unwrap();
        assert_eq!(session.state(), CaptureState::Live);
        assert!(session.is_live());
        assert_eq!(session.selected_device_id(), Some("integrated-0"));
        assert_eq!(session.devices()[0].label, "Integrated Camera");

        let settings = session.settings().unwrap();
        assert_eq!(settings.width, Some(1280.0));
        assert_eq!(settings.height, Some(720.0));
        assert!(session.capabilities().unwrap().zoom.is_some());
        assert!(session.constraints().unwrap().facing_mode.is_some());
    }

    #[tokio::test]
    async fn test_restart_releases_previous_stream() {
        let (mut session, platform) = session();

        session.start(Some("integrated-0")).await.unwrap();
        session.start(Some("usb-1")).await.unwrap();

        assert_eq!(platform.open_devices(), vec!["usb-1".to_string()]);
        assert_eq!(session.selected_device_id(), Some("usb-1"));
        assert_eq!(
            session.settings().unwrap().device_id.as_deref(),
            Some("usb-1")
        );
    }

    #[tokio::test]
    async fn test_failed_start_leaves_nothing_open() {
        let (mut session, platform) = session();
        session.start(Some("integrated-0")).await.unwrap();

        platform.set_busy("usb-1", true);
        let err = session.start(Some("usb-1")).await.unwrap_err();

        assert!(matches!(err, MediaError::DeviceAcquisition(_)));
        assert_eq!(session.state(), CaptureState::Error);
        assert!(!session.is_live());
        assert_eq!(platform.open_track_count(), 0);
        assert!(session.settings().is_none());
        assert!(session.capabilities().is_none());
        assert!(session.constraints().is_none());
        assert!(session.last_error().unwrap().contains("NotReadableError"));

        // Usable again after the error
        platform.set_busy("usb-1", false);
        session.start(Some("usb-1")).await.unwrap();
        assert_eq!(session.state(), CaptureState::Live);
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let (mut session, platform) = session();
        platform.set_permission(Permission::Denied);

        let err = session.start(None).await.unwrap_err();
        assert!(err.to_string().contains("NotAllowedError"));
        assert_eq!(session.state(), CaptureState::Error);

        session.stop();
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_switch_device_while_idle_only_selects() {
        let (mut session, platform) = session();
        session.list_devices().await.unwrap();

        session.switch_device("usb-1").await.unwrap();
        assert_eq!(session.selected_device_id(), Some("usb-1"));
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(platform.open_track_count(), 0);
    }

    #[tokio::test]
    async fn test_switch_device_while_live_reopens() {
        let (mut session, platform) = session();
        session.start(None).await.unwrap();
        let first_stream = session.stream_id().unwrap().to_string();

        session.switch_device("usb-1").await.unwrap();
        assert_eq!(session.state(), CaptureState::Live);
        assert_ne!(session.stream_id().unwrap(), first_stream);
        assert_eq!(platform.open_devices(), vec!["usb-1".to_string()]);
        assert_eq!(session.track_label().as_deref(), Some("USB Webcam"));
    }

    #[tokio::test]
    async fn test_stop_releases_and_clears() {
        let (mut session, platform) = session();
        session.start(None).await.unwrap();

        session.stop();
        assert_eq!(session.state(), CaptureState::Idle);
        assert_eq!(platform.open_track_count(), 0);
        assert!(session.settings().is_none());
        assert!(session.capabilities().is_none());
        assert!(session.constraints().is_none());

        session.stop();
        assert_eq!(session.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_empty_constraint_is_noop() {
        let (mut session, platform) = session();
        session.start(None).await.unwrap();
        let before = session.settings().cloned();

        session
            .apply_constraint(&ConstraintInput::default())
            .await
            .unwrap();
        assert_eq!(platform.apply_calls(), 0);
        assert_eq!(session.settings().cloned(), before);
    }

    #[tokio::test]
    async fn test_apply_only_touches_given_fields() {
        let (mut session, _platform) = session();
        session.start(None).await.unwrap();

        session
            .apply_constraint(&ConstraintInput {
                width: Some(640.0),
                zoom: Some(3.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let settings = session.settings().unwrap();
        assert_eq!(settings.width, Some(640.0));
        assert_eq!(settings.height, Some(720.0));
        assert_eq!(settings.zoom, Some(3.0));
        let constraints = session.constraints().unwrap();
        assert_eq!(constraints.width, Some(Constrain::Ideal(640.0)));
        assert_eq!(constraints.height, Some(Constrain::Ideal(720.0)));
    }

    #[tokio::test]
    async fn test_invalid_values_are_not_submitted() {
        let (mut session, platform) = session();
        session.start(Some("usb-1")).await.unwrap();

        // No zoom range on this camera, and the dimensions are invalid
        session
            .apply_constraint(&ConstraintInput {
                width: Some(-1.0),
                height: Some(f64::NAN),
                zoom: Some(2.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(platform.apply_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_constraint_keeps_snapshots() {
        let (mut session, platform) = session();
        session.start(Some("usb-1")).await.unwrap();
        let settings = session.settings().cloned();
        let capabilities = session.capabilities().cloned();

        let err = session
            .apply_constraint(&ConstraintInput {
                resize_mode: Some(ResizeMode::CropAndScale),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Constraint(_)));
        assert_eq!(platform.apply_calls(), 1);
        assert_eq!(session.state(), CaptureState::Live);
        assert!(session.is_live());
        assert_eq!(session.settings().cloned(), settings);
        assert_eq!(session.capabilities().cloned(), capabilities);
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn test_missing_capabilities_do_not_block_others() {
        let (mut session, platform) = session();
        platform.hide_capabilities();
        session.start(None).await.unwrap();

        assert!(session.capabilities().is_none());
        assert!(session.settings().is_some());
        assert!(session.constraints().is_some());

        // Zoom cannot be validated without capabilities
        session
            .apply_constraint(&ConstraintInput {
                zoom: Some(2.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(platform.apply_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_settings_keep_selection() {
        let (mut session, platform) = session();
        platform.hide_settings();
        session.start(None).await.unwrap();

        assert_eq!(session.state(), CaptureState::Live);
        assert!(session.settings().is_none());
        assert!(session.capabilities().is_some());
        // Falls back to the first enumerated device
        assert_eq!(session.selected_device_id(), Some("integrated-0"));
    }

    #[tokio::test]
    async fn test_apply_without_stream_is_noop() {
        let (mut session, platform) = session();
        session
            .apply_constraint(&ConstraintInput {
                width: Some(640.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(platform.apply_calls(), 0);
        assert!(session.settings().is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_stream() {
        let (mut session, platform) = session();
        session.start(None).await.unwrap();
        drop(session);
        assert_eq!(platform.open_track_count(), 0);
    }
}
