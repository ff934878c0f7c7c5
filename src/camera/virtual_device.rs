//! Virtual capture platform
//!
//! Emulates a browser-style camera stack: labels are withheld until the
//! first successful open, devices can be busy or access denied, and tracks
//! negotiate constraints against per-camera capability ranges. Open tracks
//! are tracked so callers can check that nothing leaks.

use super::platform::{CapturePlatform, CaptureStream, VideoTrack};
use crate::config::{CaptureConfig, VirtualCameraConfig};
use crate::error::{MediaError, Result};
use crate::models::{
    Constrain, DeviceKind, MediaDeviceInfo, NumericRange, TrackCapabilities, TrackConstraints,
    TrackSettings,
};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Prompt,
    Granted,
    Denied,
}

/// Which track queries the platform answers
#[derive(Debug, Clone, Copy)]
struct TrackFeatures {
    capabilities: bool,
    constraints: bool,
    settings: bool,
}

struct PlatformInner {
    cameras: Vec<VirtualCameraConfig>,
    permission: Permission,
    busy: HashSet<String>,
    /// track id -> device id
    open_tracks: BTreeMap<u64, String>,
    next_track: u64,
    apply_calls: usize,
    features: TrackFeatures,
}

#[derive(Clone)]
pub struct VirtualCameraPlatform {
    inner: Arc<Mutex<PlatformInner>>,
    open_latency: Duration,
}

fn lock(inner: &Mutex<PlatformInner>) -> MutexGuard<'_, PlatformInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VirtualCameraPlatform {
    pub fn new(cameras: Vec<VirtualCameraConfig>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlatformInner {
                cameras,
                permission: Permission::Prompt,
                busy: HashSet::new(),
                open_tracks: BTreeMap::new(),
                next_track: 1,
                apply_calls: 0,
                features: TrackFeatures {
                    capabilities: true,
                    constraints: true,
                    settings: true,
                },
            })),
            open_latency: Duration::ZERO,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        let mut platform = Self::new(config.cameras.clone());
        platform.open_latency = config.open_latency();
        platform
    }

    pub fn permission(&self) -> Permission {
        lock(&self.inner).permission
    }

    pub fn set_permission(&self, permission: Permission) {
        lock(&self.inner).permission = permission;
    }

    /// Mark a device as held by another application
    pub fn set_busy(&self, device_id: &str, busy: bool) {
        let mut inner = lock(&self.inner);
        if busy {
            inner.busy.insert(device_id.to_string());
        } else {
            inner.busy.remove(device_id);
        }
    }

    /// Stop answering `capabilities()` on tracks
    pub fn hide_capabilities(&self) {
        lock(&self.inner).features.capabilities = false;
    }

    pub fn hide_settings(&self) {
        lock(&self.inner).features.settings = false;
    }

    /// Devices with a live track, in track creation order
    pub fn open_devices(&self) -> Vec<String> {
        lock(&self.inner).open_tracks.values().cloned().collect()
    }

    pub fn open_track_count(&self) -> usize {
        lock(&self.inner).open_tracks.len()
    }

    /// Number of `apply_constraints` calls received by any track
    pub fn apply_calls(&self) -> usize {
        lock(&self.inner).apply_calls
    }

    fn select_camera(
        cameras: &[VirtualCameraConfig],
        request: &TrackConstraints,
    ) -> Result<VirtualCameraConfig> {
        let not_found = || MediaError::DeviceAcquisition("NotFoundError: Requested device not found".into());
        let first = cameras.first().cloned().ok_or_else(not_found)?;

        if let Some(wanted) = &request.device_id {
            let found = cameras.iter().find(|c| &c.id == wanted.value()).cloned();
            return match (found, wanted.is_exact()) {
                (Some(camera), _) => Ok(camera),
                (None, true) => Err(not_found()),
                (None, false) => Ok(first),
            };
        }

        if let Some(facing) = &request.facing_mode {
            let found = cameras
                .iter()
                .find(|c| c.facing_mode.as_ref() == Some(facing.value()))
                .cloned();
            return match (found, facing.is_exact()) {
                (Some(camera), _) => Ok(camera),
                (None, true) => Err(MediaError::DeviceAcquisition(
                    "OverconstrainedError: facingMode cannot be satisfied".into(),
                )),
                (None, false) => Ok(first),
            };
        }

        Ok(first)
    }
}

#[async_trait]
impl CapturePlatform for VirtualCameraPlatform {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        let inner = lock(&self.inner);
        let reveal = inner.permission == Permission::Granted;
        let label = |l: &str| if reveal { l.to_string() } else { String::new() };

        let mut devices = vec![MediaDeviceInfo {
            device_id: "default-mic".into(),
            kind: DeviceKind::AudioInput,
            label: label("Default Microphone"),
            group_id: "default".into(),
        }];
        devices.extend(inner.cameras.iter().map(|c| MediaDeviceInfo {
            device_id: c.id.clone(),
            kind: DeviceKind::VideoInput,
            label: label(&c.label),
            group_id: c.group_id.clone(),
        }));
        Ok(devices)
    }

    async fn open_stream(&self, request: &TrackConstraints) -> Result<Box<dyn CaptureStream>> {
        if !self.open_latency.is_zero() {
            tokio::time::sleep(self.open_latency).await;
        }

        let mut inner = lock(&self.inner);
        if inner.permission == Permission::Denied {
            return Err(MediaError::DeviceAcquisition(
                "NotAllowedError: Permission denied".into(),
            ));
        }

        let camera = Self::select_camera(&inner.cameras, request)?;
        if inner.busy.contains(&camera.id) {
            return Err(MediaError::DeviceAcquisition(format!(
                "NotReadableError: {} is in use by another application",
                camera.id
            )));
        }

        let mut track = VirtualTrack {
            id: 0,
            settings: default_settings(&camera),
            constraints: TrackConstraints::default(),
            camera,
            platform: self.inner.clone(),
            live: false,
        };
        track.settings = track
            .resolve(request)
            .map_err(|field| {
                MediaError::DeviceAcquisition(format!(
                    "OverconstrainedError: {} cannot be satisfied",
                    field
                ))
            })?;
        track.constraints = request.clone();

        inner.permission = Permission::Granted;
        track.id = inner.next_track;
        inner.next_track += 1;
        inner.open_tracks.insert(track.id, track.camera.id.clone());
        track.live = true;

        info!("Opened virtual camera {:?} (track {})", track.camera.id, track.id);
        Ok(Box::new(VirtualStream {
            id: Uuid::new_v4().to_string(),
            track,
        }))
    }
}

fn default_settings(camera: &VirtualCameraConfig) -> TrackSettings {
    let width = camera.width.fit(640.0);
    let height = camera.height.fit(480.0);
    TrackSettings {
        device_id: Some(camera.id.clone()),
        group_id: Some(camera.group_id.clone()),
        width: Some(width),
        height: Some(height),
        aspect_ratio: Some(width / height),
        frame_rate: Some(camera.frame_rate.max),
        facing_mode: camera.facing_mode,
        resize_mode: camera.resize_modes.first().copied(),
        zoom: camera.zoom.map(|z| z.min),
        focus_distance: camera.focus_distance.map(|f| f.min),
    }
}

/// Fit a constraint into an optional range. Exact values outside the range,
/// or on a property the camera lacks, fail with the property name.
fn negotiate(
    wanted: &Constrain<f64>,
    range: Option<&NumericRange>,
    field: &'static str,
) -> std::result::Result<Option<f64>, &'static str> {
    match (range, wanted) {
        (Some(range), Constrain::Exact(v)) if range.contains(*v) => Ok(Some(*v)),
        (Some(_), Constrain::Exact(_)) => Err(field),
        (Some(range), Constrain::Ideal(v)) => Ok(Some(range.fit(*v))),
        (None, Constrain::Exact(_)) => Err(field),
        (None, Constrain::Ideal(_)) => Ok(None),
    }
}

struct VirtualTrack {
    id: u64,
    camera: VirtualCameraConfig,
    settings: TrackSettings,
    constraints: TrackConstraints,
    platform: Arc<Mutex<PlatformInner>>,
    live: bool,
}

impl VirtualTrack {
    fn aspect_range(&self) -> NumericRange {
        NumericRange::new(
            self.camera.width.min / self.camera.height.max,
            self.camera.width.max / self.camera.height.min,
        )
    }

    /// Settings after applying `request` on top of the current ones
    fn resolve(&self, request: &TrackConstraints) -> std::result::Result<TrackSettings, &'static str> {
        let mut next = self.settings.clone();
        let camera = &self.camera;

        if let Some(id) = &request.device_id {
            if id.is_exact() && id.value() != &camera.id {
                return Err("deviceId");
            }
        }
        if let Some(facing) = &request.facing_mode {
            if facing.is_exact() && camera.facing_mode.as_ref() != Some(facing.value()) {
                return Err("facingMode");
            }
        }

        if let Some(mode) = request.resize_mode {
            if !camera.resize_modes.contains(&mode) {
                return Err("resizeMode");
            }
            next.resize_mode = Some(mode);
        }

        let width = match &request.width {
            Some(w) => negotiate(w, Some(&camera.width), "width")?,
            None => None,
        };
        let height = match &request.height {
            Some(h) => negotiate(h, Some(&camera.height), "height")?,
            None => None,
        };
        let aspect = match &request.aspect_ratio {
            Some(a) => negotiate(a, Some(&self.aspect_range()), "aspectRatio")?,
            None => None,
        };

        let current_w = next.width.unwrap_or(camera.width.min);
        let current_h = next.height.unwrap_or(camera.height.min);
        let (w, h) = match (width, height, aspect) {
            (Some(w), Some(h), _) => (w, h),
            (Some(w), None, Some(a)) => (w, camera.height.fit(w / a)),
            (None, Some(h), Some(a)) => (camera.width.fit(h * a), h),
            (None, None, Some(a)) => (current_w, camera.height.fit(current_w / a)),
            (Some(w), None, None) => (w, current_h),
            (None, Some(h), None) => (current_w, h),
            (None, None, None) => (current_w, current_h),
        };
        next.width = Some(w);
        next.height = Some(h);
        next.aspect_ratio = Some(w / h);

        if let Some(rate) = &request.frame_rate {
            if let Some(v) = negotiate(rate, Some(&camera.frame_rate), "frameRate")? {
                next.frame_rate = Some(v);
            }
        }
        if let Some(zoom) = &request.zoom {
            if let Some(v) = negotiate(zoom, camera.zoom.as_ref(), "zoom")? {
                next.zoom = Some(v);
            }
        }
        if let Some(focus) = &request.focus_distance {
            if let Some(v) = negotiate(focus, camera.focus_distance.as_ref(), "focusDistance")? {
                next.focus_distance = Some(v);
            }
        }

        Ok(next)
    }

    fn features(&self) -> TrackFeatures {
        lock(&self.platform).features
    }

    fn stop(&mut self) {
        if !self.live {
            return;
        }
        self.live = false;
        lock(&self.platform).open_tracks.remove(&self.id);
        debug!("Stopped virtual camera track {}", self.id);
    }
}

#[async_trait]
impl VideoTrack for VirtualTrack {
    fn label(&self) -> String {
        self.camera.label.clone()
    }

    fn capabilities(&self) -> Option<TrackCapabilities> {
        if !self.features().capabilities {
            return None;
        }
        let camera = &self.camera;
        Some(TrackCapabilities {
            device_id: Some(camera.id.clone()),
            group_id: Some(camera.group_id.clone()),
            width: Some(camera.width),
            height: Some(camera.height),
            aspect_ratio: Some(self.aspect_range()),
            frame_rate: Some(camera.frame_rate),
            facing_mode: camera.facing_mode.into_iter().collect(),
            resize_mode: camera.resize_modes.clone(),
            zoom: camera.zoom,
            focus_distance: camera.focus_distance,
        })
    }

    fn constraints(&self) -> Option<TrackConstraints> {
        self.features().constraints.then(|| self.constraints.clone())
    }

    fn settings(&self) -> Option<TrackSettings> {
        self.features().settings.then(|| self.settings.clone())
    }

    async fn apply_constraints(&mut self, constraints: &TrackConstraints) -> Result<()> {
        lock(&self.platform).apply_calls += 1;
        if !self.live {
            return Err(MediaError::Constraint(
                "InvalidStateError: track has ended".into(),
            ));
        }

        let settings = self.resolve(constraints).map_err(|field| {
            MediaError::Constraint(format!("OverconstrainedError: {} cannot be satisfied", field))
        })?;
        self.settings = settings;
        self.constraints.merge(constraints);
        Ok(())
    }
}

impl Drop for VirtualTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

struct VirtualStream {
    id: String,
    track: VirtualTrack,
}

impl CaptureStream for VirtualStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn video_track(&self) -> Option<&dyn VideoTrack> {
        self.track.live.then_some(&self.track as &dyn VideoTrack)
    }

    fn video_track_mut(&mut self) -> Option<&mut dyn VideoTrack> {
        if self.track.live {
            Some(&mut self.track as &mut dyn VideoTrack)
        } else {
            None
        }
    }

    fn stop_tracks(&mut self) {
        self.track.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FacingMode, ResizeMode};

    fn platform() -> VirtualCameraPlatform {
        VirtualCameraPlatform::from_config(&CaptureConfig::default())
    }

    fn exact_device(id: &str) -> TrackConstraints {
        TrackConstraints {
            device_id: Some(Constrain::Exact(id.to_string())),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_labels_hidden_until_granted() {
        let platform = platform();
        let devices = platform.enumerate_devices().await.unwrap();
        assert_eq!(devices.len(), 3);
        assert!(devices.iter().all(|d| d.label.is_empty()));

        let _stream = platform.open_stream(&TrackConstraints::default()).await.unwrap();
        assert_eq!(platform.permission(), Permission::Granted);

        let devices = platform.enumerate_devices().await.unwrap();
        assert_eq!(devices[1].label, "Integrated Camera");
        assert_eq!(devices[0].kind, DeviceKind::AudioInput);
    }

    #[tokio::test]
    async fn test_open_by_exact_device() {
        let platform = platform();
        let stream = platform.open_stream(&exact_device("usb-1")).await.unwrap();
        let settings = stream.video_track().unwrap().settings().unwrap();
        assert_eq!(settings.device_id.as_deref(), Some("usb-1"));
        assert_eq!(platform.open_devices(), vec!["usb-1".to_string()]);

        let err = platform.open_stream(&exact_device("missing")).await.err().unwrap();
        assert!(matches!(err, MediaError::DeviceAcquisition(_)));
    }

    #[tokio::test]
    async fn test_open_by_facing_mode() {
        let platform = platform();
        let request = TrackConstraints {
            facing_mode: Some(Constrain::Exact(FacingMode::User)),
            ..Default::default()
        };
        let stream = platform.open_stream(&request).await.unwrap();
        assert_eq!(stream.video_track().unwrap().label(), "Integrated Camera");

        let request = TrackConstraints {
            facing_mode: Some(Constrain::Exact(FacingMode::Environment)),
            ..Default::default()
        };
        assert!(platform.open_stream(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_denied_and_busy() {
        let platform = platform();
        platform.set_busy("integrated-0", true);
        let err = platform.open_stream(&exact_device("integrated-0")).await.err().unwrap();
        assert!(err.to_string().contains("NotReadableError"));

        platform.set_permission(Permission::Denied);
        let err = platform.open_stream(&exact_device("usb-1")).await.err().unwrap();
        assert!(err.to_string().contains("NotAllowedError"));
        assert_eq!(platform.open_track_count(), 0);
    }

    #[tokio::test]
    async fn test_ideal_values_are_fitted() {
        let platform = platform();
        let mut stream = platform.open_stream(&exact_device("integrated-0")).await.unwrap();
        let track = stream.video_track_mut().unwrap();

        track
            .apply_constraints(&TrackConstraints {
                width: Some(Constrain::Ideal(5000.0)),
                zoom: Some(Constrain::Ideal(2.34)),
                ..Default::default()
            })
            .await
            .unwrap();

        let settings = track.settings().unwrap();
        assert_eq!(settings.width, Some(1920.0));
        assert!((settings.zoom.unwrap() - 2.3).abs() < 1e-9);
        // Untouched by the request
        assert_eq!(settings.height, Some(480.0));
    }

    #[tokio::test]
    async fn test_aspect_ratio_derives_height() {
        let platform = platform();
        let mut stream = platform.open_stream(&exact_device("integrated-0")).await.unwrap();
        let track = stream.video_track_mut().unwrap();

        track
            .apply_constraints(&TrackConstraints {
                width: Some(Constrain::Ideal(1280.0)),
                aspect_ratio: Some(Constrain::Ideal(16.0 / 9.0)),
                ..Default::default()
            })
            .await
            .unwrap();

        let settings = track.settings().unwrap();
        assert_eq!(settings.width, Some(1280.0));
        assert!((settings.height.unwrap() - 720.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unsupported_constraints_fail() {
        let platform = platform();
        let mut stream = platform.open_stream(&exact_device("usb-1")).await.unwrap();
        let track = stream.video_track_mut().unwrap();

        let err = track
            .apply_constraints(&TrackConstraints {
                resize_mode: Some(ResizeMode::CropAndScale),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Constraint(_)));

        let err = track
            .apply_constraints(&TrackConstraints {
                zoom: Some(Constrain::Exact(2.0)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("zoom"));
        assert_eq!(platform.apply_calls(), 2);
    }

    #[tokio::test]
    async fn test_stop_tracks_releases_device() {
        let platform = platform();
        let mut stream = platform.open_stream(&exact_device("usb-1")).await.unwrap();
        assert_eq!(platform.open_track_count(), 1);

        stream.stop_tracks();
        assert_eq!(platform.open_track_count(), 0);
        assert!(stream.video_track().is_none());

        let other = platform.open_stream(&exact_device("integrated-0")).await.unwrap();
        drop(other);
        assert_eq!(platform.open_track_count(), 0);
    }

    #[tokio::test]
    async fn test_hidden_features() {
        let platform = platform();
        platform.hide_capabilities();
        let stream = platform.open_stream(&exact_device("usb-1")).await.unwrap();
        let track = stream.video_track().unwrap();
        assert!(track.capabilities().is_none());
        assert!(track.settings().is_some());
        assert!(track.constraints().is_some());
    }
}
