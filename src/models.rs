//! Data types exchanged between the capture session and camera platforms

use serde::Deserialize;

/// Kind of media device reported by enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// A device as the platform enumerates it. `label` stays empty until the
/// user has granted camera access at least once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
    pub group_id: String,
}

/// A video input as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub group_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    User,
    Environment,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeMode {
    #[default]
    None,
    CropAndScale,
}

impl ResizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResizeMode::None => "none",
            ResizeMode::CropAndScale => "crop-and-scale",
        }
    }
}

impl std::str::FromStr for ResizeMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ResizeMode::None),
            "crop-and-scale" => Ok(ResizeMode::CropAndScale),
            _ => Err(()),
        }
    }
}

/// Supported range of a numeric track property
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub step: Option<f64>,
}

impl NumericRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            step: None,
        }
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp into the range, snapping to `step` when one is reported
    pub fn fit(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        match self.step {
            Some(step) if step > 0.0 => {
                let snapped = self.min + ((clamped - self.min) / step).round() * step;
                snapped.clamp(self.min, self.max)
            }
            _ => clamped,
        }
    }
}

/// Negotiable ranges of the active track
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackCapabilities {
    pub device_id: Option<String>,
    pub group_id: Option<String>,
    pub width: Option<NumericRange>,
    pub height: Option<NumericRange>,
    pub aspect_ratio: Option<NumericRange>,
    pub frame_rate: Option<NumericRange>,
    pub facing_mode: Vec<FacingMode>,
    pub resize_mode: Vec<ResizeMode>,
    pub zoom: Option<NumericRange>,
    pub focus_distance: Option<NumericRange>,
}

/// Effective settings of the active track
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackSettings {
    pub device_id: Option<String>,
    pub group_id: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub aspect_ratio: Option<f64>,
    pub frame_rate: Option<f64>,
    pub facing_mode: Option<FacingMode>,
    pub resize_mode: Option<ResizeMode>,
    pub zoom: Option<f64>,
    pub focus_distance: Option<f64>,
}

/// A requested bound on a track property
#[derive(Debug, Clone, PartialEq)]
pub enum Constrain<T> {
    /// Best effort, the device picks the closest supported value
    Ideal(T),
    /// Must be met exactly or the request fails
    Exact(T),
}

impl<T> Constrain<T> {
    pub fn value(&self) -> &T {
        match self {
            Constrain::Ideal(v) | Constrain::Exact(v) => v,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Constrain::Exact(_))
    }
}

/// Constraint set for opening a stream or renegotiating a track.
/// Absent fields mean "leave as is".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackConstraints {
    pub device_id: Option<Constrain<String>>,
    pub facing_mode: Option<Constrain<FacingMode>>,
    pub width: Option<Constrain<f64>>,
    pub height: Option<Constrain<f64>>,
    pub aspect_ratio: Option<Constrain<f64>>,
    pub frame_rate: Option<Constrain<f64>>,
    pub resize_mode: Option<ResizeMode>,
    pub zoom: Option<Constrain<f64>>,
    pub focus_distance: Option<Constrain<f64>>,
}

impl TrackConstraints {
    pub fn is_empty(&self) -> bool {
        self == &TrackConstraints::default()
    }

    /// Overlay the fields present in `other`
    pub fn merge(&mut self, other: &TrackConstraints) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if let Some(v) = &other.$field {
                    self.$field = Some(v.clone());
                })*
            };
        }
        overlay!(
            device_id,
            facing_mode,
            width,
            height,
            aspect_ratio,
            frame_rate,
            resize_mode,
            zoom,
            focus_distance
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_fit_snaps_to_step() {
        let zoom = NumericRange::new(1.0, 4.0).with_step(0.5);
        assert_eq!(zoom.fit(2.3), 2.5);
        assert_eq!(zoom.fit(9.0), 4.0);
        assert_eq!(zoom.fit(0.0), 1.0);
    }

    #[test]
    fn test_merge_only_overlays_present_fields() {
        let mut current = TrackConstraints {
            width: Some(Constrain::Ideal(1280.0)),
            height: Some(Constrain::Ideal(720.0)),
            ..Default::default()
        };
        current.merge(&TrackConstraints {
            zoom: Some(Constrain::Ideal(2.0)),
            ..Default::default()
        });

        assert_eq!(current.width, Some(Constrain::Ideal(1280.0)));
        assert_eq!(current.height, Some(Constrain::Ideal(720.0)));
        assert_eq!(current.zoom, Some(Constrain::Ideal(2.0)));
    }

    #[test]
    fn test_empty_constraints() {
        assert!(TrackConstraints::default().is_empty());
        let c = TrackConstraints {
            resize_mode: Some(ResizeMode::CropAndScale),
            ..Default::default()
        };
        assert!(!c.is_empty());
    }

    #[test]
    fn test_config_facing_types_deserialize() {
        let range: NumericRange = serde_json::from_str(r#"{ "min": 1, "max": 4 }"#).unwrap();
        assert_eq!(range, NumericRange::new(1.0, 4.0));

        let mode: ResizeMode = serde_json::from_str(r#""crop-and-scale""#).unwrap();
        assert_eq!(mode, ResizeMode::CropAndScale);
        assert_eq!(mode.as_str(), "crop-and-scale");

        let facing: FacingMode = serde_json::from_str(r#""environment""#).unwrap();
        assert_eq!(facing, FacingMode::Environment);
    }
}
