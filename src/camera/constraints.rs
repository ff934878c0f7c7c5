//! User-facing constraint input and its translation into a track request

use crate::models::{Constrain, ResizeMode, TrackCapabilities, TrackConstraints};
use log::warn;

/// Fields the user may renegotiate on a live track. `None` means "not
/// touched by this request".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintInput {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub aspect_ratio: Option<f64>,
    pub resize_mode: Option<ResizeMode>,
    pub zoom: Option<f64>,
    pub focus_distance: Option<f64>,
}

impl ConstraintInput {
    /// Parse `key=value` pairs, e.g. `width=1280 zoom=2 resize=crop-and-scale`.
    /// Numbers that fail to parse are kept as NaN and dropped later.
    pub fn parse(text: &str) -> Self {
        let mut input = ConstraintInput::default();
        for pair in text.split_whitespace() {
            let Some((key, value)) = pair.split_once('=') else {
                warn!("Ignoring constraint without a value: {:?}", pair);
                continue;
            };
            let number = || Some(value.parse::<f64>().unwrap_or(f64::NAN));
            match key {
                "width" | "w" => input.width = number(),
                "height" | "h" => input.height = number(),
                "aspect" | "aspect-ratio" | "aspectRatio" => input.aspect_ratio = number(),
                "zoom" => input.zoom = number(),
                "focus" | "focus-distance" | "focusDistance" => input.focus_distance = number(),
                "resize" | "resize-mode" | "resizeMode" => match value.parse() {
                    Ok(mode) => input.resize_mode = Some(mode),
                    Err(()) => warn!("Unknown resize mode {:?}", value),
                },
                _ => warn!("Unknown constraint {:?}", key),
            }
        }
        input
    }

    /// Build the request sent to the track. Dimensions must be finite and
    /// positive; zoom and focus are only sent when the track reports a range
    /// for them.
    pub fn to_request(&self, capabilities: Option<&TrackCapabilities>) -> TrackConstraints {
        let zoom_supported = capabilities.is_some_and(|c| c.zoom.is_some());
        let focus_supported = capabilities.is_some_and(|c| c.focus_distance.is_some());

        TrackConstraints {
            width: positive(self.width).map(Constrain::Ideal),
            height: positive(self.height).map(Constrain::Ideal),
            aspect_ratio: positive(self.aspect_ratio).map(Constrain::Ideal),
            resize_mode: self.resize_mode,
            zoom: finite(self.zoom)
                .filter(|_| zoom_supported)
                .map(Constrain::Ideal),
            focus_distance: finite(self.focus_distance)
                .filter(|_| focus_supported)
                .map(Constrain::Ideal),
            ..Default::default()
        }
    }
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn positive(value: Option<f64>) -> Option<f64> {
    finite(value).filter(|v| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NumericRange;

    fn zoom_caps() -> TrackCapabilities {
        TrackCapabilities {
            zoom: Some(NumericRange::new(1.0, 4.0)),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_pairs() {
        let input = ConstraintInput::parse("width=1280 h=720 zoom=2.5 resize=crop-and-scale");
        assert_eq!(input.width, Some(1280.0));
        assert_eq!(input.height, Some(720.0));
        assert_eq!(input.zoom, Some(2.5));
        assert_eq!(input.resize_mode, Some(ResizeMode::CropAndScale));
        assert_eq!(input.aspect_ratio, None);
    }

    #[test]
    fn test_unparsable_numbers_are_dropped() {
        let input = ConstraintInput::parse("width=wide height=720");
        assert!(input.width.unwrap().is_nan());

        let request = input.to_request(None);
        assert_eq!(request.width, None);
        assert_eq!(request.height, Some(Constrain::Ideal(720.0)));
    }

    #[test]
    fn test_non_positive_dimensions_are_dropped() {
        let input = ConstraintInput {
            width: Some(0.0),
            height: Some(-480.0),
            aspect_ratio: Some(f64::INFINITY),
            ..Default::default()
        };
        assert!(input.to_request(None).is_empty());
    }

    #[test]
    fn test_zoom_needs_capability() {
        let input = ConstraintInput {
            zoom: Some(2.0),
            focus_distance: Some(0.3),
            ..Default::default()
        };

        assert!(input.to_request(None).is_empty());

        let request = input.to_request(Some(&zoom_caps()));
        assert_eq!(request.zoom, Some(Constrain::Ideal(2.0)));
        assert_eq!(request.focus_distance, None);
    }

    #[test]
    fn test_empty_input_builds_empty_request() {
        assert!(ConstraintInput::default()
            .to_request(Some(&zoom_caps()))
            .is_empty());
        assert!(ConstraintInput::parse("").to_request(None).is_empty());
    }
}
