//! Error types shared by the playback and capture sessions
//!
//! Every session operation returns these and also records the rendered
//! message on the session so the console can display it later.

use thiserror::Error;

/// Failure kinds reported by the sessions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// Malformed or unsupported audio bytes
    #[error("Failed to decode audio: {0}")]
    Decode(String),

    /// Network or HTTP failure while loading a URL
    #[error("Failed to fetch audio: {0}")]
    Fetch(String),

    /// Camera denied, busy or absent
    #[error("Failed to acquire camera: {0}")]
    DeviceAcquisition(String),

    /// Constraint unsatisfiable or rejected by the device
    #[error("Constraint rejected: {0}")]
    Constraint(String),

    /// Audio output could not start rendering
    #[error("Audio output error: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_reason() {
        let err = MediaError::DeviceAcquisition("NotAllowedError: permission denied".into());
        assert_eq!(
            err.to_string(),
            "Failed to acquire camera: NotAllowedError: permission denied"
        );
    }
}
