//! User preference persistence using dconf
//!
//! Preferences are stored in dconf under `/com/mediadeck/harness/`

use log::error;

const DCONF_PATH: &str = "/com/mediadeck/harness/";

/// Keys for dconf settings
mod keys {
    pub const VOLUME: &str = "volume";
    pub const PREFERRED_CAMERA: &str = "preferred-camera";
    pub const REMEMBER_CAMERA: &str = "remember-camera";
}

fn key(name: &str) -> String {
    format!("{}{}", DCONF_PATH, name)
}

/// Get the last playback volume (defaults to full volume)
pub fn get_volume() -> f32 {
    dconf_rs::get_string(&key(keys::VOLUME))
        .ok()
        .and_then(|v| parse_volume(&v))
        .unwrap_or(1.0)
}

/// Persist the playback volume
pub fn set_volume(volume: f32) {
    if let Err(e) = dconf_rs::set_string(&key(keys::VOLUME), &format!("{:.3}", volume)) {
        error!("Failed to save volume to dconf: {}", e);
    }
}

/// Get the camera id chosen last time, if remembering is enabled
pub fn get_preferred_camera() -> Option<String> {
    if !get_remember_camera() {
        return None;
    }
    dconf_rs::get_string(&key(keys::PREFERRED_CAMERA))
        .ok()
        .filter(|id| !id.is_empty())
}

pub fn set_preferred_camera(device_id: &str) {
    if !get_remember_camera() {
        return;
    }
    if let Err(e) = dconf_rs::set_string(&key(keys::PREFERRED_CAMERA), device_id) {
        error!("Failed to save preferred camera to dconf: {}", e);
    }
}

/// Whether the preferred camera is remembered (defaults to true)
pub fn get_remember_camera() -> bool {
    dconf_rs::get_boolean(&key(keys::REMEMBER_CAMERA)).unwrap_or(true)
}

fn parse_volume(raw: &str) -> Option<f32> {
    // dconf returns GVariant text, strings come back quoted
    let v: f32 = raw.trim().trim_matches('\'').parse().ok()?;
    v.is_finite().then(|| v.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("0.500"), Some(0.5));
        assert_eq!(parse_volume("'0.25'"), Some(0.25));
        assert_eq!(parse_volume("7"), Some(1.0));
        assert_eq!(parse_volume("loud"), None);
        assert_eq!(parse_volume("NaN"), None);
    }
}
