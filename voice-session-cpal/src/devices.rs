//! Audio device enumeration via cpal.
//!
//! Devices are identified by name; cpal offers no stable endpoint ID across
//! hosts, so `AudioSource::id` carries the name as well.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

use voice_session_core::models::audio_models::AudioSource;
use voice_session_core::models::error::SessionError;

fn device_name(device: &Device) -> String {
    device.name().unwrap_or_else(|_| "<unknown>".into())
}

/// List input devices, marking the host default.
pub fn list_input_devices() -> Result<Vec<AudioSource>, SessionError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().map(|d| device_name(&d));
    let devices = host
        .input_devices()
        .map_err(|e| SessionError::Unknown(format!("failed to enumerate input devices: {}", e)))?;

    Ok(devices
        .map(|d| {
            let name = device_name(&d);
            AudioSource {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            }
        })
        .collect())
}

/// List output device names.
pub fn list_output_devices() -> Result<Vec<String>, SessionError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| SessionError::Unknown(format!("failed to enumerate output devices: {}", e)))?;
    Ok(devices.map(|d| device_name(&d)).collect())
}

/// Find the first input device whose name contains `pattern` (case-insensitive).
///
/// `None` or an unmatched pattern falls back to the host default.
pub fn find_input_device(pattern: Option<&str>) -> Option<Device> {
    let host = cpal::default_host();
    if let Some(pattern) = pattern {
        let pat = pattern.to_lowercase();
        let found = host
            .input_devices()
            .ok()
            .and_then(|mut devices| devices.find(|d| device_name(d).to_lowercase().contains(&pat)));
        match found {
            Some(device) => return Some(device),
            None => log::warn!("no input device matches '{}'; using default", pattern),
        }
    }
    host.default_input_device()
}

pub fn default_output_device() -> Option<Device> {
    cpal::default_host().default_output_device()
}
