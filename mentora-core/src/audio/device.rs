//! Audio device enumeration and microphone heuristics.

use serde::{Deserialize, Serialize};

/// Which side of the audio graph a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about one audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Name reported by the OS; also the value stored in settings.
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    /// Input that probably captures system output rather than a voice.
    pub is_loopback_like: bool,
    /// Best guess for talking to the mentor. At most one per direction.
    pub is_recommended: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "virtual output",
    "monitor of",
    "speakers (",
    "headphones (",
];

const MIC_KEYWORDS: &[&str] = &[
    "microphone",
    "mic",
    "array",
    "headset",
    "input",
    "usb",
    "webcam",
];

/// Heuristic: does this input name look like a system-output capture?
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Higher is a better speech microphone.
pub fn mic_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = if is_loopback_like_name(&lowered) { -16 } else { 8 };
    if MIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 6;
    }
    score
}

/// Flag the best entry and sort recommended / default first.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn rank(mut list: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    let best = list
        .iter()
        .enumerate()
        .max_by_key(|(_, d)| match d.direction {
            DeviceDirection::Input => mic_preference_score(&d.name) + 2 * d.is_default as i32,
            DeviceDirection::Output => d.is_default as i32,
        })
        .map(|(idx, _)| idx);
    if let Some(best) = best.and_then(|idx| list.get_mut(idx)) {
        best.is_recommended = true;
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_loopback_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

#[cfg(feature = "audio-cpal")]
fn collect<I>(devices: I, default_name: Option<String>, direction: DeviceDirection) -> Vec<DeviceInfo>
where
    I: Iterator<Item = cpal::Device>,
{
    use cpal::traits::DeviceTrait;

    devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                is_loopback_like: direction == DeviceDirection::Input
                    && is_loopback_like_name(&name),
                is_recommended: false,
                direction,
                name,
            }
        })
        .collect()
}

/// All microphones, best candidate first. Empty when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    match host.input_devices() {
        Ok(devices) => rank(collect(devices, default_name, DeviceDirection::Input)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate input devices");
            Vec::new()
        }
    }
}

/// All speakers / headphones, system default first.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    match host.output_devices() {
        Ok(devices) => rank(collect(devices, default_name, DeviceDirection::Output)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate output devices");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction: DeviceDirection::Input,
            is_default,
            is_loopback_like: is_loopback_like_name(name),
            is_recommended: false,
        }
    }

    #[test]
    fn detects_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(!is_loopback_like_name("MacBook Pro Microphone"));
    }

    #[test]
    fn ranks_real_microphone_over_default_loopback() {
        let ranked = rank(vec![
            input("Stereo Mix (Realtek Audio)", true),
            input("Microphone Array (USB Audio)", false),
        ]);
        assert_eq!(ranked[0].name, "Microphone Array (USB Audio)");
        assert!(ranked[0].is_recommended);
        assert!(!ranked[1].is_recommended);
    }

    #[test]
    fn output_ranking_prefers_default() {
        let ranked = rank(vec![
            DeviceInfo {
                name: "HDMI".into(),
                direction: DeviceDirection::Output,
                is_default: false,
                is_loopback_like: false,
                is_recommended: false,
            },
            DeviceInfo {
                name: "Headphones".into(),
                direction: DeviceDirection::Output,
                is_default: true,
                is_loopback_like: false,
                is_recommended: false,
            },
        ]);
        assert_eq!(ranked[0].name, "Headphones");
        assert!(ranked[0].is_recommended);
    }

    #[test]
    fn empty_list_is_fine() {
        assert!(rank(Vec::new()).is_empty());
    }
}
