//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use mentora_core::channel::{SessionSetup, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE};
use mentora_core::services::gemini::DEFAULT_TEXT_MODEL;
use mentora_core::EngineConfig;
use serde::{Deserialize, Serialize};

/// Prebuilt voices the live model accepts.
const KNOWN_VOICES: &[&str] = &[
    "Zephyr", "Puck", "Charon", "Kore", "Fenrir", "Aoede", "Leda", "Orus",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub live_model: String,
    pub voice_name: String,
    /// `None` uses the built-in mentor persona.
    pub system_instruction: Option<String>,
    /// Ask the live model for transcripts of both sides.
    pub transcribe: bool,
    pub outbound_queue_frames: usize,
    pub text_model: String,
    /// Only persisted when the user saves one explicitly; env vars win.
    pub api_key: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            preferred_output_device: None,
            live_model: DEFAULT_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
            system_instruction: None,
            transcribe: true,
            outbound_queue_frames: 32,
            text_model: DEFAULT_TEXT_MODEL.into(),
            api_key: None,
        }
    }
}

/// What the `settings` command prints: everything except the key itself.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub live_model: String,
    pub voice_name: String,
    pub custom_system_instruction: bool,
    pub transcribe: bool,
    pub outbound_queue_frames: usize,
    pub text_model: String,
    pub has_api_key: bool,
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = normalize_optional(self.preferred_input_device.take());
        self.preferred_output_device = normalize_optional(self.preferred_output_device.take());
        self.live_model = normalize_model(&self.live_model, DEFAULT_MODEL);
        self.text_model = normalize_model(&self.text_model, DEFAULT_TEXT_MODEL);
        self.voice_name = normalize_voice_name(&self.voice_name);
        self.system_instruction = normalize_optional(self.system_instruction.take());
        self.outbound_queue_frames = self.outbound_queue_frames.clamp(4, 256);
        self.api_key = normalize_optional(self.api_key.take());
    }

    /// Apply `MENTORA_*` overrides, then normalise again.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MENTORA_INPUT_DEVICE") {
            self.preferred_input_device = Some(v);
        }
        if let Some(v) = lookup("MENTORA_OUTPUT_DEVICE") {
            self.preferred_output_device = Some(v);
        }
        if let Some(v) = lookup("MENTORA_LIVE_MODEL") {
            self.live_model = v;
        }
        if let Some(v) = lookup("MENTORA_VOICE") {
            self.voice_name = v;
        }
        if let Some(v) = lookup("MENTORA_TEXT_MODEL") {
            self.text_model = v;
        }
        if let Some(v) = lookup("MENTORA_TRANSCRIBE") {
            self.transcribe = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(key) = lookup("MENTORA_API_KEY").or_else(|| lookup("GEMINI_API_KEY")) {
            self.api_key = Some(key);
        }
        self.normalize();
    }

    pub fn session_setup(&self) -> SessionSetup {
        SessionSetup {
            model: self.live_model.clone(),
            voice_name: self.voice_name.clone(),
            system_instruction: self
                .system_instruction
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            transcribe: self.transcribe,
            ..SessionSetup::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            outbound_queue_frames: self.outbound_queue_frames,
            preferred_input_device: self.preferred_input_device.clone(),
            preferred_output_device: self.preferred_output_device.clone(),
            setup: self.session_setup(),
            ..EngineConfig::default()
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            preferred_input_device: self.preferred_input_device.clone(),
            preferred_output_device: self.preferred_output_device.clone(),
            live_model: self.live_model.clone(),
            voice_name: self.voice_name.clone(),
            custom_system_instruction: self.system_instruction.is_some(),
            transcribe: self.transcribe,
            outbound_queue_frames: self.outbound_queue_frames,
            text_model: self.text_model.clone(),
            has_api_key: self.api_key.is_some(),
        }
    }
}

fn normalize_optional(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn normalize_model(raw: &str, default: &str) -> String {
    let model = raw.trim().trim_start_matches("models/");
    if model.is_empty() {
        default.into()
    } else {
        model.into()
    }
}

pub fn normalize_voice_name(raw: &str) -> String {
    let wanted = raw.trim();
    KNOWN_VOICES
        .iter()
        .find(|v| v.eq_ignore_ascii_case(wanted))
        .copied()
        .unwrap_or(DEFAULT_VOICE)
        .to_string()
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Mentora Labs")
            .join("Mentora")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("mentora")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn normalize_trims_and_falls_back() {
        let mut settings = AppSettings {
            preferred_input_device: Some("   ".into()),
            preferred_output_device: Some(" Headphones ".into()),
            live_model: "models/gemini-live".into(),
            voice_name: "puck".into(),
            system_instruction: Some("".into()),
            outbound_queue_frames: 0,
            text_model: "  ".into(),
            api_key: Some(" k ".into()),
            ..AppSettings::default()
        };
        settings.normalize();

        assert_eq!(settings.preferred_input_device, None);
        assert_eq!(settings.preferred_output_device.as_deref(), Some("Headphones"));
        assert_eq!(settings.live_model, "gemini-live");
        assert_eq!(settings.voice_name, "Puck");
        assert_eq!(settings.system_instruction, None);
        assert_eq!(settings.outbound_queue_frames, 4);
        assert_eq!(settings.text_model, DEFAULT_TEXT_MODEL);
        assert_eq!(settings.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn unknown_voice_uses_default() {
        assert_eq!(normalize_voice_name("robot"), DEFAULT_VOICE);
    }

    #[test]
    fn env_overrides_win_and_key_falls_back_to_gemini_var() {
        let env: HashMap<&str, &str> = [
            ("MENTORA_VOICE", "kore"),
            ("MENTORA_TRANSCRIBE", "0"),
            ("GEMINI_API_KEY", "from-gemini"),
        ]
        .into_iter()
        .collect();

        let mut settings = AppSettings::default();
        settings.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.voice_name, "Kore");
        assert!(!settings.transcribe);
        assert_eq!(settings.api_key.as_deref(), Some("from-gemini"));
    }

    #[test]
    fn engine_config_carries_session_setup() {
        let settings = AppSettings {
            preferred_input_device: Some("USB Mic".into()),
            ..AppSettings::default()
        };
        let config = settings.engine_config();
        assert_eq!(config.preferred_input_device.as_deref(), Some("USB Mic"));
        assert_eq!(config.setup.voice_name, DEFAULT_VOICE);
        assert_eq!(config.setup.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
        assert_eq!(config.frame_size, 4096);
    }

    #[test]
    fn runtime_settings_hide_key() {
        let settings = AppSettings {
            api_key: Some("secret".into()),
            ..AppSettings::default()
        };
        let json = serde_json::to_string(&settings.runtime_settings()).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"hasApiKey\":true"));
    }

    #[test]
    fn settings_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!("mentora-settings-{}", std::process::id()));
        let path = dir.join("settings.json");
        let settings = AppSettings {
            voice_name: "Aoede".into(),
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        let loaded = load_settings(&path);
        assert_eq!(loaded.voice_name, "Aoede");
        let _ = fs::remove_dir_all(dir);
    }
}
