use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use denoise_core::{EngineVariant, FailurePolicy, SessionConfig};
use serde::{Deserialize, Serialize};

pub use denoise_core::audio::MAX_GAIN;

pub const MIN_GAIN: f32 = 0.0;
pub const MIN_RING_SECONDS: f32 = 0.5;
pub const MAX_RING_SECONDS: f32 = 10.0;

/// Engine selection for the demo host.
pub const ENGINE_GATE: &str = "gate";
pub const ENGINE_STUB: &str = "stub";
pub const ENGINE_RNNOISE: &str = "rnnoise";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub gain: f32,
    pub variant: EngineVariant,
    /// `gate`, `stub` or `rnnoise`.
    pub engine: String,
    /// Read the variant's artifact bundle from `artifact_root` before building the engine.
    pub require_artifacts: bool,
    pub artifact_root: PathBuf,
    pub sample_rate: u32,
    pub ring_seconds: f32,
    pub stop_timeout_ms: u64,
    pub failure_policy: FailurePolicy,
    pub record_path: Option<PathBuf>,
    pub drop_backlog_on_ready: bool,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            gain: 1.0,
            variant: EngineVariant::default(),
            engine: ENGINE_GATE.into(),
            require_artifacts: false,
            artifact_root: PathBuf::from("artifacts"),
            sample_rate: 48_000,
            ring_seconds: 2.0,
            stop_timeout_ms: 2_000,
            failure_policy: FailurePolicy::default(),
            record_path: None,
            drop_backlog_on_ready: false,
            input_device: None,
            output_device: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.gain = normalize_gain(self.gain);
        self.ring_seconds = normalize_ring_seconds(self.ring_seconds);
        self.engine = normalize_engine(&self.engine);
        if self.sample_rate == 0 {
            self.sample_rate = 48_000;
        }
        self.stop_timeout_ms = self.stop_timeout_ms.clamp(100, 30_000);
        self.input_device = self.input_device.take().filter(|d| !d.trim().is_empty());
        self.output_device = self.output_device.take().filter(|d| !d.trim().is_empty());
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            sample_rate: self.sample_rate,
            ring_seconds: self.ring_seconds,
            variant: self.variant,
            artifact_root: self.artifact_root.clone(),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            failure_policy: self.failure_policy,
            record_path: self.record_path.clone(),
            drop_backlog_on_ready: self.drop_backlog_on_ready,
            ..SessionConfig::default()
        }
    }
}

pub fn normalize_gain(value: f32) -> f32 {
    if !value.is_finite() {
        return 1.0;
    }
    value.clamp(MIN_GAIN, MAX_GAIN)
}

pub fn normalize_ring_seconds(value: f32) -> f32 {
    if !value.is_finite() {
        return 2.0;
    }
    value.clamp(MIN_RING_SECONDS, MAX_RING_SECONDS)
}

pub fn normalize_engine(value: &str) -> String {
    match value.trim().to_ascii_lowercase().as_str() {
        ENGINE_STUB => ENGINE_STUB.into(),
        ENGINE_RNNOISE => ENGINE_RNNOISE.into(),
        _ => ENGINE_GATE.into(),
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("denoise")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("denoise")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
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

    #[test]
    fn normalize_clamps_gain_and_ring() {
        let mut settings = AppSettings {
            gain: 9.0,
            ring_seconds: 0.1,
            engine: " RNNoise ".into(),
            input_device: Some("  ".into()),
            ..AppSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.gain, MAX_GAIN);
        assert_eq!(settings.ring_seconds, MIN_RING_SECONDS);
        assert_eq!(settings.engine, ENGINE_RNNOISE);
        assert_eq!(settings.input_device, None);

        assert_eq!(normalize_gain(f32::NAN), 1.0);
        assert_eq!(normalize_gain(-1.0), 0.0);
        assert_eq!(normalize_gain(100.0), MAX_GAIN);
        assert_eq!(MAX_GAIN, 4.0);
        assert_eq!(normalize_ring_seconds(60.0), MAX_RING_SECONDS);
        assert_eq!(normalize_engine("bogus"), ENGINE_GATE);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            gain: 0.5,
            variant: EngineVariant::Fast,
            failure_policy: FailurePolicy::Silence,
            ..AppSettings::default()
        };
        save_settings(&path, &settings).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"failurePolicy\": \"silence\""));
        assert!(raw.contains("\"variant\": \"fast\""));
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn partial_or_broken_files_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        fs::write(&path, r#"{ "gain": 12.0, "ringSeconds": 3.0 }"#).unwrap();
        let settings = load_settings(&path);
        assert_eq!(settings.gain, MAX_GAIN);
        assert_eq!(settings.ring_seconds, 3.0);
        assert_eq!(settings.variant, EngineVariant::Original);

        fs::write(&path, "not json").unwrap();
        assert_eq!(load_settings(&path), AppSettings::default());
        assert_eq!(load_settings(&dir.path().join("missing.json")), AppSettings::default());
    }

    #[test]
    fn session_config_carries_settings() {
        let settings = AppSettings {
            ring_seconds: 1.5,
            variant: EngineVariant::Optimized,
            stop_timeout_ms: 500,
            ..AppSettings::default()
        };
        let config = settings.session_config();
        assert_eq!(config.ring_capacity(), 72_000);
        assert_eq!(config.variant, EngineVariant::Optimized);
        assert_eq!(config.stop_timeout, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }
}
