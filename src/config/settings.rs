//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to the call
//! controller by value.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::SampleConversion;

/// Environment variable that overrides [`LiveConfig::api_key`].
pub const API_KEY_ENV: &str = "LIVE_CALL_API_KEY";

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Connection and persona settings for the live streaming session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket URL of the bidirectional streaming endpoint.
    pub endpoint: String,
    /// Model identifier sent in the setup message (without `models/`).
    pub model: String,
    /// API key appended as the `key` query parameter.  `None` sends no key.
    pub api_key: Option<String>,
    /// Prebuilt voice used for spoken replies.
    pub voice_name: String,
    /// Persona instruction sent once at session setup.
    pub system_instruction: String,
    /// Free-text user profile appended to the instruction when non-empty.
    pub memory: String,
    /// Seconds to wait for the server to acknowledge the setup message.
    pub setup_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            api_key: None,
            voice_name: "Kore".into(),
            system_instruction:
                "You are in a video call. Use a persona that is human-like and empathetic.".into(),
            memory: String::new(),
            setup_timeout_secs: 15,
        }
    }
}

impl LiveConfig {
    /// Instruction text actually sent, with the memory block appended.
    ///
    /// ```rust
    /// use live_call::config::LiveConfig;
    ///
    /// let mut cfg = LiveConfig::default();
    /// cfg.system_instruction = "Be brief.".into();
    /// assert_eq!(cfg.full_instruction(), "Be brief.");
    ///
    /// cfg.memory = "likes Rust".into();
    /// assert_eq!(cfg.full_instruction(), "Be brief. MEMORY: likes Rust");
    /// ```
    pub fn full_instruction(&self) -> String {
        let memory = self.memory.trim();
        if memory.is_empty() {
            self.system_instruction.clone()
        } else {
            format!("{} MEMORY: {memory}", self.system_instruction.trim_end())
        }
    }

    /// Replace `api_key` with the value of [`API_KEY_ENV`] when it is set.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.api_key = Some(key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture and playback audio settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of outbound PCM frames in Hz (the service expects 16 000).
    pub capture_sample_rate: u32,
    /// Rate of inbound PCM chunks in Hz (the service sends 24 000).
    pub playback_sample_rate: u32,
    /// Samples per outbound frame.
    pub frame_samples: usize,
    /// Playback-rate multiplier applied to every received chunk.
    pub voice_rate: f32,
    /// How out-of-range capture samples are converted to 16-bit.
    pub sample_conversion: SampleConversion,
    /// Depth of the bounded outbound frame queue.
    pub outbound_queue: usize,
    /// Input device name; `None` selects the system default.
    pub input_device: Option<String>,
    /// Output device name; `None` selects the system default.
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            playback_sample_rate: 24_000,
            frame_samples: 4_096,
            voice_rate: 1.0,
            sample_conversion: SampleConversion::Wrap,
            outbound_queue: 64,
            input_device: None,
            output_device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// VideoConfig
// ---------------------------------------------------------------------------

/// Optional camera frame uplink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Send periodic image frames alongside audio.
    pub enabled: bool,
    /// Milliseconds between frames.
    pub interval_ms: u64,
    /// JPEG quality, 1–100.
    pub jpeg_quality: u8,
    /// Frames wider than this are scaled down before encoding.
    pub max_width: u32,
    /// Image file used as the frame source.
    pub still_image: Option<std::path::PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 500,
            jpeg_quality: 70,
            max_width: 640,
            still_image: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use live_call::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Streaming endpoint and persona.
    pub live: LiveConfig,
    /// Capture / playback settings.
    pub audio: AudioConfig,
    /// Camera frame uplink.
    pub video: VideoConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.live.endpoint, loaded.live.endpoint);
        assert_eq!(original.live.model, loaded.live.model);
        assert_eq!(original.live.voice_name, loaded.live.voice_name);
        assert_eq!(original.audio.frame_samples, loaded.audio.frame_samples);
        assert_eq!(
            original.audio.sample_conversion,
            loaded.audio.sample_conversion
        );
        assert_eq!(original.video.interval_ms, loaded.video.interval_ms);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let config = AppConfig::load_from(&dir.path().join("nope.toml")).expect("no error");
        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert!(!config.video.enabled);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.audio.capture_sample_rate, 16_000);
        assert_eq!(cfg.audio.playback_sample_rate, 24_000);
        assert_eq!(cfg.audio.frame_samples, 4_096);
        assert_eq!(cfg.audio.voice_rate, 1.0);
        assert_eq!(cfg.audio.sample_conversion, SampleConversion::Wrap);
        assert_eq!(cfg.live.voice_name, "Kore");
        assert!(cfg.live.api_key.is_none());
        assert_eq!(cfg.video.interval_ms, 500);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[audio]\nvoice_rate = 1.25\nsample_conversion = \"saturate\"\n\n[video]\nenabled = true\n",
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.audio.voice_rate, 1.25);
        assert_eq!(cfg.audio.sample_conversion, SampleConversion::Saturate);
        assert_eq!(cfg.audio.frame_samples, 4_096);
        assert!(cfg.video.enabled);
        assert_eq!(cfg.live.voice_name, "Kore");
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.live.api_key = Some("k-test".into());
        cfg.live.memory = "prefers short answers".into();
        cfg.audio.output_device = Some("USB Headset".into());
        cfg.video.still_image = Some("/tmp/frame.png".into());

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.live.api_key.as_deref(), Some("k-test"));
        assert_eq!(loaded.live.memory, "prefers short answers");
        assert_eq!(loaded.audio.output_device.as_deref(), Some("USB Headset"));
        assert_eq!(
            loaded.video.still_image.as_deref(),
            Some(std::path::Path::new("/tmp/frame.png"))
        );
    }
}
