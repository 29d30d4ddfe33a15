//! TOML configuration file loading
//!
//! Supports `~/.config/nexus/voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::session::ResponseFormat;
use crate::voice::{SampleConversion, SpeechRate, TtsProvider};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Live transcription session
    #[serde(default)]
    pub live: LiveFileConfig,

    /// Microphone capture
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speech synthesis
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Downstream assistant
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Live session configuration
#[derive(Debug, Default, Deserialize)]
pub struct LiveFileConfig {
    /// WebSocket endpoint
    pub url: Option<String>,

    /// Model identifier (e.g. "gemini-2.5-flash-native-audio-preview-12-2025")
    pub model: Option<String>,

    /// System instruction sent with the setup request
    pub instruction: Option<String>,

    /// "audio" or "text"
    pub response_format: Option<ResponseFormat>,

    /// Request input transcription events
    pub transcription: Option<bool>,

    pub connect_timeout_secs: Option<u64>,

    pub ready_timeout_secs: Option<u64>,

    /// Extra attempts for the initial connect
    pub connect_retries: Option<u32>,

    pub retry_base_delay_ms: Option<u64>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Samples per frame
    pub frame_size: Option<usize>,

    pub sample_rate: Option<u32>,

    /// "clamp" or "wrap"
    pub sample_conversion: Option<SampleConversion>,
}

/// TTS configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "gemini" or "openai"
    pub provider: Option<TtsProvider>,

    pub model: Option<String>,

    /// Voice identifier (e.g. "Kore")
    pub voice: Option<String>,

    /// "slow", "normal" or "fast"
    pub speed: Option<SpeechRate>,
}

/// Assistant configuration
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    pub model: Option<String>,

    pub base_url: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub openai: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<VoiceConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    config_file_path().map_or_else(VoiceConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> VoiceConfigFile {
    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/nexus/voice/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("nexus")
            .join("voice")
            .join("config.toml")
    })
}
