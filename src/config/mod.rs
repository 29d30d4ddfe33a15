//! Configuration management for the voice pipeline
//!
//! Precedence is environment > TOML file > built-in defaults.

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::controller::ControllerConfig;
use crate::session::{DEFAULT_LIVE_URL, ResponseFormat, RetryPolicy, SessionConfig};
use crate::voice::{FRAME_SIZE, SAMPLE_RATE, SampleConversion, SpeechRate, TtsProvider};
use crate::{Error, Result, assistant, gemini};

use self::file::VoiceConfigFile;

/// Default live transcription model
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Default live system instruction
pub const DEFAULT_INSTRUCTION: &str =
    "Transcribe user cybersecurity requests. Auto-detect the language from the voice.";

/// Default Gemini TTS model
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";

/// Default Gemini TTS voice
pub const DEFAULT_TTS_VOICE: &str = "Kore";

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API keys
    pub api_keys: ApiKeys,

    /// Live transcription session
    pub live: LiveConfig,

    /// Microphone capture
    pub capture: CaptureConfig,

    /// Speech synthesis
    pub tts: TtsConfig,

    /// Downstream assistant
    pub assistant: AssistantConfig,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// Gemini key (live session, TTS, assistant)
    pub gemini: Option<String>,

    /// `OpenAI` key (TTS provider only)
    pub openai: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |key: Option<&String>| key.map(|_| "[redacted]");
        f.debug_struct("ApiKeys")
            .field("gemini", &redact(self.gemini.as_ref()))
            .field("openai", &redact(self.openai.as_ref()))
            .finish()
    }
}

/// Live session configuration
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub url: String,
    pub model: String,
    pub instruction: String,
    pub response_format: ResponseFormat,
    pub transcription: bool,
    pub connect_timeout: Duration,
    pub ready_timeout: Duration,
    pub connect_retries: u32,
    pub retry_base_delay: Duration,
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub frame_size: usize,
    pub sample_rate: u32,
    pub sample_conversion: SampleConversion,
}

/// TTS configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub model: String,
    pub voice: String,
    pub speed: SpeechRate,
}

/// Assistant configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub model: String,
    pub base_url: String,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if an environment override has an invalid value
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment override has an invalid value
    pub fn from_sources(
        fc: VoiceConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            gemini: env("GEMINI_API_KEY")
                .or_else(|| env("API_KEY"))
                .or(fc.api_keys.gemini)
                .filter(|k| !k.is_empty()),
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .filter(|k| !k.is_empty()),
        };

        let live = LiveConfig {
            url: env("NEXUS_LIVE_URL")
                .or(fc.live.url)
                .unwrap_or_else(|| DEFAULT_LIVE_URL.to_string()),
            model: env("NEXUS_LIVE_MODEL")
                .or(fc.live.model)
                .unwrap_or_else(|| DEFAULT_LIVE_MODEL.to_string()),
            instruction: fc
                .live
                .instruction
                .unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
            response_format: fc.live.response_format.unwrap_or_default(),
            transcription: fc.live.transcription.unwrap_or(true),
            connect_timeout: Duration::from_secs(fc.live.connect_timeout_secs.unwrap_or(10)),
            ready_timeout: Duration::from_secs(fc.live.ready_timeout_secs.unwrap_or(10)),
            connect_retries: fc.live.connect_retries.unwrap_or(0),
            retry_base_delay: Duration::from_millis(fc.live.retry_base_delay_ms.unwrap_or(500)),
        };

        let capture = CaptureConfig {
            frame_size: fc.capture.frame_size.unwrap_or(FRAME_SIZE).max(1),
            sample_rate: fc.capture.sample_rate.unwrap_or(SAMPLE_RATE),
            sample_conversion: fc.capture.sample_conversion.unwrap_or_default(),
        };

        // TTS (env > toml > provider default)
        let provider = match env("NEXUS_TTS_PROVIDER") {
            Some(value) => value.parse()?,
            None => fc.tts.provider.unwrap_or_default(),
        };
        let speed = match env("NEXUS_TTS_SPEED") {
            Some(value) => value.parse()?,
            None => fc.tts.speed.unwrap_or_default(),
        };
        let (default_model, default_voice) = match provider {
            TtsProvider::Gemini => (DEFAULT_TTS_MODEL, DEFAULT_TTS_VOICE),
            TtsProvider::OpenAI => ("tts-1", "alloy"),
        };
        let tts = TtsConfig {
            provider,
            model: fc.tts.model.unwrap_or_else(|| default_model.to_string()),
            voice: env("NEXUS_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| default_voice.to_string()),
            speed,
        };

        let assistant = AssistantConfig {
            model: env("NEXUS_ASSISTANT_MODEL")
                .or(fc.assistant.model)
                .unwrap_or_else(|| assistant::DEFAULT_MODEL.to_string()),
            base_url: fc
                .assistant
                .base_url
                .unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string()),
        };

        Ok(Self {
            api_keys,
            live,
            capture,
            tts,
            assistant,
        })
    }

    /// Gemini API key
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn gemini_key(&self) -> Result<SecretString> {
        self.api_keys
            .gemini
            .clone()
            .map(SecretString::from)
            .ok_or_else(|| {
                Error::Config(
                    "Gemini API key required (set GEMINI_API_KEY or [api_keys] gemini)"
                        .to_string(),
                )
            })
    }

    /// API key for the configured TTS provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's key is not configured
    pub fn tts_key(&self) -> Result<SecretString> {
        match self.tts.provider {
            TtsProvider::Gemini => self.gemini_key(),
            TtsProvider::OpenAI => self
                .api_keys
                .openai
                .clone()
                .map(SecretString::from)
                .ok_or_else(|| {
                    Error::Config("OPENAI_API_KEY required for the openai TTS provider".to_string())
                }),
        }
    }

    /// Connect-time settings for a live session
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.live.model.clone(),
            response_format: self.live.response_format,
            transcription_enabled: self.live.transcription,
            instruction_text: self.live.instruction.clone(),
        }
    }

    /// Retry policy for the initial connect
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.live.connect_retries,
            base_delay: self.live.retry_base_delay,
            ..RetryPolicy::default()
        }
    }

    /// Everything the voice controller needs
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            session: self.session_config(),
            sample_rate: self.capture.sample_rate,
            conversion: self.capture.sample_conversion,
            connect_timeout: self.live.connect_timeout,
            ready_timeout: self.live.ready_timeout,
            retry: self.retry_policy(),
        }
    }
}
