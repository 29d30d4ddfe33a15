//! Text-to-speech (TTS) processing

use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::codec::{PlaybackBuffer, decode_chunk};
use super::playback::{PLAYBACK_SAMPLE_RATE, PlaybackSink, decode_mp3};
use crate::gemini::{self, GenerateContentResponse, RequestContent};
use crate::{Error, Result};

/// Prebuilt voices offered by the Gemini TTS model
pub const VOICES: &[&str] = &["Kore", "Puck", "Charon", "Fenrir", "Zephyr"];

/// Speaking pace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechRate {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl SpeechRate {
    /// Instruction prepended to the text for prompt-steered models
    #[must_use]
    pub const fn prompt_prefix(self) -> &'static str {
        match self {
            Self::Slow => "Speak slowly: ",
            Self::Normal => "",
            Self::Fast => "Speak quickly: ",
        }
    }

    /// Speed multiplier for APIs with a numeric speed parameter
    #[must_use]
    pub const fn multiplier(self) -> f32 {
        match self {
            Self::Slow => 0.75,
            Self::Normal => 1.0,
            Self::Fast => 1.25,
        }
    }
}

impl FromStr for SpeechRate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "slow" => Ok(Self::Slow),
            "normal" => Ok(Self::Normal),
            "fast" => Ok(Self::Fast),
            other => Err(Error::Config(format!("unknown speech rate: {other}"))),
        }
    }
}

/// TTS provider backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    /// Gemini `generateContent` with audio modality, returns 24kHz PCM
    #[default]
    Gemini,
    /// `OpenAI` compatible `/v1/audio/speech`, returns MP3
    OpenAI,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// One synthesis request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: String,
    pub speed: SpeechRate,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    provider: TtsProvider,
}

impl std::fmt::Debug for TextToSpeech {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextToSpeech")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

impl TextToSpeech {
    /// Create a new TTS instance using Gemini
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_gemini(api_key: SecretString, model: String) -> Result<Self> {
        Self::new(api_key, model, gemini::DEFAULT_BASE_URL.to_string(), TtsProvider::Gemini)
    }

    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: SecretString, model: String) -> Result<Self> {
        Self::new(
            api_key,
            model,
            "https://api.openai.com".to_string(),
            TtsProvider::OpenAI,
        )
    }

    /// Create a TTS instance against an explicit base URL
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        api_key: SecretString,
        model: String,
        base_url: String,
        provider: TtsProvider,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!(
                "{provider:?} API key required for TTS"
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
            provider,
        })
    }

    /// Synthesize text to a playback buffer
    ///
    /// Returns `None` when the service answers without audio.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the audio cannot be decoded
    pub async fn synthesize(&self, request: &SpeechRequest) -> Result<Option<PlaybackBuffer>> {
        tracing::debug!(
            provider = ?self.provider,
            voice = %request.voice_id,
            speed = ?request.speed,
            chars = request.text.len(),
            "synthesizing speech"
        );
        match self.provider {
            TtsProvider::Gemini => self.synthesize_gemini(request).await,
            TtsProvider::OpenAI => self.synthesize_openai(request).await,
        }
    }

    /// Synthesize and hand the result to `sink`
    ///
    /// Undecodable audio is logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    pub async fn speak(&self, request: &SpeechRequest, sink: &dyn PlaybackSink) -> Result<()> {
        match self.synthesize(request).await {
            Ok(Some(buffer)) => sink.play(buffer),
            Ok(None) => {
                tracing::warn!("TTS response carried no audio");
                Ok(())
            }
            Err(Error::MalformedAudioData(reason)) => {
                tracing::warn!(%reason, "dropping undecodable TTS audio");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Synthesize using Gemini TTS
    async fn synthesize_gemini(&self, request: &SpeechRequest) -> Result<Option<PlaybackBuffer>> {
        let response = self
            .client
            .post(gemini::generate_content_url(&self.base_url, &self.model))
            .header(gemini::API_KEY_HEADER, self.api_key.expose_secret())
            .json(&gemini_speech_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("Gemini TTS error {status}: {body}")));
        }

        let body: GenerateContentResponse = response.json().await?;
        decode_gemini_audio(&body)
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, request: &SpeechRequest) -> Result<Option<PlaybackBuffer>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let body = TtsRequest {
            model: &self.model,
            input: &request.text,
            voice: &request.voice_id,
            speed: request.speed.multiplier(),
        };

        let response = self
            .client
            .post(format!(
                "{}/v1/audio/speech",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Ok(None);
        }
        decode_mp3(&audio).map(Some)
    }
}

/// Build the Gemini request body for a speech request
#[must_use]
pub fn gemini_speech_body(request: &SpeechRequest) -> serde_json::Value {
    let prompt = format!("{}{}", request.speed.prompt_prefix(), request.text);
    serde_json::json!({
        "contents": [RequestContent::text(prompt)],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "speechConfig": {
                "voiceConfig": {
                    "prebuiltVoiceConfig": { "voiceName": request.voice_id }
                }
            }
        }
    })
}

/// Decode the 24kHz mono PCM a Gemini TTS response carries
///
/// # Errors
///
/// Returns `MalformedAudioData` if the inline payload is not whole frames
pub fn decode_gemini_audio(response: &GenerateContentResponse) -> Result<Option<PlaybackBuffer>> {
    let Some(inline) = response.first_inline_data() else {
        return Ok(None);
    };
    decode_chunk(inline.data.as_bytes(), PLAYBACK_SAMPLE_RATE, 1).map(Some)
}
