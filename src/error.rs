//! Error types for the Nexus voice pipeline

use thiserror::Error;

/// Result type alias for voice pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone/speaker unavailable, permission denied, or already in use
    #[error("device error: {0}")]
    Device(String),

    /// Remote session failed to open
    #[error("connect error: {0}")]
    Connect(String),

    /// Inbound audio bytes do not form whole PCM frames
    #[error("malformed audio data: {0}")]
    MalformedAudioData(String),

    /// Explicit error reported by the remote service mid-session
    #[error("remote error: {0}")]
    Remote(String),

    /// Session used outside of the state that allows the operation
    #[error("session error: {0}")]
    Session(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Downstream assistant error
    #[error("assistant error: {0}")]
    Assistant(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport decoding error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
