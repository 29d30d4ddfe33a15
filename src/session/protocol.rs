//! Live endpoint wire format
//!
//! Client messages are JSON objects keyed by `setup` or `realtimeInput`.
//! Server messages carry any of `setupComplete`, `serverContent` or `error`.

use serde::{Deserialize, Serialize};

use crate::voice::EncodedChunk;
use crate::Result;

/// What the remote model answers with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Audio,
    Text,
}

impl ResponseFormat {
    const fn modality(self) -> &'static str {
        match self {
            Self::Audio => "AUDIO",
            Self::Text => "TEXT",
        }
    }
}

/// Connect-time configuration of a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub model: String,
    pub response_format: ResponseFormat,
    pub transcription_enabled: bool,
    pub instruction_text: String,
}

/// One outbound media chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub data: String,
    pub mime_type: String,
}

impl From<EncodedChunk> for MediaChunk {
    fn from(chunk: EncodedChunk) -> Self {
        let mime_type = chunk.mime_type();
        Self {
            data: chunk.into_data(),
            mime_type,
        }
    }
}

/// Event delivered by the remote side of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Setup acknowledged; audio may flow
    Ready,
    /// Partial transcript text to append
    TranscriptFragment(String),
    /// The utterance is finished
    TurnComplete,
    /// Explicit error from the service or the transport
    Error(String),
    /// The remote channel went away
    Closed { reason: Option<String> },
}

/// Serialize the `setup` message
///
/// # Errors
///
/// Returns error if serialization fails
pub fn setup_message(config: &SessionConfig) -> Result<String> {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    let mut setup = serde_json::json!({
        "model": model,
        "generationConfig": {
            "responseModalities": [config.response_format.modality()]
        }
    });
    if config.transcription_enabled {
        setup["inputAudioTranscription"] = serde_json::json!({});
    }
    if !config.instruction_text.is_empty() {
        setup["systemInstruction"] = serde_json::json!({
            "parts": [{ "text": config.instruction_text }]
        });
    }

    Ok(serde_json::to_string(&serde_json::json!({ "setup": setup }))?)
}

/// Serialize a `realtimeInput` message carrying one chunk
///
/// # Errors
///
/// Returns error if serialization fails
pub fn realtime_input_message(chunk: &MediaChunk) -> Result<String> {
    Ok(serde_json::to_string(&serde_json::json!({
        "realtimeInput": { "mediaChunks": [chunk] }
    }))?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    input_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

/// Parse one server message into events, in the order they must be applied
///
/// A message may carry a fragment and the turn-complete flag together; the
/// fragment comes first.
///
/// # Errors
///
/// Returns error if the payload is not JSON
pub fn parse_server_message(payload: &[u8]) -> Result<Vec<RemoteEvent>> {
    let message: ServerMessage = serde_json::from_slice(payload)?;
    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(RemoteEvent::Ready);
    }
    if let Some(content) = message.server_content {
        if let Some(transcription) = content.input_transcription
            && !transcription.text.is_empty()
        {
            events.push(RemoteEvent::TranscriptFragment(transcription.text));
        }
        if content.turn_complete {
            events.push(RemoteEvent::TurnComplete);
        }
    }
    if let Some(error) = message.error {
        events.push(RemoteEvent::Error(error_message(&error)));
    }
    if message.go_away.is_some() {
        tracing::debug!("remote announced disconnect");
    }

    Ok(events)
}

fn error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| error.to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            response_format: ResponseFormat::Audio,
            transcription_enabled: true,
            instruction_text: "Transcribe.".to_string(),
        }
    }

    #[test]
    fn test_setup_message_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&setup_message(&config()).unwrap()).unwrap();
        let setup = &json["setup"];
        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-12-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert!(setup["inputAudioTranscription"].is_object());
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Transcribe.");
    }

    #[test]
    fn test_setup_message_without_transcription_or_instruction() {
        let mut config = config();
        config.transcription_enabled = false;
        config.instruction_text.clear();
        config.response_format = ResponseFormat::Text;
        config.model = "models/custom".to_string();

        let json: serde_json::Value =
            serde_json::from_str(&setup_message(&config).unwrap()).unwrap();
        assert!(json["setup"].get("inputAudioTranscription").is_none());
        assert!(json["setup"].get("systemInstruction").is_none());
        assert_eq!(json["setup"]["model"], "models/custom");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "TEXT");
    }

    #[test]
    fn test_realtime_input_message() {
        let chunk = MediaChunk {
            data: "AAA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&realtime_input_message(&chunk).unwrap()).unwrap();
        let media = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(media["data"], "AAA=");
        assert_eq!(media["mimeType"], "audio/pcm;rate=16000");
    }

    #[test]
    fn test_parse_setup_complete() {
        let events = parse_server_message(br#"{"setupComplete":{}}"#).unwrap();
        assert_eq!(events, vec![RemoteEvent::Ready]);
    }

    #[test]
    fn test_parse_fragment_then_turn_complete() {
        let events = parse_server_message(
            br#"{"serverContent":{"inputTranscription":{"text":"how do I"},"turnComplete":true}}"#,
        )
        .unwrap();
        assert_eq!(
            events,
            vec![
                RemoteEvent::TranscriptFragment("how do I".to_string()),
                RemoteEvent::TurnComplete
            ]
        );
    }

    #[test]
    fn test_parse_ignores_model_output() {
        let events = parse_server_message(
            br#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"AAA="}}]}}}"#,
        )
        .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_parse_error_payload() {
        let events =
            parse_server_message(br#"{"error":{"code":429,"message":"quota exceeded"}}"#).unwrap();
        assert_eq!(events, vec![RemoteEvent::Error("quota exceeded".to_string())]);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_server_message(b"not json").is_err());
    }

    #[test]
    fn test_media_chunk_from_encoded() {
        use crate::voice::{SampleConversion, SampleFrame, encode_frame};

        let frame = SampleFrame {
            sequence: 3,
            samples: vec![0.0; 4],
        };
        let chunk: MediaChunk = encode_frame(&frame, 16000, SampleConversion::Clamp).into();
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(chunk.data, "AAAAAAAAAAA=");
    }
}
