//! Multilingual assistant that answers finalized transcripts
//!
//! The model is asked to detect the prompt's language and reply in it, with
//! JSON output constrained to `{detectedLanguage, text}`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::controller::TranscriptSubmitter;
use crate::gemini::{self, GenerateContentResponse, RequestContent};
use crate::{Error, Result};

/// Default assistant model
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

const PROMPT_PREAMBLE: &str = "You are a highly capable multilingual cybersecurity assistant.
1. Detect the language of the user's prompt (e.g., English, Telugu, Hindi, French, Japanese, etc.).
2. Respond to the prompt fluently in that exact same language.

Return your answer as a JSON object with:
- \"detectedLanguage\": The name of the language you identified.
- \"text\": Your helpful and professional response text in that language.

User Prompt: ";

/// Reply to a submitted transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantReply {
    pub text: String,
    pub detected_language: String,
}

/// Client for the assistant model
pub struct AssistantClient {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for AssistantClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AssistantClient {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, model: String, base_url: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("API key required for assistant".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        })
    }

    /// Ask the assistant
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply is not the expected JSON
    pub async fn ask(&self, prompt: &str) -> Result<AssistantReply> {
        tracing::debug!(model = %self.model, chars = prompt.len(), "asking assistant");

        let response = self
            .client
            .post(gemini::generate_content_url(&self.base_url, &self.model))
            .header(gemini::API_KEY_HEADER, self.api_key.expose_secret())
            .json(&request_body(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Assistant(format!("assistant error {status}: {body}")));
        }

        let body: GenerateContentResponse = response.json().await?;
        let reply = parse_reply(&body)?;
        tracing::debug!(language = %reply.detected_language, "assistant replied");
        Ok(reply)
    }
}

#[async_trait]
impl TranscriptSubmitter for AssistantClient {
    async fn submit(&self, transcript: &str) -> Result<AssistantReply> {
        self.ask(transcript).await
    }
}

/// Build the JSON-mode request body
#[must_use]
pub fn request_body(prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "contents": [RequestContent::text(format!("{PROMPT_PREAMBLE}{prompt}"))],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "detectedLanguage": { "type": "STRING" },
                    "text": { "type": "STRING" }
                },
                "required": ["detectedLanguage", "text"]
            }
        }
    })
}

/// Extract the structured reply from a response
///
/// # Errors
///
/// Returns `Error::Assistant` if the response has no text, or a
/// serialization error if the text is not the expected JSON
pub fn parse_reply(response: &GenerateContentResponse) -> Result<AssistantReply> {
    let text = response
        .first_text()
        .ok_or_else(|| Error::Assistant("empty assistant response".to_string()))?;
    Ok(serde_json::from_str(text)?)
}
