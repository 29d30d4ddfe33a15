//! Shared `generateContent` wire types
//!
//! Only the fields the voice pipeline reads are modelled; unknown fields are
//! ignored.

use serde::{Deserialize, Serialize};

/// Default REST base URL
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Build the `generateContent` URL for a model
#[must_use]
pub fn generate_content_url(base_url: &str, model: &str) -> String {
    format!(
        "{}/v1beta/models/{model}:generateContent",
        base_url.trim_end_matches('/')
    )
}

/// Text part of a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextPart {
    pub text: String,
}

/// Request content block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestContent {
    pub parts: Vec<TextPart>,
}

impl RequestContent {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

/// Response from `generateContent`
#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

impl GenerateContentResponse {
    /// First part of the first candidate
    fn first_part(&self) -> Option<&ResponsePart> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .first()
    }

    /// Text of the first part, if any
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.first_part()?.text.as_deref()
    }

    /// Base64 inline data of the first part, if any
    #[must_use]
    pub fn first_inline_data(&self) -> Option<&InlineData> {
        self.first_part()?.inline_data.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_content_url() {
        assert_eq!(
            generate_content_url("https://example.test/", "gemini-3-flash-preview"),
            "https://example.test/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }

    #[test]
    fn test_parse_inline_audio() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"audio/L16;codec=pcm;rate=24000","data":"AAA="}}]}}]}"#;
        let response: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let inline = response.first_inline_data().unwrap();
        assert_eq!(inline.data, "AAA=");
        assert!(response.first_text().is_none());
    }

    #[test]
    fn test_parse_empty_response() {
        let response: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(response.first_text().is_none());
        assert!(response.first_inline_data().is_none());
    }
}
