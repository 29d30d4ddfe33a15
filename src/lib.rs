//! Nexus Voice - real-time voice interaction pipeline
//!
//! Captures microphone audio, streams it to a live transcription session,
//! accumulates the transcript, hands finished utterances to an assistant and
//! plays synthesized speech back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────────┐  chunks   ┌──────────────┐
//! │ AudioCapture │──────────▶│ VoiceController  │──────────▶│  Streaming   │
//! └──────────────┘           │  (actor task)    │◀──────────│  Session     │
//!                            └────────┬─────────┘  events   └──────────────┘
//!                                     │ transcript
//!                            ┌────────▼─────────┐
//!                            │    Assistant     │
//!                            └────────┬─────────┘
//!                                     │ reply text
//!                            ┌────────▼─────────┐           ┌──────────────┐
//!                            │   TextToSpeech   │──────────▶│AudioPlayback │
//!                            └──────────────────┘  buffer   └──────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod controller;
pub mod error;
pub mod gemini;
pub mod session;
pub mod voice;

pub use assistant::{AssistantClient, AssistantReply};
pub use config::Config;
pub use controller::{ControllerConfig, TranscriptSubmitter, VoiceController, VoiceEvent};
pub use error::{Error, Result};
pub use session::{
    LiveEndpoint, SessionConfig, SessionState, StreamingSession, WebSocketEndpoint,
};
