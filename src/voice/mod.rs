//! Voice processing module
//!
//! Handles microphone capture, PCM encoding, speech synthesis and playback.
//! The live transcription session lives in [`crate::session`].

mod capture;
mod codec;
mod playback;
mod tts;

pub use capture::{
    ActiveCapture, AudioCapture, CaptureEvent, CaptureHandle, CaptureSource, FRAME_SIZE,
    FrameAssembler, FrameReceiver, FrameSender, SAMPLE_RATE, samples_to_wav,
};
pub use codec::{
    EncodedChunk, PlaybackBuffer, SampleConversion, SampleFrame, decode_chunk, decode_pcm,
    encode_channels, encode_frame, samples_to_pcm16,
};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, PlaybackSink, decode_mp3};
pub use tts::{
    SpeechRate, SpeechRequest, TextToSpeech, TtsProvider, VOICES, decode_gemini_audio,
    gemini_speech_body,
};
