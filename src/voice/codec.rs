//! PCM codec
//!
//! Converts between floating-point samples, 16-bit little-endian PCM and the
//! base64 transport encoding used by the live and TTS endpoints. Everything
//! here is pure: no I/O and no shared state.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Scale between normalized float samples and 16-bit PCM
const PCM_SCALE: f32 = 32768.0;

/// Bytes per 16-bit sample
const BYTES_PER_SAMPLE: usize = 2;

/// How out-of-range samples are converted to 16-bit integers
///
/// Both modes truncate toward zero; they differ only for samples whose
/// scaled value falls outside the i16 range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleConversion {
    /// Saturate at `i16::MIN`/`i16::MAX`
    #[default]
    Clamp,
    /// Wrap modulo 2^16, so a clipped `1.0` becomes `-32768`
    Wrap,
}

impl SampleConversion {
    /// Convert one normalized sample to a PCM value
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_pcm(self, sample: f32) -> i16 {
        let scaled = sample * PCM_SCALE;
        match self {
            Self::Clamp => scaled as i16,
            Self::Wrap => scaled as i32 as i16,
        }
    }
}

/// One capture callback worth of mono samples
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrame {
    /// Capture order, starting at zero for each capture
    pub sequence: u64,
    /// Normalized samples in [-1, 1]
    pub samples: Vec<f32>,
}

/// A sample frame converted to PCM and transport-encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    sequence: u64,
    sample_rate: u32,
    data: String,
}

impl EncodedChunk {
    /// Capture order of the frame this chunk was produced from
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sample rate of the encoded audio
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Base64 payload
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// MIME type announced to the remote service
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Consume the chunk, returning the base64 payload
    #[must_use]
    pub fn into_data(self) -> String {
        self.data
    }
}

/// Decoded multi-channel audio ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl PlaybackBuffer {
    /// Build a buffer from per-channel sample vectors
    ///
    /// # Errors
    ///
    /// Returns error if there are no channels or channel lengths differ
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self> {
        let Some(first) = channels.first() else {
            return Err(Error::MalformedAudioData(
                "playback buffer needs at least one channel".to_string(),
            ));
        };
        let frames = first.len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(Error::MalformedAudioData(
                "channel lengths differ".to_string(),
            ));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Build a single-channel buffer
    #[must_use]
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }

    /// Samples of one channel
    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Playback length
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.frame_count() as u64;
        Duration::from_micros(frames * 1_000_000 / u64::from(self.sample_rate))
    }

    /// Interleave for a device with `output_channels` channels
    ///
    /// Device channels beyond the buffer's repeat the buffer's last channel,
    /// so mono speech fills both sides of a stereo device.
    #[must_use]
    pub fn interleaved(&self, output_channels: usize) -> Vec<f32> {
        let output_channels = output_channels.max(1);
        let last = self.channels.len().saturating_sub(1);
        let mut out = Vec::with_capacity(self.frame_count() * output_channels);
        for frame in 0..self.frame_count() {
            for ch in 0..output_channels {
                out.push(self.channels[ch.min(last)][frame]);
            }
        }
        out
    }
}

/// Convert normalized samples to 16-bit little-endian PCM
#[must_use]
pub fn samples_to_pcm16(samples: &[f32], conversion: SampleConversion) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        bytes.extend_from_slice(&conversion.to_pcm(sample).to_le_bytes());
    }
    bytes
}

/// Encode one mono frame for transmission
#[must_use]
pub fn encode_frame(
    frame: &SampleFrame,
    sample_rate: u32,
    conversion: SampleConversion,
) -> EncodedChunk {
    let pcm = samples_to_pcm16(&frame.samples, conversion);
    EncodedChunk {
        sequence: frame.sequence,
        sample_rate,
        data: STANDARD.encode(pcm),
    }
}

/// Encode equally sized channels as interleaved PCM
///
/// # Errors
///
/// Returns error if channel lengths differ
pub fn encode_channels(
    channels: &[Vec<f32>],
    sample_rate: u32,
    conversion: SampleConversion,
) -> Result<EncodedChunk> {
    let buffer = PlaybackBuffer::new(sample_rate, channels.to_vec())?;
    let interleaved = buffer.interleaved(buffer.channel_count());
    Ok(EncodedChunk {
        sequence: 0,
        sample_rate,
        data: STANDARD.encode(samples_to_pcm16(&interleaved, conversion)),
    })
}

/// Transport-decode and de-interleave a PCM payload
///
/// # Errors
///
/// Returns `MalformedAudioData` if the payload is not valid base64 or its
/// byte length is not a multiple of `2 * channel_count`
pub fn decode_chunk(
    encoded: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<PlaybackBuffer> {
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| Error::MalformedAudioData(format!("invalid transport encoding: {e}")))?;
    decode_pcm(&raw, sample_rate, channel_count)
}

/// De-interleave raw 16-bit little-endian PCM
///
/// # Errors
///
/// Returns `MalformedAudioData` if `channel_count` is zero or the byte length
/// is not a multiple of `2 * channel_count`
pub fn decode_pcm(bytes: &[u8], sample_rate: u32, channel_count: u16) -> Result<PlaybackBuffer> {
    let channels = usize::from(channel_count);
    if channels == 0 {
        return Err(Error::MalformedAudioData(
            "channel count must be at least 1".to_string(),
        ));
    }

    let frame_bytes = BYTES_PER_SAMPLE * channels;
    if bytes.len() % frame_bytes != 0 {
        return Err(Error::MalformedAudioData(format!(
            "{} bytes is not a multiple of {frame_bytes}",
            bytes.len()
        )));
    }

    let frame_count = bytes.len() / frame_bytes;
    let mut out: Vec<Vec<f32>> = (0..channels)
        .map(|_| Vec::with_capacity(frame_count))
        .collect();

    for (i, pair) in bytes.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels].push(f32::from(value) / PCM_SCALE);
    }

    Ok(PlaybackBuffer {
        sample_rate,
        channels: out,
    })
}
