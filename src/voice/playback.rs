//! Audio playback to speakers
//!
//! `play` returns as soon as the output stream is running. Each buffer gets
//! its own stream on its own thread, so overlapping calls queue
//! independently and a later call never cancels an earlier one.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};

use super::codec::PlaybackBuffer;
use crate::{Error, Result};

/// Sample rate for playback (matches TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Poll interval while a buffer drains
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Schedules decoded audio for output
pub trait PlaybackSink: Send + Sync {
    /// Start playing `buffer` without waiting for it to finish
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no output device is available
    fn play(&self, buffer: PlaybackBuffer) -> Result<()>;

    /// Interrupt everything currently playing
    fn stop(&self);

    /// Check if any buffer is still playing
    fn is_playing(&self) -> bool;
}

/// Plays audio to the default output device
///
/// Every buffer opens its own output stream at the buffer's sample rate.
#[derive(Debug, Clone)]
pub struct AudioPlayback {
    generation: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        tracing::debug!(device = device.name().unwrap_or_default(), "audio playback initialized");

        Ok(Self {
            generation: Arc::new(AtomicU64::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }
}

impl PlaybackSink for AudioPlayback {
    fn play(&self, buffer: PlaybackBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let generation = Arc::clone(&self.generation);
        let started_in = generation.load(Ordering::Acquire);
        let active = Arc::clone(&self.active);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);

        active.fetch_add(1, Ordering::AcqRel);
        let spawned = std::thread::Builder::new()
            .name("nexus-playback".to_string())
            .spawn(move || {
                let frames = buffer.frame_count();
                let timeout = buffer.duration() + Duration::from_millis(500);
                let finished = Arc::new(AtomicBool::new(false));

                match open_output_stream(&buffer, Arc::clone(&finished)) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let start = Instant::now();
                        let mut interrupted = false;
                        while !finished.load(Ordering::Acquire) && start.elapsed() < timeout {
                            if generation.load(Ordering::Acquire) != started_in {
                                interrupted = true;
                                break;
                            }
                            std::thread::sleep(DRAIN_POLL);
                        }
                        if !interrupted {
                            // Let the device flush its last period
                            std::thread::sleep(Duration::from_millis(100));
                        }
                        drop(stream);
                        tracing::debug!(frames, interrupted, "playback complete");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
                active.fetch_sub(1, Ordering::AcqRel);
            });

        if let Err(e) = spawned {
            self.active.fetch_sub(1, Ordering::AcqRel);
            return Err(e.into());
        }

        ready_rx
            .recv()
            .map_err(|_| Error::Device("playback thread exited during startup".to_string()))?
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("playback interrupted");
    }

    fn is_playing(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }
}

/// Pick an f32 output config running at `sample_rate`, mono first, then stereo
fn choose_output_config(
    supported: &[SupportedStreamConfigRange],
    sample_rate: u32,
) -> Option<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports_rate = |c: &SupportedStreamConfigRange| {
        c.sample_format() == SampleFormat::F32
            && c.min_sample_rate() <= rate
            && c.max_sample_rate() >= rate
    };

    [1, 2].into_iter().find_map(|channels| {
        supported
            .iter()
            .find(|c| c.channels() == channels && supports_rate(c))
            .map(|c| c.clone().with_sample_rate(rate).config())
    })
}

fn open_output_stream(buffer: &PlaybackBuffer, finished: Arc<AtomicBool>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Device("no output device".to_string()))?;

    let supported: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .collect();
    let sample_rate = buffer.sample_rate();
    let config = choose_output_config(&supported, sample_rate)
        .ok_or_else(|| Error::Device(format!("no output config supports {sample_rate} Hz")))?;

    let channels = usize::from(config.channels);
    let samples = buffer.interleaved(channels);
    let mut position = 0usize;

    tracing::debug!(sample_rate, channels, "opening output stream");

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let end = (position + data.len()).min(samples.len());
                let available = end - position;
                data[..available].copy_from_slice(&samples[position..end]);
                data[available..].fill(0.0);
                position = end;
                if position >= samples.len() {
                    finished.store(true, Ordering::Release);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;
    Ok(stream)
}

/// Decode MP3 bytes into a playback buffer
///
/// # Errors
///
/// Returns `MalformedAudioData` if the stream cannot be decoded or changes
/// layout midway
pub fn decode_mp3(mp3_data: &[u8]) -> Result<PlaybackBuffer> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut layout: Option<(u32, usize)> = None;
    let mut channels: Vec<Vec<f32>> = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let rate = u32::try_from(frame.sample_rate).map_err(|_| {
                    Error::MalformedAudioData(format!("bad MP3 sample rate {}", frame.sample_rate))
                })?;
                let count = frame.channels.max(1);
                match layout {
                    None => {
                        layout = Some((rate, count));
                        channels = vec![Vec::new(); count];
                    }
                    Some(existing) if existing != (rate, count) => {
                        return Err(Error::MalformedAudioData(
                            "MP3 stream changes layout midway".to_string(),
                        ));
                    }
                    Some(_) => {}
                }

                for (i, &sample) in frame.data.iter().enumerate() {
                    channels[i % count].push(f32::from(sample) / 32768.0);
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::MalformedAudioData(format!("MP3 decode error: {e}"))),
        }
    }

    match layout {
        Some((rate, _)) => PlaybackBuffer::new(rate, channels),
        None => Ok(PlaybackBuffer::mono(PLAYBACK_SAMPLE_RATE, Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use cpal::SupportedBufferSize;

    use super::*;

    fn range(channels: u16, min: u32, max: u32) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            SampleFormat::F32,
        )
    }

    #[test]
    fn test_output_config_follows_buffer_rate() {
        let supported = [range(2, 44100, 48000), range(1, 16000, 24000)];

        let config = choose_output_config(&supported, PLAYBACK_SAMPLE_RATE).unwrap();
        assert_eq!(config.sample_rate, SampleRate(PLAYBACK_SAMPLE_RATE));
        assert_eq!(config.channels, 1);

        // Only the stereo range reaches 48 kHz
        let config = choose_output_config(&supported, 48000).unwrap();
        assert_eq!(config.sample_rate, SampleRate(48000));
        assert_eq!(config.channels, 2);
    }

    #[test]
    fn test_output_config_rejects_unsupported_rate() {
        let supported = [range(1, 16000, 24000)];
        assert!(choose_output_config(&supported, 96000).is_none());
    }

    #[test]
    fn test_output_config_skips_non_float_formats() {
        let supported = [SupportedStreamConfigRange::new(
            1,
            SampleRate(8000),
            SampleRate(48000),
            SupportedBufferSize::Unknown,
            SampleFormat::I16,
        )];
        assert!(choose_output_config(&supported, 24000).is_none());
    }

    #[test]
    fn test_decode_mp3_empty_input_is_silent() {
        let buffer = decode_mp3(&[]).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(buffer.sample_rate(), PLAYBACK_SAMPLE_RATE);
    }

    #[test]
    fn test_decode_mp3_garbage_yields_no_audio_or_error() {
        // minimp3 skips bytes that never sync to a frame header
        match decode_mp3(&[0x13; 512]) {
            Ok(buffer) => assert!(buffer.is_empty()),
            Err(e) => assert!(matches!(e, Error::MalformedAudioData(_))),
        }
    }
}
