//! Audio capture from microphone
//!
//! The cpal input callback runs on the driver's audio thread. Frames leave
//! it through an unbounded channel so the consumer sees them in capture
//! order and never runs encode/send work inside the callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use tokio::sync::mpsc;

use super::codec::{SampleConversion, SampleFrame};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per emitted frame
pub const FRAME_SIZE: usize = 4096;

/// Set while any process-local microphone stream is open
static MICROPHONE_IN_USE: AtomicBool = AtomicBool::new(false);

/// What a running capture delivers to its consumer
#[derive(Debug)]
pub enum CaptureEvent {
    /// Next frame in capture order
    Frame(SampleFrame),
    /// The device failed; no further frames follow
    Error(Error),
}

/// Sending half of the frame channel handed to a capture source
pub type FrameSender = mpsc::UnboundedSender<CaptureEvent>;

/// Receiving half of the frame channel
pub type FrameReceiver = mpsc::UnboundedReceiver<CaptureEvent>;

/// A microphone that produces fixed-size frames until stopped
pub trait CaptureSource: Send + Sync {
    /// Open the device and start delivering frames to `frames`
    ///
    /// A device failure after a successful start arrives on `frames` as
    /// [`CaptureEvent::Error`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device is unavailable, permission is
    /// denied, or a capture is already active
    fn start(&self, frames: FrameSender) -> Result<CaptureHandle>;
}

/// Backend half of a running capture
pub trait ActiveCapture: Send {
    /// Release the device; no frame may be delivered once this returns
    fn stop(&mut self);
}

/// Owned handle to a running capture, stopped on drop
pub struct CaptureHandle {
    inner: Option<Box<dyn ActiveCapture>>,
}

impl CaptureHandle {
    /// Wrap a running backend capture
    #[must_use]
    pub fn new(active: Box<dyn ActiveCapture>) -> Self {
        Self {
            inner: Some(active),
        }
    }

    /// Stop capturing. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut active) = self.inner.take() {
            active.stop();
            tracing::debug!("audio capture stopped");
        }
    }

    /// Check if the handle still owns a running capture
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.inner.is_some()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Cuts an arbitrary stream of driver buffers into fixed-size frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
            next_sequence: 0,
        }
    }

    /// Append driver samples, emitting every completed frame in order
    pub fn push(&mut self, mut data: &[f32], mut emit: impl FnMut(SampleFrame)) {
        while !data.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.pending.len() == self.frame_size {
                let samples =
                    std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(SampleFrame {
                    sequence: self.next_sequence,
                    samples,
                });
                self.next_sequence += 1;
            }
        }
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Exclusive claim on the microphone, released on drop
struct MicrophoneLease;

impl MicrophoneLease {
    fn acquire() -> Result<Self> {
        MICROPHONE_IN_USE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self)
            .map_err(|_| Error::Device("microphone already in use".to_string()))
    }
}

impl Drop for MicrophoneLease {
    fn drop(&mut self) {
        MICROPHONE_IN_USE.store(false, Ordering::Release);
    }
}

/// Captures audio from the default input device via cpal
#[derive(Debug, Clone)]
pub struct AudioCapture {
    sample_rate: u32,
    frame_size: usize,
}

impl Default for AudioCapture {
    fn default() -> Self {
        Self::new(SAMPLE_RATE, FRAME_SIZE)
    }
}

impl AudioCapture {
    /// Create a capture source; the device is opened on `start`
    #[must_use]
    pub const fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            frame_size,
        }
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl CaptureSource for AudioCapture {
    fn start(&self, frames: FrameSender) -> Result<CaptureHandle> {
        let lease = MicrophoneLease::acquire()?;
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let sample_rate = self.sample_rate;
        let frame_size = self.frame_size;
        let callback_running = Arc::clone(&running);

        // cpal streams aren't Send, so the stream lives and dies on its own thread
        let thread = std::thread::Builder::new()
            .name("nexus-capture".to_string())
            .spawn(move || {
                let _lease = lease;
                let stream = match open_input_stream(
                    sample_rate,
                    frame_size,
                    callback_running,
                    frames,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until the handle sends or is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(sample_rate, frame_size, "audio capture started");
                Ok(CaptureHandle::new(Box::new(CpalCapture {
                    running,
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                })))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::Device("capture thread exited during startup".to_string()))
            }
        }
    }
}

/// Running cpal stream owned by the capture thread
struct CpalCapture {
    running: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveCapture for CpalCapture {
    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        // Joining waits for the stream drop, after which the driver cannot call back
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("capture thread panicked");
        }
    }
}

fn open_input_stream(
    sample_rate: u32,
    frame_size: usize,
    running: Arc<AtomicBool>,
    frames: FrameSender,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Device("no input device available".to_string()))?;

    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.sample_format() == SampleFormat::F32
            && c.min_sample_rate() <= SampleRate(sample_rate)
            && c.max_sample_rate() >= SampleRate(sample_rate)
    };

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .find(|c| c.channels() == 1 && supports_rate(c))
        .or_else(|| {
            // Fallback: any channel count, mixed down below
            device
                .supported_input_configs()
                .ok()?
                .find(|c| supports_rate(c))
        })
        .ok_or_else(|| Error::Device("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio capture initialized"
    );

    let mut assembler = FrameAssembler::new(frame_size);
    let mut mono: Vec<f32> = Vec::new();
    let errors = frames.clone();
    let error_running = Arc::clone(&running);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Acquire) {
                    return;
                }
                let samples = if channels == 1 {
                    data
                } else {
                    downmix(data, channels, &mut mono);
                    mono.as_slice()
                };
                assembler.push(samples, |frame| {
                    if frames.send(CaptureEvent::Frame(frame)).is_err() {
                        tracing::trace!("frame receiver gone, dropping frame");
                    }
                });
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                if error_running.load(Ordering::Acquire) {
                    let _ = errors.send(CaptureEvent::Error(Error::Device(err.to_string())));
                }
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;
    Ok(stream)
}

/// Average interleaved channels into `out`
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}

/// Convert f32 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Device(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(SampleConversion::Clamp.to_pcm(sample))
                .map_err(|e| Error::Device(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Device(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
