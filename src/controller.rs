//! Voice interaction controller
//!
//! One actor task owns the capture handle, the streaming session and the
//! transcript. Commands, captured frames and remote events all reach it over
//! channels and are handled one at a time, so nothing else ever touches
//! those resources. Every way a turn can end goes through
//! `VoiceActor::finish`, which stops capture before releasing the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::assistant::AssistantReply;
use crate::session::{
    LiveEndpoint, RemoteEvent, RetryPolicy, SessionConfig, SessionState, SessionUpdate,
    StreamingSession, delay_for_attempt, is_retryable,
};
use crate::voice::{
    CaptureEvent, CaptureHandle, CaptureSource, FrameReceiver, FrameSender, SAMPLE_RATE,
    SampleConversion, SampleFrame, encode_frame,
};
use crate::{Error, Result};

/// Downstream consumer of finalized transcripts
#[async_trait]
pub trait TranscriptSubmitter: Send + Sync {
    /// Submit a transcript and wait for the reply
    ///
    /// # Errors
    ///
    /// Returns error if the downstream call fails
    async fn submit(&self, transcript: &str) -> Result<AssistantReply>;
}

/// Progress of voice input, in the order it happens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Opening the live session
    Connecting,
    /// Session open and microphone live
    Listening { session_id: Uuid },
    /// New fragment plus everything accumulated so far
    Transcript { fragment: String, text: String },
    /// Final transcript handed to the submitter
    Submitted { transcript: String },
    /// Submitter answered
    Reply { text: String, language: String },
    /// Submitter failed
    SubmissionFailed { error: String },
    /// Turn ended with nothing but whitespace
    Dropped,
    /// Stopped by the user
    Cancelled,
    /// Device, connect or remote failure
    Failed { error: String },
    /// Every resource released; ready for the next start
    Idle,
}

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub session: SessionConfig,
    /// Rate the capture source records at, stamped on every chunk
    pub sample_rate: u32,
    pub conversion: SampleConversion,
    /// Limit on opening the transport
    pub connect_timeout: Duration,
    /// Limit on the remote acknowledging setup
    pub ready_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ControllerConfig {
    #[must_use]
    pub fn new(session: SessionConfig) -> Self {
        Self {
            session,
            sample_rate: SAMPLE_RATE,
            conversion: SampleConversion::default(),
            connect_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Toggle,
    Shutdown,
}

/// Handle to a running controller
///
/// All methods return immediately; outcomes arrive as [`VoiceEvent`]s.
/// Dropping the handle shuts the controller down.
#[derive(Debug)]
pub struct VoiceController {
    commands: mpsc::UnboundedSender<Command>,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl VoiceController {
    /// Spawn the controller task on the current runtime
    #[must_use]
    pub fn spawn(
        endpoint: Arc<dyn LiveEndpoint>,
        capture: Arc<dyn CaptureSource>,
        submitter: Option<Arc<dyn TranscriptSubmitter>>,
        config: ControllerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<VoiceEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(false));

        let actor = VoiceActor {
            endpoint,
            capture,
            submitter,
            config,
            commands: command_rx,
            events: event_tx,
            active: Arc::clone(&active),
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                commands: command_tx,
                active,
                task,
            },
            event_rx,
        )
    }

    /// Begin a voice-input attempt; ignored while one is active
    pub fn start_voice_input(&self) {
        self.send(Command::Start);
    }

    /// Cancel the current attempt without submitting; no-op when idle
    pub fn stop_voice_input(&self) {
        self.send(Command::Stop);
    }

    /// Stop if active, start otherwise
    pub fn toggle_voice_input(&self) {
        self.send(Command::Toggle);
    }

    /// Whether an attempt is in progress
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Cancel any attempt and wait for the task to exit
    pub async fn shutdown(self) {
        self.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "voice controller task failed");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!(?command, "voice controller already stopped");
        }
    }
}

/// One voice-input attempt
struct Turn {
    session: StreamingSession,
    capture: Option<CaptureHandle>,
    frame_tx: Option<FrameSender>,
    frames: FrameReceiver,
    transcript: String,
    ready_deadline: Instant,
}

enum Input {
    Remote(RemoteEvent),
    Frame(SampleFrame),
    CaptureFailed(Error),
    ReadyTimeout,
}

impl Turn {
    fn new(session: StreamingSession, ready_timeout: Duration) -> Self {
        let (frame_tx, frames) = mpsc::unbounded_channel();
        Self {
            session,
            capture: None,
            frame_tx: Some(frame_tx),
            frames,
            transcript: String::new(),
            ready_deadline: Instant::now() + ready_timeout,
        }
    }

    /// Next remote event or capture event; remote events win ties
    async fn next_input(&mut self) -> Input {
        let awaiting_ready = *self.session.state() == SessionState::Connecting;
        let deadline = self.ready_deadline;
        tokio::select! {
            biased;
            event = self.session.next_event() => Input::Remote(event),
            event = self.frames.recv() => match event {
                Some(CaptureEvent::Frame(frame)) => Input::Frame(frame),
                Some(CaptureEvent::Error(e)) => Input::CaptureFailed(e),
                // Until capture opens the turn holds a sender, so this means the driver is gone
                None => Input::CaptureFailed(Error::Device(
                    "microphone stream ended unexpectedly".to_string(),
                )),
            },
            () = tokio::time::sleep_until(deadline), if awaiting_ready => Input::ReadyTimeout,
        }
    }
}

enum Step {
    Command(Command),
    Input(Input),
}

enum TurnEnd {
    Complete,
    Cancelled,
    Failed(Error),
}

enum Begin {
    Active(Box<Turn>),
    Ended,
    Shutdown,
}

struct VoiceActor {
    endpoint: Arc<dyn LiveEndpoint>,
    capture: Arc<dyn CaptureSource>,
    submitter: Option<Arc<dyn TranscriptSubmitter>>,
    config: ControllerConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    active: Arc<AtomicBool>,
}

impl VoiceActor {
    async fn run(mut self) {
        let mut turn: Option<Box<Turn>> = None;

        loop {
            let step = match turn.as_mut() {
                None => Step::Command(self.commands.recv().await.unwrap_or(Command::Shutdown)),
                Some(active) => tokio::select! {
                    biased;
                    command = self.commands.recv() => {
                        Step::Command(command.unwrap_or(Command::Shutdown))
                    }
                    input = active.next_input() => Step::Input(input),
                },
            };

            match (step, turn.take()) {
                (Step::Input(input), Some(mut active)) => {
                    match self.on_input(&mut active, input).await {
                        Some(end) => self.finish(*active, end).await,
                        None => turn = Some(active),
                    }
                }
                (Step::Input(_), None) => {}
                (Step::Command(Command::Start), Some(active)) => {
                    tracing::debug!("voice input already active, ignoring start");
                    turn = Some(active);
                }
                (Step::Command(Command::Stop | Command::Toggle), Some(active)) => {
                    self.finish(*active, TurnEnd::Cancelled).await;
                }
                (Step::Command(Command::Shutdown), Some(active)) => {
                    self.finish(*active, TurnEnd::Cancelled).await;
                    break;
                }
                (Step::Command(Command::Start | Command::Toggle), None) => {
                    match self.begin().await {
                        Begin::Active(active) => turn = Some(active),
                        Begin::Ended => {}
                        Begin::Shutdown => break,
                    }
                }
                (Step::Command(Command::Stop), None) => {
                    tracing::debug!("no voice input active, ignoring stop");
                }
                (Step::Command(Command::Shutdown), None) => break,
            }
        }

        tracing::debug!("voice controller stopped");
    }

    fn emit(&self, event: VoiceEvent) {
        let _ = self.events.send(event);
    }

    /// Open a session, staying responsive to stop while connecting
    async fn begin(&mut self) -> Begin {
        self.active.store(true, Ordering::Release);
        self.emit(VoiceEvent::Connecting);

        let connect = connect_with_retry(
            Arc::clone(&self.endpoint),
            self.config.session.clone(),
            self.config.connect_timeout,
            self.config.retry.clone(),
        );
        tokio::pin!(connect);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Start) => {
                        tracing::debug!("voice input already connecting, ignoring start");
                    }
                    Some(Command::Stop | Command::Toggle) => {
                        tracing::info!("voice input cancelled while connecting");
                        self.emit(VoiceEvent::Cancelled);
                        self.idle();
                        return Begin::Ended;
                    }
                    Some(Command::Shutdown) | None => {
                        self.emit(VoiceEvent::Cancelled);
                        self.idle();
                        return Begin::Shutdown;
                    }
                },
                result = &mut connect => {
                    return match result {
                        Ok(session) => {
                            tracing::debug!(session_id = %session.id(), "awaiting session ready");
                            Begin::Active(Box::new(Turn::new(session, self.config.ready_timeout)))
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "voice session failed to connect");
                            self.emit(VoiceEvent::Failed { error: e.to_string() });
                            self.idle();
                            Begin::Ended
                        }
                    };
                }
            }
        }
    }

    /// Handle one input; `Some` when the turn is over
    async fn on_input(&self, turn: &mut Turn, input: Input) -> Option<TurnEnd> {
        match input {
            Input::Remote(event) => match turn.session.handle_event(event) {
                SessionUpdate::Opened => self.open_capture(turn).await,
                SessionUpdate::Fragment(fragment) => {
                    turn.transcript.push_str(&fragment);
                    let session_id = turn.session.id();
                    tracing::debug!(%session_id, %fragment, "transcript fragment");
                    self.emit(VoiceEvent::Transcript {
                        fragment,
                        text: turn.transcript.clone(),
                    });
                    None
                }
                SessionUpdate::TurnComplete => Some(TurnEnd::Complete),
                SessionUpdate::Failed(reason) => Some(TurnEnd::Failed(Error::Remote(reason))),
                SessionUpdate::Ignored => None,
            },
            Input::Frame(frame) => {
                let chunk = encode_frame(&frame, self.config.sample_rate, self.config.conversion);
                turn.session.send_chunk(chunk).err().map(TurnEnd::Failed)
            }
            Input::CaptureFailed(e) => Some(TurnEnd::Failed(e)),
            Input::ReadyTimeout => Some(TurnEnd::Failed(Error::Connect(format!(
                "session not ready after {:?}",
                self.config.ready_timeout
            )))),
        }
    }

    async fn open_capture(&self, turn: &mut Turn) -> Option<TurnEnd> {
        let Some(frame_tx) = turn.frame_tx.take() else {
            return None;
        };

        // Opening a device can block on the driver
        let capture = Arc::clone(&self.capture);
        let started = tokio::task::spawn_blocking(move || capture.start(frame_tx))
            .await
            .unwrap_or_else(|e| Err(Error::Device(format!("capture start panicked: {e}"))));

        match started {
            Ok(handle) => {
                turn.capture = Some(handle);
                tracing::info!(session_id = %turn.session.id(), "listening");
                self.emit(VoiceEvent::Listening {
                    session_id: turn.session.id(),
                });
                None
            }
            Err(e) => Some(TurnEnd::Failed(e)),
        }
    }

    /// Release everything the turn holds, microphone first
    async fn finish(&self, mut turn: Turn, end: TurnEnd) {
        if let Some(capture) = turn.capture.take() {
            release_capture(capture).await;
        }
        turn.frame_tx = None;

        let session_id = turn.session.id();
        let chunks = turn.session.chunks_sent();

        match end {
            TurnEnd::Complete => {
                turn.session.close();
                let transcript = std::mem::take(&mut turn.transcript);
                let transcript = transcript.trim();
                if transcript.is_empty() {
                    tracing::info!(%session_id, chunks, "turn complete with empty transcript");
                    self.emit(VoiceEvent::Dropped);
                } else {
                    tracing::info!(%session_id, chunks, "turn complete");
                    tracing::debug!(%session_id, %transcript, "final transcript");
                    self.submit(transcript.to_string());
                }
            }
            TurnEnd::Cancelled => {
                turn.session.cancel();
                turn.transcript.clear();
                tracing::info!(%session_id, chunks, "voice input cancelled");
                self.emit(VoiceEvent::Cancelled);
            }
            TurnEnd::Failed(e) => {
                turn.session.cancel();
                turn.transcript.clear();
                tracing::warn!(%session_id, chunks, error = %e, "voice input failed");
                self.emit(VoiceEvent::Failed {
                    error: e.to_string(),
                });
            }
        }

        self.idle();
    }

    fn idle(&self) {
        self.active.store(false, Ordering::Release);
        self.emit(VoiceEvent::Idle);
    }

    fn submit(&self, transcript: String) {
        self.emit(VoiceEvent::Submitted {
            transcript: transcript.clone(),
        });
        let Some(submitter) = self.submitter.clone() else {
            return;
        };

        let events = self.events.clone();
        tokio::spawn(async move {
            let event = match submitter.submit(&transcript).await {
                Ok(reply) => VoiceEvent::Reply {
                    text: reply.text,
                    language: reply.detected_language,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "transcript submission failed");
                    VoiceEvent::SubmissionFailed {
                        error: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });
    }
}

/// Stop a capture off the async workers; stopping joins the driver thread
async fn release_capture(mut capture: CaptureHandle) {
    if let Err(e) = tokio::task::spawn_blocking(move || capture.stop()).await {
        tracing::warn!(error = %e, "capture stop panicked");
    }
}

/// Open a session, retrying transport failures per `retry`
async fn connect_with_retry(
    endpoint: Arc<dyn LiveEndpoint>,
    config: SessionConfig,
    timeout: Duration,
    retry: RetryPolicy,
) -> Result<StreamingSession> {
    let mut attempt = 0;
    loop {
        let mut session = StreamingSession::new();
        let result =
            match tokio::time::timeout(timeout, session.connect(endpoint.as_ref(), &config)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Connect(format!("connect timed out after {timeout:?}"))),
            };

        match result {
            Ok(()) => return Ok(session),
            Err(e) if attempt < retry.max_retries && is_retryable(&e) => {
                let delay = delay_for_attempt(&retry, attempt);
                tracing::warn!(
                    session_id = %session.id(),
                    attempt = attempt + 1,
                    max_retries = retry.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "connect failed, retrying"
                );
                session.close();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                session.close();
                return Err(e);
            }
        }
    }
}
