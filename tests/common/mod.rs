//! Shared test utilities

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use nexus_voice::session::{LiveConnection, RemotePeer, ResponseFormat, channel};
use nexus_voice::voice::{
    ActiveCapture, CaptureEvent, CaptureHandle, CaptureSource, FrameSender, SampleFrame,
};
use nexus_voice::{
    AssistantReply, ControllerConfig, Error, LiveEndpoint, Result, SessionConfig,
    TranscriptSubmitter, VoiceController, VoiceEvent,
};

/// How long a test waits for any single event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the scripted endpoint does on connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Hand a connection to the controller and its peer to the test
    Accept,
    /// Fail with a connect error
    Refuse,
    /// Never complete
    Hang,
}

/// Live endpoint whose remote side is driven by the test
pub struct ScriptedEndpoint {
    behavior: ConnectBehavior,
    connects: AtomicUsize,
    peers: mpsc::UnboundedSender<RemotePeer>,
}

impl ScriptedEndpoint {
    pub fn new(behavior: ConnectBehavior) -> (Arc<Self>, mpsc::UnboundedReceiver<RemotePeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                behavior,
                connects: AtomicUsize::new(0),
                peers: tx,
            }),
            rx,
        )
    }

    /// Connect attempts so far
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveEndpoint for ScriptedEndpoint {
    async fn connect(&self, _config: &SessionConfig) -> Result<LiveConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ConnectBehavior::Accept => {
                let (connection, peer) = channel();
                let _ = self.peers.send(peer);
                Ok(connection)
            }
            ConnectBehavior::Refuse => Err(Error::Connect("connection refused".to_string())),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Capture source that records handle lifetimes and lets the test push frames
pub struct FakeCapture {
    fail: bool,
    starts: AtomicUsize,
    stops: Arc<AtomicUsize>,
    sender: Arc<Mutex<Option<FrameSender>>>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Self::build(false)
    }

    /// A microphone that is never available
    pub fn failing() -> Arc<Self> {
        Self::build(true)
    }

    fn build(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            starts: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
            sender: Arc::new(Mutex::new(None)),
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Handles started but not yet stopped
    pub fn open_handles(&self) -> usize {
        self.starts() - self.stops()
    }

    /// Deliver a frame as the driver would; false once capture is stopped
    pub fn push(&self, frame: SampleFrame) -> bool {
        self.deliver(CaptureEvent::Frame(frame))
    }

    /// Report a device failure as the driver's error callback would
    pub fn fail_device(&self, reason: &str) -> bool {
        self.deliver(CaptureEvent::Error(Error::Device(reason.to_string())))
    }

    /// Drop the driver's sender without the handle being stopped
    pub fn disconnect(&self) {
        self.sender.lock().unwrap().take();
    }

    fn deliver(&self, event: CaptureEvent) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}

impl CaptureSource for FakeCapture {
    fn start(&self, frames: FrameSender) -> Result<CaptureHandle> {
        if self.fail {
            return Err(Error::Device("permission denied".to_string()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sender.lock().unwrap() = Some(frames);
        Ok(CaptureHandle::new(Box::new(FakeActive {
            stops: Arc::clone(&self.stops),
            sender: Arc::clone(&self.sender),
        })))
    }
}

struct FakeActive {
    stops: Arc<AtomicUsize>,
    sender: Arc<Mutex<Option<FrameSender>>>,
}

impl ActiveCapture for FakeActive {
    fn stop(&mut self) {
        self.sender.lock().unwrap().take();
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Submitter that records every transcript and echoes it back
#[derive(Default)]
pub struct RecordingSubmitter {
    transcripts: Mutex<Vec<String>>,
}

impl RecordingSubmitter {
    pub fn transcripts(&self) -> Vec<String> {
        self.transcripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptSubmitter for RecordingSubmitter {
    async fn submit(&self, transcript: &str) -> Result<AssistantReply> {
        self.transcripts.lock().unwrap().push(transcript.to_string());
        Ok(AssistantReply {
            text: format!("echo: {transcript}"),
            detected_language: "English".to_string(),
        })
    }
}

pub fn session_config() -> SessionConfig {
    SessionConfig {
        model: "test-model".to_string(),
        response_format: ResponseFormat::Audio,
        transcription_enabled: true,
        instruction_text: "Transcribe.".to_string(),
    }
}

/// A controller wired to fakes
pub struct Harness {
    pub controller: VoiceController,
    pub events: mpsc::UnboundedReceiver<VoiceEvent>,
    pub endpoint: Arc<ScriptedEndpoint>,
    pub peers: mpsc::UnboundedReceiver<RemotePeer>,
    pub capture: Arc<FakeCapture>,
    pub submitter: Arc<RecordingSubmitter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(
            ConnectBehavior::Accept,
            FakeCapture::new(),
            ControllerConfig::new(session_config()),
        )
    }

    pub fn with(
        behavior: ConnectBehavior,
        capture: Arc<FakeCapture>,
        config: ControllerConfig,
    ) -> Self {
        let (endpoint, peers) = ScriptedEndpoint::new(behavior);
        let submitter = Arc::new(RecordingSubmitter::default());
        let downstream: Arc<dyn TranscriptSubmitter> = submitter.clone();
        let (controller, events) = VoiceController::spawn(
            endpoint.clone(),
            capture.clone(),
            Some(downstream),
            config,
        );
        Self {
            controller,
            events,
            endpoint,
            peers,
            capture,
            submitter,
        }
    }

    pub async fn next_event(&mut self) -> VoiceEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for controller event")
            .expect("controller event channel closed")
    }

    pub async fn expect(&mut self, expected: VoiceEvent) {
        assert_eq!(self.next_event().await, expected);
    }

    /// Collect events up to and including the first one matching `last`
    pub async fn events_until(&mut self, last: impl Fn(&VoiceEvent) -> bool) -> Vec<VoiceEvent> {
        let mut seen = Vec::new();
        loop {
            let event = self.next_event().await;
            let done = last(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    pub async fn peer(&mut self) -> RemotePeer {
        tokio::time::timeout(EVENT_TIMEOUT, self.peers.recv())
            .await
            .expect("timed out waiting for connect")
            .expect("endpoint dropped")
    }

    /// Start voice input and bring the session to listening
    pub async fn open(&mut self) -> RemotePeer {
        self.controller.start_voice_input();
        self.expect(VoiceEvent::Connecting).await;
        let peer = self.peer().await;
        peer.inbound
            .send(nexus_voice::session::RemoteEvent::Ready)
            .unwrap();
        let event = self.next_event().await;
        assert!(
            matches!(event, VoiceEvent::Listening { .. }),
            "expected Listening, got {event:?}"
        );
        peer
    }
}
