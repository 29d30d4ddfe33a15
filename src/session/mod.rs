//! Streaming transcription sessions
//!
//! A session owns one connection to the live endpoint for one utterance.
//! Audio goes out only while [`SessionState::Open`]; every state change
//! goes through [`SessionState::apply`].

mod protocol;
mod retry;
mod state;
mod transport;

pub use protocol::{
    MediaChunk, RemoteEvent, ResponseFormat, SessionConfig, parse_server_message,
    realtime_input_message, setup_message,
};
pub use retry::{RetryPolicy, delay_for_attempt, is_retryable};
pub use state::{SessionState, Transition};
pub use transport::{
    DEFAULT_LIVE_URL, LiveConnection, LiveEndpoint, Outbound, RemotePeer, WebSocketEndpoint,
    channel,
};

use uuid::Uuid;

use crate::voice::EncodedChunk;
use crate::{Error, Result};

/// What the controller must do after a remote event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Ready acknowledged; start capturing
    Opened,
    /// Append to the transcript
    Fragment(String),
    /// Utterance finished; the session is now closing
    TurnComplete,
    /// Session failed with the given reason
    Failed(String),
    /// Event had no effect in the current state
    Ignored,
}

/// One streaming transcription session
#[derive(Debug)]
pub struct StreamingSession {
    id: Uuid,
    state: SessionState,
    connection: Option<LiveConnection>,
    chunks_sent: u64,
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            connection: None,
            chunks_sent: 0,
        }
    }

    /// Identifier attached to every log line of this session
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Chunks accepted by `send_chunk` so far
    #[must_use]
    pub const fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    fn transition(&mut self, transition: Transition) -> Result<()> {
        let next = self.state.apply(&transition)?;
        tracing::debug!(
            session_id = %self.id,
            from = %self.state,
            to = %next,
            "session transition"
        );
        self.state = next;
        Ok(())
    }

    /// Open the remote channel and send the setup request
    ///
    /// The session stays `Connecting` until the remote acknowledges with
    /// [`RemoteEvent::Ready`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the session was already used, or the
    /// endpoint's error if the channel cannot be opened. The session is
    /// `Failed` afterwards.
    pub async fn connect(
        &mut self,
        endpoint: &dyn LiveEndpoint,
        config: &SessionConfig,
    ) -> Result<()> {
        self.transition(Transition::Connect)?;
        match endpoint.connect(config).await {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Queue one encoded chunk for the remote
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` unless the session is `Open` and the writer
    /// is still running
    pub fn send_chunk(&mut self, chunk: EncodedChunk) -> Result<()> {
        if !self.state.is_open() {
            return Err(Error::Session(format!(
                "cannot send audio while {}",
                self.state
            )));
        }
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| Error::Session("open session has no connection".to_string()))?;

        connection.send(chunk.into())?;
        self.chunks_sent += 1;
        Ok(())
    }

    /// Wait for the next remote event
    ///
    /// Pends forever when there is no connection, so it can sit in a
    /// `select!` next to other inputs. Cancel safe.
    pub async fn next_event(&mut self) -> RemoteEvent {
        let received = match self.connection.as_mut() {
            Some(connection) => connection.recv().await,
            None => return std::future::pending().await,
        };
        match received {
            Some(event) => event,
            None => {
                self.connection = None;
                RemoteEvent::Closed { reason: None }
            }
        }
    }

    /// Apply a remote event to the session
    pub fn handle_event(&mut self, event: RemoteEvent) -> SessionUpdate {
        match event {
            RemoteEvent::Ready => match self.transition(Transition::Ready) {
                Ok(()) => SessionUpdate::Opened,
                Err(e) => {
                    tracing::debug!(session_id = %self.id, error = %e, "ignoring ready");
                    SessionUpdate::Ignored
                }
            },
            RemoteEvent::TranscriptFragment(text) if self.state.is_open() => {
                SessionUpdate::Fragment(text)
            }
            RemoteEvent::TurnComplete if self.state.is_open() => {
                match self.transition(Transition::TurnComplete) {
                    Ok(()) => SessionUpdate::TurnComplete,
                    Err(_) => SessionUpdate::Ignored,
                }
            }
            RemoteEvent::Error(reason) if self.state.is_live() => {
                self.fail(reason.clone());
                SessionUpdate::Failed(reason)
            }
            RemoteEvent::Closed { reason } if self.state.is_live() => {
                let reason = reason.unwrap_or_else(|| "remote closed the session".to_string());
                self.fail(reason.clone());
                SessionUpdate::Failed(reason)
            }
            other => {
                tracing::trace!(
                    session_id = %self.id,
                    state = %self.state,
                    event = ?other,
                    "event ignored"
                );
                SessionUpdate::Ignored
            }
        }
    }

    /// Abandon the session, discarding anything in flight
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(session_id = %self.id, state = %self.state, "session cancelled");
        }
        self.close();
    }

    /// Release the remote channel. Idempotent.
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        if !self.state.is_terminal() && self.state != SessionState::Closing {
            let _ = self.transition(Transition::Cancel);
        }
        if let Err(e) = self.transition(Transition::Close) {
            tracing::warn!(session_id = %self.id, error = %e, "close from unexpected state");
        }
    }

    fn fail(&mut self, reason: String) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        if let Err(e) = self.transition(Transition::Fail(reason)) {
            tracing::debug!(session_id = %self.id, error = %e, "failure after teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::sync::Mutex;

    use super::*;
    use crate::voice::{SampleConversion, SampleFrame, encode_frame};

    /// Endpoint handing out one pre-built connection
    struct OneShot(Mutex<Option<LiveConnection>>);

    #[async_trait]
    impl LiveEndpoint for OneShot {
        async fn connect(&self, _config: &SessionConfig) -> Result<LiveConnection> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Connect("refused".to_string()))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            model: "m".to_string(),
            response_format: ResponseFormat::Audio,
            transcription_enabled: true,
            instruction_text: String::new(),
        }
    }

    fn chunk(sequence: u64) -> EncodedChunk {
        let frame = SampleFrame {
            sequence,
            samples: vec![0.0; 8],
        };
        encode_frame(&frame, 16000, SampleConversion::Clamp)
    }

    async fn opened() -> (StreamingSession, RemotePeer) {
        let (connection, peer) = channel();
        let endpoint = OneShot(Mutex::new(Some(connection)));
        let mut session = StreamingSession::new();
        session.connect(&endpoint, &config()).await.unwrap();
        assert_eq!(session.state(), &SessionState::Connecting);

        peer.inbound.send(RemoteEvent::Ready).unwrap();
        let event = session.next_event().await;
        assert_eq!(session.handle_event(event), SessionUpdate::Opened);
        (session, peer)
    }

    #[tokio::test]
    async fn test_send_rejected_before_open() {
        let mut session = StreamingSession::new();
        assert!(matches!(session.send_chunk(chunk(0)), Err(Error::Session(_))));

        let (connection, _peer) = channel();
        let endpoint = OneShot(Mutex::new(Some(connection)));
        session.connect(&endpoint, &config()).await.unwrap();
        assert!(matches!(session.send_chunk(chunk(0)), Err(Error::Session(_))));
        assert_eq!(session.chunks_sent(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_marks_failed() {
        let endpoint = OneShot(Mutex::new(None));
        let mut session = StreamingSession::new();
        assert!(session.connect(&endpoint, &config()).await.is_err());
        assert!(matches!(session.state(), SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_chunks_reach_peer_in_order() {
        let (mut session, mut peer) = opened().await;
        for sequence in 0..3 {
            session.send_chunk(chunk(sequence)).unwrap();
        }
        assert_eq!(session.chunks_sent(), 3);

        session.close();
        let mut count = 0;
        while let Some(Outbound::Media(media)) = peer.outbound.recv().await {
            assert_eq!(media.mime_type, "audio/pcm;rate=16000");
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(session.state(), &SessionState::Closed);
    }

    #[tokio::test]
    async fn test_turn_complete_closes_session() {
        let (mut session, peer) = opened().await;
        peer.inbound
            .send(RemoteEvent::TranscriptFragment("hi".to_string()))
            .unwrap();
        peer.inbound.send(RemoteEvent::TurnComplete).unwrap();

        let first = session.next_event().await;
        assert_eq!(
            session.handle_event(first),
            SessionUpdate::Fragment("hi".to_string())
        );
        let second = session.next_event().await;
        assert_eq!(session.handle_event(second), SessionUpdate::TurnComplete);
        assert_eq!(session.state(), &SessionState::Closing);

        assert!(session.send_chunk(chunk(9)).is_err());
        session.close();
        assert_eq!(session.state(), &SessionState::Closed);
    }

    #[tokio::test]
    async fn test_remote_error_fails_session() {
        let (mut session, peer) = opened().await;
        peer.inbound
            .send(RemoteEvent::Error("quota exceeded".to_string()))
            .unwrap();
        let event = session.next_event().await;
        assert_eq!(
            session.handle_event(event),
            SessionUpdate::Failed("quota exceeded".to_string())
        );
        assert_eq!(
            session.state(),
            &SessionState::Failed("quota exceeded".to_string())
        );

        // Failure survives teardown
        session.close();
        assert!(matches!(session.state(), SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn test_dropped_peer_reads_as_closed() {
        let (mut session, peer) = opened().await;
        drop(peer);
        let event = session.next_event().await;
        assert_eq!(event, RemoteEvent::Closed { reason: None });
        assert!(matches!(session.handle_event(event), SessionUpdate::Failed(_)));
    }

    #[tokio::test]
    async fn test_events_after_cancel_are_ignored() {
        let (mut session, _peer) = opened().await;
        session.cancel();
        assert_eq!(
            session.handle_event(RemoteEvent::TranscriptFragment("late".to_string())),
            SessionUpdate::Ignored
        );
        assert_eq!(
            session.handle_event(RemoteEvent::Error("late".to_string())),
            SessionUpdate::Ignored
        );
        assert_eq!(session.state(), &SessionState::Closed);
    }
}
