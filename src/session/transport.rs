//! Live endpoint connections
//!
//! A [`LiveConnection`] is a pair of channels: media chunks go out in
//! submission order, remote events come back in arrival order. The
//! WebSocket endpoint drives both ends from two tasks; tests drive them
//! from a [`RemotePeer`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{
    MediaChunk, RemoteEvent, SessionConfig, parse_server_message, realtime_input_message,
    setup_message,
};
use crate::{Error, Result};

/// Default live endpoint
pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Something that can open a bidirectional live session
#[async_trait]
pub trait LiveEndpoint: Send + Sync {
    /// Open a connection and send the setup request
    ///
    /// # Errors
    ///
    /// Returns `Error::Connect` if the channel cannot be established
    async fn connect(&self, config: &SessionConfig) -> Result<LiveConnection>;
}

/// Outbound item queued for the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Media(MediaChunk),
    /// Release the remote channel
    Close,
}

/// Client side of an open live connection
#[derive(Debug)]
pub struct LiveConnection {
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::UnboundedReceiver<RemoteEvent>,
    reader: Option<JoinHandle<()>>,
}

impl LiveConnection {
    /// Wrap a channel pair, optionally owning the task that feeds `inbound`
    #[must_use]
    pub const fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::UnboundedReceiver<RemoteEvent>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            reader,
        }
    }

    /// Queue a media chunk
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if the writer has gone away
    pub fn send(&self, chunk: MediaChunk) -> Result<()> {
        self.outbound
            .send(Outbound::Media(chunk))
            .map_err(|_| Error::Session("live connection writer closed".to_string()))
    }

    /// Next remote event; `None` once the remote side is gone
    pub async fn recv(&mut self) -> Option<RemoteEvent> {
        self.inbound.recv().await
    }

    /// Ask the writer to release the channel
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Remote end of an in-process connection
#[derive(Debug)]
pub struct RemotePeer {
    /// Everything the client queued, in order
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    /// Events to deliver to the client
    pub inbound: mpsc::UnboundedSender<RemoteEvent>,
}

/// Create a connected client/peer pair with no network underneath
#[must_use]
pub fn channel() -> (LiveConnection, RemotePeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        LiveConnection::new(out_tx, in_rx, None),
        RemotePeer {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}

/// Live endpoint reached over a WebSocket
pub struct WebSocketEndpoint {
    url: String,
    api_key: SecretString,
}

impl std::fmt::Debug for WebSocketEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketEndpoint")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl WebSocketEndpoint {
    /// Create an endpoint; nothing is opened until `connect`
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }

    /// URL with the key attached as a query parameter
    fn request_url(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.url)
            .map_err(|e| Error::Config(format!("invalid live URL {}: {e}", self.url)))?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url.into())
    }
}

#[async_trait]
impl LiveEndpoint for WebSocketEndpoint {
    async fn connect(&self, config: &SessionConfig) -> Result<LiveConnection> {
        let request_url = self.request_url()?;

        tracing::debug!(url = %self.url, model = %config.model, "opening live connection");
        let (stream, _response) = tokio_tungstenite::connect_async(request_url)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        sink.send(Message::Text(setup_message(config)?))
            .await
            .map_err(|e| Error::Connect(format!("setup request failed: {e}")))?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<RemoteEvent>();

        // Writer ends on Close or when the client drops its sender
        let writer_events = in_tx.clone();
        tokio::spawn(async move {
            while let Some(item) = out_rx.recv().await {
                let Outbound::Media(chunk) = item else {
                    break;
                };
                let text = match realtime_input_message(&chunk) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode media chunk");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    let _ = writer_events.send(RemoteEvent::Error(format!("send failed: {e}")));
                    return;
                }
            }
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "live connection close failed");
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let payload = match message {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(bytes)) => bytes,
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.into_owned())
                            .filter(|r| !r.is_empty());
                        tracing::debug!(?reason, "live connection closed by remote");
                        let _ = in_tx.send(RemoteEvent::Closed { reason });
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(RemoteEvent::Error(e.to_string()));
                        return;
                    }
                };

                match parse_server_message(&payload) {
                    Ok(events) => {
                        for event in events {
                            if in_tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "ignoring unparseable server message"),
                }
            }
            let _ = in_tx.send(RemoteEvent::Closed { reason: None });
        });

        Ok(LiveConnection::new(out_tx, in_rx, Some(reader)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (mut connection, mut peer) = channel();

        for data in ["one", "two", "three"] {
            connection
                .send(MediaChunk {
                    data: data.to_string(),
                    mime_type: "audio/pcm;rate=16000".to_string(),
                })
                .unwrap();
        }
        connection.close();

        let mut seen = Vec::new();
        while let Some(Outbound::Media(chunk)) = peer.outbound.recv().await {
            seen.push(chunk.data);
        }
        assert_eq!(seen, vec!["one", "two", "three"]);

        peer.inbound.send(RemoteEvent::Ready).unwrap();
        drop(peer);
        assert_eq!(connection.recv().await, Some(RemoteEvent::Ready));
        assert_eq!(connection.recv().await, None);
    }

    #[test]
    fn test_send_after_peer_gone_fails() {
        let (connection, peer) = channel();
        drop(peer);
        let result = connection.send(MediaChunk {
            data: String::new(),
            mime_type: String::new(),
        });
        assert!(matches!(result, Err(Error::Session(_))));
    }

    #[test]
    fn test_request_url_carries_key() {
        let endpoint = WebSocketEndpoint::new(
            "wss://live.example.test/ws",
            SecretString::from("k&y".to_string()),
        );
        assert_eq!(
            endpoint.request_url().unwrap(),
            "wss://live.example.test/ws?key=k%26y"
        );
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let endpoint = WebSocketEndpoint::new("not a url", SecretString::from("k".to_string()));
        assert!(matches!(endpoint.request_url(), Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SecretString::from("hunter2".to_string());
        let endpoint = WebSocketEndpoint::new(DEFAULT_LIVE_URL, key);
        assert!(!format!("{endpoint:?}").contains("hunter2"));
    }
}
