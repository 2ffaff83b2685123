//! Transport abstraction between the connection manager and the hub.
//!
//! A [`Connector`] establishes a [`HubLink`]: an outbound [`FrameSink`] and
//! an inbound stream of [`LinkEvent`]s. [`WsConnector`] is the production
//! implementation over WebSocket text frames; the loopback hub provides an
//! in-process one.
//!
//! ```text
//!   CollabClient ── FrameSink ──► writer task ──► WebSocket
//!        ▲                                           │
//!        └──── LinkEvent ◄── reader task ◄───────────┘
//! ```

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::ProtocolError;

/// Something that happened on an established link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// An inbound text frame
    Frame(String),
    /// The link closed; carries the reason if one is known
    Closed(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),
    #[error("Connection refused: {0}")]
    Refused(String),
    #[error("Connection closed")]
    Closed,
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Outbound half of a link.
pub trait FrameSink: Send {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Close the link deliberately. No `LinkEvent::Closed` is expected to be
    /// acted on afterwards.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// An established connection to the hub.
pub struct HubLink {
    pub outbound: Box<dyn FrameSink>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links to a hub.
pub trait Connector: Send {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<HubLink, TransportError>>;
}

// ───────────────────────────────────────────────────────────────────
// WebSocket
// ───────────────────────────────────────────────────────────────────

/// Connects over WebSocket. The access token, when present, is passed as
/// the `access_token` query parameter.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    auth_token: Option<String>,
}

impl WsConnector {
    pub fn new(auth_token: Option<String>) -> Self {
        Self { auth_token }
    }

    fn build_url(&self, url: &str) -> Result<String, TransportError> {
        let mut parsed = url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if let Some(token) = &self.auth_token {
            parsed.query_pairs_mut().append_pair("access_token", token);
        }
        Ok(parsed.to_string())
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<HubLink, TransportError>> {
        let url = self.build_url(url);
        async move {
            let url = url?;
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Refused(e.to_string()))?;
            let (mut ws_writer, mut ws_reader) = ws_stream.split();

            // Writer task: forward outgoing frames to the socket
            let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(256);
            tokio::spawn(async move {
                while let Some(outgoing) = out_rx.recv().await {
                    match outgoing {
                        Outgoing::Frame(frame, ack) => {
                            let result = ws_writer
                                .send(Message::Text(frame.into()))
                                .await
                                .map_err(|e| TransportError::WebSocket(e.to_string()));
                            let failed = result.is_err();
                            let _ = ack.send(result);
                            if failed {
                                break;
                            }
                        }
                        Outgoing::Close => {
                            let _ = ws_writer.close().await;
                            break;
                        }
                    }
                }
            });

            // Reader task: forward text frames until the socket ends
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            tokio::spawn(async move {
                let reason = loop {
                    match ws_reader.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(LinkEvent::Frame(text.as_str().to_owned())).is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame.map(|f| f.reason.as_str().to_owned());
                        }
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break None,
                        Some(Ok(_)) => {}
                    }
                };
                let _ = in_tx.send(LinkEvent::Closed(reason));
            });

            Ok(HubLink {
                outbound: Box::new(WsSink { tx: out_tx }),
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

enum Outgoing {
    Frame(String, tokio::sync::oneshot::Sender<Result<(), TransportError>>),
    Close,
}

struct WsSink {
    tx: mpsc::Sender<Outgoing>,
}

impl FrameSink for WsSink {
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
            self.tx
                .send(Outgoing::Frame(frame, ack_tx))
                .await
                .map_err(|_| TransportError::Closed)?;
            ack_rx.await.map_err(|_| TransportError::Closed)?
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        async move {
            let _ = self.tx.send(Outgoing::Close).await;
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_appends_token() {
        let connector = WsConnector::new(Some("secret token".into()));
        let url = connector.build_url("ws://127.0.0.1:9090/presentationHub").unwrap();
        assert_eq!(url, "ws://127.0.0.1:9090/presentationHub?access_token=secret+token");
    }

    #[test]
    fn test_build_url_without_token() {
        let connector = WsConnector::default();
        let url = connector.build_url("ws://127.0.0.1:9090/hub").unwrap();
        assert_eq!(url, "ws://127.0.0.1:9090/hub");
    }

    #[test]
    fn test_build_url_rejects_garbage() {
        let connector = WsConnector::default();
        assert!(matches!(
            connector.build_url("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = WsConnector::default()
            .connect(&format!("ws://127.0.0.1:{port}/hub"))
            .await;
        assert!(matches!(result, Err(TransportError::Refused(_))));
    }
}
