//! WebSocket client for the sync server.
//!
//! A thin typed wrapper: one writer task drains outgoing frames, one reader
//! task decodes incoming frames into [`ClientEvent`]s. Used by the
//! integration tests and by tooling that wants to watch a session.

use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use url::form_urlencoded;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage, UserIdentity};

/// Characters escaped in a document key. `/` is kept so nested keys stay
/// readable.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(#[from] tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    Disconnected,
}

/// Something that arrived from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(ServerMessage),
    /// The server closed the socket, with its close code and reason if any.
    Closed { code: Option<u16>, reason: String },
}

pub struct CollabClient {
    outgoing: mpsc::Sender<Message>,
    events: mpsc::Receiver<ClientEvent>,
}

impl CollabClient {
    /// Connect to `url`, e.g. `ws://127.0.0.1:9090/documents/readme`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        let (event_tx, event_rx) = mpsc::channel(1024);

        // Writer task: forward outgoing channel to WebSocket
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        // Reader task: decode incoming frames
        tokio::spawn(async move {
            let mut closed = ClientEvent::Closed { code: None, reason: String::new() };
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(message) => {
                            if event_tx.send(ClientEvent::Message(message)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => log::warn!("client: undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(frame)) => {
                        if let Some(frame) = frame {
                            closed = ClientEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_owned(),
                            };
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::debug!("client: connection error: {e}");
                        break;
                    }
                }
            }
            let _ = event_tx.send(closed).await;
        });

        Ok(Self {
            outgoing: out_tx,
            events: event_rx,
        })
    }

    pub async fn send(&self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = message.encode()?;
        self.send_raw(text).await
    }

    /// Send an arbitrary text frame, valid or not.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.outgoing
            .send(Message::text(text.into()))
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Next event, or `None` once the reader has finished.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Next server message, or `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        match self.events.recv().await? {
            ClientEvent::Message(message) => Some(message),
            ClientEvent::Closed { .. } => None,
        }
    }

    /// Close the connection politely.
    pub async fn close(self) {
        let _ = self.outgoing.send(Message::Close(None)).await;
    }
}

/// URL of a document session, with the identity on the query string.
pub fn document_url(base: &str, key: &str, user: Option<&UserIdentity>) -> String {
    let key = utf8_percent_encode(key, KEY_ENCODE_SET);
    let mut url = format!("{}/documents/{key}", base.trim_end_matches('/'));
    if let Some(user) = user {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("userId", &user.id)
            .append_pair("name", &user.name)
            .append_pair("avatarUrl", &user.avatar_url)
            .finish();
        url.push('?');
        url.push_str(&query);
    }
    url
}

/// URL of a branch configuration channel.
pub fn branch_config_url(base: &str, branch: &str) -> String {
    let branch = utf8_percent_encode(branch, KEY_ENCODE_SET);
    format!("{}/branch-config/{branch}", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{route, Route};

    #[test]
    fn test_document_url_round_trips_through_dispatch() {
        let user = UserIdentity {
            id: "u 1".into(),
            name: "Zoë & co".into(),
            avatar_url: "https://x/a.png?s=2".into(),
        };
        let url = document_url("ws://host:1/", "team/notes v2.md", Some(&user));
        let parsed = url::Url::parse(&url).unwrap();

        match route(parsed.path(), parsed.query()).unwrap() {
            Route::Document { key, params } => {
                assert_eq!(key, "team/notes v2.md");
                assert_eq!(params.user_id.as_deref(), Some("u 1"));
                assert_eq!(params.name.as_deref(), Some("Zoë & co"));
                assert_eq!(params.avatar_url.as_deref(), Some("https://x/a.png?s=2"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_branch_config_url() {
        assert_eq!(
            branch_config_url("ws://host:1", "feature/x y"),
            "ws://host:1/branch-config/feature/x%20y"
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 on loopback is not listening.
        let err = CollabClient::connect("ws://127.0.0.1:1/documents/x").await;
        assert!(matches!(err, Err(ClientError::Connect(_))));
    }
}
