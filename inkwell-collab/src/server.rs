//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Editor A ──┐                               ┌── Session "readme"  (OperationLog,
//!            ├── dispatch ── SessionRouter ──┤                      PresenceRegistry,
//! Editor B ──┘   (path)                      │                      outboxes)
//!                                            └── Session "notes/today"
//!
//! Panel ───── dispatch ── ConfigHub ── branch "main" (latest snapshot + broadcast)
//! ```
//!
//! Every connection runs in its own task. A document connection forwards
//! decoded client messages to its session and drains its outbox to the
//! socket; the session task does all the ordering.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::config_hub::ConfigHub;
use crate::content::{ContentStore, DirectoryContentStore, MemoryContentStore};
use crate::dispatch::{self, JoinParams, Route};
use crate::oplog::DEFAULT_COMPACTION_THRESHOLD;
use crate::protocol::{ClientMessage, Frame, ParticipantId};
use crate::router::SessionRouter;
use crate::session::{SessionError, SessionHandle, SessionSettings};

type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid value {value:?} for {var}")]
    Config { var: &'static str, value: String },
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Directory holding initial document contents (None = every document
    /// starts empty)
    pub content_root: Option<PathBuf>,
    /// Logged operations per session before compaction
    pub compaction_threshold: usize,
    /// Frames queued per connection before it counts as stalled
    pub outbound_capacity: usize,
    /// Commands queued per session
    pub command_capacity: usize,
    /// Snapshots buffered per branch config subscriber
    pub config_capacity: usize,
    /// Maximum participants per document session
    pub max_participants_per_session: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            content_root: None,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            outbound_capacity: 256,
            command_capacity: 1024,
            config_capacity: 64,
            max_participants_per_session: 100,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `INKWELL_*` environment variables.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`ServerConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let defaults = Self::default();
        Ok(Self {
            bind_addr: lookup("INKWELL_BIND_ADDR").unwrap_or(defaults.bind_addr),
            content_root: lookup("INKWELL_CONTENT_ROOT")
                .filter(|root| !root.is_empty())
                .map(PathBuf::from),
            compaction_threshold: parse_var(
                &lookup,
                "INKWELL_COMPACTION_THRESHOLD",
                defaults.compaction_threshold,
            )?,
            outbound_capacity: parse_var(&lookup, "INKWELL_OUTBOUND_CAPACITY", defaults.outbound_capacity)?,
            command_capacity: parse_var(&lookup, "INKWELL_COMMAND_CAPACITY", defaults.command_capacity)?,
            config_capacity: parse_var(&lookup, "INKWELL_CONFIG_CAPACITY", defaults.config_capacity)?,
            max_participants_per_session: parse_var(
                &lookup,
                "INKWELL_MAX_PARTICIPANTS",
                defaults.max_participants_per_session,
            )?,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            compaction_threshold: self.compaction_threshold,
            command_capacity: self.command_capacity,
            max_participants: self.max_participants_per_session,
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ServerError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ServerError::Config { var, value }),
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub refused_handshakes: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub malformed_frames: u64,
    pub active_sessions: usize,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    refused_handshakes: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    malformed_frames: AtomicU64,
}

impl AtomicServerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared state handed to every connection task.
#[derive(Clone)]
struct ConnectionContext {
    router: Arc<SessionRouter>,
    config_hub: Arc<ConfigHub>,
    stats: Arc<AtomicServerStats>,
    outbound_capacity: usize,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    router: Arc<SessionRouter>,
    config_hub: Arc<ConfigHub>,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    /// Create a server whose content comes from `config.content_root`.
    pub fn new(config: ServerConfig) -> Self {
        let content: Arc<dyn ContentStore> = match &config.content_root {
            Some(root) => Arc::new(DirectoryContentStore::new(root.clone())),
            None => Arc::new(MemoryContentStore::new()),
        };
        Self::with_content_store(config, content)
    }

    /// Create with default configuration (empty documents).
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn with_content_store(config: ServerConfig, content: Arc<dyn ContentStore>) -> Self {
        let router = Arc::new(SessionRouter::new(content, config.session_settings()));
        let config_hub = Arc::new(ConfigHub::new(config.config_capacity));
        Self {
            config,
            router,
            config_hub,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    /// Bind to the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let ctx = ConnectionContext {
            router: self.router.clone(),
            config_hub: self.config_hub.clone(),
            stats: self.stats.clone(),
            outbound_capacity: self.config.outbound_capacity.max(1),
        };

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("accept failed: {e}");
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, ctx).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Upgrade, route and serve a single connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: ConnectionContext,
    ) -> Result<(), ServerError> {
        let mut route = None;
        let handshake = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            let uri = req.uri();
            match dispatch::route(uri.path(), uri.query()) {
                Ok(r) => {
                    route = Some(r);
                    Ok(resp)
                }
                Err(e) => {
                    log::warn!("Refusing upgrade from {addr}: {e}");
                    let mut refusal = ErrorResponse::new(Some(e.to_string()));
                    *refusal.status_mut() = StatusCode::NOT_FOUND;
                    Err(refusal)
                }
            }
        })
        .await;

        let ws_stream = match handshake {
            Ok(ws) => ws,
            Err(e) => {
                AtomicServerStats::bump(&ctx.stats.refused_handshakes);
                log::debug!("Handshake with {addr} failed: {e}");
                return Ok(());
            }
        };
        let Some(route) = route else { return Ok(()) };

        AtomicServerStats::bump(&ctx.stats.total_connections);
        ctx.stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let result = match route {
            Route::Document { key, params } => {
                Self::serve_document(ws_stream, addr, key, params, &ctx).await
            }
            Route::BranchConfig { branch } => {
                Self::serve_branch_config(ws_stream, addr, branch, &ctx).await
            }
        };

        ctx.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }

    async fn serve_document(
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        key: String,
        params: JoinParams,
        ctx: &ConnectionContext,
    ) -> Result<(), ServerError> {
        let (mut ws_sender, ws_receiver) = ws_stream.split();
        let id = ParticipantId::new();
        let participant = params.into_participant(id);
        let (outbox, outbox_rx) = mpsc::channel(ctx.outbound_capacity);

        let session = match ctx.router.join(&key, participant, outbox).await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("Join of {addr} to {key} refused: {e}");
                let code = match &e {
                    SessionError::Full { .. } | SessionError::Closed => CloseCode::Again,
                    SessionError::Content(_) => CloseCode::Error,
                };
                ws_sender
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: e.to_string().into(),
                    })))
                    .await?;
                return Ok(());
            }
        };
        log::info!("Participant {id} from {addr} joined document {key}");

        let result = Self::pump_document(&session, id, ws_sender, ws_receiver, outbox_rx, ctx).await;

        ctx.router.leave(&session, id).await;
        log::info!("Participant {id} from {addr} left document {key}");
        result
    }

    async fn pump_document(
        session: &SessionHandle,
        id: ParticipantId,
        mut ws_sender: WsSender,
        mut ws_receiver: WsReceiver,
        mut outbox: mpsc::Receiver<Frame>,
        ctx: &ConnectionContext,
    ) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                frame = outbox.recv() => {
                    match frame {
                        Some(frame) => {
                            ws_sender.send(Message::text(frame.to_string())).await?;
                            AtomicServerStats::bump(&ctx.stats.frames_sent);
                        }
                        None => {
                            log::warn!("Participant {id} dropped by its session");
                            let _ = ws_sender.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }

                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            AtomicServerStats::bump(&ctx.stats.frames_received);
                            let message = match ClientMessage::decode(text.as_str()) {
                                Ok(message) => message,
                                Err(e) => {
                                    AtomicServerStats::bump(&ctx.stats.malformed_frames);
                                    log::warn!("Dropping frame from {id}: {e}");
                                    continue;
                                }
                            };
                            if let Err(e) = Self::forward(session, id, message).await {
                                log::warn!("Session {} unavailable for {id}: {e}", session.key());
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            AtomicServerStats::bump(&ctx.stats.malformed_frames);
                            log::warn!("Dropping binary frame from {id}");
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => {
                            log::error!("WebSocket error from {id}: {e}");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn forward(
        session: &SessionHandle,
        id: ParticipantId,
        message: ClientMessage,
    ) -> Result<(), SessionError> {
        match message {
            ClientMessage::Cursor { cursor } => session.update_cursor(id, cursor).await,
            ClientMessage::Operation { revision, operation } => {
                session.submit(id, revision, operation).await
            }
            ClientMessage::Sync { revision } => session.sync(id, revision).await,
            ClientMessage::BranchConfig { .. } => {
                log::warn!("Ignoring branch config frame on document connection {id}");
                Ok(())
            }
        }
    }

    async fn serve_branch_config(
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        branch: String,
        ctx: &ConnectionContext,
    ) -> Result<(), ServerError> {
        let (ws_sender, ws_receiver) = ws_stream.split();
        let subscription = ctx.config_hub.subscribe(&branch).await;
        log::info!("Config subscriber {addr} joined branch {branch}");

        let result = Self::pump_branch_config(
            &branch,
            ws_sender,
            ws_receiver,
            subscription.latest,
            subscription.receiver,
            ctx,
        )
        .await;

        ctx.config_hub.release(&branch).await;
        log::info!("Config subscriber {addr} left branch {branch}");
        result
    }

    async fn pump_branch_config(
        branch: &str,
        mut ws_sender: WsSender,
        mut ws_receiver: WsReceiver,
        latest: Option<Frame>,
        mut updates: broadcast::Receiver<Frame>,
        ctx: &ConnectionContext,
    ) -> Result<(), ServerError> {
        if let Some(frame) = latest {
            ws_sender.send(Message::text(frame.to_string())).await?;
            AtomicServerStats::bump(&ctx.stats.frames_sent);
        }

        loop {
            tokio::select! {
                update = updates.recv() => {
                    match update {
                        Ok(frame) => {
                            ws_sender.send(Message::text(frame.to_string())).await?;
                            AtomicServerStats::bump(&ctx.stats.frames_sent);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::debug!("Config subscriber on {branch} skipped {n} snapshots");
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    }
                }

                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            AtomicServerStats::bump(&ctx.stats.frames_received);
                            match ClientMessage::decode(text.as_str()) {
                                Ok(ClientMessage::BranchConfig { data }) => {
                                    if let Err(e) = ctx.config_hub.publish(branch, data).await {
                                        log::error!("Config snapshot for {branch} not published: {e}");
                                    }
                                }
                                Ok(_) => {
                                    AtomicServerStats::bump(&ctx.stats.malformed_frames);
                                    log::warn!("Ignoring document frame on config branch {branch}");
                                }
                                Err(e) => {
                                    AtomicServerStats::bump(&ctx.stats.malformed_frames);
                                    log::warn!("Dropping config frame on {branch}: {e}");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => {
                            log::error!("WebSocket error on config branch {branch}: {e}");
                            return Ok(());
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let s = &self.stats;
        ServerStats {
            total_connections: s.total_connections.load(Ordering::Relaxed),
            active_connections: s.active_connections.load(Ordering::Relaxed),
            refused_handshakes: s.refused_handshakes.load(Ordering::Relaxed),
            frames_received: s.frames_received.load(Ordering::Relaxed),
            frames_sent: s.frames_sent.load(Ordering::Relaxed),
            malformed_frames: s.malformed_frames.load(Ordering::Relaxed),
            active_sessions: self.router.session_count().await,
        }
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<SessionRouter> {
        &self.router
    }

    pub fn config_hub(&self) -> &Arc<ConfigHub> {
        &self.config_hub
    }
}
