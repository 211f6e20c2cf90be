//! One document session: a single task that owns the operation log, the
//! presence registry and every participant outbox.
//!
//! ```text
//!  connection ──┐                       ┌── outbox ──► connection
//!  connection ──┼── SessionCommand ──►  Session  ──┼── outbox ──► connection
//!  connection ──┘      (bounded mpsc)   └── outbox ──► connection
//! ```
//!
//! Commands are processed strictly one at a time, which makes the actor the
//! single point that orders edits: every participant sees accepted
//! operations in revision order.

use std::fmt;
use std::sync::Arc;

use inkwell_ot::TextOperation;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::broadcast::{BroadcastGroup, BroadcastStats};
use crate::content::ContentError;
use crate::oplog::{CatchUp, OpLogError, OpLogStats, OperationLog, DEFAULT_COMPACTION_THRESHOLD};
use crate::presence::{Participant, PresenceRegistry};
use crate::protocol::{Cursor, Frame, ParticipantId, ServerMessage};

#[derive(Debug, Error)]
pub enum SessionError {
    /// The session task has shut down.
    #[error("session closed")]
    Closed,

    #[error("session is full ({limit} participants)")]
    Full { limit: usize },

    #[error("loading initial content: {0}")]
    Content(#[from] ContentError),
}

/// Per-session tuning.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub compaction_threshold: usize,
    /// Queued commands before senders wait.
    pub command_capacity: usize,
    pub max_participants: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            command_capacity: 1024,
            max_participants: 100,
        }
    }
}

/// Point-in-time view of a session, for tests and diagnostics.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub key: Arc<str>,
    pub revision: u64,
    pub snapshot_revision: u64,
    pub log_len: usize,
    pub text: String,
    pub participants: Vec<Participant>,
    pub oplog: OpLogStats,
    pub broadcast: BroadcastStats,
}

enum SessionCommand {
    Join {
        participant: Participant,
        outbox: mpsc::Sender<Frame>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Cursor {
        id: ParticipantId,
        cursor: Cursor,
    },
    Submit {
        id: ParticipantId,
        base_revision: Option<u64>,
        operation: Value,
    },
    Sync {
        id: ParticipantId,
        revision: u64,
    },
    Leave {
        id: ParticipantId,
        reply: oneshot::Sender<usize>,
    },
    Inspect {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cheap, cloneable address of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    key: Arc<str>,
    tx: mpsc::Sender<SessionCommand>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.key)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl SessionHandle {
    /// Start a session task seeded with `initial_text`.
    pub fn spawn(key: impl Into<Arc<str>>, initial_text: &str, settings: &SessionSettings) -> Self {
        let key = key.into();
        let (tx, rx) = mpsc::channel(settings.command_capacity.max(1));
        let session = Session {
            key: key.clone(),
            log: OperationLog::new(initial_text, settings.compaction_threshold),
            presence: PresenceRegistry::new(),
            group: BroadcastGroup::new(),
            max_participants: settings.max_participants.max(1),
            occupied: false,
        };
        log::info!("session {key} opened ({} chars)", session.log.len_chars());
        tokio::spawn(session.run(rx));
        Self { key, tx }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Join and run the handshake. On success the handshake frames are
    /// already queued on `outbox`.
    pub async fn join(&self, participant: Participant, outbox: mpsc::Sender<Frame>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Join { participant, outbox, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn update_cursor(&self, id: ParticipantId, cursor: Cursor) -> Result<(), SessionError> {
        self.send(SessionCommand::Cursor { id, cursor }).await
    }

    /// Submit an edit. The outcome arrives on the participant's outbox.
    pub async fn submit(&self, id: ParticipantId, base_revision: Option<u64>, operation: Value) -> Result<(), SessionError> {
        self.send(SessionCommand::Submit { id, base_revision, operation }).await
    }

    /// Ask for a catch-up from `revision`.
    pub async fn sync(&self, id: ParticipantId, revision: u64) -> Result<(), SessionError> {
        self.send(SessionCommand::Sync { id, revision }).await
    }

    /// Leave the session. Returns how many participants remain.
    pub async fn leave(&self, id: ParticipantId) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Leave { id, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn inspect(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Inspect { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Whether both handles address the same session task.
    pub fn is_same(&self, other: &SessionHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(command).await.map_err(|_| SessionError::Closed)
    }
}

struct Session {
    key: Arc<str>,
    log: OperationLog,
    presence: PresenceRegistry,
    group: BroadcastGroup,
    max_participants: usize,
    /// Set once the first participant has joined.
    occupied: bool,
}

impl Session {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
            if self.occupied && self.presence.is_empty() {
                break;
            }
        }
        log::info!(
            "session {} closed at revision {} ({} compactions)",
            self.key,
            self.log.revision(),
            self.log.stats().compactions
        );
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join { participant, outbox, reply } => {
                let result = self.join(participant, outbox);
                let _ = reply.send(result);
            }
            SessionCommand::Cursor { id, cursor } => self.update_cursor(id, cursor),
            SessionCommand::Submit { id, base_revision, operation } => {
                self.submit(id, base_revision, operation)
            }
            SessionCommand::Sync { id, revision } => self.sync(id, revision),
            SessionCommand::Leave { id, reply } => {
                if self.presence.get(id).is_some() {
                    log::info!("session {}: participant {id} left", self.key);
                }
                self.disconnect(vec![id]);
                let _ = reply.send(self.presence.len());
            }
            SessionCommand::Inspect { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn join(&mut self, participant: Participant, outbox: mpsc::Sender<Frame>) -> Result<(), SessionError> {
        if self.presence.len() >= self.max_participants {
            log::warn!(
                "session {}: refusing {}, limit of {} reached",
                self.key,
                participant.id,
                self.max_participants
            );
            return Err(SessionError::Full { limit: self.max_participants });
        }

        let id = participant.id;
        let mut delivered = true;
        self.group.add(id, outbox);
        self.occupied = true;

        for existing in self.presence.roster() {
            if let Some(frame) = encode(&existing.connected_message()) {
                delivered &= self.group.send_to(id, &frame);
            }
        }

        let mut stalled = match encode(&participant.connected_message()) {
            Some(frame) => self.group.broadcast(&frame, Some(id)),
            None => Vec::new(),
        };

        let catch_up = self
            .log
            .operations_since(participant.last_known_revision)
            .unwrap_or_else(|_| self.log.full_catch_up());
        let revision = catch_up.revision();

        log::info!(
            "session {}: {} ({}) joined at revision {revision}, {} present",
            self.key,
            participant.user.name,
            id,
            self.presence.len() + 1
        );
        self.presence.join(participant);

        if delivered && self.send_catch_up(id, catch_up) {
            self.presence.acknowledge(id, revision);
        } else {
            stalled.push(id);
        }

        self.evict(stalled);
        Ok(())
    }

    fn update_cursor(&mut self, id: ParticipantId, cursor: Cursor) {
        let Some(cursor) = self.presence.update_cursor(id, cursor, self.log.len_chars()) else {
            return;
        };
        log::trace!("session {}: cursor {id} -> {cursor:?}", self.key);

        let message = ServerMessage::UserCursor {
            user_id: id.to_string(),
            cursor,
        };
        if let Some(frame) = encode(&message) {
            let stalled = self.group.broadcast(&frame, Some(id));
            self.evict(stalled);
        }
    }

    fn submit(&mut self, id: ParticipantId, base_revision: Option<u64>, operation: Value) {
        if self.presence.get(id).is_none() {
            log::debug!("session {}: edit from departed participant {id} ignored", self.key);
            return;
        }
        if let Some(base) = base_revision.filter(|b| *b != self.log.revision()) {
            log::debug!(
                "session {}: {id} edited from revision {base}, server is at {}",
                self.key,
                self.log.revision()
            );
        }

        let result = TextOperation::from_value(operation)
            .map_err(OpLogError::from)
            .and_then(|op| Ok((self.log.append(op.clone())?, op)));

        match result {
            Ok((revision, operation)) => {
                let message = ServerMessage::UserOperation {
                    user_id: id.to_string(),
                    revision,
                    operation,
                };
                let Some(frame) = encode(&message) else { return };
                let stalled = self.group.broadcast(&frame, None);
                self.evict(stalled);
                for participant in self.presence.ids() {
                    self.presence.acknowledge(participant, revision);
                }
            }
            Err(e) => {
                log::warn!("session {}: rejected edit from {id}: {e}", self.key);
                let message = ServerMessage::OperationRejected {
                    revision: self.log.revision(),
                    reason: e.to_string(),
                };
                if let Some(frame) = encode(&message) {
                    if !self.group.send_to(id, &frame) {
                        self.evict(vec![id]);
                    }
                }
            }
        }
    }

    fn sync(&mut self, id: ParticipantId, revision: u64) {
        if self.presence.get(id).is_none() {
            return;
        }
        let catch_up = self.log.operations_since(revision).unwrap_or_else(|e| {
            log::debug!("session {}: sync from {id}: {e}", self.key);
            self.log.current()
        });
        let reached = catch_up.revision();
        log::debug!(
            "session {}: catch-up for {id} from {} with {} operations",
            self.key,
            catch_up.base_revision,
            catch_up.operations.len()
        );

        if self.send_catch_up(id, catch_up) {
            self.presence.acknowledge(id, reached);
        } else {
            self.evict(vec![id]);
        }
    }

    fn send_catch_up(&self, id: ParticipantId, catch_up: CatchUp) -> bool {
        match encode(&catch_up.into_message()) {
            Some(frame) => self.group.send_to(id, &frame),
            None => false,
        }
    }

    fn evict(&mut self, stalled: Vec<ParticipantId>) {
        if stalled.is_empty() {
            return;
        }
        for id in &stalled {
            log::warn!("session {}: evicting slow participant {id}", self.key);
        }
        self.disconnect(stalled);
    }

    /// Remove participants and announce each departure once. Peers that
    /// cannot take the announcement are removed in turn.
    fn disconnect(&mut self, mut pending: Vec<ParticipantId>) {
        while let Some(id) = pending.pop() {
            self.group.remove(id);
            let Some(participant) = self.presence.leave(id) else {
                continue;
            };
            if let Some(frame) = encode(&participant.disconnected_message()) {
                let stalled = self.group.broadcast(&frame, None);
                for id in &stalled {
                    log::warn!("session {}: evicting slow participant {id}", self.key);
                }
                pending.extend(stalled);
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            revision: self.log.revision(),
            snapshot_revision: self.log.snapshot_revision(),
            log_len: self.log.log_len(),
            text: self.log.text(),
            participants: self.presence.roster().to_vec(),
            oplog: self.log.stats(),
            broadcast: self.group.stats(),
        }
    }
}

fn encode(message: &ServerMessage) -> Option<Frame> {
    match message.encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            log::error!("failed to encode outbound message: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UserIdentity;
    use serde_json::json;

    struct TestClient {
        id: ParticipantId,
        rx: mpsc::Receiver<Frame>,
    }

    impl TestClient {
        fn next(&mut self) -> ServerMessage {
            let frame = self.rx.try_recv().expect("expected a queued frame");
            ServerMessage::decode(&frame).unwrap()
        }

        fn assert_idle(&mut self) {
            assert!(self.rx.try_recv().is_err(), "unexpected frame queued");
        }
    }

    fn participant(name: &str) -> Participant {
        let user = UserIdentity {
            id: format!("user-{name}"),
            name: name.to_string(),
            avatar_url: String::new(),
        };
        Participant::new(ParticipantId::new(), user, None)
    }

    async fn join(handle: &SessionHandle, name: &str, capacity: usize) -> TestClient {
        let p = participant(name);
        let id = p.id;
        let (tx, rx) = mpsc::channel(capacity);
        handle.join(p, tx).await.unwrap();
        TestClient { id, rx }
    }

    fn insert_at(len: usize, pos: usize, text: &str) -> Value {
        let mut op = TextOperation::new();
        op.retain(pos).insert(text).retain(len - pos);
        serde_json::to_value(&op).unwrap()
    }

    fn replay(message: ServerMessage) -> (u64, String) {
        match message {
            ServerMessage::DocumentSnapshot { revision, document, operations } => {
                let catch_up = CatchUp { base: document, base_revision: revision, operations };
                (catch_up.revision(), catch_up.replay().unwrap().as_text().unwrap())
            }
            other => panic!("expected document:snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_join_gets_snapshot_only() {
        let handle = SessionHandle::spawn("doc", "hello", &SessionSettings::default());
        let mut a = join(&handle, "a", 16).await;

        assert_eq!(replay(a.next()), (0, "hello".to_string()));
        a.assert_idle();
    }

    #[tokio::test]
    async fn test_join_handshake_order() {
        let handle = SessionHandle::spawn("doc", "", &SessionSettings::default());
        let mut a = join(&handle, "a", 16).await;
        let mut b = join(&handle, "b", 16).await;
        a.next();

        let mut c = join(&handle, "c", 16).await;

        // Roster in join order, then the snapshot.
        assert!(matches!(c.next(), ServerMessage::UserConnected { session_id, .. } if session_id == a.id));
        assert!(matches!(c.next(), ServerMessage::UserConnected { session_id, .. } if session_id == b.id));
        assert!(matches!(c.next(), ServerMessage::DocumentSnapshot { .. }));
        c.assert_idle();

        assert!(matches!(a.next(), ServerMessage::UserConnected { session_id, .. } if session_id == b.id));
        assert!(matches!(a.next(), ServerMessage::UserConnected { session_id, .. } if session_id == c.id));
        a.assert_idle();

        b.next();
        b.next();
        assert!(matches!(b.next(), ServerMessage::UserConnected { session_id, .. } if session_id == c.id));
        b.assert_idle();
    }

    #[tokio::test]
    async fn test_edit_echoed_to_everyone() {
        let handle = SessionHandle::spawn("doc", "hello", &SessionSettings::default());
        let mut a = join(&handle, "a", 16).await;
        let mut b = join(&handle, "b", 16).await;
        a.next();
        a.next();
        b.next();
        b.next();
        let author = a.id.to_string();

        handle.submit(a.id, Some(0), insert_at(5, 5, ", world")).await.unwrap();
        let snapshot = handle.inspect().await.unwrap();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.text, "hello, world");

        for client in [&mut a, &mut b] {
            match client.next() {
                ServerMessage::UserOperation { user_id, revision, operation } => {
                    assert_eq!(user_id, author);
                    assert_eq!(revision, 1);
                    assert_eq!(operation.apply("hello").unwrap(), "hello, world");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(snapshot.participants.iter().all(|p| p.last_known_revision == 1));
    }

    #[tokio::test]
    async fn test_late_joiner_catches_up() {
        let handle = SessionHandle::spawn("doc", "hello", &SessionSettings::default());
        let a = join(&handle, "a", 16).await;
        handle.submit(a.id, Some(0), insert_at(5, 5, ", world")).await.unwrap();

        let mut b = join(&handle, "b", 16).await;
        b.next();
        assert_eq!(replay(b.next()), (1, "hello, world".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_edit_goes_to_sender_only() {
        let handle = SessionHandle::spawn("doc", "hello", &SessionSettings::default());
        let mut a = join(&handle, "a", 16).await;
        let mut b = join(&handle, "b", 16).await;
        a.next();
        a.next();
        b.next();
        b.next();

        handle.submit(a.id, Some(0), insert_at(3, 3, "!")).await.unwrap();
        handle.submit(a.id, None, json!("garbage")).await.unwrap();
        let snapshot = handle.inspect().await.unwrap();

        for _ in 0..2 {
            assert!(matches!(
                a.next(),
                ServerMessage::OperationRejected { revision: 0, .. }
            ));
        }
        b.assert_idle();
        assert_eq!(snapshot.revision, 0);
        assert_eq!(snapshot.text, "hello");
        assert_eq!(snapshot.oplog.rejected, 1);
    }

    #[tokio::test]
    async fn test_oversized_edit_rejected_without_closing_session() {
        let handle = SessionHandle::spawn("doc", "hello", &SessionSettings::default());
        let mut a = join(&handle, "a", 16).await;
        let mut b = join(&handle, "b", 16).await;
        a.next();
        a.next();
        b.next();
        b.next();

        handle
            .submit(a.id, Some(0), json!([i64::MAX, i64::MAX, i64::MAX]))
            .await
            .unwrap();
        let snapshot = handle.inspect().await.unwrap();

        assert!(matches!(a.next(), ServerMessage::OperationRejected { revision: 0, .. }));
        b.assert_idle();
        assert_eq!(snapshot.revision, 0);
        assert_eq!(snapshot.text, "hello");
        assert_eq!(snapshot.participants.len(), 2);

        // The session keeps serving both participants.
        handle.submit(b.id, Some(0), insert_at(5, 5, "!")).await.unwrap();
        handle.inspect().await.unwrap();
        for client in [&mut a, &mut b] {
            assert!(matches!(client.next(), ServerMessage::UserOperation { revision: 1, .. }));
        }
    }

    #[tokio::test]
    async fn test_cursor_goes_to_others_clamped() {
        let handle = SessionHandle::spawn("doc", "abc", &SessionSettings::default());
        let mut a = join(&handle, "a", 16).await;
        let mut b = join(&handle, "b", 16).await;
        a.next();
        a.next();
        b.next();
        b.next();

        handle
            .update_cursor(a.id, Cursor { position: 1, selection_end: 50 })
            .await
            .unwrap();
        let snapshot = handle.inspect().await.unwrap();

        assert_eq!(
            b.next(),
            ServerMessage::UserCursor {
                user_id: a.id.to_string(),
                cursor: Cursor { position: 1, selection_end: 3 },
            }
        );
        a.assert_idle();
        assert_eq!(snapshot.revision, 0);
    }

    #[tokio::test]
    async fn test_sync_from_past_and_future() {
        let settings = SessionSettings { compaction_threshold: 2, ..SessionSettings::default() };
        let handle = SessionHandle::spawn("doc", "", &settings);
        let mut a = join(&handle, "a", 64).await;
        a.next();
        for i in 0..5 {
            handle.submit(a.id, None, insert_at(i, i, "z")).await.unwrap();
        }

        handle.sync(a.id, 1).await.unwrap();
        handle.sync(a.id, 99).await.unwrap();
        handle.inspect().await.unwrap();

        for _ in 0..5 {
            assert!(matches!(a.next(), ServerMessage::UserOperation { .. }));
        }
        // Revision 1 predates the snapshot at 4.
        match a.next() {
            ServerMessage::DocumentSnapshot { revision, operations, .. } => {
                assert_eq!(revision, 4);
                assert_eq!(operations.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        match a.next() {
            ServerMessage::DocumentSnapshot { revision, document, operations } => {
                assert_eq!(revision, 5);
                assert_eq!(document.as_text().as_deref(), Some("zzzzz"));
                assert!(operations.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_leave_announced_once() {
        let handle = SessionHandle::spawn("doc", "", &SessionSettings::default());
        let mut a = join(&handle, "a", 16).await;
        let d = join(&handle, "d", 16).await;
        a.next();
        a.next();

        assert_eq!(handle.leave(d.id).await.unwrap(), 1);
        assert_eq!(handle.leave(d.id).await.unwrap(), 1);
        handle.submit(d.id, None, insert_at(0, 0, "x")).await.unwrap();
        handle.update_cursor(d.id, Cursor::caret(0)).await.unwrap();
        let snapshot = handle.inspect().await.unwrap();

        assert!(matches!(
            a.next(),
            ServerMessage::UserDisconnected { session_id, .. } if session_id == d.id
        ));
        a.assert_idle();
        assert_eq!(snapshot.revision, 0);
        assert_eq!(snapshot.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_slow_participant_evicted() {
        let handle = SessionHandle::spawn("doc", "", &SessionSettings::default());
        let mut a = join(&handle, "a", 64).await;
        // Room for the handshake and a single edit.
        let slow = join(&handle, "slow", 3).await;
        a.next();
        a.next();

        for i in 0..3 {
            handle.submit(a.id, None, insert_at(i, i, "q")).await.unwrap();
        }
        let snapshot = handle.inspect().await.unwrap();

        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.revision, 3);

        let mut seen = Vec::new();
        while let Ok(frame) = a.rx.try_recv() {
            seen.push(ServerMessage::decode(&frame).unwrap());
        }
        let departures = seen
            .iter()
            .filter(|m| matches!(m, ServerMessage::UserDisconnected { session_id, .. } if *session_id == slow.id))
            .count();
        assert_eq!(departures, 1);
        assert_eq!(
            seen.iter().filter(|m| matches!(m, ServerMessage::UserOperation { .. })).count(),
            3
        );
    }

    #[tokio::test]
    async fn test_join_refused_when_full() {
        let settings = SessionSettings { max_participants: 1, ..SessionSettings::default() };
        let handle = SessionHandle::spawn("doc", "", &settings);
        let _a = join(&handle, "a", 16).await;

        let (tx, _rx) = mpsc::channel(16);
        let err = handle.join(participant("b"), tx).await.unwrap_err();
        assert!(matches!(err, SessionError::Full { limit: 1 }));
    }

    #[tokio::test]
    async fn test_session_closes_when_last_leaves() {
        let handle = SessionHandle::spawn("doc", "", &SessionSettings::default());
        let a = join(&handle, "a", 16).await;

        assert_eq!(handle.leave(a.id).await.unwrap(), 0);
        assert!(matches!(handle.inspect().await, Err(SessionError::Closed)));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_concurrent_edits_are_totally_ordered() {
        let handle = SessionHandle::spawn("doc", "ab", &SessionSettings::default());
        let a = join(&handle, "a", 16).await;
        let b = join(&handle, "b", 16).await;
        let mut c = join(&handle, "c", 16).await;
        c.next();
        c.next();
        c.next();

        // Length-preserving replacements, so both compose regardless of order.
        let mut first = TextOperation::new();
        first.delete(1).insert("X").retain(1);
        let mut second = TextOperation::new();
        second.retain(1).delete(1).insert("Y");

        let (ra, rb) = tokio::join!(
            handle.submit(a.id, Some(0), serde_json::to_value(&first).unwrap()),
            handle.submit(b.id, Some(0), serde_json::to_value(&second).unwrap()),
        );
        ra.unwrap();
        rb.unwrap();
        let snapshot = handle.inspect().await.unwrap();
        assert_eq!(snapshot.text, "XY");

        let revisions: Vec<u64> = (0..2)
            .map(|_| match c.next() {
                ServerMessage::UserOperation { revision, .. } => revision,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(revisions, vec![1, 2]);
    }
}
