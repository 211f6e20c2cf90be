//! Maps document keys to running sessions.
//!
//! Sessions are created lazily on first join and dropped from the map once
//! their task has exited. A join that races with a session shutting down
//! is retried against a fresh session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::content::{ContentError, ContentStore};
use crate::presence::Participant;
use crate::protocol::{Frame, ParticipantId};
use crate::session::{SessionError, SessionHandle, SessionSettings};

const JOIN_ATTEMPTS: usize = 3;

pub struct SessionRouter {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    content: Arc<dyn ContentStore>,
    settings: SessionSettings,
}

impl SessionRouter {
    pub fn new(content: Arc<dyn ContentStore>, settings: SessionSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            content,
            settings,
        }
    }

    /// Return the live session for `key`, starting one if needed.
    pub async fn get_or_create(&self, key: &str) -> Result<SessionHandle, SessionError> {
        // Fast path: read lock
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(key).filter(|h| !h.is_closed()) {
                return Ok(handle.clone());
            }
        }

        let initial_text = self.load(key).await?;

        let mut sessions = self.sessions.write().await;
        // Double-check after acquiring write lock
        if let Some(handle) = sessions.get(key).filter(|h| !h.is_closed()) {
            return Ok(handle.clone());
        }

        let handle = SessionHandle::spawn(key, &initial_text, &self.settings);
        sessions.insert(key.to_string(), handle.clone());
        Ok(handle)
    }

    /// Join `participant` to the session for `key`.
    pub async fn join(
        &self,
        key: &str,
        participant: Participant,
        outbox: mpsc::Sender<Frame>,
    ) -> Result<SessionHandle, SessionError> {
        let mut attempt = 1;
        loop {
            let handle = self.get_or_create(key).await?;
            match handle.join(participant.clone(), outbox.clone()).await {
                Ok(()) => return Ok(handle),
                Err(SessionError::Closed) if attempt < JOIN_ATTEMPTS => {
                    log::debug!("session {key} closed during join, retrying");
                    self.forget(key, &handle).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Leave a session and drop it from the map once it is empty.
    pub async fn leave(&self, handle: &SessionHandle, id: ParticipantId) {
        match handle.leave(id).await {
            Ok(0) | Err(SessionError::Closed) => self.forget(handle.key(), handle).await,
            Ok(_) => {}
            Err(e) => log::warn!("leaving session {}: {e}", handle.key()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(key)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// Number of sessions in the map, including any that are shutting down.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove `handle` from the map unless it has already been replaced.
    async fn forget(&self, key: &str, handle: &SessionHandle) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(key).is_some_and(|current| current.is_same(handle)) {
            sessions.remove(key);
            log::debug!("session {key} removed from router");
        }
    }

    async fn load(&self, key: &str) -> Result<String, SessionError> {
        let content = self.content.clone();
        let owned = key.to_string();
        let loaded = tokio::task::spawn_blocking(move || content.initial_content(&owned))
            .await
            .map_err(|e| ContentError::Io {
                path: key.into(),
                source: std::io::Error::other(e.to_string()),
            })?;
        Ok(loaded?)
    }
}
