//! Presence tracking: who is in a session, where their caret is, and what
//! colour they are drawn in.
//!
//! The registry keeps participants in join order so that a newcomer learns
//! about existing peers in the order they arrived.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::protocol::{Cursor, ParticipantId, ServerMessage, UserIdentity};

/// One live connection inside a session.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub user: UserIdentity,
    /// CSS hex colour, e.g. `#e05c5c`.
    pub color: String,
    pub cursor: Option<Cursor>,
    /// Highest revision this participant has been sent.
    pub last_known_revision: u64,
    pub connected_at: DateTime<Utc>,
}

impl Participant {
    /// A fresh participant. An empty colour is replaced by one derived from
    /// the id.
    pub fn new(id: ParticipantId, user: UserIdentity, color: Option<String>) -> Self {
        let color = color
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| color_for(id.as_uuid()));
        Self {
            id,
            user,
            color,
            cursor: None,
            last_known_revision: 0,
            connected_at: Utc::now(),
        }
    }

    pub fn connected_message(&self) -> ServerMessage {
        ServerMessage::UserConnected {
            session_id: self.id,
            connected_at: self.connected_at,
            user: self.user.clone(),
            color: Some(self.color.clone()),
        }
    }

    pub fn disconnected_message(&self) -> ServerMessage {
        ServerMessage::UserDisconnected {
            session_id: self.id,
            user: self.user.clone(),
        }
    }
}

/// Stable, vivid colour for a participant.
pub fn color_for(id: Uuid) -> String {
    let hue = ((id.as_u128() % 360) as f32) / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b))
}

fn channel(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Participants of one session, in join order.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    participants: Vec<Participant>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant. Returns `false` if the id is already present.
    pub fn join(&mut self, participant: Participant) -> bool {
        if self.get(participant.id).is_some() {
            return false;
        }
        self.participants.push(participant);
        true
    }

    /// Record a cursor move, clamped to `doc_len`.
    ///
    /// Returns the stored cursor, or `None` for an unknown participant.
    pub fn update_cursor(&mut self, id: ParticipantId, cursor: Cursor, doc_len: usize) -> Option<Cursor> {
        let participant = self.participants.iter_mut().find(|p| p.id == id)?;
        let cursor = cursor.clamped(doc_len);
        participant.cursor = Some(cursor);
        Some(cursor)
    }

    /// Remove a participant. Removing twice is harmless.
    pub fn leave(&mut self, id: ParticipantId) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(index))
    }

    /// Note that `id` has been sent everything up to `revision`.
    pub fn acknowledge(&mut self, id: ParticipantId, revision: u64) {
        if let Some(p) = self.participants.iter_mut().find(|p| p.id == id) {
            p.last_known_revision = p.last_known_revision.max(revision);
        }
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn roster(&self) -> &[Participant] {
        &self.participants
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        self.participants.iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
