//! Fan-out of pre-encoded frames to the participants of one session.
//!
//! Every participant owns a bounded outbox drained by its connection task.
//! Sends never wait: a full or closed outbox marks the participant as
//! stalled and the session evicts it, so one slow reader cannot hold up
//! the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::protocol::{Frame, ParticipantId};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub active_participants: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Outboxes of one session.
#[derive(Default)]
pub struct BroadcastGroup {
    outboxes: HashMap<ParticipantId, mpsc::Sender<Frame>>,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ParticipantId, outbox: mpsc::Sender<Frame>) {
        self.outboxes.insert(id, outbox);
    }

    /// Drop an outbox. The connection sees its receiver close once the
    /// last sender is gone.
    pub fn remove(&mut self, id: ParticipantId) -> bool {
        self.outboxes.remove(&id).is_some()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.outboxes.contains_key(&id)
    }

    /// Queue a frame for one participant. Returns `false` if the outbox is
    /// full, closed or unknown.
    pub fn send_to(&self, id: ParticipantId, frame: &Frame) -> bool {
        let Some(outbox) = self.outboxes.get(&id) else {
            return false;
        };
        self.try_push(outbox, frame)
    }

    /// Queue a frame for everyone except `except`.
    ///
    /// Returns the participants whose outbox could not take the frame.
    pub fn broadcast(&self, frame: &Frame, except: Option<ParticipantId>) -> Vec<ParticipantId> {
        self.outboxes
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .filter(|(_, outbox)| !self.try_push(outbox, frame))
            .map(|(id, _)| *id)
            .collect()
    }

    fn try_push(&self, outbox: &mpsc::Sender<Frame>, frame: &Frame) -> bool {
        match outbox.try_send(frame.clone()) {
            Ok(()) => {
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            active_participants: self.outboxes.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Frame::from(text)
    }

    #[tokio::test]
    async fn test_add_remove() {
        let mut group = BroadcastGroup::new();
        let id = ParticipantId::new();
        let (tx, _rx) = mpsc::channel(4);

        group.add(id, tx);
        assert_eq!(group.len(), 1);
        assert!(group.contains(id));

        assert!(group.remove(id));
        assert!(!group.remove(id));
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_skips_sender() {
        let mut group = BroadcastGroup::new();
        let alice = ParticipantId::new();
        let bob = ParticipantId::new();
        let carol = ParticipantId::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let (tx_c, mut rx_c) = mpsc::channel(4);
        group.add(alice, tx_a);
        group.add(bob, tx_b);
        group.add(carol, tx_c);

        let stalled = group.broadcast(&frame("hi"), Some(alice));
        assert!(stalled.is_empty());

        assert_eq!(&*rx_b.recv().await.unwrap(), "hi");
        assert_eq!(&*rx_c.recv().await.unwrap(), "hi");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shared_allocation() {
        let mut group = BroadcastGroup::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        group.add(ParticipantId::new(), tx1);
        group.add(ParticipantId::new(), tx2);

        let f = frame("shared");
        group.broadcast(&f, None);

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_full_outbox_reported_stalled() {
        let mut group = BroadcastGroup::new();
        let slow = ParticipantId::new();
        let fast = ParticipantId::new();
        let (tx_slow, _rx_slow) = mpsc::channel(1);
        let (tx_fast, mut rx_fast) = mpsc::channel(8);
        group.add(slow, tx_slow);
        group.add(fast, tx_fast);

        assert!(group.broadcast(&frame("1"), None).is_empty());
        let stalled = group.broadcast(&frame("2"), None);
        assert_eq!(stalled, vec![slow]);

        assert_eq!(&*rx_fast.recv().await.unwrap(), "1");
        assert_eq!(&*rx_fast.recv().await.unwrap(), "2");

        let stats = group.stats();
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.active_participants, 2);
    }

    #[tokio::test]
    async fn test_closed_outbox_reported_stalled() {
        let mut group = BroadcastGroup::new();
        let gone = ParticipantId::new();
        let (tx, rx) = mpsc::channel(4);
        group.add(gone, tx);
        drop(rx);

        assert!(!group.send_to(gone, &frame("x")));
        assert_eq!(group.broadcast(&frame("x"), None), vec![gone]);
    }

    #[tokio::test]
    async fn test_send_to_unknown() {
        let group = BroadcastGroup::new();
        assert!(!group.send_to(ParticipantId::new(), &frame("x")));
    }
}
