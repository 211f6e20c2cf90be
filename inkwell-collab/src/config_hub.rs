//! Branch configuration broadcast.
//!
//! Each branch key has the latest `branch:config:snapshot` payload and a
//! bounded broadcast channel. There is no ordering or revision tracking: a
//! subscriber that falls behind skips straight to newer snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::protocol::{Frame, ProtocolError, ServerMessage};

struct ConfigChannel {
    latest: Mutex<Option<Frame>>,
    sender: broadcast::Sender<Frame>,
}

/// A subscription to one branch.
pub struct ConfigSubscription {
    /// Latest snapshot at the time of subscribing, if any.
    pub latest: Option<Frame>,
    pub receiver: broadcast::Receiver<Frame>,
}

pub struct ConfigHub {
    channels: RwLock<HashMap<String, Arc<ConfigChannel>>>,
    capacity: usize,
}

impl ConfigHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn subscribe(&self, branch: &str) -> ConfigSubscription {
        let channel = self.channel(branch).await;
        // Subscribe before reading `latest` so no publish falls in between.
        let receiver = channel.sender.subscribe();
        let latest = channel.latest.lock().await.clone();
        ConfigSubscription { latest, receiver }
    }

    /// Store `data` as the branch's latest snapshot and send it to every
    /// subscriber. Returns the number of subscribers reached.
    pub async fn publish(&self, branch: &str, data: Value) -> Result<usize, ProtocolError> {
        let frame = ServerMessage::BranchConfigSnapshot { data }.encode()?;
        let channel = self.channel(branch).await;

        let mut latest = channel.latest.lock().await;
        *latest = Some(frame.clone());
        let reached = channel.sender.send(frame).unwrap_or(0);
        log::debug!("branch {branch}: config snapshot sent to {reached} subscribers");
        Ok(reached)
    }

    /// Drop the branch once nobody is subscribed.
    pub async fn release(&self, branch: &str) {
        let mut channels = self.channels.write().await;
        if channels
            .get(branch)
            .is_some_and(|c| c.sender.receiver_count() == 0)
        {
            channels.remove(branch);
            log::debug!("branch {branch}: config channel removed");
        }
    }

    pub async fn branch_count(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn channel(&self, branch: &str) -> Arc<ConfigChannel> {
        {
            let channels = self.channels.read().await;
            if let Some(channel) = channels.get(branch) {
                return channel.clone();
            }
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(branch.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(self.capacity);
                Arc::new(ConfigChannel {
                    latest: Mutex::new(None),
                    sender,
                })
            })
            .clone()
    }
}
