use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::prefix::IdentifierPrefix;

/// One message on a controller channel. `body` stays an open JSON value;
/// the rotation layer owns the typed bodies.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BusMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub from: IdentifierPrefix,
    pub typ: String,
    pub body: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("channel closed")]
    ChannelClosed,
}

pub struct BusSubscription {
    pub id: u64,
    pub receiver: async_std::channel::Receiver<BusMessage>,
}

/// Abstract message transport, channel-addressed by controller AID.
#[async_trait::async_trait]
pub trait MessageBus: Send + Sync {
    /// Delivers a message to every subscriber of the channel.
    async fn send(&self, channel: &str, message: BusMessage) -> Result<(), TransportError>;

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, TransportError>;

    async fn unsubscribe(&self, channel: &str, id: u64) -> Result<(), TransportError>;
}

type Subscribers = Vec<(u64, async_std::channel::Sender<BusMessage>)>;

/// In-process bus for tests and single-process deployments. Channels can be
/// forced to fail to exercise send-error paths.
#[derive(Default)]
pub struct MemoryBus {
    channels: Mutex<HashMap<String, Subscribers>>,
    failing: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_channel(&self, channel: &str) {
        self.failing.lock().unwrap().insert(channel.into());
    }

    pub fn heal_channel(&self, channel: &str) {
        self.failing.lock().unwrap().remove(channel);
    }
}

#[async_trait::async_trait]
impl MessageBus for MemoryBus {
    async fn send(&self, channel: &str, message: BusMessage) -> Result<(), TransportError> {
        if self.failing.lock().unwrap().contains(channel) {
            return Err(TransportError::NetworkError(format!(
                "channel {} unavailable",
                channel
            )));
        }
        let senders = {
            let channels = self.channels.lock().unwrap();
            channels.get(channel).cloned().unwrap_or_default()
        };
        for (_, sender) in senders {
            // a closed subscriber is not a send failure
            let _ = sender.send(message.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, TransportError> {
        let (sender, receiver) = async_std::channel::unbounded();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.channels
            .lock()
            .unwrap()
            .entry(channel.into())
            .or_default()
            .push((id, sender));
        Ok(BusSubscription { id, receiver })
    }

    async fn unsubscribe(&self, channel: &str, id: u64) -> Result<(), TransportError> {
        if let Some(subscribers) = self.channels.lock().unwrap().get_mut(channel) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
        Ok(())
    }
}
