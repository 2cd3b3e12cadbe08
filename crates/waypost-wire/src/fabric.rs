use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// One received message: the channel it arrived on and the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub channel: String,
    pub payload: String,
}

/// Where a subscriber wants its deliveries pushed. A component uses one
/// sink for all of its subscriptions, so it sees a single ordered stream
/// per channel.
pub type DeliverySink = mpsc::UnboundedSender<Delivery>;

/// A live subscription. Dropping it does not unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    id: u64,
    channel: String,
}

impl ChannelHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("Channel fabric is closed")]
    Closed,

    #[error("Channel fabric lock poisoned")]
    Poisoned,
}

/// Named broadcast channels. Every subscriber of a channel receives each
/// message published to it after it subscribed, in publish order.
pub trait ChannelFabric: Send + Sync {
    fn subscribe(&self, channel: &str, sink: DeliverySink) -> Result<ChannelHandle, FabricError>;
    fn unsubscribe(&self, handle: &ChannelHandle) -> Result<(), FabricError>;
    /// Returns how many subscribers the message was handed to.
    fn publish(&self, channel: &str, payload: &str) -> Result<usize, FabricError>;
}

/// Process-local fabric backed by tokio channels.
#[derive(Debug, Default)]
pub struct InMemoryFabric {
    next_id: AtomicU64,
    closed: AtomicBool,
    channels: Mutex<HashMap<String, Vec<(u64, DeliverySink)>>>,
}

impl InMemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses every later subscribe and publish.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .map(|channels| channels.get(channel).map_or(0, Vec::len))
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> Result<(), FabricError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FabricError::Closed);
        }
        Ok(())
    }
}

impl ChannelFabric for InMemoryFabric {
    fn subscribe(&self, channel: &str, sink: DeliverySink) -> Result<ChannelHandle, FabricError> {
        self.ensure_open()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.channels
            .lock()
            .map_err(|_| FabricError::Poisoned)?
            .entry(channel.to_string())
            .or_default()
            .push((id, sink));
        trace!(channel, subscription = id, "subscribed");
        Ok(ChannelHandle {
            id,
            channel: channel.to_string(),
        })
    }

    fn unsubscribe(&self, handle: &ChannelHandle) -> Result<(), FabricError> {
        let mut channels = self.channels.lock().map_err(|_| FabricError::Poisoned)?;
        if let Some(subscribers) = channels.get_mut(&handle.channel) {
            subscribers.retain(|(id, _)| *id != handle.id);
            if subscribers.is_empty() {
                channels.remove(&handle.channel);
            }
        }
        trace!(channel = %handle.channel, subscription = handle.id, "unsubscribed");
        Ok(())
    }

    fn publish(&self, channel: &str, payload: &str) -> Result<usize, FabricError> {
        self.ensure_open()?;
        let mut channels = self.channels.lock().map_err(|_| FabricError::Poisoned)?;
        let Some(subscribers) = channels.get_mut(channel) else {
            return Ok(0);
        };

        // Subscribers whose receiving side is gone are pruned on the way.
        subscribers.retain(|(_, sink)| {
            sink.send(Delivery {
                channel: channel.to_string(),
                payload: payload.to_string(),
            })
            .is_ok()
        });
        let delivered = subscribers.len();
        if subscribers.is_empty() {
            channels.remove(channel);
        }
        trace!(channel, delivered, "published");
        Ok(delivered)
    }
}
