use std::collections::HashSet;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::envelope::Delivery;
use super::rate_limiter::RateLimiter;

/// Maximum queued deliveries per subscription before new ones are dropped.
pub const MAX_OUTBOUND_QUEUE: usize = 1024;

/// Largest payload the relay will carry (bytes).
pub const MAX_PAYLOAD_BYTES: usize = 32 * 1024;

/// One live subscription (a connection, not a participant).
pub type SubscriptionId = Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("publishing too fast")]
    RateLimited,
}

struct Subscriber {
    channel: String,
    uid: String,
    outbound: mpsc::Sender<Delivery>,
}

/// Room-scoped pub/sub relay.
///
/// Every subscription gets its own bounded queue. A publisher never receives
/// its own messages, and a slow subscriber loses deliveries rather than
/// stalling the room.
pub struct ChannelHub {
    subscribers: DashMap<SubscriptionId, Subscriber>,
    /// channel name -> subscriptions on it
    channels: DashMap<String, HashSet<SubscriptionId>>,
    /// Per-uid publish limiter (burst of 20, refill 5 per second).
    publish_limiter: RateLimiter,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            channels: DashMap::new(),
            publish_limiter: RateLimiter::new(20, 0.2),
        }
    }

    /// Join `channel` as `uid`. Returns the subscription handle and its delivery queue.
    pub fn subscribe(&self, channel: &str, uid: &str) -> (SubscriptionId, mpsc::Receiver<Delivery>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(MAX_OUTBOUND_QUEUE);
        self.subscribers.insert(
            id,
            Subscriber {
                channel: channel.to_string(),
                uid: uid.to_string(),
                outbound: tx,
            },
        );
        self.channels.entry(channel.to_string()).or_default().insert(id);
        info!(%channel, %uid, subscription = %id, "channel subscribed");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some((_, sub)) = self.subscribers.remove(&id) else {
            return;
        };
        let now_empty = match self.channels.get_mut(&sub.channel) {
            Some(mut members) => {
                members.remove(&id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.channels.remove_if(&sub.channel, |_, m| m.is_empty());
        }
        info!(channel = %sub.channel, uid = %sub.uid, subscription = %id, "channel unsubscribed");
    }

    /// Fan a payload out to everyone else on the channel. Returns how many
    /// subscriptions it was queued for.
    pub fn publish(&self, channel: &str, publisher: &str, message: &str) -> Result<usize, HubError> {
        if message.len() > MAX_PAYLOAD_BYTES {
            return Err(HubError::PayloadTooLarge);
        }
        if !self.publish_limiter.check(publisher) {
            debug!(%channel, %publisher, "publish rate limited");
            return Err(HubError::RateLimited);
        }

        // Copy the member list so no shard lock is held while sending.
        let members: Vec<SubscriptionId> = match self.channels.get(channel) {
            Some(m) => m.iter().copied().collect(),
            None => return Ok(0),
        };

        let delivery = Delivery {
            channel: channel.to_string(),
            publisher: publisher.to_string(),
            message: message.to_string(),
        };

        let mut delivered = 0;
        for id in members {
            let Some(sub) = self.subscribers.get(&id) else {
                continue;
            };
            if sub.uid == publisher {
                continue;
            }
            if sub.outbound.try_send(delivery.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!(%channel, uid = %sub.uid, "dropping delivery for slow or closed subscriber");
            }
        }
        Ok(delivered)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |m| m.len())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Forget publish budgets of uids idle for longer than `older_than`.
    pub fn cleanup(&self, older_than: Duration) {
        self.publish_limiter.cleanup(older_than);
    }

    /// Number of uids with a tracked publish budget.
    pub fn tracked_publishers(&self) -> usize {
        self.publish_limiter.tracked_keys()
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}
