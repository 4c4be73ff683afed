use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use super::envelope::Delivery;
use super::hub::{ChannelHub, SubscriptionId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("not subscribed to {0}")]
    NotSubscribed(String),
    #[error("login rejected: {0}")]
    LoginRejected(String),
    #[error("publish rejected: {0}")]
    PublishRejected(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Client side of the room messaging channel.
///
/// `next_delivery` must be cancel-safe: a session selects over it together
/// with timers and drops the future whenever another branch wins.
#[async_trait]
pub trait ChannelTransport: Send {
    async fn login(&mut self, uid: &str, token: &str) -> Result<(), ChannelError>;
    async fn subscribe(&mut self, channel: &str) -> Result<(), ChannelError>;
    async fn publish(&mut self, channel: &str, message: &str) -> Result<(), ChannelError>;
    /// Waits for the next message from someone else. `None` once the channel is gone.
    async fn next_delivery(&mut self) -> Option<Delivery>;
    async fn unsubscribe(&mut self, channel: &str) -> Result<(), ChannelError>;
    async fn logout(&mut self) -> Result<(), ChannelError>;
}

/// In-process transport straight onto a [`ChannelHub`].
pub struct HubTransport {
    hub: Arc<ChannelHub>,
    uid: Option<String>,
    subscription: Option<(SubscriptionId, String)>,
    inbound: Option<mpsc::Receiver<Delivery>>,
}

impl HubTransport {
    pub fn new(hub: Arc<ChannelHub>) -> Self {
        Self {
            hub,
            uid: None,
            subscription: None,
            inbound: None,
        }
    }

    fn drop_subscription(&mut self) {
        if let Some((id, channel)) = self.subscription.take() {
            self.hub.unsubscribe(id);
            debug!(%channel, "hub transport left channel");
        }
        self.inbound = None;
    }
}

#[async_trait]
impl ChannelTransport for HubTransport {
    async fn login(&mut self, uid: &str, token: &str) -> Result<(), ChannelError> {
        if token.is_empty() {
            return Err(ChannelError::LoginRejected("missing token".into()));
        }
        self.uid = Some(uid.to_string());
        Ok(())
    }

    async fn subscribe(&mut self, channel: &str) -> Result<(), ChannelError> {
        let uid = self.uid.clone().ok_or(ChannelError::NotLoggedIn)?;
        if self
            .subscription
            .as_ref()
            .is_some_and(|(_, current)| current == channel)
        {
            return Ok(());
        }
        self.drop_subscription();
        let (id, rx) = self.hub.subscribe(channel, &uid);
        self.subscription = Some((id, channel.to_string()));
        self.inbound = Some(rx);
        Ok(())
    }

    async fn publish(&mut self, channel: &str, message: &str) -> Result<(), ChannelError> {
        let uid = self.uid.as_deref().ok_or(ChannelError::NotLoggedIn)?;
        match &self.subscription {
            Some((_, current)) if current == channel => {}
            _ => return Err(ChannelError::NotSubscribed(channel.to_string())),
        }
        self.hub
            .publish(channel, uid, message)
            .map(|_| ())
            .map_err(|e| ChannelError::PublishRejected(e.to_string()))
    }

    async fn next_delivery(&mut self) -> Option<Delivery> {
        match self.inbound.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<(), ChannelError> {
        match &self.subscription {
            Some((_, current)) if current == channel => {
                self.drop_subscription();
                Ok(())
            }
            _ => Err(ChannelError::NotSubscribed(channel.to_string())),
        }
    }

    async fn logout(&mut self) -> Result<(), ChannelError> {
        self.drop_subscription();
        self.uid = None;
        Ok(())
    }
}

impl Drop for HubTransport {
    fn drop(&mut self) {
        self.drop_subscription();
    }
}
