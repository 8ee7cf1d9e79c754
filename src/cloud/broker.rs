//! In-process topic and queue broker.
//!
//! [`InProcessBroker`] wraps a [`tokio::sync::broadcast`] channel. Every
//! topic publish and queue send becomes a [`BrokerMessage`] on the
//! channel; consumers subscribe and filter by [`Destination`]. When the
//! ring buffer is full the oldest messages are dropped for lagging
//! receivers, who see `RecvError::Lagged`.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{CloudError, Transport};

/// Where a message was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Fan-out topic.
    Topic(String),
    /// Point-to-point queue.
    Queue(String),
}

impl Destination {
    /// Returns the topic name if this is a topic destination.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::Topic(topic) => Some(topic),
            Self::Queue(_) => None,
        }
    }
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    /// Target topic or queue.
    pub destination: Destination,
    /// JSON payload.
    pub body: String,
}

/// Broadcast broker for serialized events.
#[derive(Debug, Clone)]
pub struct InProcessBroker {
    sender: broadcast::Sender<BrokerMessage>,
}

impl InProcessBroker {
    /// Creates a broker with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a receiver that sees every future message.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerMessage> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn deliver(&self, destination: Destination, body: &str) -> usize {
        let delivered = self
            .sender
            .send(BrokerMessage {
                destination,
                body: body.to_string(),
            })
            .unwrap_or(0);
        tracing::trace!(delivered, "broker message sent");
        delivered
    }
}

#[async_trait]
impl Transport for InProcessBroker {
    async fn publish_to_topic(&self, topic: &str, message: &str) -> Result<(), CloudError> {
        // Publishing to a topic nobody listens to is not an error.
        self.deliver(Destination::Topic(topic.to_string()), message);
        Ok(())
    }

    async fn send_to_queue(&self, queue_url: &str, message: &str) -> Result<(), CloudError> {
        self.deliver(Destination::Queue(queue_url.to_string()), message);
        Ok(())
    }
}
