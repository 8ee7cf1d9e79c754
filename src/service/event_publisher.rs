//! Fan-out of domain events to per-category sink lists.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cloud::{CloudError, Transport};
use crate::config::EventEndpoints;
use crate::domain::{DomainEvent, EventCategory};
use crate::error::GatewayError;

/// One delivery target.
#[derive(Debug, Clone)]
pub enum Sink {
    /// Publish to a fan-out topic.
    Topic {
        /// Transport that owns the topic.
        transport: Arc<dyn Transport>,
        /// Topic name or ARN.
        topic: String,
    },
    /// Send to a point-to-point queue.
    Queue {
        /// Transport that owns the queue.
        transport: Arc<dyn Transport>,
        /// Queue URL.
        queue_url: String,
    },
}

impl Sink {
    async fn deliver(&self, message: &str) -> Result<(), CloudError> {
        match self {
            Self::Topic { transport, topic } => transport.publish_to_topic(topic, message).await,
            Self::Queue {
                transport,
                queue_url,
            } => transport.send_to_queue(queue_url, message).await,
        }
    }

    fn target(&self) -> &str {
        match self {
            Self::Topic { topic, .. } => topic,
            Self::Queue { queue_url, .. } => queue_url,
        }
    }
}

/// Publishes each event to the ordered sink list of its category.
///
/// A category with no sinks is disabled and publishing to it is a no-op.
/// Sinks are invoked in order; the first failure aborts the remaining
/// sinks and is returned.
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    sinks: HashMap<EventCategory, Vec<Sink>>,
}

impl EventPublisher {
    /// Creates a publisher with every category disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds sink lists from configured endpoints, all on `transport`.
    #[must_use]
    pub fn from_endpoints(transport: &Arc<dyn Transport>, endpoints: &EventEndpoints) -> Self {
        let topic = |endpoint: &Option<String>| {
            endpoint.as_ref().map(|topic| Sink::Topic {
                transport: Arc::clone(transport),
                topic: topic.clone(),
            })
        };
        let queue = |endpoint: &Option<String>| {
            endpoint.as_ref().map(|queue_url| Sink::Queue {
                transport: Arc::clone(transport),
                queue_url: queue_url.clone(),
            })
        };

        [
            (EventCategory::AccountCreate, topic(&endpoints.account_created_topic)),
            (EventCategory::AccountUpdate, topic(&endpoints.account_updated_topic)),
            (EventCategory::AccountDelete, topic(&endpoints.account_deleted_topic)),
            (EventCategory::AccountReset, queue(&endpoints.reset_queue_url)),
            (EventCategory::LeaseCreate, topic(&endpoints.lease_added_topic)),
            (EventCategory::LeaseEnd, topic(&endpoints.lease_ended_topic)),
            (EventCategory::LeaseUpdate, topic(&endpoints.lease_updated_topic)),
        ]
        .into_iter()
        .fold(Self::new(), |publisher, (category, sink)| match sink {
            Some(sink) => publisher.with_sink(category, sink),
            None => publisher,
        })
    }

    /// Appends `sink` to the list of `category`.
    #[must_use]
    pub fn with_sink(mut self, category: EventCategory, sink: Sink) -> Self {
        self.sinks.entry(category).or_default().push(sink);
        self
    }

    /// Returns `true` if `category` has at least one sink.
    #[must_use]
    pub fn is_enabled(&self, category: EventCategory) -> bool {
        self.sinks.get(&category).is_some_and(|s| !s.is_empty())
    }

    /// Publishes `event` to every sink of its category, in order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the event cannot be serialized
    /// or a sink rejects it.
    pub async fn publish(&self, event: &DomainEvent) -> Result<(), GatewayError> {
        let category = event.category();
        let Some(sinks) = self.sinks.get(&category).filter(|s| !s.is_empty()) else {
            tracing::trace!(category = category.as_str(), "event category disabled");
            return Ok(());
        };

        let message = event
            .to_message()
            .map_err(|e| GatewayError::internal("Failed to serialize event", e))?;

        for sink in sinks {
            if let Err(e) = sink.deliver(&message).await {
                tracing::error!(
                    category = category.as_str(),
                    target = sink.target(),
                    error = %e,
                    "event delivery failed"
                );
                return Err(GatewayError::internal(
                    format!("Failed to publish {} event", category.as_str()),
                    e,
                ));
            }
        }
        tracing::debug!(category = category.as_str(), sinks = sinks.len(), "event published");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::cloud::broker::Destination;
    use crate::domain::{
        Account, AccountStatus, Lease, LeaseBudget, LeaseStatusReason, LeaseUpdate,
    };
    use crate::fixtures::RecordingTransport;

    fn account() -> Account {
        Account::admit("1".into(), "admin".into(), "principal".into())
    }

    #[tokio::test]
    async fn disabled_category_is_a_no_op() {
        let publisher = EventPublisher::new();
        assert!(!publisher.is_enabled(EventCategory::AccountCreate));
        assert!(publisher.publish(&DomainEvent::AccountCreated(account())).await.is_ok());
    }

    #[tokio::test]
    async fn endpoints_map_to_topics_and_reset_queue() {
        let recorder = Arc::new(RecordingTransport::default());
        let transport: Arc<dyn Transport> = Arc::clone(&recorder) as Arc<dyn Transport>;
        let endpoints = EventEndpoints {
            account_created_topic: Some("created".into()),
            reset_queue_url: Some("https://queue/reset".into()),
            ..EventEndpoints::default()
        };
        let publisher = EventPublisher::from_endpoints(&transport, &endpoints);
        assert!(publisher.is_enabled(EventCategory::AccountCreate));
        assert!(publisher.is_enabled(EventCategory::AccountReset));
        assert!(!publisher.is_enabled(EventCategory::LeaseEnd));

        let _ = publisher.publish(&DomainEvent::AccountCreated(account())).await;
        let _ = publisher.publish(&DomainEvent::AccountReset(account())).await;
        let sent = recorder.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent.first().map(|m| &m.destination),
            Some(&Destination::Topic("created".into()))
        );
        assert_eq!(
            sent.get(1).map(|m| &m.destination),
            Some(&Destination::Queue("https://queue/reset".into()))
        );
    }

    #[tokio::test]
    async fn lease_updates_route_to_their_topic() {
        let recorder = Arc::new(RecordingTransport::default());
        let transport: Arc<dyn Transport> = Arc::clone(&recorder) as Arc<dyn Transport>;
        let endpoints = EventEndpoints {
            lease_updated_topic: Some("lease-updated".into()),
            ..EventEndpoints::default()
        };
        let publisher = EventPublisher::from_endpoints(&transport, &endpoints);

        let lease = Lease::activate(
            "p1".into(),
            "1".into(),
            LeaseBudget {
                amount: 10.0,
                currency: "USD".into(),
                notification_emails: Vec::new(),
            },
            Utc::now() + TimeDelta::days(1),
        );
        let event = DomainEvent::LeaseUpdated(LeaseUpdate {
            old_lease: lease.clone(),
            new_lease: lease.ended(LeaseStatusReason::Expired),
        });
        assert!(publisher.publish(&event).await.is_ok());
        let sent = recorder.sent();
        assert_eq!(
            sent.first().map(|m| &m.destination),
            Some(&Destination::Topic("lease-updated".into()))
        );
        assert!(sent.first().is_some_and(|m| m.body.contains("Expired")));
    }

    #[tokio::test]
    async fn first_sink_failure_stops_fan_out() {
        let failing = Arc::new(RecordingTransport::failing());
        let healthy = Arc::new(RecordingTransport::default());
        let publisher = EventPublisher::new()
            .with_sink(
                EventCategory::AccountUpdate,
                Sink::Topic {
                    transport: Arc::clone(&failing) as Arc<dyn Transport>,
                    topic: "first".into(),
                },
            )
            .with_sink(
                EventCategory::AccountUpdate,
                Sink::Topic {
                    transport: Arc::clone(&healthy) as Arc<dyn Transport>,
                    topic: "second".into(),
                },
            );

        let event =
            DomainEvent::account_updated(account(), account().with_status(AccountStatus::Ready));
        let result = publisher.publish(&event).await;
        assert!(matches!(result, Err(GatewayError::Internal { .. })));
        assert!(healthy.sent().is_empty());
    }
}
