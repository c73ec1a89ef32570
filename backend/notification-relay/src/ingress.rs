/// Ingress adapter: the front door producers call
///
/// Validates a push request, turns it into a [`DispatchEvent`] and places it
/// on the broker intake queue. Acceptance only means the event was queued;
/// delivery is never awaited.
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerError};
use crate::metrics;
use crate::models::{ChannelId, DispatchEvent, Message};

pub const CODE_OK: i32 = 1;
pub const CODE_REJECTED: i32 = -1;

/// Why a push request was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyUserId,
    EmptyEvent,
    EmptyData,
    QueueFull,
    BrokerClosed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptyUserId => "EMPTY_USER_ID",
            RejectReason::EmptyEvent => "EMPTY_EVENT",
            RejectReason::EmptyData => "EMPTY_DATA",
            RejectReason::QueueFull => "QUEUE_FULL",
            RejectReason::BrokerClosed => "BROKER_CLOSED",
        }
    }
}

impl From<BrokerError> for RejectReason {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::IntakeFull => RejectReason::QueueFull,
            BrokerError::Closed => RejectReason::BrokerClosed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl PushOutcome {
    pub fn code(&self) -> i32 {
        match self {
            PushOutcome::Accepted => CODE_OK,
            PushOutcome::Rejected(_) => CODE_REJECTED,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            PushOutcome::Accepted => "OK",
            PushOutcome::Rejected(reason) => reason.as_str(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, PushOutcome::Accepted)
    }
}

/// Check fields in wire order; the first empty one decides the reason.
pub fn validate(user_id: &str, event: &str, data: &str) -> Result<DispatchEvent, RejectReason> {
    if user_id.is_empty() {
        return Err(RejectReason::EmptyUserId);
    }
    if event.is_empty() {
        return Err(RejectReason::EmptyEvent);
    }
    if data.is_empty() {
        return Err(RejectReason::EmptyData);
    }

    Ok(DispatchEvent::new(
        ChannelId::from(user_id),
        Message::new(event, data),
    ))
}

#[derive(Clone)]
pub struct IngressAdapter {
    broker: Broker,
    enqueue_wait: Duration,
}

impl IngressAdapter {
    /// `enqueue_wait` bounds how long a call may wait on a full intake queue
    pub fn new(broker: Broker, enqueue_wait: Duration) -> Self {
        Self {
            broker,
            enqueue_wait,
        }
    }

    pub async fn push_message(&self, user_id: &str, event: &str, data: &str) -> PushOutcome {
        #[cfg(test)]
        if event == crate::test_support::PANIC_ON_PUSH {
            panic!("push handling failed");
        }

        let outcome = match validate(user_id, event, data) {
            Ok(dispatch) => match self.broker.submit(dispatch, self.enqueue_wait).await {
                Ok(()) => {
                    info!(user_id, event, "message accepted for delivery");
                    PushOutcome::Accepted
                }
                Err(e) => {
                    warn!(user_id, event, error = %e, "push rejected by broker");
                    PushOutcome::Rejected(e.into())
                }
            },
            Err(reason) => {
                debug!(user_id, event, reason = reason.as_str(), "invalid push request");
                PushOutcome::Rejected(reason)
            }
        };

        metrics::record_push(outcome.message());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use std::time::Instant;

    #[test]
    fn test_validation_order() {
        assert_eq!(validate("", "", "").unwrap_err(), RejectReason::EmptyUserId);
        assert_eq!(validate("", "evt", "data").unwrap_err(), RejectReason::EmptyUserId);
        assert_eq!(validate("u1", "", "").unwrap_err(), RejectReason::EmptyEvent);
        assert_eq!(validate("u1", "evt", "").unwrap_err(), RejectReason::EmptyData);

        let event = validate("u1", "evt", "hello").unwrap();
        assert_eq!(event.channel_id, ChannelId::from("u1"));
        assert_eq!(event.message, Message::new("evt", "hello"));
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(PushOutcome::Accepted.code(), 1);
        assert_eq!(PushOutcome::Accepted.message(), "OK");

        let rejected = PushOutcome::Rejected(RejectReason::EmptyData);
        assert_eq!(rejected.code(), -1);
        assert_eq!(rejected.message(), "EMPTY_DATA");
        assert!(!rejected.is_accepted());
    }

    #[tokio::test]
    async fn test_push_without_connection_is_accepted() {
        let (broker, _core) = Broker::start(BrokerConfig::default());
        let ingress = IngressAdapter::new(broker, Duration::from_millis(100));

        let outcome = ingress.push_message("u1", "evt", "hello").await;
        assert_eq!(outcome, PushOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_invalid_push_never_reaches_broker() {
        let (broker, _core) = Broker::new(BrokerConfig {
            intake_capacity: 1,
            inbox_capacity: 1,
        });
        let ingress = IngressAdapter::new(broker.clone(), Duration::ZERO);

        assert_eq!(
            ingress.push_message("", "evt", "data").await,
            PushOutcome::Rejected(RejectReason::EmptyUserId)
        );
        // the single intake slot is still free
        assert_eq!(
            ingress.push_message("u1", "evt", "data").await,
            PushOutcome::Accepted
        );
    }

    #[tokio::test]
    async fn test_saturated_intake_fails_fast() {
        let (broker, _core) = Broker::new(BrokerConfig {
            intake_capacity: 2,
            inbox_capacity: 1,
        });
        let ingress = IngressAdapter::new(broker, Duration::from_millis(25));

        assert!(ingress.push_message("u1", "evt", "1").await.is_accepted());
        assert!(ingress.push_message("u1", "evt", "2").await.is_accepted());

        let started = Instant::now();
        let outcome = ingress.push_message("u1", "evt", "3").await;
        assert_eq!(outcome, PushOutcome::Rejected(RejectReason::QueueFull));
        assert_eq!(outcome.message(), "QUEUE_FULL");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_push_after_shutdown_is_rejected() {
        let (broker, _core) = Broker::start(BrokerConfig::default());
        let ingress = IngressAdapter::new(broker.clone(), Duration::from_millis(100));
        broker.shutdown();

        assert_eq!(
            ingress.push_message("u1", "evt", "data").await,
            PushOutcome::Rejected(RejectReason::BrokerClosed)
        );
    }
}
