//! Inbound message model and handler contract.

use async_trait::async_trait;
use common::MessageId;

/// A message delivered by the broker, detached from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Message id set by the producer, if any.
    pub message_id: Option<String>,
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Vec<u8>,
    /// True if the broker delivered this message before.
    pub redelivered: bool,
}

impl InboundMessage {
    /// Returns the identity used for deduplication.
    ///
    /// The producer's message id when present, otherwise the delivery tag
    /// combined with the routing key.
    pub fn dedup_id(&self) -> MessageId {
        match self.message_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => MessageId::new(id),
            _ => MessageId::from_delivery(self.delivery_tag, &self.routing_key),
        }
    }
}

/// Result of handling one message successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The business effect was applied and the message recorded.
    Applied,
    /// Nothing to change, recorded as processed so it is not retried.
    Ignored(&'static str),
    /// The message was processed before.
    Duplicate,
    /// No handler for the routing key. Acknowledged for forward compatibility.
    Unrecognized,
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleOutcome::Applied => "applied",
            HandleOutcome::Ignored(_) => "ignored",
            HandleOutcome::Duplicate => "duplicate",
            HandleOutcome::Unrecognized => "unrecognized",
        }
    }
}

/// Applies inbound messages.
///
/// `Ok` means the message may be acknowledged: its effect, if any, is
/// committed. `Err` means nothing was committed and the broker should
/// deliver it again.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, message: &InboundMessage) -> Result<HandleOutcome, Self::Error>;
}

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Ack,
    /// Negative acknowledgement with requeue.
    Requeue,
}

/// Runs a handler on one message and decides how to acknowledge it.
///
/// Failures are always requeued. There is no redelivery ceiling: a message
/// that can never be handled is delivered forever unless the broker has a
/// dead-letter policy.
pub async fn dispatch<H: MessageHandler + ?Sized>(
    handler: &H,
    message: &InboundMessage,
) -> Acknowledgement {
    let message_id = message.dedup_id();

    if message.redelivered {
        tracing::warn!(
            %message_id,
            routing_key = %message.routing_key,
            "handling redelivered message"
        );
    }

    match handler.handle(message).await {
        Ok(outcome) => {
            metrics::counter!("inbound_messages_total", "outcome" => outcome.as_str())
                .increment(1);
            match outcome {
                HandleOutcome::Ignored(reason) => tracing::info!(
                    %message_id,
                    routing_key = %message.routing_key,
                    reason,
                    "message ignored"
                ),
                _ => tracing::debug!(
                    %message_id,
                    routing_key = %message.routing_key,
                    outcome = outcome.as_str(),
                    "message handled"
                ),
            }
            Acknowledgement::Ack
        }
        Err(e) => {
            metrics::counter!("inbound_messages_total", "outcome" => "failed").increment(1);
            tracing::error!(
                %message_id,
                routing_key = %message.routing_key,
                error = %e,
                "message handling failed, requeueing"
            );
            Acknowledgement::Requeue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(message_id: Option<&str>) -> InboundMessage {
        InboundMessage {
            message_id: message_id.map(str::to_string),
            delivery_tag: 9,
            routing_key: "inventory.reservation-rejected".to_string(),
            body: b"{}".to_vec(),
            redelivered: false,
        }
    }

    #[test]
    fn dedup_id_prefers_producer_id() {
        assert_eq!(message(Some("evt-1")).dedup_id().as_str(), "evt-1");
    }

    #[test]
    fn dedup_id_falls_back_to_delivery_tag_and_routing_key() {
        assert_eq!(
            message(None).dedup_id().as_str(),
            "9-inventory.reservation-rejected"
        );
        assert_eq!(
            message(Some("  ")).dedup_id().as_str(),
            "9-inventory.reservation-rejected"
        );
    }

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    struct Fixed(Result<HandleOutcome, ()>);

    #[async_trait]
    impl MessageHandler for Fixed {
        type Error = Boom;

        async fn handle(&self, _message: &InboundMessage) -> Result<HandleOutcome, Boom> {
            self.0.map_err(|()| Boom)
        }
    }

    #[tokio::test]
    async fn every_success_is_acknowledged() {
        for outcome in [
            HandleOutcome::Applied,
            HandleOutcome::Ignored("invoice not open"),
            HandleOutcome::Duplicate,
            HandleOutcome::Unrecognized,
        ] {
            let ack = dispatch(&Fixed(Ok(outcome)), &message(None)).await;
            assert_eq!(ack, Acknowledgement::Ack);
        }
    }

    #[tokio::test]
    async fn failures_are_requeued() {
        let mut redelivered = message(Some("evt-1"));
        redelivered.redelivered = true;

        assert_eq!(
            dispatch(&Fixed(Err(())), &message(None)).await,
            Acknowledgement::Requeue
        );
        assert_eq!(
            dispatch(&Fixed(Err(())), &redelivered).await,
            Acknowledgement::Requeue
        );
    }
}
