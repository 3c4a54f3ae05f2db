//! Outbox rows.

use chrono::{DateTime, Utc};
use common::{InvoiceId, OutboxEventId};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::Result;

/// An event waiting to be appended to the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub event_type: String,
    pub aggregate_id: InvoiceId,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl NewOutboxEvent {
    /// Builds the row for a domain event, stamped with the current time.
    pub fn from_event<E: DomainEvent>(event: &E) -> Result<Self> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            aggregate_id: event.aggregate_id(),
            payload: event.to_payload()?,
            occurred_at: Utc::now(),
        })
    }
}

/// A stored outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: OutboxEventId,
    pub event_type: String,
    pub aggregate_id: InvoiceId,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Invoice, topics};

    #[test]
    fn from_event_copies_type_and_aggregate() {
        let invoice = Invoice::open("NF-001", None).unwrap();
        let row = NewOutboxEvent::from_event(&invoice.created_event()).unwrap();

        assert_eq!(row.event_type, topics::INVOICE_CREATED);
        assert_eq!(row.aggregate_id, invoice.id());
        assert_eq!(row.payload["number"], "NF-001");
    }
}
