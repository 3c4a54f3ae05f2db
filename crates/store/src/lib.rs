//! Persistence for the billing service.
//!
//! Every business write goes through a [`UnitOfWork`], a single local
//! transaction that also carries the outbox append and the inbound dedup
//! marker. Two implementations are provided: [`PostgresStore`] for
//! production and [`InMemoryStore`] for tests.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod store;

pub use common::{InvoiceId, MessageId, OutboxEventId, PrintRequestId};
pub use error::{IDEMPOTENCY_KEY_CONSTRAINT, PROCESSED_MESSAGE_CONSTRAINT, Result, StoreError};
pub use memory::{InMemoryStore, InMemoryUnitOfWork};
pub use outbox::{NewOutboxEvent, OutboxEvent};
pub use postgres::{PostgresStore, PostgresUnitOfWork};
pub use store::{BillingStore, UnitOfWork};
