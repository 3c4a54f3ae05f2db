//! Message transport for the billing service.
//!
//! - [`EventBus`]: where outbox rows are forwarded to. [`AmqpEventBus`]
//!   publishes to a RabbitMQ topic exchange, [`InMemoryEventBus`] records
//!   messages for tests.
//! - [`MessageHandler`] and [`AmqpConsumer`]: at-least-once consumption of
//!   inbound events, acknowledged only after the handler's transaction
//!   committed.

pub mod amqp;
pub mod bus;
pub mod error;
pub mod inbound;
pub mod memory;

pub use amqp::{AmqpConfig, AmqpConsumer, AmqpEventBus};
pub use bus::{EventBus, OutboundMessage};
pub use error::{BusError, Result};
pub use inbound::{Acknowledgement, HandleOutcome, InboundMessage, MessageHandler, dispatch};
pub use memory::InMemoryEventBus;
