//! Change bus for Oxide CI.
//!
//! Delivers every persisted change to the consumers registered for a topic,
//! in registration order, isolating consumer failures from the publisher.

mod bus;
pub mod dispatcher;
pub mod metrics;

pub use bus::{ChangeBus, ChangeConsumer, Subscription, consumer_fn, panic_message};
pub use dispatcher::{CHANGES_TOPIC, ChangeDispatcher};
pub use metrics::{BusMetrics, MetricsSnapshot};
