//! IAM Event Relay
//!
//! Forwards identity-provider lifecycle events (user actions and
//! administrative actions) to Kafka as JSON messages.
//!
//! ```text
//! [Host] -> EventListener -> payload -> Dispatcher -> ProducerHolder -> [Kafka]
//!                                           |
//!                                           v
//!                                      SendMetrics
//! ```
//!
//! The host embeds an [`listener::EventListenerFactory`], creates listeners
//! from it and calls them for every event. Forwarding failures never reach
//! the host.

pub mod config;
pub mod dispatch;
pub mod host;
pub mod listener;
pub mod payload;
pub mod producer;
pub mod utils;

pub use config::BridgeConfig;
pub use listener::{EventListener, EventListenerFactory, EventListenerProvider, ForwardOutcome};
