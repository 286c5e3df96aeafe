//! Broker client lifecycle.
//!
//! This module contains:
//! - `BrokerClient` trait: non-blocking enqueue of one record plus flush
//! - `ClientFactory` trait: builds a client from native properties
//! - `ProducerHolder`: owns the one client shared by every listener
//! - Implementations: Kafka (librdkafka), Mock
//!
//! The holder is created by the composition root and handed to whoever needs
//! to publish. The first successful `init_if_needed` installs the client;
//! every later call returns that same client, whatever config it carries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::config::ProducerConfig;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaBrokerClient, KafkaClientFactory};
pub use mock::{DeliveryBehavior, MockBrokerClient, MockClientFactory};

// ============================================================================
// Traits
// ============================================================================

/// Result type for producer operations.
pub type Result<T> = std::result::Result<T, ProducerError>;

/// Errors that can occur while building or using the broker client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    #[error("Invalid producer config: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Enqueue failed: {0}")]
    Enqueue(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Delivery report dropped before completion")]
    Canceled,

    #[error("Flush failed: {0}")]
    Flush(String),
}

impl ProducerError {
    /// Short label for the `reason` metric attribute.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connection(_) => "connection",
            Self::Enqueue(_) => "enqueue",
            Self::Delivery(_) => "delivery",
            Self::Canceled => "canceled",
            Self::Flush(_) => "flush",
        }
    }
}

/// One outbound message. Keys and payloads are raw bytes.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub topic: &'a str,
    pub key: Option<&'a [u8]>,
    pub payload: &'a [u8],
}

/// Where the broker stored an acknowledged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Completes once the broker acknowledges the record, or the client gives up
/// after its own retries.
pub type DeliveryFuture = BoxFuture<'static, Result<Delivery>>;

/// Publishing client.
///
/// Implementations:
/// - `KafkaBrokerClient`: librdkafka `FutureProducer`
/// - `MockBrokerClient`: in-memory double for testing
pub trait BrokerClient: Send + Sync {
    /// Hand a record to the client without waiting for the network.
    ///
    /// Batching and retries stay inside the client; the returned future only
    /// reports the final outcome.
    fn send(&self, record: Record<'_>) -> Result<DeliveryFuture>;

    /// Wait for queued records to be delivered, up to `timeout`.
    fn flush(&self, timeout: Duration) -> Result<()>;
}

/// Builds a broker client from native properties.
pub trait ClientFactory: Send + Sync {
    fn create(&self, properties: &BTreeMap<String, String>) -> Result<Arc<dyn BrokerClient>>;
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Owner of the single broker client.
///
/// Initialization is serialized by a mutex; the `OnceLock` marks completion
/// and serves every later read without locking.
pub struct ProducerHolder {
    factory: Arc<dyn ClientFactory>,
    init_lock: Mutex<()>,
    client: OnceLock<Arc<dyn BrokerClient>>,
}

impl ProducerHolder {
    /// Create an empty holder that builds its client with `factory`.
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            init_lock: Mutex::new(()),
            client: OnceLock::new(),
        }
    }

    /// Create an empty holder backed by librdkafka.
    #[cfg(feature = "kafka")]
    pub fn kafka() -> Self {
        Self::new(Arc::new(KafkaClientFactory))
    }

    /// Install a client built from `config` unless one already exists.
    ///
    /// Safe to call from any number of threads; exactly one client is ever
    /// built. On error nothing is installed and a later call may retry.
    pub fn init_if_needed(&self, config: &ProducerConfig) -> Result<Arc<dyn BrokerClient>> {
        if let Some(client) = self.client.get() {
            return Ok(Arc::clone(client));
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(client) = self.client.get() {
            debug!("Broker client already initialized, ignoring config");
            return Ok(Arc::clone(client));
        }

        config
            .validate()
            .map_err(|e| ProducerError::Config(e.to_string()))?;

        let client = self.factory.create(&config.native_properties())?;
        let client = Arc::clone(self.client.get_or_init(|| client));

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            acks = %config.acks,
            max_in_flight = config.effective_max_in_flight(),
            "Broker client initialized"
        );

        Ok(client)
    }

    /// The installed client, if initialization has succeeded.
    pub fn client(&self) -> Option<Arc<dyn BrokerClient>> {
        self.client.get().cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.client.get().is_some()
    }

    /// Flush the installed client. A holder without a client has nothing to
    /// flush.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        match self.client.get() {
            Some(client) => client.flush(timeout),
            None => Ok(()),
        }
    }
}
