//! Mock broker client and factory for testing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;

use super::{BrokerClient, ClientFactory, Delivery, DeliveryFuture, ProducerError, Record, Result};

/// How the mock answers each send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryBehavior {
    /// Acknowledge immediately.
    Ack,
    /// Acknowledge after a delay.
    AckAfter(Duration),
    /// Report a delivery failure.
    Fail(String),
    /// Refuse to enqueue (e.g. local queue full).
    Reject(String),
    /// Never complete.
    Hang,
}

/// A record captured by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl SentRecord {
    /// Key as UTF-8, if present.
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Payload parsed as JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
    }
}

/// In-memory broker client.
pub struct MockBrokerClient {
    behavior: Mutex<DeliveryBehavior>,
    sent: Mutex<Vec<SentRecord>>,
    flushes: AtomicUsize,
    properties: BTreeMap<String, String>,
}

impl Default for MockBrokerClient {
    fn default() -> Self {
        Self::with_properties(BTreeMap::new())
    }
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_properties(properties: BTreeMap<String, String>) -> Self {
        Self {
            behavior: Mutex::new(DeliveryBehavior::Ack),
            sent: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            properties,
        }
    }

    pub fn set_behavior(&self, behavior: DeliveryBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Number of send calls, including rejected ones.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Native properties the client was built from.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

impl BrokerClient for MockBrokerClient {
    fn send(&self, record: Record<'_>) -> Result<DeliveryFuture> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentRecord {
                topic: record.topic.to_string(),
                key: record.key.map(<[u8]>::to_vec),
                payload: record.payload.to_vec(),
            });

        let behavior = self
            .behavior
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let offset = i64::try_from(self.sent_count()).unwrap_or(i64::MAX) - 1;
        let delivered = Delivery {
            partition: 0,
            offset,
        };

        match behavior {
            DeliveryBehavior::Ack => Ok(futures::future::ready(Ok(delivered)).boxed()),
            DeliveryBehavior::AckAfter(delay) => Ok(async move {
                tokio::time::sleep(delay).await;
                Ok(delivered)
            }
            .boxed()),
            DeliveryBehavior::Fail(message) => {
                Ok(futures::future::ready(Err(ProducerError::Delivery(message))).boxed())
            }
            DeliveryBehavior::Reject(message) => Err(ProducerError::Enqueue(message)),
            DeliveryBehavior::Hang => Ok(futures::future::pending::<Result<Delivery>>().boxed()),
        }
    }

    fn flush(&self, _timeout: Duration) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out `MockBrokerClient`s and remembering each build.
#[derive(Default)]
pub struct MockClientFactory {
    created: Mutex<Vec<Arc<MockBrokerClient>>>,
    fail_with: Mutex<Option<String>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent builds fail (`Some`) or succeed (`None`).
    pub fn set_failure(&self, message: Option<&str>) {
        *self.fail_with.lock().unwrap_or_else(PoisonError::into_inner) =
            message.map(str::to_string);
    }

    pub fn created_count(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The most recently built client.
    pub fn last_client(&self) -> Option<Arc<MockBrokerClient>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl ClientFactory for MockClientFactory {
    fn create(&self, properties: &BTreeMap<String, String>) -> Result<Arc<dyn BrokerClient>> {
        if let Some(message) = self
            .fail_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(ProducerError::Connection(message));
        }

        let client = Arc::new(MockBrokerClient::with_properties(properties.clone()));
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&client));
        Ok(client)
    }
}
