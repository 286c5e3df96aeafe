//! Kafka broker client.
//!
//! Wraps a librdkafka `FutureProducer`. Records are enqueued with
//! `send_result`, which never waits on the network; librdkafka batches
//! (`linger.ms`, `batch.size`) and retries (`retries`, `delivery.timeout.ms`)
//! on its own background thread and resolves the delivery future once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::info;

use super::{BrokerClient, ClientFactory, Delivery, DeliveryFuture, ProducerError, Record, Result};

/// Broker client backed by librdkafka.
pub struct KafkaBrokerClient {
    producer: FutureProducer,
}

impl KafkaBrokerClient {
    /// Build a producer from native librdkafka properties.
    pub fn new(properties: &BTreeMap<String, String>) -> Result<Self> {
        let mut config = ClientConfig::new();
        for (key, value) in properties {
            config.set(key, value);
        }

        let producer: FutureProducer = config.create().map_err(|e| {
            ProducerError::Connection(format!("Failed to create Kafka producer: {}", e))
        })?;

        info!(
            bootstrap_servers = properties.get("bootstrap.servers").map(String::as_str).unwrap_or_default(),
            "Kafka producer created"
        );

        Ok(Self { producer })
    }
}

impl BrokerClient for KafkaBrokerClient {
    fn send(&self, record: Record<'_>) -> Result<DeliveryFuture> {
        let mut future_record = FutureRecord::<[u8], [u8]>::to(record.topic).payload(record.payload);
        if let Some(key) = record.key {
            future_record = future_record.key(key);
        }

        let delivery = self
            .producer
            .send_result(future_record)
            .map_err(|(e, _)| ProducerError::Enqueue(e.to_string()))?;

        Ok(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => Ok(Delivery { partition, offset }),
                Ok(Err((e, _))) => Err(ProducerError::Delivery(e.to_string())),
                Err(_) => Err(ProducerError::Canceled),
            }
        }
        .boxed())
    }

    fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| ProducerError::Flush(e.to_string()))
    }
}

/// Builds `KafkaBrokerClient`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaClientFactory;

impl ClientFactory for KafkaClientFactory {
    fn create(&self, properties: &BTreeMap<String, String>) -> Result<Arc<dyn BrokerClient>> {
        Ok(Arc::new(KafkaBrokerClient::new(properties)?))
    }
}
