//! Record dispatch.
//!
//! The dispatcher turns one `(topic, key, body)` into exactly one call to the
//! broker client's enqueue primitive and wraps it in instrumentation.
//!
//! - `Async`: returns once the record is enqueued. A spawned task waits for
//!   the delivery report, records the outcome and logs failures.
//! - `Sync`: waits for the same delivery report, bounded by the sync timeout,
//!   and returns failures to the caller.
//!
//! Neither mode changes how the client batches or retries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::DEFAULT_SYNC_TIMEOUT_MS;
use crate::producer::{ProducerError, ProducerHolder, Record};
use crate::utils::metrics::SendMetrics;

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors a dispatch can report to its caller.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Broker client not initialized")]
    NotReady,

    #[error("Async dispatch requires a Tokio runtime")]
    NoRuntime,

    #[error("No acknowledgement within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Producer(#[from] ProducerError),
}

impl DispatchError {
    /// Short label for the `reason` metric attribute.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::NoRuntime => "no_runtime",
            Self::Timeout(_) => "timeout",
            Self::Producer(e) => e.reason(),
        }
    }
}

/// Whether a send waits for acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Fire and forget.
    #[default]
    Async,
    /// Wait for acknowledgement, bounded by the sync timeout.
    Sync,
}

impl DispatchMode {
    /// Map the `sync` configuration flag.
    pub fn from_sync_flag(sync: bool) -> Self {
        if sync {
            Self::Sync
        } else {
            Self::Async
        }
    }
}

/// Publishes serialized payloads through the shared broker client.
pub struct Dispatcher {
    producers: Arc<ProducerHolder>,
    metrics: SendMetrics,
    sync_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over an (initialized or not yet initialized) holder.
    ///
    /// Sync sends wait at most 10 s unless
    /// [`with_sync_timeout`](Self::with_sync_timeout) says otherwise.
    pub fn new(producers: Arc<ProducerHolder>, metrics: SendMetrics) -> Self {
        Self {
            producers,
            metrics,
            sync_timeout: Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS),
        }
    }

    /// Set the bound on sync sends.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn metrics(&self) -> &SendMetrics {
        &self.metrics
    }

    /// Publish one record.
    ///
    /// A `None` key leaves partitioning to the client. The topic is not
    /// validated here.
    pub async fn send(
        &self,
        topic: &str,
        key: Option<&str>,
        body: &[u8],
        mode: DispatchMode,
    ) -> Result<()> {
        let client = self.producers.client().ok_or(DispatchError::NotReady)?;
        let runtime = match mode {
            DispatchMode::Async => {
                Some(tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?)
            }
            DispatchMode::Sync => None,
        };

        self.metrics.record_payload_size(topic, body.len());
        let sample = self.metrics.start_sample(topic);

        let record = Record {
            topic,
            key: key.map(str::as_bytes),
            payload: body,
        };
        let delivery = match client.send(record) {
            Ok(delivery) => delivery,
            Err(e) => {
                sample.stop_failure(e.reason());
                return Err(e.into());
            }
        };

        match runtime {
            Some(runtime) => {
                let topic = topic.to_string();
                runtime.spawn(async move {
                    match delivery.await {
                        Ok(delivered) => {
                            debug!(
                                topic = %topic,
                                partition = delivered.partition,
                                offset = delivered.offset,
                                "Event delivered"
                            );
                            sample.stop_success();
                        }
                        Err(e) => {
                            warn!(topic = %topic, error = %e, "Async event delivery failed");
                            sample.stop_failure(e.reason());
                        }
                    }
                });
                Ok(())
            }
            None => match tokio::time::timeout(self.sync_timeout, delivery).await {
                Ok(Ok(delivered)) => {
                    debug!(
                        topic = %topic,
                        partition = delivered.partition,
                        offset = delivered.offset,
                        "Event delivered"
                    );
                    sample.stop_success();
                    Ok(())
                }
                Ok(Err(e)) => {
                    sample.stop_failure(e.reason());
                    Err(e.into())
                }
                Err(_) => {
                    let e = DispatchError::Timeout(self.sync_timeout);
                    sample.stop_failure(e.reason());
                    Err(e)
                }
            },
        }
    }
}
