//! OTel-native send instrumentation.
//!
//! Every send is wrapped in a [`Sample`]: latency, in-flight count and an
//! outcome counter tagged by topic (and failure reason). Per-topic
//! histograms are created on first use and cached.
//!
//! Without a meter (or without the `otel` feature) every operation is a
//! no-op. Naming follows OTel semantic conventions (dot-separated).

#[cfg(feature = "otel")]
use std::collections::HashMap;
#[cfg(feature = "otel")]
use std::sync::atomic::{AtomicI64, Ordering};
#[cfg(feature = "otel")]
use std::sync::{Arc, PoisonError, RwLock};
#[cfg(feature = "otel")]
use std::time::Instant;

#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "otel")]
use opentelemetry::{global, KeyValue};

/// Instrumentation scope name.
pub const METER_NAME: &str = "iam-event-relay";

/// Latency of a send, enqueue to acknowledgement.
pub const SEND_DURATION: &str = "event_relay.producer.send.duration";
/// Serialized payload size.
pub const PAYLOAD_SIZE: &str = "event_relay.producer.payload.size";
/// Sends started but not yet completed.
pub const IN_FLIGHT: &str = "event_relay.producer.in_flight";
/// Completed sends by outcome.
pub const SEND_TOTAL: &str = "event_relay.producer.send.total";

/// Send instrumentation handle. Cheap to clone.
#[derive(Clone, Default)]
pub struct SendMetrics {
    #[cfg(feature = "otel")]
    backend: Option<Arc<Backend>>,
}

#[cfg(feature = "otel")]
struct Backend {
    meter: Meter,
    in_flight: AtomicI64,
    in_flight_gauge: UpDownCounter<i64>,
    send_total: Counter<u64>,
    topics: RwLock<HashMap<String, Arc<TopicInstruments>>>,
}

#[cfg(feature = "otel")]
struct TopicInstruments {
    topic: KeyValue,
    send_duration: Histogram<f64>,
    payload_size: Histogram<u64>,
}

impl SendMetrics {
    /// Instrumentation that records nothing.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Record through `meter`.
    #[cfg(feature = "otel")]
    pub fn new(meter: Meter) -> Self {
        let in_flight_gauge = meter
            .i64_up_down_counter(IN_FLIGHT)
            .with_description("Event relay sends awaiting acknowledgement")
            .build();
        let send_total = meter
            .u64_counter(SEND_TOTAL)
            .with_description("Total event relay sends by outcome")
            .build();

        Self {
            backend: Some(Arc::new(Backend {
                meter,
                in_flight: AtomicI64::new(0),
                in_flight_gauge,
                send_total,
                topics: RwLock::new(HashMap::new()),
            })),
        }
    }

    /// Record through the process-wide meter provider.
    #[cfg(feature = "otel")]
    pub fn global() -> Self {
        Self::new(global::meter(METER_NAME))
    }

    /// The global meter when built with `otel`, otherwise a no-op.
    pub fn auto() -> Self {
        #[cfg(feature = "otel")]
        {
            Self::global()
        }
        #[cfg(not(feature = "otel"))]
        {
            Self::noop()
        }
    }

    /// Whether a backend is attached.
    pub fn is_enabled(&self) -> bool {
        #[cfg(feature = "otel")]
        {
            self.backend.is_some()
        }
        #[cfg(not(feature = "otel"))]
        {
            false
        }
    }

    /// Begin timing a send to `topic`.
    pub fn start_sample(&self, topic: &str) -> Sample {
        #[cfg(feature = "otel")]
        {
            let Some(backend) = &self.backend else {
                return Sample::noop();
            };
            let instruments = backend.topic(topic);
            backend.in_flight.fetch_add(1, Ordering::Relaxed);
            backend.in_flight_gauge.add(1, &[]);
            Sample {
                active: Some(ActiveSample {
                    backend: Arc::clone(backend),
                    instruments,
                    start: Instant::now(),
                }),
            }
        }
        #[cfg(not(feature = "otel"))]
        {
            let _ = topic;
            Sample::noop()
        }
    }

    /// Record the serialized size of a payload bound for `topic`.
    pub fn record_payload_size(&self, topic: &str, bytes: usize) {
        #[cfg(feature = "otel")]
        {
            if let Some(backend) = &self.backend {
                let instruments = backend.topic(topic);
                instruments.payload_size.record(
                    u64::try_from(bytes).unwrap_or(u64::MAX),
                    std::slice::from_ref(&instruments.topic),
                );
            }
        }
        #[cfg(not(feature = "otel"))]
        {
            let _ = (topic, bytes);
        }
    }

    /// Current number of unfinished samples (0 without a backend).
    pub fn in_flight(&self) -> i64 {
        #[cfg(feature = "otel")]
        {
            if let Some(backend) = &self.backend {
                return backend.in_flight.load(Ordering::Relaxed);
            }
        }
        0
    }

    /// Number of topics with cached instruments.
    pub fn tracked_topics(&self) -> usize {
        #[cfg(feature = "otel")]
        {
            if let Some(backend) = &self.backend {
                return backend
                    .topics
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .len();
            }
        }
        0
    }
}

#[cfg(feature = "otel")]
impl Backend {
    fn topic(&self, topic: &str) -> Arc<TopicInstruments> {
        if let Some(existing) = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
        {
            return Arc::clone(existing);
        }

        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let instruments = topics.entry(topic.to_string()).or_insert_with(|| {
            Arc::new(TopicInstruments {
                topic: KeyValue::new("topic", topic.to_string()),
                send_duration: self
                    .meter
                    .f64_histogram(SEND_DURATION)
                    .with_description("Event relay send latency")
                    .with_unit("s")
                    .build(),
                payload_size: self
                    .meter
                    .u64_histogram(PAYLOAD_SIZE)
                    .with_description("Event relay payload size")
                    .with_unit("By")
                    .build(),
            })
        });
        Arc::clone(instruments)
    }
}

/// An in-progress send measurement.
///
/// Finish with [`Sample::stop_success`] or [`Sample::stop_failure`].
#[must_use = "a sample must be stopped to record its outcome"]
pub struct Sample {
    #[cfg(feature = "otel")]
    active: Option<ActiveSample>,
}

#[cfg(feature = "otel")]
struct ActiveSample {
    backend: Arc<Backend>,
    instruments: Arc<TopicInstruments>,
    start: Instant,
}

impl Sample {
    fn noop() -> Self {
        Self {
            #[cfg(feature = "otel")]
            active: None,
        }
    }

    /// Record a successful send.
    pub fn stop_success(self) {
        #[cfg(feature = "otel")]
        {
            if let Some(active) = self.active {
                active.finish(&[KeyValue::new("outcome", "success")]);
            }
        }
    }

    /// Record a failed send, tagged with a short reason label.
    pub fn stop_failure(self, reason: &str) {
        #[cfg(feature = "otel")]
        {
            if let Some(active) = self.active {
                active.finish(&[
                    KeyValue::new("outcome", "failure"),
                    KeyValue::new("reason", reason.to_string()),
                ]);
            }
        }
        #[cfg(not(feature = "otel"))]
        {
            let _ = reason;
        }
    }
}

#[cfg(feature = "otel")]
impl ActiveSample {
    fn finish(self, outcome: &[KeyValue]) {
        let topic = std::slice::from_ref(&self.instruments.topic);
        self.instruments
            .send_duration
            .record(self.start.elapsed().as_secs_f64(), topic);

        self.backend.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.backend.in_flight_gauge.add(-1, &[]);

        let mut attributes = Vec::with_capacity(outcome.len() + 1);
        attributes.push(self.instruments.topic.clone());
        attributes.extend_from_slice(outcome);
        self.backend.send_total.add(1, &attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_records_nothing() {
        let metrics = SendMetrics::noop();
        assert!(!metrics.is_enabled());

        metrics.record_payload_size("users", 128);
        let sample = metrics.start_sample("users");
        assert_eq!(metrics.in_flight(), 0);
        sample.stop_failure("timeout");

        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.tracked_topics(), 0);
    }

    #[cfg(feature = "otel")]
    #[test]
    fn test_in_flight_tracks_open_samples() {
        let metrics = SendMetrics::global();
        assert!(metrics.is_enabled());

        let first = metrics.start_sample("users");
        let second = metrics.start_sample("admins");
        assert_eq!(metrics.in_flight(), 2);

        first.stop_success();
        assert_eq!(metrics.in_flight(), 1);
        second.stop_failure("delivery");
        assert_eq!(metrics.in_flight(), 0);
    }

    #[cfg(feature = "otel")]
    #[test]
    fn test_topic_instruments_are_cached() {
        let metrics = SendMetrics::global();

        metrics.record_payload_size("users", 10);
        metrics.start_sample("users").stop_success();
        metrics.record_payload_size("users", 20);
        assert_eq!(metrics.tracked_topics(), 1);

        metrics.start_sample("admins").stop_success();
        assert_eq!(metrics.tracked_topics(), 2);
    }

    #[cfg(feature = "otel")]
    #[test]
    fn test_clones_share_state() {
        let metrics = SendMetrics::global();
        let clone = metrics.clone();

        let sample = clone.start_sample("users");
        assert_eq!(metrics.in_flight(), 1);
        sample.stop_success();
        assert_eq!(metrics.in_flight(), 0);
    }
}
