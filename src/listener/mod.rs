//! Listener entry points.
//!
//! The host calls [`EventListenerProvider::on_event`] and
//! [`EventListenerProvider::on_admin_event`] for every event it produces.
//! Each call normalizes the event, serializes it and hands it to the shared
//! [`Dispatcher`]. Nothing escapes to the host: failures (including panics
//! raised by the host's own realm accessor) are logged and reported as
//! [`ForwardOutcome::Discarded`].
//!
//! [`EventListenerFactory`] is the composition root. It owns the
//! [`ProducerHolder`], builds listeners that share one dispatcher, and
//! flushes the broker client on close.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, trace, warn};

use crate::config::BridgeConfig;
use crate::dispatch::{DispatchError, DispatchMode, Dispatcher};
use crate::host::{AdminEvent, Event, RealmLookup};
use crate::payload::{AdminEventPayload, UserEventPayload};
use crate::producer::{ProducerError, ProducerHolder};
use crate::utils::metrics::SendMetrics;

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Handed to the broker client. In sync mode the broker has also
    /// acknowledged it.
    Published,
    /// The event category is switched off; nothing was done.
    Disabled,
    /// Forwarding failed. The failure has been logged and dropped.
    Discarded,
}

/// Why an event was discarded.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Forwarding panicked: {0}")]
    Panicked(String),
}

/// Host-facing listener contract.
#[async_trait]
pub trait EventListenerProvider: Send + Sync {
    /// Forward a user event.
    async fn on_event(&self, event: &Event) -> ForwardOutcome;

    /// Forward an admin event. The resource representation is only included
    /// when `include_representation` is set.
    async fn on_admin_event(&self, event: &AdminEvent, include_representation: bool)
        -> ForwardOutcome;
}

/// Topic routing and switches, fixed at factory init.
#[derive(Debug, Clone)]
struct Routing {
    topic_user: String,
    topic_admin: String,
    mode: DispatchMode,
    enable_user_events: bool,
    enable_admin_events: bool,
}

impl Routing {
    fn from_config(config: &BridgeConfig) -> Self {
        Self {
            topic_user: config.topic_user.clone(),
            topic_admin: config.topic_admin.clone(),
            mode: DispatchMode::from_sync_flag(config.sync),
            enable_user_events: config.enable_user_events,
            enable_admin_events: config.enable_admin_events,
        }
    }
}

/// Forwards host events to Kafka.
#[derive(Clone)]
pub struct EventListener {
    routing: Arc<Routing>,
    realms: Arc<dyn RealmLookup>,
    dispatcher: Arc<Dispatcher>,
}

impl EventListener {
    async fn forward_event(&self, event: &Event) -> Result<(), ForwardError> {
        let payload = UserEventPayload::from_event(event, self.realms.as_ref());
        let body = payload.to_json()?;
        let key = payload.key();

        self.dispatcher
            .send(&self.routing.topic_user, Some(key.as_str()), &body, self.routing.mode)
            .await?;
        Ok(())
    }

    async fn forward_admin_event(
        &self,
        event: &AdminEvent,
        include_representation: bool,
    ) -> Result<(), ForwardError> {
        let payload =
            AdminEventPayload::from_admin_event(event, self.realms.as_ref(), include_representation);
        let body = payload.to_json()?;
        let key = payload.key();

        self.dispatcher
            .send(&self.routing.topic_admin, Some(key.as_str()), &body, self.routing.mode)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventListenerProvider for EventListener {
    async fn on_event(&self, event: &Event) -> ForwardOutcome {
        if !self.routing.enable_user_events {
            trace!(event_type = ?event.event_type, "User events disabled, skipping");
            return ForwardOutcome::Disabled;
        }
        contain("user", self.forward_event(event)).await
    }

    async fn on_admin_event(
        &self,
        event: &AdminEvent,
        include_representation: bool,
    ) -> ForwardOutcome {
        if !self.routing.enable_admin_events {
            trace!(operation_type = ?event.operation_type, "Admin events disabled, skipping");
            return ForwardOutcome::Disabled;
        }
        contain("admin", self.forward_admin_event(event, include_representation)).await
    }
}

/// Run one forward, turning errors and panics into a logged discard.
async fn contain<F>(kind: &'static str, forward: F) -> ForwardOutcome
where
    F: Future<Output = Result<(), ForwardError>>,
{
    let result = match AssertUnwindSafe(forward).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ForwardError::Panicked(panic_message(panic.as_ref()))),
    };

    match result {
        Ok(()) => ForwardOutcome::Published,
        Err(e) => {
            error!(kind, error = %e, "Failed to publish event to Kafka");
            ForwardOutcome::Discarded
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builds listeners over one shared broker client.
pub struct EventListenerFactory {
    config: BridgeConfig,
    routing: Arc<Routing>,
    producers: Arc<ProducerHolder>,
    dispatcher: Arc<Dispatcher>,
}

impl EventListenerFactory {
    /// Set up a factory backed by librdkafka and the default metrics sink.
    ///
    /// The broker client is not built until the first [`create`](Self::create).
    #[cfg(feature = "kafka")]
    pub fn init(config: BridgeConfig) -> Self {
        Self::new(config, Arc::new(ProducerHolder::kafka()), SendMetrics::auto())
    }

    /// Set up a factory over an existing holder.
    pub fn new(config: BridgeConfig, producers: Arc<ProducerHolder>, metrics: SendMetrics) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&producers), metrics)
            .with_sync_timeout(config.sync_timeout());
        let routing = Routing::from_config(&config);

        info!(
            topic_user = %routing.topic_user,
            topic_admin = %routing.topic_admin,
            sync = config.sync,
            enable_user_events = routing.enable_user_events,
            enable_admin_events = routing.enable_admin_events,
            "Event listener factory initialized"
        );

        Self {
            config,
            routing: Arc::new(routing),
            producers,
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn producers(&self) -> &Arc<ProducerHolder> {
        &self.producers
    }

    /// Build a listener, initializing the broker client on first use.
    ///
    /// Configuration errors are returned, not swallowed.
    pub fn create(&self, realms: Arc<dyn RealmLookup>) -> Result<EventListener, ProducerError> {
        self.producers.init_if_needed(&self.config.producer)?;

        Ok(EventListener {
            routing: Arc::clone(&self.routing),
            realms,
            dispatcher: Arc::clone(&self.dispatcher),
        })
    }

    /// Flush queued records, bounded by the sync timeout.
    ///
    /// Blocks the calling thread while librdkafka drains its queue.
    pub fn close(&self) -> Result<(), ProducerError> {
        let timeout = self.config.sync_timeout();
        self.producers.flush(timeout).inspect_err(|e| {
            warn!(error = %e, timeout_ms = self.config.sync_timeout_ms, "Flush on close failed");
        })
    }
}
