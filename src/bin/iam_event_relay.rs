//! iam-event-relay: host simulator
//!
//! Reads identity-provider events as newline-delimited JSON on stdin and
//! forwards each one to Kafka through the same listener an embedding host
//! would use. Useful for replaying exported events and for smoke-testing a
//! broker setup.
//!
//! ## Usage
//! ```text
//! iam-event-relay [-Dspi-events-listener-kafka-props.<key>=<value> ...] [config.yaml] < events.ndjson
//! ```
//!
//! ## Configuration
//! - `relay.yaml` / EVENT_RELAY_CONFIG / EVENT_RELAY__* (see `BridgeConfig::load`)
//! - KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_*: passthrough producer properties
//! - EVENT_RELAY_LOG: log filter (default: info)

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use iam_event_relay::config::BridgeConfig;
use iam_event_relay::host::{HostEvent, RealmLookup, StaticRealms};
use iam_event_relay::listener::{EventListenerFactory, EventListenerProvider, ForwardOutcome};
use iam_event_relay::utils::bootstrap::{init_tracing, ProcessArgs};

#[derive(Debug, Default)]
struct Tally {
    published: u64,
    disabled: u64,
    discarded: u64,
    malformed: u64,
}

impl Tally {
    fn record(&mut self, outcome: ForwardOutcome) {
        match outcome {
            ForwardOutcome::Published => self.published += 1,
            ForwardOutcome::Disabled => self.disabled += 1,
            ForwardOutcome::Discarded => self.discarded += 1,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = ProcessArgs::parse(std::env::args().skip(1));
    let config = BridgeConfig::load(args.config_path(), &args.properties).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!("Starting iam-event-relay");

    let realms: Arc<dyn RealmLookup> = Arc::new(
        config
            .realms
            .iter()
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect::<StaticRealms>(),
    );

    let factory = EventListenerFactory::init(config);
    let listener = factory.create(realms).map_err(|e| {
        error!(error = %e, "Failed to initialize Kafka producer");
        e
    })?;

    info!("Reading events from stdin, press Ctrl+C to exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut tally = Tally::default();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                info!("Interrupted, stopping");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<HostEvent>(&line) {
            Ok(HostEvent::User { event }) => listener.on_event(&event).await,
            Ok(HostEvent::Admin {
                include_representation,
                event,
            }) => listener.on_admin_event(&event, include_representation).await,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event line");
                tally.malformed += 1;
                continue;
            }
        };
        tally.record(outcome);
    }

    tokio::task::block_in_place(|| factory.close())?;

    info!(
        published = tally.published,
        disabled = tally.disabled,
        discarded = tally.discarded,
        malformed = tally.malformed,
        "Relay stopped"
    );

    Ok(())
}
