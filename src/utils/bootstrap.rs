//! Bootstrap utilities for relay binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{parse_property_definition, LOG_ENV_VAR};

/// Initialize tracing with the EVENT_RELAY_LOG environment variable.
///
/// Defaults to "info" level if EVENT_RELAY_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Command-line arguments split into process properties and the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessArgs {
    /// `-Dkey=value` definitions, in order.
    pub properties: Vec<(String, String)>,
    /// Everything else, in order.
    pub positional: Vec<String>,
}

impl ProcessArgs {
    /// Split `args` (without the program name).
    ///
    /// Malformed `-D` arguments (no `=`, empty key) are logged and dropped.
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        for arg in args {
            if !arg.starts_with("-D") {
                parsed.positional.push(arg);
                continue;
            }
            match parse_property_definition(&arg) {
                Some(property) => parsed.properties.push(property),
                None => tracing::warn!(argument = %arg, "Ignoring malformed property definition"),
            }
        }
        parsed
    }

    /// The first positional argument, taken as the config file path.
    pub fn config_path(&self) -> Option<&str> {
        self.positional.first().map(String::as_str)
    }
}
