//! Relay configuration.
//!
//! One [`BridgeConfig`] is loaded at startup from YAML files and environment
//! variables and never changes afterwards. The producer section is described
//! in [`producer`]; passthrough properties from the environment and process
//! properties in [`extras`].

pub mod extras;
pub mod producer;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

pub use extras::{collect_extras, parse_property_definition};
pub use producer::ProducerConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "relay.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "EVENT_RELAY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "EVENT_RELAY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "EVENT_RELAY_LOG";

/// Default topic for user events.
pub const DEFAULT_TOPIC_USER: &str = "keycloak.user.events";
/// Default topic for admin events.
pub const DEFAULT_TOPIC_ADMIN: &str = "keycloak.admin.events";
/// Default bound on a sync send.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 10_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Topic receiving user events.
    pub topic_user: String,
    /// Topic receiving admin events.
    pub topic_admin: String,
    /// Wait for broker acknowledgement on every send.
    pub sync: bool,
    /// Bound on a sync send before it is reported as failed. Defaults to
    /// 10 s, the longest a sync listener may hold the host's calling thread.
    pub sync_timeout_ms: u64,
    /// Forward user events.
    pub enable_user_events: bool,
    /// Forward admin events.
    pub enable_admin_events: bool,
    /// Kafka producer options.
    pub producer: ProducerConfig,
    /// Realm id to name directory, for hosts without their own realm store.
    pub realms: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic_user: DEFAULT_TOPIC_USER.to_string(),
            topic_admin: DEFAULT_TOPIC_ADMIN.to_string(),
            sync: false,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            enable_user_events: true,
            enable_admin_events: true,
            producer: ProducerConfig::default(),
            realms: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `relay.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    ///
    /// Passthrough producer properties are then merged from the process
    /// environment and from `properties` (see [`extras`]). Environment
    /// entries whose name or value is not valid UTF-8 are ignored.
    pub fn load(path: Option<&str>, properties: &[(String, String)]) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let env = utf8_env();
        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            )
            .build()?;

        let mut config: BridgeConfig = config.try_deserialize()?;
        let extras = collect_extras(&config.producer.props, env, properties.iter().cloned());
        config.producer.props = extras;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }

    /// Sync send bound as a duration.
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// Snapshot of the process environment, skipping non-UTF-8 entries.
fn utf8_env() -> ::config::Map<String, String> {
    std::env::vars_os()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    #[test]
    fn test_config_default() {
        let config = BridgeConfig::default();
        assert_eq!(config.topic_user, "keycloak.user.events");
        assert_eq!(config.topic_admin, "keycloak.admin.events");
        assert!(!config.sync);
        assert!(config.enable_user_events);
        assert!(config.enable_admin_events);
        assert_eq!(config.sync_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: BridgeConfig = serde_yaml::from_str(
            "sync: true\nproducer:\n  bootstrap_servers: kafka-0:9092\n  enable_idempotence: false\n",
        )
        .unwrap();

        assert!(config.sync);
        assert_eq!(config.topic_user, DEFAULT_TOPIC_USER);
        assert_eq!(config.producer.bootstrap_servers, "kafka-0:9092");
        assert_eq!(config.producer.client_id, "keycloak");
        assert_eq!(config.producer.effective_max_in_flight(), 1);
    }

    #[test]
    #[serial]
    fn test_load_file_env_and_properties() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "topic_user: audit.users\nenable_admin_events: false\nrealms:\n  r1: tenant-a\nproducer:\n  bootstrap_servers: kafka-0:9092\n  props:\n    linger.ms: \"1\"\n    socket.timeout.ms: \"900\""
        )
        .unwrap();

        std::env::set_var("EVENT_RELAY__TOPIC_ADMIN", "audit.admins");
        std::env::set_var("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_LINGER_MS", "2");

        let properties = vec![(
            "spi-events-listener-kafka-props.socket.timeout.ms".to_string(),
            "1200".to_string(),
        )];
        let result = BridgeConfig::load(file.path().to_str(), &properties);

        std::env::remove_var("EVENT_RELAY__TOPIC_ADMIN");
        std::env::remove_var("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_LINGER_MS");

        let config = result.unwrap();
        assert_eq!(config.topic_user, "audit.users");
        assert_eq!(config.topic_admin, "audit.admins");
        assert!(!config.enable_admin_events);
        assert_eq!(config.realms.get("r1").map(String::as_str), Some("tenant-a"));
        assert_eq!(config.producer.bootstrap_servers, "kafka-0:9092");
        assert_eq!(config.producer.props["linger.ms"], "2");
        assert_eq!(config.producer.props["socket.timeout.ms"], "1200");
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_load_ignores_non_utf8_environment() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let garbage = OsStr::from_bytes(b"\xff\xfe");
        std::env::set_var("EVENT_RELAY__TOPIC_USER", garbage);
        std::env::set_var("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_ACKS", garbage);
        std::env::set_var(OsStr::from_bytes(b"RELAY_\xff_NAME"), "1");
        std::env::set_var("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_LINGER_MS", "7");

        let result = BridgeConfig::load(None, &[]);

        std::env::remove_var("EVENT_RELAY__TOPIC_USER");
        std::env::remove_var("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_ACKS");
        std::env::remove_var(OsStr::from_bytes(b"RELAY_\xff_NAME"));
        std::env::remove_var("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_LINGER_MS");

        let config = result.unwrap();
        assert_eq!(config.topic_user, DEFAULT_TOPIC_USER);
        assert!(!config.producer.props.contains_key("acks"));
        assert_eq!(config.producer.props["linger.ms"], "7");
    }

    #[test]
    #[serial]
    fn test_load_missing_required_file_fails() {
        let result = BridgeConfig::load(Some("/nonexistent/relay-config.yaml"), &[]);
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
