//! Kafka producer options and their translation to librdkafka properties.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use tracing::warn;

use super::ConfigError;

/// Default in-flight bound when idempotence is on (librdkafka's ceiling for
/// idempotent producers).
pub const DEFAULT_MAX_IN_FLIGHT_IDEMPOTENT: u32 = 5;

/// Producer configuration.
///
/// Built once at startup and never mutated afterwards. `props` is the
/// passthrough escape hatch: it is applied last and may override any
/// property derived from the typed fields.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Client id reported to the brokers.
    pub client_id: String,
    /// Acknowledgement mode (`0`, `1`, `all`).
    pub acks: String,
    /// Client-level retries on transient failures.
    pub retries: u32,
    /// Time to wait for more records before sending a batch.
    pub linger_ms: u32,
    /// Maximum batch size in bytes.
    pub batch_size: u32,
    /// Compression codec (gzip, snappy, lz4, zstd).
    pub compression_type: Option<String>,
    /// Upper bound on the total time to report a send as failed.
    pub delivery_timeout_ms: u32,
    /// Per-request broker timeout.
    pub request_timeout_ms: u32,
    /// Broker-side deduplication of retried sends.
    pub enable_idempotence: bool,
    /// Unacknowledged requests per connection. Ignored (forced to 1) when
    /// idempotence is off.
    pub max_in_flight_requests_per_connection: Option<u32>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// JAAS login string carrying `username="..."` and `password="..."`.
    pub sasl_jaas_config: Option<String>,
    /// PEM CA bundle used to verify the brokers.
    pub ssl_truststore_location: Option<String>,
    pub ssl_truststore_password: Option<String>,
    /// PKCS#12 client keystore.
    pub ssl_keystore_location: Option<String>,
    pub ssl_keystore_password: Option<String>,
    pub ssl_key_password: Option<String>,
    /// Extra properties passed to librdkafka verbatim.
    pub props: BTreeMap<String, String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "keycloak".to_string(),
            acks: "all".to_string(),
            retries: 3,
            linger_ms: 5,
            batch_size: 16384,
            compression_type: None,
            delivery_timeout_ms: 120_000,
            request_timeout_ms: 30_000,
            enable_idempotence: true,
            max_in_flight_requests_per_connection: None,
            security_protocol: None,
            sasl_mechanism: None,
            sasl_jaas_config: None,
            ssl_truststore_location: None,
            ssl_truststore_password: None,
            ssl_keystore_location: None,
            ssl_keystore_password: None,
            ssl_key_password: None,
            props: BTreeMap::new(),
        }
    }
}

impl ProducerConfig {
    /// Create config for the given bootstrap servers, other options default.
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            ..Self::default()
        }
    }

    /// Add SASL authentication from a JAAS login string.
    pub fn with_sasl(
        mut self,
        mechanism: impl Into<String>,
        jaas_config: impl Into<String>,
    ) -> Self {
        self.sasl_mechanism = Some(mechanism.into());
        self.sasl_jaas_config = Some(jaas_config.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set idempotence.
    pub fn with_idempotence(mut self, enabled: bool) -> Self {
        self.enable_idempotence = enabled;
        self
    }

    /// Set the in-flight bound per connection.
    pub fn with_max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.max_in_flight_requests_per_connection = Some(max_in_flight);
        self
    }

    /// Replace the passthrough properties.
    pub fn with_extras(mut self, props: BTreeMap<String, String>) -> Self {
        self.props = props;
        self
    }

    /// In-flight bound actually handed to the client.
    ///
    /// Without idempotence a retried batch can overtake a later one unless
    /// only one request is outstanding per connection.
    pub fn effective_max_in_flight(&self) -> u32 {
        if self.enable_idempotence {
            self.max_in_flight_requests_per_connection
                .unwrap_or(DEFAULT_MAX_IN_FLIGHT_IDEMPOTENT)
        } else {
            1
        }
    }

    /// Reject configurations no client can be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_server = self
            .bootstrap_servers
            .split(',')
            .any(|server| !server.trim().is_empty());
        if !has_server {
            return Err(ConfigError::Invalid(
                "Kafka bootstrap servers not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Translate into the librdkafka property set.
    ///
    /// Keys and values travel as raw bytes, so no serializer settings are
    /// emitted.
    pub fn native_properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        let mut set = |key: &str, value: String| {
            props.insert(key.to_string(), value);
        };

        set("bootstrap.servers", self.bootstrap_servers.clone());
        set("client.id", self.client_id.clone());
        set("acks", self.acks.clone());
        set("retries", self.retries.to_string());
        set("linger.ms", self.linger_ms.to_string());
        set("batch.size", self.batch_size.to_string());
        set("delivery.timeout.ms", self.delivery_timeout_ms.to_string());
        set("request.timeout.ms", self.request_timeout_ms.to_string());
        set("enable.idempotence", self.enable_idempotence.to_string());
        set(
            "max.in.flight.requests.per.connection",
            self.effective_max_in_flight().to_string(),
        );

        if let Some(ref codec) = self.compression_type {
            set("compression.type", codec.clone());
        }
        if let Some(ref protocol) = self.security_protocol {
            set("security.protocol", protocol.clone());
        }
        if let Some(ref mechanism) = self.sasl_mechanism {
            set("sasl.mechanism", mechanism.clone());
        }
        if let Some(ref jaas) = self.sasl_jaas_config {
            match parse_jaas_credentials(jaas) {
                Some(credentials) => {
                    set("sasl.username", credentials.username);
                    set("sasl.password", credentials.password);
                }
                None => warn!("sasl_jaas_config has no username/password pair, ignoring it"),
            }
        }
        if let Some(ref location) = self.ssl_truststore_location {
            set("ssl.ca.location", location.clone());
        }
        if self.ssl_truststore_password.is_some() {
            warn!("ssl_truststore_password has no librdkafka equivalent (CA bundles are PEM), ignoring it");
        }
        if let Some(ref location) = self.ssl_keystore_location {
            set("ssl.keystore.location", location.clone());
        }
        if let Some(ref password) = self.ssl_keystore_password {
            set("ssl.keystore.password", password.clone());
        }
        if let Some(ref password) = self.ssl_key_password {
            set("ssl.key.password", password.clone());
        }

        for (key, value) in &self.props {
            props.insert(key.clone(), value.clone());
        }
        props
    }
}

impl fmt::Debug for ProducerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerConfig")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("client_id", &self.client_id)
            .field("acks", &self.acks)
            .field("retries", &self.retries)
            .field("linger_ms", &self.linger_ms)
            .field("batch_size", &self.batch_size)
            .field("compression_type", &self.compression_type)
            .field("delivery_timeout_ms", &self.delivery_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("enable_idempotence", &self.enable_idempotence)
            .field(
                "max_in_flight_requests_per_connection",
                &self.max_in_flight_requests_per_connection,
            )
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_jaas_config", &redacted(&self.sasl_jaas_config))
            .field("ssl_truststore_location", &self.ssl_truststore_location)
            .field("ssl_truststore_password", &redacted(&self.ssl_truststore_password))
            .field("ssl_keystore_location", &self.ssl_keystore_location)
            .field("ssl_keystore_password", &redacted(&self.ssl_keystore_password))
            .field("ssl_key_password", &redacted(&self.ssl_key_password))
            .field("props", &self.props.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "***")
}

/// Credentials pulled out of a JAAS login string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JaasCredentials {
    pub username: String,
    pub password: String,
}

/// Extract `username` and `password` options from a JAAS login string such as
/// `org.apache.kafka.common.security.plain.PlainLoginModule required username="u" password="p";`.
pub fn parse_jaas_credentials(jaas: &str) -> Option<JaasCredentials> {
    Some(JaasCredentials {
        username: jaas_option(jaas, "username")?,
        password: jaas_option(jaas, "password")?,
    })
}

fn jaas_option(jaas: &str, name: &str) -> Option<String> {
    let mut rest = jaas;
    while let Some(pos) = rest.find(name) {
        let preceded_ok = rest[..pos]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);
        let after = rest[pos + name.len()..].trim_start();
        rest = &rest[pos + name.len()..];

        let Some(value) = after.strip_prefix('=') else {
            continue;
        };
        if !preceded_ok {
            continue;
        }

        let value = value.trim_start();
        return match value.strip_prefix('"') {
            Some(quoted) => quoted.find('"').map(|end| quoted[..end].to_string()),
            None => Some(
                value
                    .split(|c: char| c.is_whitespace() || c == ';')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
            ),
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN_JAAS: &str = r#"org.apache.kafka.common.security.plain.PlainLoginModule required username="relay" password="s3cret";"#;

    #[test]
    fn test_defaults() {
        let config = ProducerConfig::default();
        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.acks, "all");
        assert_eq!(config.retries, 3);
        assert!(config.enable_idempotence);
        assert_eq!(config.effective_max_in_flight(), 5);
    }

    #[test]
    fn test_idempotence_off_forces_single_in_flight() {
        let config = ProducerConfig::new("broker:9092")
            .with_idempotence(false)
            .with_max_in_flight(10);

        assert_eq!(config.effective_max_in_flight(), 1);
        assert_eq!(
            config.native_properties()["max.in.flight.requests.per.connection"],
            "1"
        );
    }

    #[test]
    fn test_idempotent_keeps_configured_in_flight() {
        let config = ProducerConfig::new("broker:9092").with_max_in_flight(3);
        assert_eq!(config.effective_max_in_flight(), 3);
    }

    #[test]
    fn test_native_properties_core_options() {
        let mut config = ProducerConfig::new("a:9092,b:9092");
        config.compression_type = Some("zstd".to_string());
        let props = config.native_properties();

        assert_eq!(props["bootstrap.servers"], "a:9092,b:9092");
        assert_eq!(props["client.id"], "keycloak");
        assert_eq!(props["acks"], "all");
        assert_eq!(props["linger.ms"], "5");
        assert_eq!(props["batch.size"], "16384");
        assert_eq!(props["delivery.timeout.ms"], "120000");
        assert_eq!(props["request.timeout.ms"], "30000");
        assert_eq!(props["enable.idempotence"], "true");
        assert_eq!(props["compression.type"], "zstd");
        assert!(!props.contains_key("security.protocol"));
    }

    #[test]
    fn test_sasl_translates_jaas() {
        let config = ProducerConfig::new("broker:9093").with_sasl("SCRAM-SHA-512", PLAIN_JAAS);
        let props = config.native_properties();

        assert_eq!(props["security.protocol"], "SASL_SSL");
        assert_eq!(props["sasl.mechanism"], "SCRAM-SHA-512");
        assert_eq!(props["sasl.username"], "relay");
        assert_eq!(props["sasl.password"], "s3cret");
        assert!(!props.contains_key("sasl.jaas.config"));
    }

    #[test]
    fn test_tls_material_is_independent() {
        let mut config = ProducerConfig::new("broker:9093");
        config.ssl_keystore_location = Some("/etc/relay/client.p12".to_string());
        let props = config.native_properties();

        assert_eq!(props["ssl.keystore.location"], "/etc/relay/client.p12");
        assert!(!props.contains_key("ssl.ca.location"));
        assert!(!props.contains_key("ssl.keystore.password"));

        config.ssl_truststore_location = Some("/etc/relay/ca.pem".to_string());
        config.ssl_key_password = Some("k".to_string());
        let props = config.native_properties();
        assert_eq!(props["ssl.ca.location"], "/etc/relay/ca.pem");
        assert_eq!(props["ssl.key.password"], "k");
    }

    #[test]
    fn test_extras_override_typed_options() {
        let extras = [
            ("acks".to_string(), "1".to_string()),
            ("queue.buffering.max.messages".to_string(), "5000".to_string()),
        ]
        .into_iter()
        .collect();
        let props = ProducerConfig::new("broker:9092")
            .with_extras(extras)
            .native_properties();

        assert_eq!(props["acks"], "1");
        assert_eq!(props["queue.buffering.max.messages"], "5000");
    }

    #[test]
    fn test_validate_rejects_blank_bootstrap() {
        assert!(ProducerConfig::new("").validate().is_err());
        assert!(ProducerConfig::new(" , ").validate().is_err());
        assert!(ProducerConfig::new("broker:9092").validate().is_ok());
    }

    #[test]
    fn test_parse_jaas_variants() {
        let credentials = parse_jaas_credentials(PLAIN_JAAS).unwrap();
        assert_eq!(credentials.username, "relay");
        assert_eq!(credentials.password, "s3cret");

        let unquoted = parse_jaas_credentials("Module required username=u password = p;").unwrap();
        assert_eq!(unquoted.username, "u");
        assert_eq!(unquoted.password, "p");

        assert!(parse_jaas_credentials("Module required username=\"only\";").is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = ProducerConfig::new("broker:9092").with_sasl("PLAIN", PLAIN_JAAS);
        config.ssl_keystore_password = Some("hunter2".to_string());

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("broker:9092"));
    }
}
