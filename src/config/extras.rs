//! Passthrough producer properties from the environment and process properties.
//!
//! Two sources feed the extras map besides the configuration file:
//!
//! | Source | Example | Resulting property |
//! |--------|---------|--------------------|
//! | environment | `KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_QUEUE_BUFFERING_MAX_MS=50` | `queue.buffering.max.ms=50` |
//! | environment | `KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_SSL_ENDPOINT__IDENTIFICATION__ALGORITHM=none` | `ssl.endpoint_identification_algorithm=none` |
//! | process property | `-Dspi-events-listener-kafka-props.linger.ms=20` | `linger.ms=20` |
//!
//! Environment names are lowercased, `__` becomes a literal `_` and any other
//! `_` becomes `.`. Process property names are taken verbatim; they are never
//! unescaped. The asymmetry is kept for compatibility with existing
//! deployments.

use std::collections::BTreeMap;

use tracing::{debug, warn};

/// Environment variable prefix for passthrough properties.
pub const ENV_PROPS_PREFIX: &str = "KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_";
/// Process property prefix for passthrough properties.
pub const PROPERTY_PROPS_PREFIX: &str = "spi-events-listener-kafka-props.";

/// Merge passthrough properties.
///
/// `base` comes first, then environment variables, then process properties.
/// A later source overwrites an earlier one on key collision. Keys that fail
/// [`is_valid_property_key`] are skipped with a warning.
pub fn collect_extras<E, P>(base: &BTreeMap<String, String>, env: E, properties: P) -> BTreeMap<String, String>
where
    E: IntoIterator<Item = (String, String)>,
    P: IntoIterator<Item = (String, String)>,
{
    let mut extras = base.clone();

    let from_env = env.into_iter().filter_map(|(name, value)| {
        name.strip_prefix(ENV_PROPS_PREFIX)
            .map(|tail| (unescape_env_key(tail), value))
    });
    let from_properties = properties.into_iter().filter_map(|(name, value)| {
        name.strip_prefix(PROPERTY_PROPS_PREFIX)
            .map(|tail| (tail.to_string(), value))
    });

    for (key, value) in from_env.chain(from_properties) {
        if !is_valid_property_key(&key) {
            warn!(key = %key, "Skipping malformed passthrough property");
            continue;
        }
        debug!(key = %key, "Passthrough producer property");
        extras.insert(key, value);
    }

    extras
}

/// Turn the tail of an environment variable name into a property key.
pub fn unescape_env_key(tail: &str) -> String {
    tail.to_lowercase()
        .split("__")
        .map(|segment| segment.replace('_', "."))
        .collect::<Vec<_>>()
        .join("_")
}

/// Key-format check for passthrough properties.
///
/// Values stay untyped; only keys that would be ambiguous as dotted property
/// names (empty segments, whitespace) are rejected.
pub fn is_valid_property_key(key: &str) -> bool {
    !key.is_empty()
        && !key.chars().any(char::is_whitespace)
        && key.split('.').all(|segment| !segment.is_empty())
}

/// Parse a process property definition, `-Dname=value` or `name=value`.
pub fn parse_property_definition(arg: &str) -> Option<(String, String)> {
    let definition = arg.strip_prefix("-D").unwrap_or(arg);
    let (name, value) = definition.split_once('=')?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_unescape_env_key() {
        assert_eq!(unescape_env_key("FOO_BAR"), "foo.bar");
        assert_eq!(
            unescape_env_key("SSL_ENDPOINT__IDENTIFICATION__ALGORITHM"),
            "ssl.endpoint_identification_algorithm"
        );
        assert_eq!(unescape_env_key("A___B"), "a_.b");
    }

    #[test]
    fn test_env_extras_are_unescaped() {
        let env = pairs(&[
            ("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_QUEUE_BUFFERING_MAX_MS", "50"),
            ("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_MESSAGE__MAX_BYTES", "1"),
            ("PATH", "/usr/bin"),
        ]);

        let extras = collect_extras(&BTreeMap::new(), env, Vec::new());

        assert_eq!(extras.len(), 2);
        assert_eq!(extras["queue.buffering.max.ms"], "50");
        assert_eq!(extras["message_max.bytes"], "1");
    }

    #[test]
    fn test_property_extras_are_verbatim() {
        let props = pairs(&[
            ("spi-events-listener-kafka-props.socket__keepalive.enable", "true"),
            ("spi-events-listener-other-props.linger.ms", "1"),
        ]);

        let extras = collect_extras(&BTreeMap::new(), Vec::new(), props);

        assert_eq!(extras.len(), 1);
        assert_eq!(extras["socket__keepalive.enable"], "true");
    }

    #[test]
    fn test_later_sources_win() {
        let base = [("linger.ms".to_string(), "1".to_string())]
            .into_iter()
            .collect();
        let env = pairs(&[("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_LINGER_MS", "2")]);
        let props = pairs(&[("spi-events-listener-kafka-props.linger.ms", "3")]);

        assert_eq!(collect_extras(&base, env.clone(), Vec::new())["linger.ms"], "2");
        assert_eq!(collect_extras(&base, env, props)["linger.ms"], "3");
    }

    #[test]
    fn test_malformed_keys_are_skipped() {
        let env = pairs(&[
            ("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_", "x"),
            ("KC_SPI_EVENTS_LISTENER_KAFKA_PROPS_FOO__", "y"),
        ]);
        let props = pairs(&[
            ("spi-events-listener-kafka-props.a..b", "z"),
            ("spi-events-listener-kafka-props.has space", "z"),
        ]);

        let extras = collect_extras(&BTreeMap::new(), env, props);
        assert_eq!(extras.len(), 1);
        assert_eq!(extras["foo_"], "y");
    }

    #[test]
    fn test_is_valid_property_key() {
        assert!(is_valid_property_key("linger.ms"));
        assert!(is_valid_property_key("ssl.endpoint_identification_algorithm"));
        assert!(!is_valid_property_key(""));
        assert!(!is_valid_property_key(".linger"));
        assert!(!is_valid_property_key("linger."));
        assert!(!is_valid_property_key("a..b"));
    }

    #[test]
    fn test_parse_property_definition() {
        assert_eq!(
            parse_property_definition("-Dspi-events-listener-kafka-props.acks=1"),
            Some(("spi-events-listener-kafka-props.acks".to_string(), "1".to_string()))
        );
        assert_eq!(
            parse_property_definition("a=b=c"),
            Some(("a".to_string(), "b=c".to_string()))
        );
        assert_eq!(parse_property_definition("-Dnovalue"), None);
        assert_eq!(parse_property_definition("=x"), None);
    }
}
