//! End-to-end relay tests against the in-memory broker client.

use std::sync::Arc;

use iam_event_relay::config::BridgeConfig;
use iam_event_relay::host::{AdminEvent, Event, HostEvent, StaticRealms};
use iam_event_relay::listener::{EventListenerFactory, EventListenerProvider, ForwardOutcome};
use iam_event_relay::producer::{MockClientFactory, ProducerHolder};
use iam_event_relay::utils::metrics::SendMetrics;
use serde_json::Value;

const STREAM: &str = r#"
{"kind":"user","realmId":"r1","userId":"u1","type":"REGISTER","time":1,"details":{"email":"a@example.com"}}
{"kind":"user","realmId":"r1","type":"LOGIN_ERROR","time":2,"details":{"error":"user_not_found"}}
{"kind":"admin","realmId":"r1","resourceType":"REALM_ROLE","operationType":"DELETE","time":3,"representation":"{}"}
{"kind":"admin","includeRepresentation":true,"realmId":"gone","resourceType":"USER","operationType":"CREATE","time":4,"representation":"{\"username\":\"bob\"}"}
"#;

fn relay(config: BridgeConfig) -> (Arc<MockClientFactory>, EventListenerFactory) {
    let clients = Arc::new(MockClientFactory::new());
    let holder = Arc::new(ProducerHolder::new(clients.clone()));
    (
        clients,
        EventListenerFactory::new(config, holder, SendMetrics::noop()),
    )
}

async fn replay(listener: &impl EventListenerProvider, stream: &str) -> Vec<ForwardOutcome> {
    let mut outcomes = Vec::new();
    for line in stream.lines().filter(|l| !l.trim().is_empty()) {
        let outcome = match serde_json::from_str::<HostEvent>(line).unwrap() {
            HostEvent::User { event } => listener.on_event(&event).await,
            HostEvent::Admin {
                include_representation,
                event,
            } => listener.on_admin_event(&event, include_representation).await,
        };
        outcomes.push(outcome);
    }
    outcomes
}

#[tokio::test]
async fn test_replayed_stream_is_routed_and_keyed() {
    let mut config = BridgeConfig::for_test();
    config.sync = true;
    let (clients, factory) = relay(config);
    let listener = factory
        .create(Arc::new(StaticRealms::new().with_realm("r1", "acme")))
        .unwrap();

    let outcomes = replay(&listener, STREAM).await;

    assert_eq!(outcomes, vec![ForwardOutcome::Published; 4]);
    let sent = clients.last_client().unwrap().sent();
    let routed: Vec<(&str, Option<&str>)> = sent
        .iter()
        .map(|r| (r.topic.as_str(), r.key_str()))
        .collect();
    assert_eq!(
        routed,
        vec![
            ("keycloak.user.events", Some("acme:REGISTER:u1")),
            ("keycloak.user.events", Some("acme:LOGIN_ERROR:anon")),
            ("keycloak.admin.events", Some("acme:DELETE:REALM_ROLE")),
            ("keycloak.admin.events", Some("gone:CREATE:USER")),
        ]
    );

    let bodies: Vec<Value> = sent.iter().map(|r| r.json().unwrap()).collect();
    assert_eq!(bodies[0]["details"]["email"], "a@example.com");
    assert_eq!(bodies[1]["userId"], Value::Null);
    assert_eq!(bodies[2]["representation"], Value::Null);
    assert_eq!(bodies[3]["representation"], r#"{"username":"bob"}"#);
    assert_eq!(bodies[3]["realmName"], Value::Null);
}

#[tokio::test]
async fn test_disabled_categories_send_nothing() {
    let mut config = BridgeConfig::for_test();
    config.enable_user_events = false;
    config.enable_admin_events = false;
    let (clients, factory) = relay(config);
    let listener = factory.create(Arc::new(StaticRealms::new())).unwrap();

    let outcomes = replay(&listener, STREAM).await;

    assert_eq!(outcomes, vec![ForwardOutcome::Disabled; 4]);
    assert_eq!(clients.last_client().unwrap().sent_count(), 0);
}

#[tokio::test]
async fn test_extras_reach_broker_client() {
    let mut config = BridgeConfig::for_test();
    config
        .producer
        .props
        .insert("compression.codec".to_string(), "zstd".to_string());
    let (clients, factory) = relay(config);

    factory.create(Arc::new(StaticRealms::new())).unwrap();

    let client = clients.last_client().unwrap();
    assert_eq!(client.properties()["compression.codec"], "zstd");
    assert_eq!(client.properties()["client.id"], "keycloak");
}

#[tokio::test]
async fn test_second_factory_config_does_not_replace_client() {
    let clients = Arc::new(MockClientFactory::new());
    let holder = Arc::new(ProducerHolder::new(clients.clone()));

    let mut first = BridgeConfig::for_test();
    first.producer.bootstrap_servers = "kafka-a:9092".to_string();
    let mut second = BridgeConfig::for_test();
    second.producer.bootstrap_servers = "kafka-b:9092".to_string();

    EventListenerFactory::new(first, Arc::clone(&holder), SendMetrics::noop())
        .create(Arc::new(StaticRealms::new()))
        .unwrap();
    let listener = EventListenerFactory::new(second, Arc::clone(&holder), SendMetrics::noop())
        .create(Arc::new(StaticRealms::new()))
        .unwrap();

    let event = Event {
        realm_id: Some("r1".to_string()),
        event_type: Some("LOGIN".to_string()),
        ..Event::default()
    };
    listener.on_event(&event).await;
    listener.on_admin_event(&AdminEvent::default(), false).await;

    assert_eq!(clients.created_count(), 1);
    let client = clients.last_client().unwrap();
    assert_eq!(client.properties()["bootstrap.servers"], "kafka-a:9092");
    assert_eq!(client.sent_count(), 2);
}
