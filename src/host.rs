//! Host-side event model.
//!
//! These types describe what the identity provider hands to the listener.
//! They mirror the host's own objects closely enough that an embedding
//! adapter can fill them field by field, and they deserialize from JSON so
//! events can also be replayed from a file or a pipe.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

/// A plain user action event (login, logout, registration, ...).
///
/// The host can leave any identifier unset; `None` travels through to the
/// payload as JSON `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Event {
    pub realm_id: Option<String>,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    /// Event type tag, e.g. `LOGIN`.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    /// Epoch milliseconds.
    pub time: i64,
    pub details: Option<HashMap<String, String>>,
}

/// Identity of whoever performed an administrative action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthDetails {
    pub realm_id: Option<String>,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
}

/// An administrative action event (resource create/update/delete, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdminEvent {
    pub realm_id: Option<String>,
    /// Resource type tag, e.g. `USER`.
    pub resource_type: Option<String>,
    /// Operation type tag, e.g. `UPDATE`.
    pub operation_type: Option<String>,
    pub resource_path: Option<String>,
    /// Epoch milliseconds.
    pub time: Option<i64>,
    pub auth_details: Option<AuthDetails>,
    /// JSON snapshot of the affected resource, when the host captured one.
    pub representation: Option<String>,
}

/// One line of a replayed event stream.
///
/// ```json
/// {"kind":"user","realmId":"r1","type":"LOGIN","time":1}
/// {"kind":"admin","includeRepresentation":true,"realmId":"r1","resourceType":"USER","operationType":"CREATE","time":2}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HostEvent {
    User {
        #[serde(flatten)]
        event: Event,
    },
    Admin {
        #[serde(default, rename = "includeRepresentation")]
        include_representation: bool,
        #[serde(flatten)]
        event: AdminEvent,
    },
}

/// Read-only access to realm metadata.
///
/// Realms can be deleted while their events are still in flight, so a
/// lookup miss is an ordinary answer rather than an error.
pub trait RealmLookup: Send + Sync {
    /// Resolve a realm id to its display name.
    fn realm_name(&self, realm_id: &str) -> Option<String>;
}

/// Fixed realm directory, for hosts that know their realms up front.
#[derive(Debug, Clone, Default)]
pub struct StaticRealms {
    names: BTreeMap<String, String>,
}

impl StaticRealms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a realm id with its name.
    pub fn with_realm(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.names.insert(id.into(), name.into());
        self
    }
}

impl<K, V> FromIterator<(K, V)> for StaticRealms
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            names: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl RealmLookup for StaticRealms {
    fn realm_name(&self, realm_id: &str) -> Option<String> {
        self.names.get(realm_id).cloned()
    }
}
