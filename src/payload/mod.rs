//! Normalized event payloads.
//!
//! Each host event becomes exactly one immutable payload record, built with a
//! single realm lookup and serialized as camelCase JSON. Absent values are
//! written as `null` rather than omitted, so consumers can rely on a fixed
//! field set.
//!
//! Routing keys:
//! - user events: `{realm}:{eventType}:{userId|anon}`
//! - admin events: `{realm}:{operationType}:{resourceType}`
//!
//! where `{realm}` is the resolved realm name, falling back to the realm id.
//! A segment the host left unset is written as the literal `null`, so keys
//! keep their three segments.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::host::{AdminEvent, Event, RealmLookup};

/// Key segment used for user events with no user attached.
pub const ANONYMOUS_USER: &str = "anon";
/// Key segment for any other identifier the host left unset.
pub const NULL_SEGMENT: &str = "null";

/// Payload for a plain user action event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventPayload {
    realm_id: Option<String>,
    realm_name: Option<String>,
    client_id: Option<String>,
    user_id: Option<String>,
    ip_address: Option<String>,
    event_type: Option<String>,
    time: i64,
    details: Option<BTreeMap<String, String>>,
}

impl UserEventPayload {
    /// Normalize a host event.
    pub fn from_event(event: &Event, realms: &dyn RealmLookup) -> Self {
        Self {
            realm_id: event.realm_id.clone(),
            realm_name: resolve_realm(realms, event.realm_id.as_deref()),
            client_id: event.client_id.clone(),
            user_id: event.user_id.clone(),
            ip_address: event.ip_address.clone(),
            event_type: event.event_type.clone(),
            time: event.time,
            details: event.details.as_ref().map(|details| {
                details
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            }),
        }
    }

    /// Routing key for partitioning.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            realm_display(self.realm_id.as_deref(), self.realm_name.as_deref()),
            segment(self.event_type.as_deref()),
            self.user_id.as_deref().unwrap_or(ANONYMOUS_USER)
        )
    }

    /// Serialize to the outbound JSON body.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn realm_id(&self) -> Option<&str> {
        self.realm_id.as_deref()
    }

    pub fn realm_name(&self) -> Option<&str> {
        self.realm_name.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn details(&self) -> Option<&BTreeMap<String, String>> {
        self.details.as_ref()
    }
}

/// Acting identity of an admin event.
///
/// Flattened into the admin payload as `authRealmId`, `authClientId`,
/// `authUserId` and `authIpAddress`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    #[serde(rename = "authRealmId")]
    realm_id: Option<String>,
    #[serde(rename = "authClientId")]
    client_id: Option<String>,
    #[serde(rename = "authUserId")]
    user_id: Option<String>,
    #[serde(rename = "authIpAddress")]
    ip_address: Option<String>,
}

impl AuthContext {
    pub fn realm_id(&self) -> Option<&str> {
        self.realm_id.as_deref()
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }
}

/// Payload for an administrative action event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminEventPayload {
    realm_id: Option<String>,
    realm_name: Option<String>,
    resource_type: Option<String>,
    operation_type: Option<String>,
    resource_path: Option<String>,
    time: Option<i64>,
    #[serde(flatten)]
    auth: AuthContext,
    representation: Option<String>,
}

impl AdminEventPayload {
    /// Normalize a host admin event.
    ///
    /// The representation is carried only when `include_representation` is
    /// set; otherwise it is dropped even if the host captured one.
    pub fn from_admin_event(
        event: &AdminEvent,
        realms: &dyn RealmLookup,
        include_representation: bool,
    ) -> Self {
        let auth = event
            .auth_details
            .as_ref()
            .map(|a| AuthContext {
                realm_id: a.realm_id.clone(),
                client_id: a.client_id.clone(),
                user_id: a.user_id.clone(),
                ip_address: a.ip_address.clone(),
            })
            .unwrap_or_default();

        Self {
            realm_id: event.realm_id.clone(),
            realm_name: resolve_realm(realms, event.realm_id.as_deref()),
            resource_type: event.resource_type.clone(),
            operation_type: event.operation_type.clone(),
            resource_path: event.resource_path.clone(),
            time: event.time,
            auth,
            representation: if include_representation {
                event.representation.clone()
            } else {
                None
            },
        }
    }

    /// Routing key for partitioning.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            realm_display(self.realm_id.as_deref(), self.realm_name.as_deref()),
            segment(self.operation_type.as_deref()),
            segment(self.resource_type.as_deref())
        )
    }

    /// Serialize to the outbound JSON body.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn realm_id(&self) -> Option<&str> {
        self.realm_id.as_deref()
    }

    pub fn realm_name(&self) -> Option<&str> {
        self.realm_name.as_deref()
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn operation_type(&self) -> Option<&str> {
        self.operation_type.as_deref()
    }

    pub fn resource_path(&self) -> Option<&str> {
        self.resource_path.as_deref()
    }

    pub fn time(&self) -> Option<i64> {
        self.time
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn representation(&self) -> Option<&str> {
        self.representation.as_deref()
    }
}

/// Without a realm id there is nothing to look up.
fn resolve_realm(realms: &dyn RealmLookup, realm_id: Option<&str>) -> Option<String> {
    realm_id.and_then(|id| realms.realm_name(id))
}

fn realm_display<'a>(realm_id: Option<&'a str>, realm_name: Option<&'a str>) -> &'a str {
    realm_name.or(realm_id).unwrap_or(NULL_SEGMENT)
}

fn segment(value: Option<&str>) -> &str {
    value.unwrap_or(NULL_SEGMENT)
}
