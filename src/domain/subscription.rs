use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a registered webhook endpoint.
    EndpointId
);

uuid_id!(
    /// Identifier of an event definition.
    EventId
);

/// Identifier of the user owning endpoints and events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A user-registered destination for webhook deliveries.
///
/// The secret is assigned once at creation and never rotated by the
/// platform. It is skipped on serialization; the creation response exposes
/// it explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EndpointId,

    pub owner: OwnerId,

    pub name: Option<String>,

    pub url: String,

    #[serde(skip_serializing, default)]
    pub secret: String,

    pub description: Option<String>,

    pub active: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Endpoint {
    /// Create an active endpoint
    pub fn new(owner: OwnerId, url: String, secret: String) -> Self {
        Self {
            id: EndpointId::new(),
            owner,
            name: None,
            url,
            secret,
            description: None,
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    pub fn disable(&mut self) {
        self.active = false;
    }

    pub fn enable(&mut self) {
        self.active = true;
    }
}

/// A named event an owner can trigger, with the set of endpoints subscribed to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,

    pub owner: OwnerId,

    pub name: String,

    pub description: Option<String>,

    /// Free-form metadata; never applied to trigger payloads.
    pub metadata: Option<serde_json::Value>,

    pub endpoint_ids: HashSet<EndpointId>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Event {
    pub fn new(owner: OwnerId, name: String) -> Self {
        Self {
            id: EventId::new(),
            owner,
            name,
            description: None,
            metadata: None,
            endpoint_ids: HashSet::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Subscribe the given endpoints to this event
    pub fn subscribe_to(mut self, endpoint_ids: impl IntoIterator<Item = EndpointId>) -> Self {
        self.endpoint_ids.extend(endpoint_ids);
        self
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_subscribed(&self, endpoint_id: &EndpointId) -> bool {
        self.endpoint_ids.contains(endpoint_id)
    }
}
