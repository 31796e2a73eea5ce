use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod logging;

// ============================================================================
// Destinations
// ============================================================================

/// A logical message channel a processor consumes from.
///
/// Serialized adjacently tagged so configuration files read naturally:
/// `destination = { kind = "topic", name = "/topics/prices" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum Destination {
    Queue(String),
    Topic(String),
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Destination::Queue(name.into())
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Destination::Topic(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::Topic(name) => name,
        }
    }

    /// Durable subscriptions only exist for topics.
    pub fn is_topic(&self) -> bool {
        matches!(self, Destination::Topic(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue:{}", name),
            Destination::Topic(name) => write!(f, "topic:{}", name),
        }
    }
}

// ============================================================================
// Core Message Type
// ============================================================================

/// A message as delivered by the transport to a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub destination: Destination,
    pub body: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// Number of previous delivery attempts reported by the transport
    #[serde(default)]
    pub redelivery_count: u32,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp.
    pub fn new(destination: Destination, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            destination,
            body: body.into(),
            properties: BTreeMap::new(),
            timestamp: Utc::now(),
            redelivery_count: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Parse the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}
