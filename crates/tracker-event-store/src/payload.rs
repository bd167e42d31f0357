//! Event model types.

use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Store-assigned event id. Defines delivery order.
pub type EventId = i64;

/// Wire encoding used to deliver a batch of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// One event per request, encoded as URL query parameters.
    Get,
    /// Many events per request, encoded as a JSON array in the body.
    Post,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully decorated tracked event: flat string keys to string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPayload {
    fields: BTreeMap<String, String>,
}

impl EventPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Build a payload from a JSON object with scalar values.
    ///
    /// Strings are kept as-is, numbers and booleans are stringified and
    /// nulls are skipped. Nested arrays or objects are rejected: contexts
    /// must already be serialized to a string field by the producer.
    pub fn from_json(value: serde_json::Value) -> StoreResult<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(StoreError::InvalidPayload(
                "event must be a JSON object".to_string(),
            ));
        };

        let mut payload = Self::new();
        for (key, value) in map {
            match value {
                serde_json::Value::Null => {}
                serde_json::Value::String(s) => {
                    payload.insert(key, s);
                }
                serde_json::Value::Bool(b) => {
                    payload.insert(key, b.to_string());
                }
                serde_json::Value::Number(n) => {
                    payload.insert(key, n.to_string());
                }
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(StoreError::InvalidPayload(format!(
                        "field `{}` is not a scalar",
                        key
                    )));
                }
            }
        }
        Ok(payload)
    }

    /// Serialized byte length of this payload for the given encoding.
    ///
    /// POST measures the JSON object, GET measures the form-urlencoded
    /// query string. Envelope overhead is not included.
    pub fn encoded_size(&self, encoding: Encoding) -> usize {
        match encoding {
            Encoding::Post => serde_json::to_string(&self.fields)
                .map(|s| s.len())
                .unwrap_or_default(),
            Encoding::Get => url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.fields.iter())
                .finish()
                .len(),
        }
    }

    /// Encode as a form-urlencoded query string.
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.fields.iter())
            .finish()
    }
}

impl FromIterator<(String, String)> for EventPayload {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// An event persisted in the store, immutable once written.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: EventId,
    pub payload: EventPayload,
    /// Precomputed POST (JSON) size in bytes.
    pub post_size: usize,
    /// Precomputed GET (query string) size in bytes.
    pub get_size: usize,
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Build a stored event, computing both wire sizes once.
    pub fn new(id: EventId, payload: EventPayload, created_at: DateTime<Utc>) -> Self {
        let post_size = payload.encoded_size(Encoding::Post);
        let get_size = payload.encoded_size(Encoding::Get);
        Self {
            id,
            payload,
            post_size,
            get_size,
            created_at,
        }
    }

    /// Precomputed size for the given encoding.
    pub fn encoding_size(&self, encoding: Encoding) -> usize {
        match encoding {
            Encoding::Get => self.get_size,
            Encoding::Post => self.post_size,
        }
    }
}
