//! Link entry model

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use crate::error::ValidationError;

/// Identifier assigned by the collection store when a link is appended.
///
/// Opaque to the client. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    /// Generate a new time-sortable id (UUID v7), as a store would.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap a store-assigned key exactly as given. Returns `None` only for
    /// the empty key.
    pub fn from_key(key: &str) -> Option<Self> {
        if key.is_empty() {
            None
        } else {
            Some(Self(key.to_string()))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LinkId {
    type Err = ValidationError;

    /// Whitespace-only input is rejected. Other input is kept verbatim.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ValidationError::MissingLinkId);
        }
        Ok(Self(s.to_string()))
    }
}

/// The fields written to the store for one link.
///
/// `timestamp` is milliseconds since the Unix epoch, stamped by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFields {
    pub title: String,
    pub url: String,
    pub timestamp: i64,
}

impl LinkFields {
    /// Validate and normalize user input into storable fields.
    pub fn from_input(title: &str, url: &str, created_at: i64) -> Result<Self, ValidationError> {
        let title = title.trim();
        let url = url.trim();
        if title.is_empty() || url.is_empty() {
            return Err(ValidationError::MissingFields);
        }

        let url = normalize_url(url);
        validate_url(&url)?;

        Ok(Self {
            title: title.to_string(),
            url,
            timestamp: created_at,
        })
    }
}

/// A link as rendered on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub id: LinkId,
    pub title: String,
    pub url: String,
    /// Creation timestamp (Unix ms), used only for ordering
    pub created_at: i64,
}

impl LinkEntry {
    /// Build an entry from a store child. Non-object children yield `None`.
    fn from_child(id: LinkId, value: &Value) -> Option<Self> {
        let fields = value.as_object()?;
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Some(Self {
            title: text("title"),
            url: text("url"),
            created_at: fields.get("timestamp").map_or(0, timestamp_from_value),
            id,
        })
    }
}

/// Newest first; equal timestamps fall back to the id, highest first.
pub fn compare_links(a: &LinkEntry, b: &LinkEntry) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.as_str().cmp(a.id.as_str()))
}

/// The full state of one user's collection as delivered by the store.
///
/// Keys are link ids, values are the raw JSON children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCollection(BTreeMap<String, Value>);

impl RawCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpret a JSON node. `null` means an empty collection.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::default(),
            Value::Object(children) => Self(children.into_iter().collect()),
            other => {
                tracing::warn!("Ignoring non-object link collection: {}", other);
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        if self.0.is_empty() {
            return Value::Null;
        }
        Value::Object(
            self.0
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<String, Value>>(),
        )
    }

    pub fn insert(&mut self, id: &LinkId, fields: &LinkFields) {
        // LinkFields always serializes to an object
        let value = serde_json::to_value(fields).unwrap_or(Value::Null);
        self.0.insert(id.as_str().to_string(), value);
    }

    pub fn remove(&mut self, id: &LinkId) -> bool {
        self.0.remove(id.as_str()).is_some()
    }

    #[must_use]
    pub fn contains(&self, id: &LinkId) -> bool {
        self.0.contains_key(id.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build the ordered link sequence.
    ///
    /// Children that are not objects are skipped. Missing timestamps count as 0.
    #[must_use]
    pub fn to_entries(&self) -> Vec<LinkEntry> {
        let mut entries = self
            .0
            .iter()
            .filter_map(|(key, value)| {
                let Some(id) = LinkId::from_key(key) else {
                    tracing::warn!("Skipping link with empty key");
                    return None;
                };
                let entry = LinkEntry::from_child(id, value);
                if entry.is_none() {
                    tracing::warn!("Skipping malformed link entry {}", key);
                }
                entry
            })
            .collect::<Vec<_>>();
        entries.sort_by(compare_links);
        entries
    }
}

/// Prefix `https://` when the value has no `<scheme>://`.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

fn has_scheme(value: &str) -> bool {
    static SCHEME: OnceLock<Regex> = OnceLock::new();
    SCHEME
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("Invalid regex"))
        .is_match(value)
}

fn validate_url(value: &str) -> Result<(), ValidationError> {
    match Url::parse(value) {
        Ok(parsed) if parsed.has_host() => Ok(()),
        _ => Err(ValidationError::InvalidUrl(value.to_string())),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn timestamp_from_value(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|float| float as i64))
        .or_else(|| value.as_str().and_then(|raw| raw.trim().parse().ok()))
        .unwrap_or(0)
}
