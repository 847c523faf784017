//! S3 data types and listing entry normalization

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw listing entry as delivered by one of the backends.
///
/// Backends disagree on how a listed object looks: some hand out field
/// mappings (`Key`/`Size` on the S3 wire, `path`/`size` elsewhere), others
/// typed records. Every shape a backend can produce is one of these variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawEntry {
    /// Field mapping, recognized when it carries `Key` or `path`
    Mapping(Map<String, Value>),
    /// Typed record exposing `key` and `size`
    Keyed { key: Option<String>, size: Option<u64> },
    /// Typed record exposing `path` and `size`
    Pathed { path: String, size: u64 },
    /// Anything the backend could not map to a known shape
    Opaque(String),
}

/// Normalized listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    /// Object key, `None` when the raw entry did not resolve one
    pub key: Option<String>,
    pub size: Option<u64>,
}

/// Result of classifying a raw entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Recognized(ObjectEntry),
    NotRecognized,
}

impl Classification {
    pub fn entry(&self) -> Option<&ObjectEntry> {
        match self {
            Classification::Recognized(entry) => Some(entry),
            Classification::NotRecognized => None,
        }
    }

    /// Whether the classified entry is a real object worth fetching.
    /// Unrecognized entries are never downloadable.
    pub fn is_downloadable(&self) -> bool {
        self.entry().is_some_and(is_downloadable)
    }
}

/// Caller identity as reported by STS `GetCallerIdentity`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub account: Option<String>,
    pub arn: Option<String>,
    pub user_id: Option<String>,
}

/// Classify a raw entry. Rules are checked in a fixed order, first match wins.
pub fn classify(raw: &RawEntry) -> Classification {
    match raw {
        RawEntry::Mapping(fields) if fields.contains_key("Key") => {
            Classification::Recognized(ObjectEntry {
                key: fields.get("Key").and_then(string_field),
                size: fields.get("Size").and_then(size_field),
            })
        }
        RawEntry::Keyed { key, size } => Classification::Recognized(ObjectEntry {
            key: key.clone(),
            size: *size,
        }),
        RawEntry::Mapping(fields) if fields.contains_key("path") => {
            // A falsy path leaves the key unresolved
            let key = fields
                .get("path")
                .and_then(string_field)
                .filter(|p| !p.is_empty());
            Classification::Recognized(ObjectEntry {
                key,
                size: fields.get("size").and_then(size_field),
            })
        }
        RawEntry::Pathed { path, size } => Classification::Recognized(ObjectEntry {
            key: Some(path.clone()),
            size: Some(*size),
        }),
        RawEntry::Mapping(_) | RawEntry::Opaque(_) => Classification::NotRecognized,
    }
}

/// Decide whether an entry represents a real object rather than a prefix marker.
pub fn is_downloadable(entry: &ObjectEntry) -> bool {
    let Some(key) = entry.key.as_deref() else {
        return false;
    };
    is_object_key(key) && entry.size != Some(0)
}

/// Key-only form of [`is_downloadable`], used when the size is no longer known.
pub fn is_object_key(key: &str) -> bool {
    !key.is_empty() && !key.ends_with('/')
}

/// Name recorded in a listing for this raw entry.
///
/// This is the resolved key when there is one, otherwise a rendering of the
/// raw entry itself.
pub fn listed_name(raw: &RawEntry) -> String {
    if let Some(key) = classify(raw).entry().and_then(|e| e.key.clone()) {
        return key;
    }
    match raw {
        RawEntry::Mapping(fields) => Value::Object(fields.clone()).to_string(),
        RawEntry::Keyed { .. } => String::new(),
        RawEntry::Pathed { path, .. } => path.clone(),
        RawEntry::Opaque(text) => text.clone(),
    }
}

fn string_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn size_field(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        // The S3 XML wire format carries sizes as text
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Get a human-readable size string
pub fn size_string(size: Option<u64>) -> String {
    let Some(size) = size else {
        return String::from("-");
    };

    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if size >= TB {
        format!("{:.2} TB", size as f64 / TB as f64)
    } else if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} B", size)
    }
}
