//! Stream catalog: schemas, primary keys, and discovery metadata.
//!
//! The core treats schemas as opaque contracts. It emits one schema
//! declaration per stream before any records and never validates records
//! against the schema; validation belongs to downstream consumers.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Result, TapError};

/// The streams this tap knows how to extract, in sync order.
pub const STREAM_NAMES: [&str; 5] = ["projects", "issues", "events", "teams", "users"];

/// One declared stream: its schema, primary key, and discovery metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub stream: String,
    pub tap_stream_id: String,
    pub schema: Value,
    pub metadata: Value,
    pub key_properties: Vec<String>,
}

/// The full set of declared streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn get(&self, stream: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|e| e.tap_stream_id == stream)
    }
}

/// Primary key fields per stream. Events are keyed by `eventID`; everything
/// else carries a plain `id`.
#[must_use]
pub fn key_properties(stream: &str) -> Vec<String> {
    let keys: &[&str] = match stream {
        "events" => &["eventID"],
        _ => &["id"],
    };
    keys.iter().map(|k| (*k).to_string()).collect()
}

fn embedded_schema(stream: &str) -> Option<&'static str> {
    match stream {
        "projects" => Some(include_str!("../schemas/projects.json")),
        "issues" => Some(include_str!("../schemas/issues.json")),
        "events" => Some(include_str!("../schemas/events.json")),
        "teams" => Some(include_str!("../schemas/teams.json")),
        "users" => Some(include_str!("../schemas/users.json")),
        _ => None,
    }
}

/// Load the embedded JSON schema for a stream.
pub fn load_schema(stream: &str) -> Result<Value> {
    let raw = embedded_schema(stream)
        .ok_or_else(|| TapError::internal(format!("unknown stream {stream:?}")))?;
    serde_json::from_str(raw)
        .map_err(|e| TapError::internal(format!("embedded schema for {stream} is invalid: {e}")))
}

/// Build discovery metadata for a stream.
///
/// Key properties get `inclusion: automatic`; every other schema property is
/// `available`. The empty breadcrumb carries `table-key-properties`.
#[must_use]
pub fn generate_metadata(stream: &str, schema: &Value) -> Value {
    let keys = key_properties(stream);
    let mut entries = vec![json!({
        "breadcrumb": [],
        "metadata": { "table-key-properties": keys }
    })];

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for field in properties.keys() {
            let inclusion = if keys.iter().any(|k| k == field) {
                "automatic"
            } else {
                "available"
            };
            entries.push(json!({
                "breadcrumb": ["properties", field],
                "metadata": { "inclusion": inclusion }
            }));
        }
    }

    Value::Array(entries)
}

/// Build the catalog for every declared stream.
pub fn discover() -> Result<Catalog> {
    let mut streams = Vec::with_capacity(STREAM_NAMES.len());
    for stream in STREAM_NAMES {
        let schema = load_schema(stream)?;
        let metadata = generate_metadata(stream, &schema);
        streams.push(CatalogEntry {
            stream: stream.to_string(),
            tap_stream_id: stream.to_string(),
            schema,
            metadata,
            key_properties: key_properties(stream),
        });
    }
    Ok(Catalog { streams })
}
