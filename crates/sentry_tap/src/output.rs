//! Record output: schema-tagged messages on a line-oriented sink.
//!
//! The engine emits, per stream, one SCHEMA message followed by zero or more
//! RECORD messages, plus a STATE message each time a bookmark advances. The
//! exact byte format lives entirely in this module; the engine only talks to
//! the [`RecordSink`] trait.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, TapError};
use crate::state::TapState;

/// One message on the output stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum TapMessage {
    #[serde(rename = "SCHEMA")]
    Schema {
        stream: String,
        schema: Value,
        key_properties: Vec<String>,
    },
    #[serde(rename = "RECORD")]
    Record { stream: String, record: Value },
    #[serde(rename = "STATE")]
    State { value: TapState },
}

impl TapMessage {
    pub fn schema(stream: impl Into<String>, schema: Value, key_properties: Vec<String>) -> Self {
        Self::Schema {
            stream: stream.into(),
            schema,
            key_properties,
        }
    }

    pub fn record(stream: impl Into<String>, record: Value) -> Self {
        Self::Record {
            stream: stream.into(),
            record,
        }
    }

    pub fn state(value: TapState) -> Self {
        Self::State { value }
    }
}

/// Destination for tap messages.
///
/// Implementations must be safe to share across concurrent stream tasks;
/// each `write` call emits one whole message.
pub trait RecordSink: Send + Sync {
    fn write(&self, message: TapMessage) -> Result<()>;
}

/// Line-delimited JSON sink over any writer (stdout in production).
pub struct JsonLineSink<W: Write + Send> {
    inner: Mutex<W>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> RecordSink for JsonLineSink<W> {
    fn write(&self, message: TapMessage) -> Result<()> {
        let line = serde_json::to_string(&message)
            .map_err(|e| TapError::internal(format!("serializing output message: {e}")))?;

        let mut writer = self
            .inner
            .lock()
            .map_err(|_| TapError::internal("output sink lock poisoned"))?;
        writeln!(writer, "{line}")
            .and_then(|_| writer.flush())
            .map_err(|e| TapError::internal(format!("writing output message: {e}")))
    }
}

/// In-memory sink collecting messages, for tests and embedding.
#[derive(Default)]
pub struct MemorySink {
    messages: Mutex<Vec<TapMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<TapMessage> {
        self.messages
            .lock()
            .expect("memory sink lock should not be poisoned")
            .clone()
    }

    /// Records emitted for one stream, in emission order.
    #[must_use]
    pub fn records_for(&self, stream: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                TapMessage::Record {
                    stream: s, record, ..
                } if s == stream => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Streams that had a SCHEMA message emitted, in emission order.
    #[must_use]
    pub fn schema_streams(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                TapMessage::Schema { stream, .. } => Some(stream),
                _ => None,
            })
            .collect()
    }
}

impl RecordSink for MemorySink {
    fn write(&self, message: TapMessage) -> Result<()> {
        self.messages
            .lock()
            .map_err(|_| TapError::internal("memory sink lock poisoned"))?
            .push(message);
        Ok(())
    }
}
