//! Bookmark state: the persisted cursor for incremental streams.
//!
//! The persisted shape is fixed:
//!
//! ```json
//! {"bookmarks": {"issues": {"start": "<ts>"}, "events": {"start": "<ts>"}}}
//! ```
//!
//! Snapshots are copy-on-write: [`TapState::with_bookmark`] returns a new
//! snapshot and leaves the previous one untouched, so a crash between
//! "advance" and "persist" leaves the prior durable state intact. Streams own
//! disjoint keys; no two streams ever advance the same `(stream, field)`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TapError};

/// The bookmark field used by time-windowed streams.
pub const BOOKMARK_FIELD_START: &str = "start";

/// Immutable bookmark snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapState {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, BTreeMap<String, String>>,
}

impl TapState {
    /// Seed a fresh state from the configured start date.
    ///
    /// Only the incremental streams get a bookmark; full-refresh streams
    /// never own one.
    pub fn seeded(start_date: &DateTime<Utc>) -> Self {
        let ts = format_timestamp(start_date);
        let mut bookmarks = BTreeMap::new();
        for stream in ["issues", "events"] {
            let mut fields = BTreeMap::new();
            fields.insert(BOOKMARK_FIELD_START.to_string(), ts.clone());
            bookmarks.insert(stream.to_string(), fields);
        }
        Self { bookmarks }
    }

    /// Overlay persisted bookmarks on top of this snapshot.
    ///
    /// Matches the original run semantics: defaults come from the config
    /// start date, then any previously persisted state wins per stream.
    #[must_use]
    pub fn merged_with(mut self, overlay: TapState) -> Self {
        for (stream, fields) in overlay.bookmarks {
            self.bookmarks.insert(stream, fields);
        }
        self
    }

    pub fn get_bookmark(&self, stream: &str, field: &str) -> Option<&str> {
        self.bookmarks
            .get(stream)
            .and_then(|fields| fields.get(field))
            .map(String::as_str)
    }

    /// Return a new snapshot with `(stream, field)` advanced to `value`.
    ///
    /// Never mutates `self`; the caller decides when the new snapshot
    /// replaces the old one.
    #[must_use]
    pub fn with_bookmark(&self, stream: &str, field: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.bookmarks
            .entry(stream.to_string())
            .or_default()
            .insert(field.to_string(), value.into());
        next
    }
}

/// Format a timestamp the way bookmarks and window params are written.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a bookmark value back into a timestamp.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TapError::malformed("bookmark timestamp", format!("{value:?}: {e}")))
}

/// Durable storage for bookmark snapshots.
///
/// The engine calls [`StateStore::persist`] exactly once per stream, after a
/// successful full-page drain. A persist failure fails the stream and the
/// in-memory snapshot is not replaced.
pub trait StateStore: Send + Sync {
    fn persist(&self, state: &TapState) -> Result<()>;
}

/// File-backed store writing the snapshot atomically (write-then-rename).
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load a previously persisted snapshot, or `None` if the file does not
    /// exist yet.
    pub fn load(path: &Path) -> Result<Option<TapState>> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(TapError::internal(format!(
                    "reading state file {}: {e}",
                    path.display()
                )));
            }
        };

        let state = serde_json::from_slice(&raw)
            .map_err(|e| TapError::malformed("state file", e.to_string()))?;
        Ok(Some(state))
    }
}

impl StateStore for FileStateStore {
    fn persist(&self, state: &TapState) -> Result<()> {
        let raw = serde_json::to_vec_pretty(state)
            .map_err(|e| TapError::internal(format!("serializing state: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)
            .map_err(|e| TapError::internal(format!("writing {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| TapError::internal(format!("renaming into {}: {e}", self.path.display())))
    }
}

/// No-op store for runs that only emit STATE messages.
pub struct DiscardStateStore;

impl StateStore for DiscardStateStore {
    fn persist(&self, _state: &TapState) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).unwrap()
    }

    #[test]
    fn seeded_state_covers_only_incremental_streams() {
        let state = TapState::seeded(&ts("2020-01-01T00:00:00Z"));

        assert_eq!(
            state.get_bookmark("issues", BOOKMARK_FIELD_START),
            Some("2020-01-01T00:00:00.000000Z")
        );
        assert_eq!(
            state.get_bookmark("events", BOOKMARK_FIELD_START),
            Some("2020-01-01T00:00:00.000000Z")
        );
        assert_eq!(state.get_bookmark("users", BOOKMARK_FIELD_START), None);
    }

    #[test]
    fn with_bookmark_leaves_the_original_snapshot_untouched() {
        let original = TapState::seeded(&ts("2020-01-01T00:00:00Z"));
        let advanced = original.with_bookmark(
            "issues",
            BOOKMARK_FIELD_START,
            "2021-06-01T12:00:00.000000Z",
        );

        assert_eq!(
            original.get_bookmark("issues", BOOKMARK_FIELD_START),
            Some("2020-01-01T00:00:00.000000Z")
        );
        assert_eq!(
            advanced.get_bookmark("issues", BOOKMARK_FIELD_START),
            Some("2021-06-01T12:00:00.000000Z")
        );
        // Sibling streams are untouched.
        assert_eq!(
            advanced.get_bookmark("events", BOOKMARK_FIELD_START),
            original.get_bookmark("events", BOOKMARK_FIELD_START)
        );
    }

    #[test]
    fn persisted_overlay_wins_over_seeded_defaults() {
        let seeded = TapState::seeded(&ts("2020-01-01T00:00:00Z"));
        let persisted: TapState = serde_json::from_str(
            r#"{"bookmarks": {"issues": {"start": "2023-03-03T03:03:03.000000Z"}}}"#,
        )
        .unwrap();

        let merged = seeded.merged_with(persisted);
        assert_eq!(
            merged.get_bookmark("issues", BOOKMARK_FIELD_START),
            Some("2023-03-03T03:03:03.000000Z")
        );
        // Events keeps the seed because the overlay did not mention it.
        assert_eq!(
            merged.get_bookmark("events", BOOKMARK_FIELD_START),
            Some("2020-01-01T00:00:00.000000Z")
        );
    }

    #[test]
    fn timestamps_round_trip_through_the_bookmark_format() {
        let now = ts("2024-11-05T08:09:10.123456Z");
        let formatted = format_timestamp(&now);
        assert_eq!(formatted, "2024-11-05T08:09:10.123456Z");
        assert_eq!(parse_timestamp(&formatted).unwrap(), now);
    }

    #[test]
    fn file_store_round_trips_and_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        assert!(FileStateStore::load(&path).unwrap().is_none());

        let state = TapState::seeded(&ts("2020-01-01T00:00:00Z"));
        FileStateStore::new(&path).persist(&state).unwrap();

        let loaded = FileStateStore::load(&path).unwrap().unwrap();
        assert_eq!(loaded, state);
    }
}
