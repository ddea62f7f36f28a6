//! Stream sync engine and runner.
//!
//! Per stream the engine runs: derive window from bookmark → fetch all pages
//! → emit each record → advance bookmark → persist. The bookmark advance is
//! strictly sequenced after the join barrier over every project fetch of
//! that stream; a failure anywhere before the barrier leaves the bookmark
//! untouched, so the next run re-reads the same unconsumed window instead of
//! silently skipping records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::catalog::{Catalog, CatalogEntry};
use crate::client::{Project, SentryClient, SyncWindow};
use crate::error::{Result, TapError};
use crate::output::{RecordSink, TapMessage};
use crate::state::{
    BOOKMARK_FIELD_START, StateStore, TapState, format_timestamp, parse_timestamp,
};

/// Upper bound on concurrent per-project fetches within one stream.
pub const DEFAULT_PROJECT_CONCURRENCY: usize = 8;

/// Phases a stream passes through during one run.
///
/// `Failed` is terminal and never advances the bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    NotStarted,
    FetchingPages,
    Emitting,
    AdvancingBookmark,
    Done,
    Failed,
}

/// Cooperative shutdown flag shared between the CLI signal handler and the
/// engine. Once requested, in-flight streams stop before their next fetch
/// and no bookmark advances.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of one stream's sync.
#[derive(Debug)]
pub struct StreamReport {
    pub stream: String,
    pub phase: StreamPhase,
    pub result: Result<()>,
}

impl StreamReport {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }
}

/// Orchestrates per-stream extraction against one organization.
///
/// Projects are fetched once at construction and cached for the run; the
/// issues/events fan-out iterates that cached list.
pub struct SyncEngine {
    client: Arc<SentryClient>,
    sink: Arc<dyn RecordSink>,
    store: Arc<dyn StateStore>,
    state: Mutex<TapState>,
    projects: Vec<Project>,
    concurrency: usize,
    shutdown: ShutdownFlag,
}

impl SyncEngine {
    /// Build an engine, fetching and caching the project list.
    pub async fn new(
        client: Arc<SentryClient>,
        sink: Arc<dyn RecordSink>,
        store: Arc<dyn StateStore>,
        initial_state: TapState,
    ) -> Result<Self> {
        let projects = client.projects().await?;
        tracing::info!(projects = projects.len(), "cached project list for run");

        Ok(Self {
            client,
            sink,
            store,
            state: Mutex::new(initial_state),
            projects,
            concurrency: DEFAULT_PROJECT_CONCURRENCY,
            shutdown: ShutdownFlag::new(),
        })
    }

    /// Bound the per-project fetch pool.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Wire up an external shutdown flag.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Current bookmark snapshot.
    pub fn state_snapshot(&self) -> Result<TapState> {
        Ok(self.locked_state()?.clone())
    }

    /// Sync one declared stream to completion.
    pub async fn sync_stream(&self, entry: &CatalogEntry) -> Result<()> {
        match entry.tap_stream_id.as_str() {
            "projects" => self.sync_projects(entry),
            "issues" | "events" => self.sync_windowed(entry).await,
            "teams" | "users" => self.sync_full_refresh(entry).await,
            other => Err(TapError::internal(format!(
                "catalog declares unknown stream {other:?}"
            ))),
        }
    }

    /// Emit the cached project list verbatim. Full refresh, no bookmark.
    fn sync_projects(&self, entry: &CatalogEntry) -> Result<()> {
        self.write_schema(entry)?;
        for project in &self.projects {
            self.sink.write(TapMessage::record(
                entry.tap_stream_id.as_str(),
                project.raw().clone(),
            ))?;
        }
        Ok(())
    }

    /// Single fetch, no project fan-out, no window, no bookmark.
    async fn sync_full_refresh(&self, entry: &CatalogEntry) -> Result<()> {
        let stream = entry.tap_stream_id.as_str();
        self.write_schema(entry)?;
        self.check_cancelled()?;

        let records = match stream {
            "teams" => self.client.teams().await?,
            _ => self.client.users().await?,
        };

        for record in records {
            self.sink.write(TapMessage::record(stream, record))?;
        }
        Ok(())
    }

    /// Incremental sync with per-project fan-out.
    ///
    /// The window end is captured once, before any per-project fetch, so all
    /// projects in the run share one consistent window even if the run takes
    /// a long time. Only after every project drains does the bookmark
    /// advance to that captured end.
    async fn sync_windowed(&self, entry: &CatalogEntry) -> Result<()> {
        let stream = entry.tap_stream_id.clone();
        self.write_schema(entry)?;

        let window_end = Utc::now();
        let window = match self.locked_state()?.get_bookmark(&stream, BOOKMARK_FIELD_START) {
            Some(raw) => Some(SyncWindow {
                start: parse_timestamp(raw)?,
                end: window_end,
            }),
            None => None,
        };

        tracing::debug!(stream = %stream, phase = ?StreamPhase::FetchingPages, projects = self.projects.len(), "starting project fan-out");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = Vec::with_capacity(self.projects.len());
        for project in &self.projects {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let shutdown = self.shutdown.clone();
            let stream = stream.clone();
            let project_id = project.id.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| TapError::internal("fetch pool closed"))?;
                if shutdown.is_requested() {
                    return Err(TapError::Cancelled);
                }
                match stream.as_str() {
                    "issues" => client.issues(&project_id, window.as_ref()).await,
                    _ => client.events(&project_id, window.as_ref()).await,
                }
            }));
        }

        // Join barrier: every project fetch reaches a terminal state before
        // anything is emitted or advanced. The first error wins; sibling
        // fetches still run to completion.
        let mut drained: Vec<Vec<Value>> = Vec::with_capacity(tasks.len());
        let mut first_error: Option<TapError> = None;
        for task in tasks {
            match task.await {
                Ok(Ok(records)) => drained.push(records),
                Ok(Err(e)) => first_error = first_error.or(Some(e)),
                Err(e) => {
                    first_error =
                        first_error.or(Some(TapError::internal(format!("fetch task panicked: {e}"))))
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        tracing::debug!(stream = %stream, phase = ?StreamPhase::Emitting, "all projects drained");
        for records in drained {
            for record in records {
                self.sink.write(TapMessage::record(stream.as_str(), record))?;
            }
        }

        self.check_cancelled()?;
        tracing::debug!(stream = %stream, phase = ?StreamPhase::AdvancingBookmark, "advancing bookmark");
        self.advance_bookmark(&stream, &window_end)
    }

    /// Advance, persist, and publish the stream's bookmark.
    ///
    /// The new snapshot only replaces the in-memory one after it is durable,
    /// so a persist failure leaves the prior state intact.
    fn advance_bookmark(&self, stream: &str, window_end: &DateTime<Utc>) -> Result<()> {
        let next = {
            let state = self.locked_state()?;
            if let Some(current) = state.get_bookmark(stream, BOOKMARK_FIELD_START) {
                // Clock-skew guard: a bookmark never moves backwards.
                if parse_timestamp(current)? > *window_end {
                    tracing::warn!(stream, current, "window end precedes bookmark, not advancing");
                    return Ok(());
                }
            }
            state.with_bookmark(stream, BOOKMARK_FIELD_START, format_timestamp(window_end))
        };

        self.store.persist(&next)?;
        self.sink.write(TapMessage::state(next.clone()))?;
        *self.locked_state()? = next;
        Ok(())
    }

    fn write_schema(&self, entry: &CatalogEntry) -> Result<()> {
        self.sink.write(TapMessage::schema(
            entry.tap_stream_id.as_str(),
            entry.schema.clone(),
            entry.key_properties.clone(),
        ))
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.shutdown.is_requested() {
            Err(TapError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn locked_state(&self) -> Result<std::sync::MutexGuard<'_, TapState>> {
        self.state
            .lock()
            .map_err(|_| TapError::internal("state lock poisoned"))
    }
}

/// Run every declared stream concurrently and collect per-stream outcomes.
///
/// Does not fail fast: one stream's remote failure never abandons its
/// siblings. The caller inspects the reports for the first failure.
pub async fn run_streams(engine: &SyncEngine, catalog: &Catalog) -> Vec<StreamReport> {
    let tasks = catalog.streams.iter().map(|entry| async move {
        let result = engine.sync_stream(entry).await;
        let phase = match &result {
            Ok(()) => StreamPhase::Done,
            Err(e) => {
                tracing::error!(stream = %entry.tap_stream_id, error = %e, "stream sync failed");
                StreamPhase::Failed
            }
        };
        StreamReport {
            stream: entry.tap_stream_id.clone(),
            phase,
            result,
        }
    });

    join_all(tasks).await
}

/// First failed report, if any stream failed.
#[must_use]
pub fn first_failure(reports: &[StreamReport]) -> Option<&StreamReport> {
    reports.iter().find(|r| r.is_failure())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{self, Catalog};
    use crate::http::{HttpResponse, MockTransport};
    use crate::output::MemorySink;
    use crate::retry::RetryConfig;
    use crate::state::DiscardStateStore;
    use serde_json::json;

    const ORG: &str = "acme";
    const START_DATE: &str = "2020-01-01T00:00:00Z";

    fn org_url(resource: &str) -> String {
        format!("https://sentry.io/api/0/organizations/{ORG}/{resource}/")
    }

    fn seeded_state() -> TapState {
        TapState::seeded(&START_DATE.parse().unwrap())
    }

    async fn engine_with_state(
        mock: &MockTransport,
        sink: Arc<MemorySink>,
        state: TapState,
    ) -> SyncEngine {
        let client = SentryClient::new(Arc::new(mock.clone()), "token-1", ORG)
            .with_retry(RetryConfig::none());
        SyncEngine::new(
            Arc::new(client),
            sink,
            Arc::new(DiscardStateStore),
            state,
        )
        .await
        .expect("engine should construct")
    }

    fn entry(stream: &str) -> crate::catalog::CatalogEntry {
        catalog::discover()
            .unwrap()
            .get(stream)
            .cloned()
            .unwrap_or_else(|| panic!("catalog should declare {stream}"))
    }

    #[tokio::test]
    async fn fresh_issue_sync_emits_schema_then_record_and_advances_bookmark() {
        let mock = MockTransport::new();
        mock.push_json(org_url("projects"), &json!([{"id": "1", "name": "api"}]));
        mock.push_json_prefix(
            format!("{}?project=1", org_url("issues")),
            &json!([{"id": "42"}]),
        );

        let sink = Arc::new(MemorySink::new());
        let run_started = Utc::now();
        let engine = engine_with_state(&mock, Arc::clone(&sink), seeded_state()).await;

        engine.sync_stream(&entry("issues")).await.unwrap();

        let messages = sink.messages();
        assert!(
            matches!(&messages[0], TapMessage::Schema { stream, .. } if stream.as_str() == "issues")
        );
        assert_eq!(sink.records_for("issues"), vec![json!({"id": "42"})]);

        // The issues request carried the seeded window start.
        let issue_request = mock
            .requests()
            .into_iter()
            .find(|r| r.url.contains("/issues/"))
            .unwrap();
        assert!(issue_request.url.contains("start=2020-01-01T00%3A00%3A00.000000Z"));
        assert!(issue_request.url.contains("utc=true"));

        // Bookmark advanced to the captured run time, not the start date.
        let state = engine.state_snapshot().unwrap();
        let bookmark =
            parse_timestamp(state.get_bookmark("issues", BOOKMARK_FIELD_START).unwrap()).unwrap();
        assert!(bookmark >= run_started);

        // The advanced snapshot was also published as a STATE message.
        assert!(
            messages
                .iter()
                .any(|m| matches!(m, TapMessage::State { value } if *value == state))
        );
    }

    #[tokio::test]
    async fn failed_page_leaves_bookmark_unchanged_and_siblings_complete() {
        let mock = MockTransport::new();
        mock.push_json(org_url("projects"), &json!([{"id": "1"}]));

        // Issues: page 1 succeeds but links to a page that returns 500.
        let page_two = "https://sentry.io/api/0/cursor/2";
        mock.push_response_prefix(
            format!("{}?project=1", org_url("issues")),
            HttpResponse {
                status: 200,
                headers: vec![(
                    "Link".to_string(),
                    format!("<{page_two}>; rel=\"next\"; results=\"true\"; cursor=\"0:100:0\""),
                )],
                body: serde_json::to_vec(&json!([{"id": "1"}])).unwrap(),
            },
        );
        mock.push_response(
            page_two,
            HttpResponse {
                status: 500,
                headers: Vec::new(),
                body: b"upstream worker crashed".to_vec(),
            },
        );

        mock.push_json(org_url("teams"), &json!([{"id": "t1"}]));
        mock.push_json(org_url("users"), &json!([{"id": "u1"}]));

        let sink = Arc::new(MemorySink::new());
        let before = seeded_state();
        let engine = engine_with_state(&mock, Arc::clone(&sink), before.clone()).await;

        let catalog = Catalog {
            streams: ["issues", "teams", "users"].map(entry).to_vec(),
        };
        let reports = run_streams(&engine, &catalog).await;

        let failed = first_failure(&reports).unwrap();
        assert_eq!(failed.stream, "issues");
        assert_eq!(failed.phase, StreamPhase::Failed);
        assert!(matches!(
            failed.result.as_ref().unwrap_err(),
            TapError::Api { status: 500, .. }
        ));

        // No partial issue records beyond page buffering were emitted.
        assert!(sink.records_for("issues").is_empty());

        // Bookmark untouched.
        assert_eq!(engine.state_snapshot().unwrap(), before);

        // Independent streams completed in the same run.
        assert_eq!(sink.records_for("teams"), vec![json!({"id": "t1"})]);
        assert_eq!(sink.records_for("users"), vec![json!({"id": "u1"})]);
        assert!(
            reports
                .iter()
                .filter(|r| r.stream != "issues")
                .all(|r| r.phase == StreamPhase::Done)
        );
    }

    #[tokio::test]
    async fn full_refresh_streams_ignore_bookmarks_entirely() {
        let mock = MockTransport::new();
        mock.push_json(org_url("projects"), &json!([]));
        mock.push_json(org_url("users"), &json!([{"id": "u1"}, {"id": "u2"}]));
        mock.push_json(org_url("users"), &json!([{"id": "u1"}, {"id": "u2"}]));

        let sink = Arc::new(MemorySink::new());
        let engine = engine_with_state(&mock, Arc::clone(&sink), seeded_state()).await;

        engine.sync_stream(&entry("users")).await.unwrap();

        // Second run with a completely different bookmark set.
        let skewed = seeded_state().with_bookmark("users", BOOKMARK_FIELD_START, "2099-01-01T00:00:00.000000Z");
        let sink2 = Arc::new(MemorySink::new());
        let engine2 = {
            mock.push_json(org_url("projects"), &json!([]));
            engine_with_state(&mock, Arc::clone(&sink2), skewed).await
        };
        engine2.sync_stream(&entry("users")).await.unwrap();

        assert_eq!(sink.records_for("users"), sink2.records_for("users"));

        // The users requests carried no window parameters at all.
        for request in mock.requests().iter().filter(|r| r.url.contains("/users/")) {
            assert!(!request.url.contains('?'));
        }
    }

    #[tokio::test]
    async fn projects_stream_emits_cached_list_without_refetching() {
        let mock = MockTransport::new();
        mock.push_json(
            org_url("projects"),
            &json!([{"id": "1", "name": "api"}, {"id": "2", "name": "web"}]),
        );

        let sink = Arc::new(MemorySink::new());
        let engine = engine_with_state(&mock, Arc::clone(&sink), TapState::default()).await;
        let fetches_after_construction = mock.requests().len();

        engine.sync_stream(&entry("projects")).await.unwrap();

        assert_eq!(mock.requests().len(), fetches_after_construction);
        assert_eq!(
            sink.records_for("projects"),
            vec![
                json!({"id": "1", "name": "api"}),
                json!({"id": "2", "name": "web"})
            ]
        );
    }

    #[tokio::test]
    async fn bookmark_is_non_decreasing_across_runs() {
        let mock = MockTransport::new();
        mock.push_json(org_url("projects"), &json!([{"id": "1"}]));
        mock.push_json_prefix(format!("{}?project=1", org_url("events")), &json!([]));
        mock.push_json_prefix(format!("{}?project=1", org_url("events")), &json!([]));

        let sink = Arc::new(MemorySink::new());
        let engine = engine_with_state(&mock, Arc::clone(&sink), seeded_state()).await;

        engine.sync_stream(&entry("events")).await.unwrap();
        let first = engine.state_snapshot().unwrap();
        let first_ts =
            parse_timestamp(first.get_bookmark("events", BOOKMARK_FIELD_START).unwrap()).unwrap();

        engine.sync_stream(&entry("events")).await.unwrap();
        let second = engine.state_snapshot().unwrap();
        let second_ts =
            parse_timestamp(second.get_bookmark("events", BOOKMARK_FIELD_START).unwrap()).unwrap();

        assert!(second_ts >= first_ts);
    }

    #[tokio::test]
    async fn shutdown_request_cancels_without_advancing() {
        let mock = MockTransport::new();
        mock.push_json(org_url("projects"), &json!([{"id": "1"}]));

        let sink = Arc::new(MemorySink::new());
        let before = seeded_state();
        let shutdown = ShutdownFlag::new();
        let engine = engine_with_state(&mock, Arc::clone(&sink), before.clone())
            .await
            .with_shutdown(shutdown.clone());

        shutdown.request();
        let err = engine.sync_stream(&entry("issues")).await.unwrap_err();

        assert!(matches!(err, TapError::Cancelled));
        assert_eq!(engine.state_snapshot().unwrap(), before);
        assert!(sink.records_for("issues").is_empty());
    }

    #[tokio::test]
    async fn unknown_stream_in_catalog_is_rejected() {
        let mock = MockTransport::new();
        mock.push_json(org_url("projects"), &json!([]));

        let sink = Arc::new(MemorySink::new());
        let engine = engine_with_state(&mock, sink, TapState::default()).await;

        let mut bogus = entry("users");
        bogus.tap_stream_id = "releases".to_string();
        let err = engine.sync_stream(&bogus).await.unwrap_err();
        assert!(matches!(err, TapError::Internal { .. }));
    }
}
