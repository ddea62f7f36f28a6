//! Sentry tap - incremental record extraction with bookmark checkpointing.
//!
//! This library pulls projects, issues, events, teams, and users from one
//! Sentry organization and emits them as a schema-tagged message stream.
//! Incremental streams (issues, events) track a persisted bookmark: the
//! engine derives each run's extraction window from it and only advances it
//! once the whole window has been fetched and emitted.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use sentry_tap::client::SentryClient;
//! use sentry_tap::http::reqwest_transport::ReqwestTransport;
//! use sentry_tap::output::JsonLineSink;
//! use sentry_tap::state::{FileStateStore, TapState};
//! use sentry_tap::sync::{SyncEngine, run_streams};
//!
//! let transport = ReqwestTransport::with_timeout(Duration::from_secs(60))?;
//! let client = SentryClient::new(Arc::new(transport), token, "my-org");
//! let sink = Arc::new(JsonLineSink::new(std::io::stdout()));
//! let store = Arc::new(FileStateStore::new("state.json"));
//!
//! let engine = SyncEngine::new(Arc::new(client), sink, store, TapState::default()).await?;
//! let reports = run_streams(&engine, &sentry_tap::catalog::discover()?).await;
//! ```

pub mod auth;
pub mod catalog;
pub mod client;
pub mod error;
pub mod http;
pub mod output;
pub mod rate_limit;
pub mod retry;
pub mod state;
pub mod sync;

pub use catalog::{Catalog, CatalogEntry, discover};
pub use client::{Project, SentryClient, SyncWindow};
pub use error::{Result, TapError};
pub use output::{JsonLineSink, RecordSink, TapMessage};
pub use rate_limit::ApiRateLimiter;
pub use state::{FileStateStore, StateStore, TapState};
pub use sync::{ShutdownFlag, StreamReport, SyncEngine, first_failure, run_streams};
