//! Sentry API client: authenticated, paginated resource fetches.
//!
//! Each fetch issues an initial GET against
//! `/organizations/<org>/<resource>/` and then follows the `Link` response
//! header while its `rel="next"` entry signals more results. The page chain
//! is bounded by a configurable cap so a misbehaving cursor cannot loop
//! forever or grow memory without bound.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use url::Url;

use crate::auth::Authenticator;
use crate::error::{Result, TapError};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::ApiRateLimiter;
use crate::retry::{RetryConfig, with_network_retry};
use crate::state::format_timestamp;

/// Hosted Sentry API root.
pub const DEFAULT_BASE_URL: &str = "https://sentry.io/api/0/";

/// Pagination guard-rail: generous, but finite.
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

/// The `[start, end)` time range filtering a windowed stream's query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A project record with its extracted id.
///
/// The raw value is emitted verbatim; the id only exists to fan out
/// per-project issue/event queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    raw: Value,
}

impl Project {
    /// Wrap a raw project record, extracting its id.
    ///
    /// The API serves ids as strings, but numbers are accepted too rather
    /// than assuming the wire representation.
    pub fn from_value(raw: Value) -> Result<Self> {
        let id = match raw.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(TapError::malformed(
                    "projects response",
                    "project record has no usable id",
                ));
            }
        };
        Ok(Self { id, raw })
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_raw(self) -> Value {
        self.raw
    }
}

/// The `rel="next"` entry of a pagination `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextLink {
    pub url: String,
    /// Whether the server says more results exist behind this link.
    pub results: bool,
    pub cursor: Option<String>,
}

/// Parse a Sentry pagination `Link` header, keeping the `rel="next"` entry.
///
/// Headers look like:
/// `<https://sentry.io/api/0/...?cursor=0:0:1>; rel="previous"; results="false"; cursor="0:0:1",
///  <https://sentry.io/api/0/...?cursor=0:100:0>; rel="next"; results="true"; cursor="0:100:0"`
///
/// The wire carries `results` as the strings `"true"`/`"false"`; anything
/// other than `"true"` reads as no more results.
#[must_use]
pub fn parse_next_link(link_header: &str) -> Option<NextLink> {
    for part in link_header.split(',') {
        let part = part.trim();

        let mut url = None;
        let mut rel = None;
        let mut results = false;
        let mut cursor = None;

        for segment in part.split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(value) = segment.strip_prefix("rel=") {
                rel = Some(value.trim_matches('"'));
            } else if let Some(value) = segment.strip_prefix("results=") {
                results = value.trim_matches('"') == "true";
            } else if let Some(value) = segment.strip_prefix("cursor=") {
                cursor = Some(value.trim_matches('"').to_string());
            }
        }

        if let (Some(url), Some("next")) = (url, rel) {
            return Some(NextLink {
                url: url.to_string(),
                results,
                cursor,
            });
        }
    }

    None
}

/// Authenticated client for the organization's resource endpoints.
///
/// Cheap to clone behind [`Arc`]; safe to share across concurrent fetch
/// tasks (the transport, limiter, and credential are all read-only).
pub struct SentryClient {
    transport: Arc<dyn HttpTransport>,
    auth: Authenticator,
    base_url: String,
    organization: String,
    max_pages: u32,
    limiter: Option<ApiRateLimiter>,
    retry: RetryConfig,
}

impl SentryClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        token: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            auth: Authenticator::new(token),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: organization.into(),
            max_pages: DEFAULT_MAX_PAGES,
            limiter: None,
            retry: RetryConfig::default(),
        }
    }

    /// Point the client at a non-default API root (self-hosted Sentry).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    /// Override the pagination guard-rail.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Enable proactive rate limiting for every outbound request.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: ApiRateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Override the transient-error retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch the organization's projects.
    pub async fn projects(&self) -> Result<Vec<Project>> {
        let url = self.resource_url("projects", None, None)?;
        let values = self.fetch_paginated(url, "projects").await?;
        values.into_iter().map(Project::from_value).collect()
    }

    /// Fetch issues for one project, optionally filtered to a time window.
    pub async fn issues(&self, project_id: &str, window: Option<&SyncWindow>) -> Result<Vec<Value>> {
        let url = self.resource_url("issues", Some(project_id), window)?;
        self.fetch_paginated(url, "issues").await
    }

    /// Fetch events for one project, optionally filtered to a time window.
    pub async fn events(&self, project_id: &str, window: Option<&SyncWindow>) -> Result<Vec<Value>> {
        let url = self.resource_url("events", Some(project_id), window)?;
        self.fetch_paginated(url, "events").await
    }

    /// Fetch the organization's teams.
    pub async fn teams(&self) -> Result<Vec<Value>> {
        let url = self.resource_url("teams", None, None)?;
        self.fetch_paginated(url, "teams").await
    }

    /// Fetch the organization's members.
    pub async fn users(&self) -> Result<Vec<Value>> {
        let url = self.resource_url("users", None, None)?;
        self.fetch_paginated(url, "users").await
    }

    /// Build the initial URL for a resource fetch.
    fn resource_url(
        &self,
        resource: &str,
        project_id: Option<&str>,
        window: Option<&SyncWindow>,
    ) -> Result<String> {
        let path = format!("organizations/{}/{}/", self.organization, resource);
        let mut url = Url::parse(&self.base_url)
            .and_then(|base| base.join(&path))
            .map_err(|e| TapError::internal(format!("building {resource} URL: {e}")))?;

        if project_id.is_some() || window.is_some() {
            let mut pairs = url.query_pairs_mut();
            if let Some(id) = project_id {
                pairs.append_pair("project", id);
            }
            if let Some(w) = window {
                pairs.append_pair("start", &format_timestamp(&w.start));
                pairs.append_pair("end", &format_timestamp(&w.end));
                pairs.append_pair("utc", "true");
            }
        }

        Ok(url.to_string())
    }

    /// Drain a paginated endpoint into one materialized record list.
    ///
    /// Any page failure aborts the whole fetch; no partial set is returned.
    async fn fetch_paginated(&self, first_url: String, context: &str) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut url = first_url;
        let mut pages_fetched: u32 = 0;

        loop {
            let response = self.get(&url).await?;
            pages_fetched += 1;

            let page: Vec<Value> = serde_json::from_slice(&response.body)
                .map_err(|e| TapError::malformed(context, e.to_string()))?;
            records.extend(page);

            let next = response
                .header("link")
                .and_then(parse_next_link)
                .filter(|link| link.results);

            match next {
                Some(_) if pages_fetched >= self.max_pages => {
                    return Err(TapError::PaginationLimitExceeded {
                        max_pages: self.max_pages,
                    });
                }
                Some(link) => url = link.url,
                None => break,
            }
        }

        tracing::debug!(
            resource = context,
            pages = pages_fetched,
            records = records.len(),
            "drained paginated endpoint"
        );
        Ok(records)
    }

    /// One authenticated GET with rate limiting, retry, and status mapping.
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        with_network_retry(&self.retry, || async {
            if let Some(limiter) = &self.limiter {
                limiter.wait().await;
            }

            let request = self.auth.apply(HttpRequest::get(url));
            let response = self.transport.send(request).await?;

            if !(200..300).contains(&response.status) {
                let body = String::from_utf8_lossy(&response.body).into_owned();
                return Err(TapError::from_status(response.status, body));
            }

            Ok(response)
        })
        .await
    }
}
