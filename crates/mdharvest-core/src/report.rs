use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{AppError, ErrorKind};
use crate::models::Page;

const MAX_LISTED_ERRORS: usize = 10;

/// Where in the pipeline an error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Submit,
    Poll,
    Fetch,
    Write,
    Boundary,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Submit => "submit",
            Operation::Poll => "poll",
            Operation::Fetch => "fetch",
            Operation::Write => "write",
            Operation::Boundary => "boundary",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Boundary,
    Duplicate,
}

/// One entry of the error listing.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlError {
    pub url: String,
    pub operation: Operation,
    pub kind: ErrorKind,
    pub message: String,
}

impl CrawlError {
    pub fn new(url: impl Into<String>, operation: Operation, error: &AppError) -> Self {
        Self {
            url: url.into(),
            operation,
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// A page-level failure reported by the service, with no local error value.
    pub fn from_message(
        url: impl Into<String>,
        operation: Operation,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            operation,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}: {}",
            self.operation, self.kind, self.url, self.message
        )
    }
}

/// Aggregated outcome of a crawl run.
///
/// Counters only move through the `record_*` methods, which keeps
/// `total == successful + failed + skipped` at all times.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    job_id: Option<String>,
    pages: Vec<Page>,
    files_created: Vec<PathBuf>,
    total: usize,
    successful: usize,
    failed: usize,
    skipped_boundary: usize,
    skipped_duplicate: usize,
    collisions: usize,
    errors: Vec<CrawlError>,
    aborted: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Default for CrawlResult {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlResult {
    pub fn new() -> Self {
        Self {
            job_id: None,
            pages: Vec::new(),
            files_created: Vec::new(),
            total: 0,
            successful: 0,
            failed: 0,
            skipped_boundary: 0,
            skipped_duplicate: 0,
            collisions: 0,
            errors: Vec::new(),
            aborted: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record_page(&mut self, page: Page) {
        self.total += 1;
        if page.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.pages.push(page);
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        self.total += 1;
        match reason {
            SkipReason::Boundary => self.skipped_boundary += 1,
            SkipReason::Duplicate => self.skipped_duplicate += 1,
        }
    }

    pub fn record_file(&mut self, path: PathBuf) {
        self.files_created.push(path);
    }

    pub fn record_error(&mut self, error: CrawlError) {
        self.errors.push(error);
    }

    pub fn record_collision(&mut self) {
        self.collisions += 1;
    }

    pub fn set_job_id(&mut self, job_id: impl Into<String>) {
        self.job_id = Some(job_id.into());
    }

    /// Marks the run as cut short. The first reason wins.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.aborted.is_none() {
            self.aborted = Some(reason.into());
        }
    }

    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn files_created(&self) -> &[PathBuf] {
        &self.files_created
    }

    pub fn errors(&self) -> &[CrawlError] {
        &self.errors
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn successful(&self) -> usize {
        self.successful
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn skipped(&self) -> usize {
        self.skipped_boundary + self.skipped_duplicate
    }

    pub fn skipped_boundary(&self) -> usize {
        self.skipped_boundary
    }

    pub fn skipped_duplicate(&self) -> usize {
        self.skipped_duplicate
    }

    pub fn collisions(&self) -> usize {
        self.collisions
    }

    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Successful pages as a percentage of the total; 0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total as f64 * 100.0
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Human-readable report built only from the accumulated values.
    pub fn summary(&self) -> String {
        let timestamp = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut lines = vec![
            "=== Crawl Summary ===".to_string(),
            format!("Started: {}", timestamp(self.started_at)),
            format!(
                "Completed: {}",
                self.completed_at.map_or_else(|| "N/A".to_string(), timestamp)
            ),
            match self.duration_secs() {
                Some(secs) => format!("Duration: {secs:.2}s"),
                None => "Duration: N/A".to_string(),
            },
        ];
        if let Some(job_id) = &self.job_id {
            lines.push(format!("Job: {job_id}"));
        }
        if let Some(reason) = &self.aborted {
            lines.push(format!("Aborted: {reason}"));
        }

        lines.extend([
            String::new(),
            "Pages:".to_string(),
            format!("  Total: {}", self.total),
            format!("  Successful: {}", self.successful),
            format!("  Failed: {}", self.failed),
            format!(
                "  Skipped: {} (boundary: {}, duplicate: {})",
                self.skipped(),
                self.skipped_boundary,
                self.skipped_duplicate
            ),
            format!("  Success Rate: {:.1}%", self.success_rate()),
            String::new(),
            format!("Files Created: {}", self.files_created.len()),
        ]);
        if self.collisions > 0 {
            lines.push(format!("Path Collisions: {}", self.collisions));
        }

        if !self.errors.is_empty() {
            lines.push(String::new());
            lines.push(format!("Errors ({}):", self.errors.len()));
            lines.extend(
                self.errors
                    .iter()
                    .take(MAX_LISTED_ERRORS)
                    .map(|e| format!("  - {e}")),
            );
            if self.errors.len() > MAX_LISTED_ERRORS {
                lines.push(format!(
                    "  ... and {} more errors",
                    self.errors.len() - MAX_LISTED_ERRORS
                ));
            }
        }

        lines.join("\n")
    }
}
