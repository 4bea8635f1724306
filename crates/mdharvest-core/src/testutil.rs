//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit and integration tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::crawl::{CrawlEvent, CrawlReporter};
use crate::error::AppError;
use crate::job::{JobSnapshot, JobStatus};
use crate::models::{CrawlRequest, Format, RawPage, SubmitReceipt};
use crate::retry::Sleeper;
use crate::traits::ContentService;

/// Builds a successful raw page.
pub fn raw_page(url: &str, title: Option<&str>, markdown: &str, links: &[&str]) -> RawPage {
    RawPage {
        source_url: url.to_string(),
        resolved_url: Some(url.to_string()),
        markdown: markdown.to_string(),
        title: title.map(str::to_string),
        links: links.iter().map(|l| l.to_string()).collect(),
        ..Default::default()
    }
}

/// Builds a status snapshot carrying the given cumulative pages.
pub fn snapshot(status: JobStatus, pages: Vec<RawPage>) -> JobSnapshot {
    JobSnapshot {
        status,
        total: pages.len(),
        completed: pages.len(),
        pages,
        error: None,
    }
}

// ---------------------------------------------------------------------------
// MockService
// ---------------------------------------------------------------------------

/// A call received by [`MockService`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    Submit(CrawlRequest),
    Status(String),
    Scrape { url: String, formats: Vec<Format> },
    Map { url: String, limit: usize },
}

/// Scripted content service.
///
/// - `submit_crawl` pops scripted results; when none are left it accepts
///   the job as `job-1`.
/// - `crawl_status` pops scripted snapshots; when none are left it reports
///   an in-progress job with no pages.
/// - `scrape` pops the results scripted for that URL; an unscripted URL
///   answers with a 404. A stalled URL never answers.
/// - `map` pops scripted link lists; when none are left it finds nothing.
///
/// With a latency set, every call sleeps on the tokio clock first.
#[derive(Clone, Default)]
pub struct MockService {
    submits: Arc<Mutex<VecDeque<Result<SubmitReceipt, AppError>>>>,
    statuses: Arc<Mutex<VecDeque<Result<JobSnapshot, AppError>>>>,
    pages: Arc<Mutex<HashMap<String, VecDeque<Result<RawPage, AppError>>>>>,
    maps: Arc<Mutex<VecDeque<Result<Vec<String>, AppError>>>>,
    stalled: HashSet<String>,
    latency: Option<Duration>,
    calls: Arc<Mutex<Vec<ServiceCall>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submit(self, result: Result<SubmitReceipt, AppError>) -> Self {
        self.submits.lock().unwrap().push_back(result);
        self
    }

    pub fn with_status(self, result: Result<JobSnapshot, AppError>) -> Self {
        self.statuses.lock().unwrap().push_back(result);
        self
    }

    pub fn with_page(self, url: &str, result: Result<RawPage, AppError>) -> Self {
        self.pages
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
        self
    }

    pub fn with_map(self, result: Result<Vec<String>, AppError>) -> Self {
        self.maps.lock().unwrap().push_back(result);
        self
    }

    /// Scrapes of `url` hang forever.
    pub fn with_stalled_page(mut self, url: &str) -> Self {
        self.stalled.insert(url.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn scrape_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, ServiceCall::Scrape { url: u, .. } if u == url))
            .count()
    }

    async fn record(&self, call: ServiceCall) {
        self.calls.lock().unwrap().push(call);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl ContentService for MockService {
    async fn submit_crawl(&self, request: &CrawlRequest) -> Result<SubmitReceipt, AppError> {
        self.record(ServiceCall::Submit(request.clone())).await;
        self.submits.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(SubmitReceipt {
                job_id: "job-1".to_string(),
                status_url: None,
            })
        })
    }

    async fn crawl_status(&self, job_id: &str) -> Result<JobSnapshot, AppError> {
        self.record(ServiceCall::Status(job_id.to_string())).await;
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(JobSnapshot::new(JobStatus::InProgress)))
    }

    async fn scrape(&self, url: &str, formats: &[Format]) -> Result<RawPage, AppError> {
        self.record(ServiceCall::Scrape {
            url: url.to_string(),
            formats: formats.to_vec(),
        })
        .await;
        if self.stalled.contains(url) {
            std::future::pending::<()>().await;
        }
        self.pages
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(AppError::from_status(404, format!("no script for {url}"))))
    }

    async fn map(&self, url: &str, limit: usize) -> Result<Vec<String>, AppError> {
        self.record(ServiceCall::Map {
            url: url.to_string(),
            limit,
        })
        .await;
        self.maps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// RecordingSleeper
// ---------------------------------------------------------------------------

/// Sleeper that records requested delays and returns immediately.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    recorded: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.recorded.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.recorded.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records the debug form of every event.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl CrawlReporter for MockReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}
