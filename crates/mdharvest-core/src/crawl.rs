//! Crawl orchestration.
//!
//! [`Crawler::run`] drives one crawl from a validated [`CrawlConfig`] to a
//! [`CrawlResult`]. Every page passes the same pipeline: boundary check,
//! dedup, path mapping, write, result bookkeeping. A single page's failure never
//! ends the run; cancellation and the time budget end it early with a
//! partial result.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::aggregate::{AggregateOptions, aggregate_file};
use crate::boundary::Boundary;
use crate::circuit_breaker::CircuitState;
use crate::client::ResilientClient;
use crate::config::{CrawlConfig, CrawlMode};
use crate::dedup::DedupTracker;
use crate::error::{AppError, ErrorKind};
use crate::job::{CrawlJob, JobStatus};
use crate::links::{collect_links, normalize_url, resolve_link};
use crate::mapper::{PageMapper, PathAllocator};
use crate::models::{CrawlRequest, Format, OutputFile, Page, RawPage};
use crate::monitor::JobMonitor;
use crate::report::{CrawlError, CrawlResult, Operation, SkipReason};
use crate::retry::{Sleeper, TokioSleeper};
use crate::traits::ContentService;
use crate::writer::FileWriter;

/// Events emitted by the crawler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum CrawlEvent<'a> {
    Started {
        url: &'a str,
        mode: CrawlMode,
    },
    JobSubmitted {
        job_id: &'a str,
    },
    JobProgress {
        job: &'a CrawlJob,
    },
    FallingBack {
        error: &'a AppError,
    },
    SiteMapped {
        urls: usize,
    },
    PageSkipped {
        url: &'a str,
        reason: SkipReason,
    },
    PageFailed {
        url: &'a str,
        error: &'a str,
    },
    PageWritten {
        url: &'a str,
        path: &'a Path,
    },
    WriteFailed {
        url: &'a str,
        error: &'a AppError,
    },
    AggregateWritten {
        path: &'a Path,
        pages: usize,
    },
    Aborted {
        reason: &'a str,
    },
    Finished {
        result: &'a CrawlResult,
    },
}

/// Trait for receiving crawl events (decoupled logging).
pub trait CrawlReporter: Send + Sync {
    fn report(&self, event: CrawlEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrawlReporter;

impl CrawlReporter for TracingCrawlReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::Started { url, mode } => {
                tracing::info!(%url, %mode, "Crawl started");
            }
            CrawlEvent::JobSubmitted { job_id } => {
                tracing::info!(%job_id, "Crawl job submitted");
            }
            CrawlEvent::JobProgress { job } => {
                tracing::info!(
                    job_id = %job.id,
                    status = %job.status(),
                    completed = job.completed,
                    failed = job.failed,
                    total = job.total,
                    "Crawl job progress: {:.0}%",
                    job.progress_percentage()
                );
            }
            CrawlEvent::FallingBack { error } => {
                tracing::warn!(%error, "Crawl job unavailable, falling back to link discovery");
            }
            CrawlEvent::SiteMapped { urls } => {
                tracing::info!(urls, "Site map received, fetching mapped pages");
            }
            CrawlEvent::PageSkipped { url, reason } => {
                tracing::debug!(%url, ?reason, "Page skipped");
            }
            CrawlEvent::PageFailed { url, error } => {
                tracing::warn!(%url, %error, "Page failed");
            }
            CrawlEvent::PageWritten { url, path } => {
                tracing::info!(%url, path = %path.display(), "Page written");
            }
            CrawlEvent::WriteFailed { url, error } => {
                tracing::error!(%url, %error, "Failed to write page");
            }
            CrawlEvent::AggregateWritten { path, pages } => {
                tracing::info!(path = %path.display(), pages, "Aggregated file written");
            }
            CrawlEvent::Aborted { reason } => {
                tracing::warn!(%reason, "Crawl aborted, returning partial result");
            }
            CrawlEvent::Finished { result } => {
                tracing::info!(
                    total = result.total(),
                    successful = result.successful(),
                    failed = result.failed(),
                    skipped = result.skipped(),
                    files = result.files_created().len(),
                    "Crawl finished"
                );
            }
        }
    }
}

/// Outcome of offering a URL to the dedup tracker.
enum Admit {
    Accepted,
    Duplicate,
    OverLimit,
}

/// Mutable state of a single run.
struct RunState<'r, R> {
    dedup: DedupTracker,
    paths: PathAllocator,
    result: CrawlResult,
    reporter: &'r R,
    max_pages: usize,
    /// Normalized out-of-boundary URLs already counted as skips.
    rejected: HashSet<String>,
    /// Normalized URL → admission index.
    order: HashMap<String, usize>,
}

impl<R: CrawlReporter> RunState<'_, R> {
    /// Accepts a URL unless it was seen before or the page limit is reached.
    /// URLs refused for the limit are not counted anywhere.
    fn admit(&mut self, url: &str) -> Admit {
        if self.dedup.accepted() >= self.max_pages && !self.dedup.contains(url) {
            return Admit::OverLimit;
        }
        if self.dedup.accept(url) {
            self.order.insert(normalize_url(url), self.order.len());
            Admit::Accepted
        } else {
            self.skip(url, SkipReason::Duplicate);
            Admit::Duplicate
        }
    }

    /// Counts a boundary skip the first time a URL is rejected.
    fn reject(&mut self, url: &str) {
        if self.rejected.insert(normalize_url(url)) {
            self.skip(url, SkipReason::Boundary);
        }
    }

    /// Offers a harvested link to the frontier. Links back to admitted pages
    /// are not skips.
    fn offer_link(&mut self, url: &str, boundary: &Boundary) -> bool {
        if !boundary.is_allowed(url) {
            self.reject(url);
            return false;
        }
        !self.dedup.contains(url) && matches!(self.admit(url), Admit::Accepted)
    }

    fn skip(&mut self, url: &str, reason: SkipReason) {
        self.result.record_skip(reason);
        self.reporter.report(CrawlEvent::PageSkipped { url, reason });
    }

    fn fail(&mut self, url: &str, operation: Operation, error: &AppError) {
        let message = error.to_string();
        self.reporter.report(CrawlEvent::PageFailed {
            url,
            error: &message,
        });
        self.result
            .record_error(CrawlError::new(url, operation, error));
        self.result.record_page(Page::failed(url, message));
    }

    fn abort(&mut self, reason: &str) {
        self.reporter.report(CrawlEvent::Aborted { reason });
        self.result.abort(reason);
    }
}

/// Runs crawls against a content service.
pub struct Crawler<S, Sl = TokioSleeper> {
    config: CrawlConfig,
    client: ResilientClient<S, Sl>,
    mapper: PageMapper,
    writer: FileWriter,
}

impl<S: ContentService> Crawler<S, TokioSleeper> {
    pub fn new(config: CrawlConfig, service: S) -> Self {
        let client = ResilientClient::new(service, config.retry().clone(), config.breaker().clone());
        let mapper = PageMapper::new(config.boundary().path_prefix());
        let writer = FileWriter::new(config.output_dir(), config.overwrite());

        Self {
            config,
            client,
            mapper,
            writer,
        }
    }
}

impl<S: ContentService, Sl: Sleeper> Crawler<S, Sl> {
    pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> Crawler<S, T> {
        Crawler {
            config: self.config,
            client: self.client.with_sleeper(sleeper),
            mapper: self.mapper,
            writer: self.writer,
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn client(&self) -> &ResilientClient<S, Sl> {
        &self.client
    }

    /// Runs the crawl to completion, cancellation, or the end of its time
    /// budget. Always returns a result; partial runs carry an abort reason.
    pub async fn run<R: CrawlReporter>(&self, cancel: CancellationToken, reporter: &R) -> CrawlResult {
        let deadline = Instant::now() + self.config.timeout();
        let mut state = RunState {
            dedup: DedupTracker::new(),
            paths: PathAllocator::new(),
            result: CrawlResult::new(),
            reporter,
            max_pages: self.config.max_pages(),
            rejected: HashSet::new(),
            order: HashMap::new(),
        };

        reporter.report(CrawlEvent::Started {
            url: self.config.start_url(),
            mode: self.config.mode(),
        });

        match self.config.mode() {
            CrawlMode::Single => self.fetch_bounded(&mut state, &cancel, deadline, false).await,
            CrawlMode::Discover => self.fetch_bounded(&mut state, &cancel, deadline, true).await,
            CrawlMode::Crawl => self.crawl_job(&mut state, &cancel, deadline).await,
        }

        if let Some(options) = self.config.aggregate() {
            self.write_aggregate(&mut state, options);
        }

        for breaker in self.client.breakers().iter() {
            let circuit_state = breaker.state();
            if circuit_state != CircuitState::Closed {
                let last_error = breaker.last_error().unwrap_or_default();
                tracing::warn!(
                    circuit = breaker.name(),
                    state = %circuit_state,
                    last_error = %last_error,
                    "Circuit not closed at end of run"
                );
            }
        }

        state.result.finish();
        reporter.report(CrawlEvent::Finished {
            result: &state.result,
        });
        state.result
    }

    /// Service-side crawl: submit, then process pages as the monitor delivers them.
    async fn crawl_job<R: CrawlReporter>(
        &self,
        state: &mut RunState<'_, R>,
        cancel: &CancellationToken,
        deadline: Instant,
    ) {
        let start_url = self.config.start_url();
        let request = CrawlRequest {
            url: start_url.to_string(),
            limit: self.config.max_pages(),
            formats: self.config.formats().to_vec(),
        };

        let submitted = tokio::select! {
            biased;
            () = cancel.cancelled() => return state.abort("cancelled"),
            () = tokio::time::sleep_until(deadline) => return state.abort("time budget exhausted"),
            submitted = self.client.submit(&request) => submitted,
        };

        let receipt = match submitted {
            Ok(receipt) => receipt,
            Err(e) => {
                state
                    .result
                    .record_error(CrawlError::new(start_url, Operation::Submit, &e));
                if self.config.fallback() {
                    state.reporter.report(CrawlEvent::FallingBack { error: &e });
                    self.fetch_bounded(state, cancel, deadline, true).await;
                }
                return;
            }
        };

        state.result.set_job_id(&receipt.job_id);
        state.reporter.report(CrawlEvent::JobSubmitted {
            job_id: &receipt.job_id,
        });

        // Polling gets what is left of the run's budget after submission.
        let mut monitor = JobMonitor::new(
            CrawlJob::new(receipt.job_id, start_url),
            self.config.poll_interval(),
            deadline.saturating_duration_since(Instant::now()),
        );
        let outcome = monitor
            .run(&self.client, cancel, |job, pages| {
                state.reporter.report(CrawlEvent::JobProgress { job });
                for raw in pages {
                    self.process_delivered(state, raw);
                }
            })
            .await;

        match outcome {
            Ok(JobStatus::Completed) => {}
            Ok(status) => {
                let message = monitor
                    .job()
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("crawl job ended as {status}"));
                state.result.record_error(CrawlError::from_message(
                    start_url,
                    Operation::Poll,
                    ErrorKind::Permanent,
                    message,
                ));
            }
            Err(AppError::Cancelled) => state.abort("cancelled"),
            Err(e) => {
                state
                    .result
                    .record_error(CrawlError::new(start_url, Operation::Poll, &e));
                if matches!(e, AppError::Timeout(_)) {
                    state.abort("time budget exhausted");
                }
            }
        }
    }

    /// Runs local fetching under the cancellation token and the time budget.
    async fn fetch_bounded<R: CrawlReporter>(
        &self,
        state: &mut RunState<'_, R>,
        cancel: &CancellationToken,
        deadline: Instant,
        follow_links: bool,
    ) {
        let stopped = tokio::select! {
            biased;
            () = cancel.cancelled() => Some("cancelled"),
            () = tokio::time::sleep_until(deadline) => Some("time budget exhausted"),
            () = self.fetch_pages(state, follow_links) => None,
        };

        if let Some(reason) = stopped {
            state.abort(reason);
        }
    }

    /// Fetches the start page and, when following links, every in-boundary
    /// page of the site: the service's site map when it lists more than the
    /// start page, otherwise whatever is reachable by links, breadth-first on
    /// the worker pool.
    async fn fetch_pages<R: CrawlReporter>(&self, state: &mut RunState<'_, R>, follow_links: bool) {
        let start_url = self.config.start_url();
        let mut frontier = Vec::new();
        if let Admit::Accepted = state.admit(start_url) {
            frontier.push(start_url.to_string());
        }

        let mut follow = follow_links;
        if follow_links && let Some(mapped) = self.map_site(state).await {
            frontier.extend(mapped);
            follow = false;
        }

        let formats: Vec<Format> = if follow {
            vec![Format::Markdown, Format::Links]
        } else {
            self.config.formats().to_vec()
        };

        while !frontier.is_empty() {
            let round = std::mem::take(&mut frontier);
            tracing::debug!(pages = round.len(), "Fetching discovery round");

            let requested = formats.as_slice();
            let mut fetches = stream::iter(round)
                .map(move |url| async move {
                    let fetched = self.client.fetch(&url, requested).await;
                    (url, fetched)
                })
                .buffer_unordered(self.config.workers());

            while let Some((url, fetched)) = fetches.next().await {
                let page = match fetched {
                    Ok(page) => page,
                    Err(e) => {
                        state.fail(&url, Operation::Fetch, &e);
                        continue;
                    }
                };

                let links = if follow && page.is_success() {
                    collect_links(&page.resolved_url, &page.links, &page.markdown)
                } else {
                    Vec::new()
                };

                if !self.process_page(state, page) {
                    continue;
                }

                for link in links {
                    if state.offer_link(&link, self.config.boundary()) {
                        frontier.push(link);
                    }
                }
            }
        }
    }

    /// Asks the service for the site's URL list and admits the in-boundary
    /// entries. `None` when the map fails or lists at most one URL, in which
    /// case links are followed instead.
    async fn map_site<R: CrawlReporter>(&self, state: &mut RunState<'_, R>) -> Option<Vec<String>> {
        let start_url = self.config.start_url();
        let links = match self.client.map(start_url, self.config.max_pages()).await {
            Ok(links) if links.len() > 1 => links,
            Ok(links) => {
                tracing::info!(found = links.len(), "Site map too small, following links instead");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Site map unavailable, following links instead");
                return None;
            }
        };
        state.reporter.report(CrawlEvent::SiteMapped { urls: links.len() });

        let base = Url::parse(start_url).ok()?;
        let mut admitted = Vec::new();
        for link in links {
            let Some(url) = resolve_link(&base, &link) else {
                continue;
            };
            if state.offer_link(&url, self.config.boundary()) {
                admitted.push(url);
            }
        }
        Some(admitted)
    }

    /// Pages from a service-side crawl have not been through dedup yet.
    fn process_delivered<R: CrawlReporter>(&self, state: &mut RunState<'_, R>, raw: RawPage) {
        let url = if raw.source_url.is_empty() {
            raw.resolved_url.clone().unwrap_or_default()
        } else {
            raw.source_url.clone()
        };

        if !self.config.boundary().is_allowed(&url) {
            state.reject(&url);
            return;
        }
        match state.admit(&url) {
            Admit::Accepted => {}
            Admit::Duplicate | Admit::OverLimit => return,
        }

        let mut raw = raw;
        raw.source_url = url;
        self.process_page(state, Page::from_raw(raw));
    }

    /// Records an admitted page and writes it. Returns whether it was a
    /// successful in-boundary page whose links may be followed.
    fn process_page<R: CrawlReporter>(&self, state: &mut RunState<'_, R>, page: Page) -> bool {
        let boundary = self.config.boundary();
        if !boundary.is_allowed(&page.resolved_url) || !boundary.is_allowed(&page.source_url) {
            state.reject(&page.resolved_url);
            return false;
        }

        if !page.is_success() {
            let message = page.error_message().unwrap_or("page failed").to_string();
            state.reporter.report(CrawlEvent::PageFailed {
                url: &page.source_url,
                error: &message,
            });
            state.result.record_error(CrawlError::from_message(
                &page.source_url,
                Operation::Fetch,
                ErrorKind::Permanent,
                message,
            ));
            state.result.record_page(page);
            return false;
        }

        self.write_page(state, &page);
        state.result.record_page(page);
        true
    }

    fn write_page<R: CrawlReporter>(&self, state: &mut RunState<'_, R>, page: &Page) {
        // Last line of defence: nothing outside the boundary reaches the disk.
        if !self.config.boundary().is_allowed(&page.source_url) {
            let err = AppError::OutOfBoundary(page.source_url.clone());
            state
                .result
                .record_error(CrawlError::new(&page.source_url, Operation::Boundary, &err));
            return;
        }
        if self.config.aggregate().is_some() {
            return;
        }

        let candidate = self
            .mapper
            .relative_path(&page.source_url, page.title.as_deref());
        let claim = state.paths.claim(&page.source_url, &candidate);
        if claim.collided {
            state.result.record_collision();
        }

        let file = OutputFile::for_page(
            page,
            claim.path,
            self.writer.root(),
            self.config.frontmatter(),
            Utc::now(),
        );

        match self.writer.write(&file) {
            Ok(path) => {
                state.reporter.report(CrawlEvent::PageWritten {
                    url: &page.source_url,
                    path: &path,
                });
                state.result.record_file(path);
            }
            Err(e) => {
                state.reporter.report(CrawlEvent::WriteFailed {
                    url: &page.source_url,
                    error: &e,
                });
                state
                    .result
                    .record_error(CrawlError::new(&page.source_url, Operation::Write, &e));
            }
        }
    }

    /// Writes every recorded page into one file, in admission order.
    fn write_aggregate<R: CrawlReporter>(&self, state: &mut RunState<'_, R>, options: &AggregateOptions) {
        let start_url = self.config.start_url();
        let file = {
            let mut pages: Vec<&Page> = state.result.pages().iter().collect();
            pages.sort_by_key(|page| {
                state
                    .order
                    .get(&normalize_url(&page.source_url))
                    .copied()
                    .unwrap_or(usize::MAX)
            });
            aggregate_file(
                start_url,
                &pages,
                options,
                self.config.frontmatter(),
                self.writer.root(),
                Utc::now(),
            )
        };
        let Some(file) = file else {
            tracing::warn!("No successful pages, aggregated file not written");
            return;
        };

        let pages = state.result.successful();
        match self.writer.write(&file) {
            Ok(path) => {
                state.reporter.report(CrawlEvent::AggregateWritten { path: &path, pages });
                state.result.record_file(path);
            }
            Err(e) => {
                state.reporter.report(CrawlEvent::WriteFailed {
                    url: start_url,
                    error: &e,
                });
                state
                    .result
                    .record_error(CrawlError::new(start_url, Operation::Write, &e));
            }
        }
    }
}
