//! Polling of an asynchronous crawl job.
//!
//! [`JobMonitor::observe`] is the state machine: it folds one status snapshot
//! into the local [`CrawlJob`] and hands back the pages that were not seen
//! before. [`JobMonitor::run`] is the scheduler around it.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::ResilientClient;
use crate::error::AppError;
use crate::job::{CrawlJob, JobSnapshot, JobStatus};
use crate::models::RawPage;
use crate::retry::Sleeper;
use crate::traits::ContentService;

pub struct JobMonitor {
    job: CrawlJob,
    poll_interval: Duration,
    timeout: Duration,
    max_polls: u32,
    polls: u32,
    delivered: usize,
}

impl JobMonitor {
    /// The budget is `timeout` of wall-clock time and at most
    /// `ceil(timeout / poll_interval)` polls, whichever runs out first.
    pub fn new(job: CrawlJob, poll_interval: Duration, timeout: Duration) -> Self {
        let interval = poll_interval.as_secs_f64().max(f64::EPSILON);
        let max_polls = (timeout.as_secs_f64() / interval).ceil().max(1.0) as u32;

        Self {
            job,
            poll_interval,
            timeout,
            max_polls,
            polls: 0,
            delivered: 0,
        }
    }

    pub fn job(&self) -> &CrawlJob {
        &self.job
    }

    pub fn into_job(self) -> CrawlJob {
        self.job
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn max_polls(&self) -> u32 {
        self.max_polls
    }

    /// Folds one snapshot into the job and returns the pages not delivered yet.
    pub fn observe(&mut self, mut snapshot: JobSnapshot) -> Vec<RawPage> {
        self.polls += 1;
        self.job.update_progress(snapshot.total, snapshot.completed);

        let fresh = if snapshot.pages.len() > self.delivered {
            snapshot.pages.split_off(self.delivered)
        } else {
            Vec::new()
        };
        self.delivered += fresh.len();
        self.job.failed += fresh.iter().filter(|page| page.is_failed()).count();

        if snapshot.status == JobStatus::Failed {
            let reason = snapshot
                .error
                .unwrap_or_else(|| "crawl job failed".to_string());
            self.job.fail(reason);
        } else {
            self.job.transition(snapshot.status);
        }

        fresh
    }

    fn budget_exhausted(&self) -> bool {
        self.polls >= self.max_polls
    }

    fn timed_out(&mut self) -> AppError {
        let err = AppError::Timeout(self.timeout.as_secs());
        tracing::warn!(job_id = %self.job.id, polls = self.polls, "Crawl job exceeded its time budget");
        self.job.fail(err.to_string());
        err
    }

    fn cancelled(&mut self) -> AppError {
        self.job.error_message = Some(AppError::Cancelled.to_string());
        self.job.transition(JobStatus::Cancelled);
        AppError::Cancelled
    }

    /// Polls until the job is terminal, forwarding new pages to `sink` after
    /// every poll.
    ///
    /// Returns the remote terminal status. A poll failure, the time budget or
    /// cancellation ends the job locally and comes back as `Err`.
    pub async fn run<S, Sl, F>(
        &mut self,
        client: &ResilientClient<S, Sl>,
        cancel: &CancellationToken,
        mut sink: F,
    ) -> Result<JobStatus, AppError>
    where
        S: ContentService,
        Sl: Sleeper,
        F: FnMut(&CrawlJob, Vec<RawPage>),
    {
        let deadline = Instant::now() + self.timeout;

        loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancelled()),
                () = tokio::time::sleep_until(deadline) => return Err(self.timed_out()),
                polled = client.poll(&self.job.id) => polled,
            };

            match polled {
                Ok(snapshot) => {
                    let fresh = self.observe(snapshot);
                    tracing::debug!(
                        job_id = %self.job.id,
                        status = %self.job.status(),
                        completed = self.job.completed,
                        total = self.job.total,
                        new_pages = fresh.len(),
                        "Polled crawl job"
                    );
                    if !fresh.is_empty() {
                        sink(&self.job, fresh);
                    }
                }
                Err(e) => {
                    tracing::error!(job_id = %self.job.id, error = %e, "Polling failed");
                    self.job.fail(e.to_string());
                    return Err(e);
                }
            }

            if self.job.status().is_terminal() {
                return Ok(self.job.status());
            }
            if self.budget_exhausted() {
                return Err(self.timed_out());
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancelled()),
                () = tokio::time::sleep_until(deadline) => return Err(self.timed_out()),
                () = client.sleeper().sleep(self.poll_interval) => {}
            }
        }
    }
}
