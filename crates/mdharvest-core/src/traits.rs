use std::future::Future;

use crate::error::AppError;
use crate::job::JobSnapshot;
use crate::models::{CrawlRequest, Format, RawPage, SubmitReceipt};

/// Raw access to the content-extraction service.
///
/// Implementations make exactly one network attempt per call and map the
/// outcome onto [`AppError`]; retries and circuit breaking are layered on top
/// by [`crate::client::ResilientClient`].
pub trait ContentService: Send + Sync + Clone {
    /// Starts an asynchronous crawl job.
    fn submit_crawl(
        &self,
        request: &CrawlRequest,
    ) -> impl Future<Output = Result<SubmitReceipt, AppError>> + Send;

    /// Reads the current state of a crawl job, including every page produced so far.
    fn crawl_status(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<JobSnapshot, AppError>> + Send;

    /// Fetches and converts a single page.
    fn scrape(
        &self,
        url: &str,
        formats: &[Format],
    ) -> impl Future<Output = Result<RawPage, AppError>> + Send;

    /// Lists the URLs the service knows for the site around `url`, without
    /// fetching them. At most `limit` entries are requested.
    fn map(
        &self,
        url: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<String>, AppError>> + Send;
}
