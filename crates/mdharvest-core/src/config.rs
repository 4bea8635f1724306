use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::aggregate::AggregateOptions;
use crate::boundary::Boundary;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::models::Format;
use crate::retry::RetryPolicy;

/// How pages are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrawlMode {
    /// Fetch the start URL only.
    Single,
    /// Let the service crawl; fall back to [`CrawlMode::Discover`] if the
    /// job cannot be submitted.
    #[default]
    Crawl,
    /// Follow links locally, one page fetch at a time per worker.
    Discover,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::Single => "single",
            CrawlMode::Crawl => "crawl",
            CrawlMode::Discover => "discover",
        }
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(CrawlMode::Single),
            "crawl" => Ok(CrawlMode::Crawl),
            "discover" => Ok(CrawlMode::Discover),
            _ => Err(format!("Unknown crawl mode: {}", s)),
        }
    }
}

/// Validated, immutable crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    start_url: String,
    boundary: Boundary,
    output_dir: PathBuf,
    max_pages: usize,
    timeout: Duration,
    poll_interval: Duration,
    workers: usize,
    mode: CrawlMode,
    formats: Vec<Format>,
    overwrite: bool,
    frontmatter: bool,
    fallback: bool,
    retry: RetryPolicy,
    breaker: CircuitBreakerConfig,
    aggregate: Option<AggregateOptions>,
}

impl CrawlConfig {
    pub fn builder(start_url: impl Into<String>) -> CrawlConfigBuilder {
        CrawlConfigBuilder::new(start_url)
    }

    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    pub fn boundary(&self) -> &Boundary {
        &self.boundary
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn mode(&self) -> CrawlMode {
        self.mode
    }

    pub fn formats(&self) -> &[Format] {
        &self.formats
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn frontmatter(&self) -> bool {
        self.frontmatter
    }

    pub fn fallback(&self) -> bool {
        self.fallback
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn breaker(&self) -> &CircuitBreakerConfig {
        &self.breaker
    }

    /// Set when all pages go into one aggregated file instead of a tree.
    pub fn aggregate(&self) -> Option<&AggregateOptions> {
        self.aggregate.as_ref()
    }
}

/// Builder for [`CrawlConfig`]. Nothing is checked until [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct CrawlConfigBuilder {
    start_url: String,
    boundary: Option<Boundary>,
    output_dir: PathBuf,
    max_pages: usize,
    timeout: Duration,
    poll_interval: Duration,
    workers: usize,
    mode: CrawlMode,
    formats: Vec<Format>,
    overwrite: bool,
    frontmatter: bool,
    fallback: bool,
    retry: RetryPolicy,
    breaker: CircuitBreakerConfig,
    aggregate: Option<AggregateOptions>,
}

impl CrawlConfigBuilder {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self {
            start_url: start_url.into(),
            boundary: None,
            output_dir: PathBuf::from("output"),
            max_pages: 200,
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            workers: 4,
            mode: CrawlMode::default(),
            formats: vec![Format::Markdown],
            overwrite: false,
            frontmatter: true,
            fallback: true,
            retry: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            aggregate: None,
        }
    }

    /// Overrides the boundary derived from the start URL.
    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = Some(boundary);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_mode(mut self, mode: CrawlMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_formats(mut self, formats: Vec<Format>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_frontmatter(mut self, frontmatter: bool) -> Self {
        self.frontmatter = frontmatter;
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker_config(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_aggregate(mut self, options: AggregateOptions) -> Self {
        self.aggregate = Some(options);
        self
    }

    /// Validates everything and prepares the output directory.
    ///
    /// This is the only place the start URL is checked against the boundary,
    /// so a configuration that builds never causes an out-of-scope request.
    pub fn build(self) -> Result<CrawlConfig, AppError> {
        let parsed = Url::parse(&self.start_url)
            .map_err(|e| AppError::ConfigError(format!("invalid start URL {}: {e}", self.start_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "start URL must be http(s): {}",
                self.start_url
            )));
        }

        let boundary = match self.boundary {
            Some(boundary) => boundary,
            None => Boundary::from_start_url(&self.start_url)
                .map_err(|e| AppError::ConfigError(e.to_string()))?,
        };
        if !boundary.is_allowed(&self.start_url) {
            return Err(AppError::ConfigError(format!(
                "start URL {} is outside the crawl boundary {boundary}",
                self.start_url
            )));
        }

        let positive = [
            ("max pages", self.max_pages),
            ("workers", self.workers),
            ("breaker failure threshold", self.breaker.failure_threshold as usize),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::ConfigError(format!("{name} must be greater than zero")));
        }
        if self.timeout.is_zero() {
            return Err(AppError::ConfigError("timeout must be greater than zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(AppError::ConfigError(
                "poll interval must be greater than zero".into(),
            ));
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(AppError::ConfigError(format!(
                "backoff factor must be at least 1.0, got {}",
                self.retry.backoff_factor
            )));
        }
        if let Some(options) = &self.aggregate
            && !(1..=6).contains(&options.toc_max_level)
        {
            return Err(AppError::ConfigError(format!(
                "TOC max level must be between 1 and 6, got {}",
                options.toc_max_level
            )));
        }
        if !self.formats.contains(&Format::Markdown) {
            return Err(AppError::ConfigError(
                "formats must include markdown".into(),
            ));
        }

        prepare_output_dir(&self.output_dir)?;

        Ok(CrawlConfig {
            start_url: self.start_url,
            boundary,
            output_dir: self.output_dir,
            max_pages: self.max_pages,
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            workers: self.workers,
            mode: self.mode,
            formats: self.formats,
            overwrite: self.overwrite,
            frontmatter: self.frontmatter,
            fallback: self.fallback,
            retry: self.retry,
            breaker: self.breaker,
            aggregate: self.aggregate,
        })
    }
}

/// Creates the output directory and checks that it is writable.
fn prepare_output_dir(dir: &Path) -> Result<(), AppError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        AppError::ConfigError(format!("cannot create output directory {}: {e}", dir.display()))
    })?;
    tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        AppError::ConfigError(format!("output directory {} is not writable: {e}", dir.display()))
    })?;
    Ok(())
}
