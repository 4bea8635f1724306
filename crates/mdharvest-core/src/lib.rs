pub mod aggregate;
pub mod boundary;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod crawl;
pub mod dedup;
pub mod error;
pub mod headings;
pub mod job;
pub mod links;
pub mod mapper;
pub mod models;
pub mod monitor;
pub mod report;
pub mod retry;
pub mod traits;
pub mod writer;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use aggregate::AggregateOptions;
pub use boundary::Boundary;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{Endpoint, ResilientClient};
pub use config::{CrawlConfig, CrawlConfigBuilder, CrawlMode};
pub use crawl::{CrawlEvent, CrawlReporter, Crawler, TracingCrawlReporter};
pub use error::{AppError, ErrorKind};
pub use job::{CrawlJob, JobSnapshot, JobStatus};
pub use models::{CrawlRequest, Format, Page, RawPage, SubmitReceipt, compute_hash};
pub use report::{CrawlError, CrawlResult, Operation, SkipReason};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use traits::ContentService;
