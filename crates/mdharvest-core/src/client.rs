//! Retrying, circuit-broken access to a [`ContentService`].

use std::fmt;
use std::future::Future;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::AppError;
use crate::job::JobSnapshot;
use crate::models::{CrawlRequest, Format, Page, SubmitReceipt};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper, retry_with_backoff};
use crate::traits::ContentService;

/// Logical endpoints of the content service, each with its own breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Submit,
    Poll,
    Fetch,
    Map,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Submit => "submit",
            Endpoint::Poll => "poll",
            Endpoint::Fetch => "fetch",
            Endpoint::Map => "map",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One circuit breaker per [`Endpoint`]. Clones share state.
#[derive(Clone)]
pub struct EndpointBreakers {
    submit: CircuitBreaker,
    poll: CircuitBreaker,
    fetch: CircuitBreaker,
    map: CircuitBreaker,
}

impl EndpointBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            submit: CircuitBreaker::new(Endpoint::Submit.as_str(), config.clone()),
            poll: CircuitBreaker::new(Endpoint::Poll.as_str(), config.clone()),
            fetch: CircuitBreaker::new(Endpoint::Fetch.as_str(), config.clone()),
            map: CircuitBreaker::new(Endpoint::Map.as_str(), config),
        }
    }

    pub fn get(&self, endpoint: Endpoint) -> &CircuitBreaker {
        match endpoint {
            Endpoint::Submit => &self.submit,
            Endpoint::Poll => &self.poll,
            Endpoint::Fetch => &self.fetch,
            Endpoint::Map => &self.map,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CircuitBreaker> {
        [&self.submit, &self.poll, &self.fetch, &self.map].into_iter()
    }
}

/// Wraps every service call in retry-with-backoff inside a circuit breaker.
///
/// A call, as far as the breaker is concerned, is the whole retry sequence:
/// exhausting the retries counts as one failure. While the breaker is
/// half-open the trial call gets a single attempt.
#[derive(Clone)]
pub struct ResilientClient<S, Sl = TokioSleeper> {
    service: S,
    retry: RetryPolicy,
    breakers: EndpointBreakers,
    sleeper: Sl,
}

impl<S: ContentService> ResilientClient<S, TokioSleeper> {
    pub fn new(service: S, retry: RetryPolicy, breaker: CircuitBreakerConfig) -> Self {
        Self {
            service,
            retry,
            breakers: EndpointBreakers::new(breaker),
            sleeper: TokioSleeper,
        }
    }
}

impl<S: ContentService, Sl: Sleeper> ResilientClient<S, Sl> {
    pub fn with_sleeper<T: Sleeper>(self, sleeper: T) -> ResilientClient<S, T> {
        ResilientClient {
            service: self.service,
            retry: self.retry,
            breakers: self.breakers,
            sleeper,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn sleeper(&self) -> &Sl {
        &self.sleeper
    }

    pub fn breakers(&self) -> &EndpointBreakers {
        &self.breakers
    }

    /// Submits a crawl job and returns the service's receipt.
    pub async fn submit(&self, request: &CrawlRequest) -> Result<SubmitReceipt, AppError> {
        self.guarded(Endpoint::Submit, || self.service.submit_crawl(request))
            .await
    }

    pub async fn poll(&self, job_id: &str) -> Result<JobSnapshot, AppError> {
        self.guarded(Endpoint::Poll, || self.service.crawl_status(job_id))
            .await
    }

    /// Fetches one page. Service-side page errors come back as a failed
    /// [`Page`], not as an `Err`.
    pub async fn fetch(&self, url: &str, formats: &[Format]) -> Result<Page, AppError> {
        let mut raw = self
            .guarded(Endpoint::Fetch, || self.service.scrape(url, formats))
            .await?;
        if raw.source_url.is_empty() {
            raw.source_url = url.to_string();
        }
        Ok(Page::from_raw(raw))
    }

    /// Lists known site URLs through the map endpoint.
    pub async fn map(&self, url: &str, limit: usize) -> Result<Vec<String>, AppError> {
        self.guarded(Endpoint::Map, || self.service.map(url, limit))
            .await
    }

    async fn guarded<T, F, Fut>(&self, endpoint: Endpoint, operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let sleeper = &self.sleeper;
        let retry = &self.retry;

        let result = self
            .breakers
            .get(endpoint)
            .call(move |admission| {
                let policy = if admission.is_trial() {
                    retry.single_attempt()
                } else {
                    retry.clone()
                };
                async move { retry_with_backoff(&policy, sleeper, endpoint.as_str(), operation).await }
            })
            .await;

        if let Err(AppError::ServiceUnavailable {
            retry_after_secs, ..
        }) = &result
        {
            tracing::warn!(%endpoint, retry_after_secs, "Circuit open, call short-circuited");
        }
        result
    }
}
