use std::collections::BTreeMap;
use std::time::Duration;

use mdharvest_core::error::AppError;
use mdharvest_core::job::{JobSnapshot, JobStatus};
use mdharvest_core::models::{CrawlRequest, Format, RawPage, SubmitReceipt};
use mdharvest_core::traits::ContentService;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound on `next` pages followed for one status call.
const MAX_STATUS_PAGES: usize = 100;

/// Firecrawl v2 API client.
///
/// Works with the hosted service and with self-hosted instances; the API key
/// is optional for the latter. Every method makes exactly one HTTP attempt.
#[derive(Clone)]
pub struct FirecrawlService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl FirecrawlService {
    pub fn new(api_key: Option<&str>) -> Result<Self, AppError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: Option<&str>, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(self.api_key.as_deref(), &self.base_url, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build(api_key: Option<&str>, base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("mdharvest/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(str::to_string),
            timeout_secs: timeout.as_secs(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, AppError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let response = check_status(response).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::SerializationError(format!("Failed to parse service response: {e}")))
    }

    fn transport_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

/// Maps a non-2xx response onto the error taxonomy, using the service's
/// `error` message when the body carries one.
async fn check_status(response: Response) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let status_code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|e| e.error)
        .unwrap_or_else(|| format!("HTTP {status_code}: {body}"));

    Err(AppError::from_status(status_code, message))
}

// ---- Firecrawl API types ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlBody<'a> {
    url: &'a str,
    limit: usize,
    scrape_options: ScrapeOptions<'a>,
}

#[derive(Serialize)]
struct ScrapeOptions<'a> {
    formats: &'a [Format],
}

#[derive(Serialize)]
struct ScrapeBody<'a> {
    url: &'a str,
    formats: &'a [Format],
}

#[derive(Serialize)]
struct MapBody<'a> {
    url: &'a str,
    limit: usize,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    success: bool,
    id: Option<String>,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    total: usize,
    #[serde(default)]
    completed: usize,
    #[serde(default)]
    data: Vec<Document>,
    next: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<Document>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct MapResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    links: Vec<MapLink>,
    error: Option<String>,
}

/// v2 lists `{url, title, description}` objects, v1 plain strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum MapLink {
    Url(String),
    Entry { url: String },
}

impl MapLink {
    fn into_url(self) -> String {
        match self {
            MapLink::Url(url) | MapLink::Entry { url } => url,
        }
    }
}

#[derive(Deserialize, Default)]
struct Document {
    markdown: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl Document {
    fn into_raw(self, requested_url: Option<&str>) -> RawPage {
        let meta_str = |key: &str| match self.metadata.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            // Some sites produce several <title> tags.
            Some(Value::Array(items)) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
            _ => None,
        };

        let source_url = meta_str("sourceURL")
            .or_else(|| requested_url.map(str::to_string))
            .or_else(|| meta_str("url"))
            .unwrap_or_default();
        let resolved_url = meta_str("url");
        let title = meta_str("title");

        let status_code = self.metadata.get("statusCode").and_then(Value::as_u64);
        let error = meta_str("error").or_else(|| {
            status_code
                .filter(|code| *code >= 400)
                .map(|code| format!("Upstream returned HTTP {code}"))
        });

        RawPage {
            source_url,
            resolved_url,
            markdown: self.markdown.unwrap_or_default(),
            title,
            metadata: self.metadata,
            links: self.links,
            error,
        }
    }
}

impl ContentService for FirecrawlService {
    async fn submit_crawl(&self, request: &CrawlRequest) -> Result<SubmitReceipt, AppError> {
        let url = format!("{}/v2/crawl", self.base_url);
        let body = CrawlBody {
            url: &request.url,
            limit: request.limit,
            scrape_options: ScrapeOptions {
                formats: &request.formats,
            },
        };

        let response: SubmitResponse = self.send(self.client.post(&url).json(&body)).await?;

        match (response.success, response.id) {
            (true, Some(job_id)) => {
                tracing::debug!(%job_id, url = %request.url, "Crawl job accepted");
                Ok(SubmitReceipt {
                    job_id,
                    status_url: response.url,
                })
            }
            _ => Err(AppError::ServiceRejected(
                response
                    .error
                    .unwrap_or_else(|| "crawl submission returned no job id".to_string()),
            )),
        }
    }

    async fn crawl_status(&self, job_id: &str) -> Result<JobSnapshot, AppError> {
        let mut next = Some(format!("{}/v2/crawl/{job_id}", self.base_url));
        let mut snapshot: Option<JobSnapshot> = None;
        let mut fetched = 0;

        while let Some(url) = next.take() {
            fetched += 1;
            let response: StatusResponse = self.send(self.client.get(&url)).await?;
            let pages = response.data.into_iter().map(|d| d.into_raw(None));

            match snapshot.as_mut() {
                Some(snapshot) => snapshot.pages.extend(pages),
                None => {
                    let status = response
                        .status
                        .parse::<JobStatus>()
                        .map_err(AppError::SerializationError)?;
                    snapshot = Some(JobSnapshot {
                        status,
                        total: response.total,
                        completed: response.completed,
                        pages: pages.collect(),
                        error: response.error,
                    });
                }
            }

            if fetched < MAX_STATUS_PAGES {
                next = response.next;
            } else if response.next.is_some() {
                tracing::warn!(%job_id, "Status pagination truncated");
            }
        }

        snapshot.ok_or_else(|| AppError::SerializationError("empty status response".into()))
    }

    async fn scrape(&self, url: &str, formats: &[Format]) -> Result<RawPage, AppError> {
        let endpoint = format!("{}/v2/scrape", self.base_url);
        let body = ScrapeBody { url, formats };

        let response: ScrapeResponse = self.send(self.client.post(&endpoint).json(&body)).await?;

        match (response.success, response.data) {
            (true, Some(document)) => Ok(document.into_raw(Some(url))),
            _ => Err(AppError::ServiceRejected(
                response
                    .error
                    .unwrap_or_else(|| format!("scrape of {url} returned no data")),
            )),
        }
    }

    async fn map(&self, url: &str, limit: usize) -> Result<Vec<String>, AppError> {
        let endpoint = format!("{}/v2/map", self.base_url);
        let body = MapBody { url, limit };

        let response: MapResponse = self.send(self.client.post(&endpoint).json(&body)).await?;
        if !response.success {
            return Err(AppError::ServiceRejected(
                response
                    .error
                    .unwrap_or_else(|| format!("map of {url} was not successful")),
            ));
        }

        let links: Vec<String> = response.links.into_iter().map(MapLink::into_url).collect();
        tracing::debug!(%url, found = links.len(), "Site mapped");
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn document(value: Value) -> Document {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_document_metadata_mapping() {
        let raw = document(json!({
            "markdown": "# Start",
            "links": ["https://dict.example/VBA/other.html"],
            "metadata": {
                "title": "Start Now",
                "sourceURL": "https://dict.example/VBA/start.html",
                "url": "https://dict.example/VBA/start.html?redirected=1",
                "statusCode": 200
            }
        }))
        .into_raw(None);

        assert_eq!(raw.source_url, "https://dict.example/VBA/start.html");
        assert_eq!(
            raw.resolved_url.as_deref(),
            Some("https://dict.example/VBA/start.html?redirected=1")
        );
        assert_eq!(raw.title.as_deref(), Some("Start Now"));
        assert_eq!(raw.links.len(), 1);
        assert!(raw.error.is_none());
    }

    #[test]
    fn test_upstream_error_status() {
        let raw = document(json!({
            "markdown": "Not Found",
            "metadata": { "sourceURL": "https://dict.example/VBA/gone.html", "statusCode": 404 }
        }))
        .into_raw(None);

        assert_eq!(raw.error.as_deref(), Some("Upstream returned HTTP 404"));
    }

    #[test]
    fn test_title_array_and_missing_source() {
        let raw = document(json!({
            "markdown": "x",
            "metadata": { "title": ["First", "Second"] }
        }))
        .into_raw(Some("https://dict.example/VBA/a.html"));

        assert_eq!(raw.title.as_deref(), Some("First"));
        assert_eq!(raw.source_url, "https://dict.example/VBA/a.html");
        assert!(raw.resolved_url.is_none());
    }

    #[test]
    fn test_crawl_body_shape() {
        let formats = [Format::Markdown, Format::Links];
        let body = CrawlBody {
            url: "https://dict.example/VBA/start.html",
            limit: 50,
            scrape_options: ScrapeOptions { formats: &formats },
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "url": "https://dict.example/VBA/start.html",
                "limit": 50,
                "scrapeOptions": { "formats": ["markdown", "links"] }
            })
        );
    }

    #[test]
    fn test_map_links_in_both_shapes() {
        let response: MapResponse = serde_json::from_value(json!({
            "success": true,
            "links": [
                "https://dict.example/VBA/a.html",
                { "url": "https://dict.example/VBA/b.html", "title": "B", "description": "" }
            ]
        }))
        .unwrap();

        let urls: Vec<String> = response.links.into_iter().map(MapLink::into_url).collect();
        assert_eq!(
            urls,
            vec!["https://dict.example/VBA/a.html", "https://dict.example/VBA/b.html"]
        );
    }

    #[test]
    fn test_base_url_normalization() {
        let service = FirecrawlService::with_base_url(Some(""), "http://localhost:3002/").unwrap();
        assert_eq!(service.base_url(), "http://localhost:3002");
        assert!(service.api_key.is_none());
    }
}
