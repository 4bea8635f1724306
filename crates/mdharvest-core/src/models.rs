use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Output formats requested from the content service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Markdown,
    Links,
    Html,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Markdown => "markdown",
            Format::Links => "links",
            Format::Html => "html",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a crawl job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlRequest {
    pub url: String,
    pub limit: usize,
    pub formats: Vec<Format>,
}

/// Acknowledgement of an accepted crawl job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub job_id: String,
    /// Status URL, when the service reports one.
    pub status_url: Option<String>,
}

/// A page as delivered by the content service, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// URL the page was requested as (`sourceURL`).
    pub source_url: String,
    /// URL after redirects, when the service reports it.
    pub resolved_url: Option<String>,
    pub markdown: String,
    pub title: Option<String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub links: Vec<String>,
    /// Per-page error reported by the service (e.g. upstream 404).
    pub error: Option<String>,
}

impl RawPage {
    /// Whether [`Page::from_raw`] will turn this into a failed page.
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.markdown.trim().is_empty()
    }
}

/// A processed page.
///
/// A successful page always has non-empty Markdown and no error message;
/// a failed page always has an error message.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub source_url: String,
    pub resolved_url: String,
    #[serde(skip)]
    pub markdown: String,
    pub title: Option<String>,
    #[serde(skip)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    pub links: Vec<String>,
    success: bool,
    error_message: Option<String>,
}

impl Page {
    /// Validates a raw page, turning empty content or a service-side error
    /// into a failed page.
    pub fn from_raw(raw: RawPage) -> Self {
        let resolved_url = raw
            .resolved_url
            .clone()
            .unwrap_or_else(|| raw.source_url.clone());
        let title = raw
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let error_message = match raw.error {
            Some(err) => Some(err),
            None if raw.markdown.trim().is_empty() => Some("No valid content".to_string()),
            None => None,
        };

        Self {
            source_url: raw.source_url,
            resolved_url,
            markdown: if error_message.is_some() {
                String::new()
            } else {
                raw.markdown
            },
            title,
            metadata: raw.metadata,
            links: raw.links,
            success: error_message.is_none(),
            error_message,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            resolved_url: url.clone(),
            source_url: url,
            markdown: String::new(),
            title: None,
            metadata: BTreeMap::new(),
            links: Vec::new(),
            success: false,
            error_message: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

/// Metadata block prefixed to an output file.
#[derive(Debug, Clone, Serialize)]
pub struct Frontmatter {
    pub title: Option<String>,
    pub source_url: String,
    pub scraped_at: DateTime<Utc>,
}

impl Frontmatter {
    pub fn render(&self) -> String {
        let mut block = String::from("---\n");
        if let Some(title) = &self.title {
            block.push_str(&format!("title: {}\n", single_line(title)));
        }
        block.push_str(&format!("source_url: {}\n", self.source_url));
        block.push_str(&format!(
            "scraped_at: {}\n",
            self.scraped_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        block.push_str("---\n\n");
        block
    }
}

pub(crate) fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A Markdown file ready to be written.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub content: String,
    pub frontmatter: Option<Frontmatter>,
}

impl OutputFile {
    pub fn for_page(
        page: &Page,
        relative_path: String,
        output_root: &Path,
        with_frontmatter: bool,
        scraped_at: DateTime<Utc>,
    ) -> Self {
        let frontmatter = with_frontmatter.then(|| Frontmatter {
            title: page.title.clone(),
            source_url: page.source_url.clone(),
            scraped_at,
        });

        Self {
            absolute_path: output_root.join(&relative_path),
            relative_path,
            content: page.markdown.clone(),
            frontmatter,
        }
    }

    /// Full file body: frontmatter (if any) followed by the content.
    pub fn render(&self) -> String {
        match &self.frontmatter {
            Some(fm) => fm.render() + &self.content,
            None => self.content.clone(),
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
