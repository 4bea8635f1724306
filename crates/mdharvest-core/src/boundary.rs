//! URL scope enforcement.
//!
//! A [`Boundary`] is a host plus a path prefix. It is consulted before the
//! start URL is submitted, when crawl results come back, and again right
//! before a file is written.

use serde::Serialize;
use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Boundary {
    host: String,
    path_prefix: String,
}

impl Boundary {
    /// Creates a boundary. The host is lowercased to match how URLs are parsed;
    /// the prefix is kept exactly as given.
    pub fn new(host: impl Into<String>, path_prefix: impl Into<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            path_prefix: path_prefix.into(),
        }
    }

    /// Derives a boundary from the start URL: its host and the directory
    /// containing it.
    ///
    /// Example: `https://dict.example/VBA/start.html` → `dict.example` + `/VBA/`
    pub fn from_start_url(start_url: &str) -> Result<Self, AppError> {
        let url = Url::parse(start_url)
            .map_err(|e| AppError::InvalidUrl(format!("{start_url}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AppError::InvalidUrl(format!("{start_url}: URL has no host")))?;

        let path = url.path();
        let prefix = match path.rfind('/') {
            Some(idx) => &path[..=idx],
            None => "/",
        };

        Ok(Self::new(host, prefix))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// True iff the URL parses, its host equals the boundary host, and its
    /// path starts with the boundary prefix. Never panics.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        parsed.host_str() == Some(self.host.as_str()) && parsed.path().starts_with(&self.path_prefix)
    }
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.host, self.path_prefix)
    }
}
