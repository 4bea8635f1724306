//! Page → output path derivation.
//!
//! [`PageMapper::relative_path`] is a pure function of (URL, title). It tries,
//! in order:
//!
//! 1. the sanitized page title, placed in the directories of the URL path;
//! 2. the URL path itself (prefix and extension removed), `index` for a
//!    directory URL;
//! 3. the first 8 hex digits of the URL's SHA-256.
//!
//! [`PathAllocator`] sits on top and resolves collisions between distinct URLs
//! that map to the same path by appending `-2`, `-3`, ... in claim order.

use std::collections::HashMap;
use std::sync::Mutex;

use url::Url;

use crate::links::normalize_url;
use crate::models::compute_hash;

/// Longest file name component common filesystems accept, in bytes.
pub const MAX_FILENAME_BYTES: usize = 255;
/// Room kept for the `.md` extension and a collision suffix like `-1234567`.
const RESERVED_BYTES: usize = ".md".len() + 8;
pub const MAX_STEM_BYTES: usize = MAX_FILENAME_BYTES - RESERVED_BYTES;
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const HASH_NAME_LEN: usize = 8;

/// Cuts `s` to at most `max` bytes without splitting a character.
pub fn truncate_to_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Replaces `< > : " / \ | ? *` with `_`, trims, and truncates to
/// [`MAX_STEM_BYTES`] so the final name still fits with extension and suffix.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_CHARS.contains(&c) { '_' } else { c })
        .collect();
    truncate_to_bytes(replaced.trim(), MAX_STEM_BYTES)
        .trim_end()
        .to_string()
}

/// Sanitizes one directory segment. Dot segments never reach the filesystem.
fn sanitize_segment(segment: &str) -> Option<String> {
    let clean = sanitize_filename(segment);
    match clean.as_str() {
        "" => None,
        "." | ".." => Some(clean.replace('.', "_")),
        _ => Some(clean),
    }
}

fn strip_extension(component: &str) -> &str {
    match component.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => component,
    }
}

/// The URL path below the boundary prefix, split into directories and the
/// trailing file component.
#[derive(Debug)]
struct PathParts {
    dirs: Vec<String>,
    /// `None` for directory URLs (empty remainder or trailing slash).
    file_stem: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PageMapper {
    path_prefix: String,
}

impl PageMapper {
    pub fn new(path_prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: path_prefix.into(),
        }
    }

    /// Derives the relative output path (always `/`-separated, ending in `.md`).
    pub fn relative_path(&self, url: &str, title: Option<&str>) -> String {
        let parts = self.path_parts(url);
        let dirs = parts.as_ref().map(|p| p.dirs.as_slice()).unwrap_or_default();

        let name = title_candidate(title)
            .map(|name| join(dirs, &name))
            .or_else(|| parts.as_ref().and_then(path_candidate))
            .unwrap_or_else(|| hash_candidate(url));

        format!("{name}.md")
    }

    fn path_parts(&self, url: &str) -> Option<PathParts> {
        let parsed = Url::parse(url).ok()?;
        let rest = parsed.path().strip_prefix(self.path_prefix.as_str())?;

        let mut segments: Vec<&str> = rest.split('/').collect();
        let trailing = segments.pop().filter(|last| !last.is_empty());

        Some(PathParts {
            dirs: segments.into_iter().filter_map(sanitize_segment).collect(),
            file_stem: trailing.map(|last| strip_extension(last).to_string()),
        })
    }
}

fn title_candidate(title: Option<&str>) -> Option<String> {
    title.map(sanitize_filename).filter(|name| !name.is_empty())
}

fn path_candidate(parts: &PathParts) -> Option<String> {
    let name = match &parts.file_stem {
        None => "index".to_string(),
        Some(stem) => sanitize_segment(stem)?,
    };
    Some(join(&parts.dirs, &name))
}

fn hash_candidate(url: &str) -> String {
    compute_hash(url)[..HASH_NAME_LEN].to_string()
}

fn join(dirs: &[String], name: &str) -> String {
    if dirs.is_empty() {
        name.to_string()
    } else {
        format!("{}/{name}", dirs.join("/"))
    }
}

/// Result of claiming an output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub path: String,
    /// True when the mapper's path was already taken by another URL.
    pub collided: bool,
}

/// Hands out unique relative paths for the lifetime of a run.
#[derive(Debug, Default)]
pub struct PathAllocator {
    inner: Mutex<AllocatorInner>,
}

#[derive(Debug, Default)]
struct AllocatorInner {
    /// Lowercased path → owning URL, so case-insensitive filesystems are safe.
    owners: HashMap<String, String>,
    by_url: HashMap<String, String>,
}

impl PathAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, url: &str, candidate: &str) -> Claim {
        let url = normalize_url(url);
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(path) = inner.by_url.get(&url) {
            return Claim {
                path: path.clone(),
                collided: false,
            };
        }

        let mut path = candidate.to_string();
        let mut n = 1;
        while inner.owners.contains_key(&path.to_lowercase()) {
            n += 1;
            path = with_suffix(candidate, n);
        }

        if n > 1 {
            tracing::warn!(%url, candidate, assigned = %path, "Output path collision");
        }

        inner.owners.insert(path.to_lowercase(), url.clone());
        inner.by_url.insert(url, path.clone());

        Claim {
            path,
            collided: n > 1,
        }
    }
}

fn with_suffix(path: &str, n: u32) -> String {
    let stem = path.strip_suffix(".md").unwrap_or(path);
    format!("{stem}-{n}.md")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PageMapper {
        PageMapper::new("/VBA/")
    }

    #[test]
    fn title_wins_at_top_level() {
        assert_eq!(
            mapper().relative_path("https://dict.example/VBA/start.html", Some("Start Now")),
            "Start Now.md"
        );
    }

    #[test]
    fn title_keeps_url_directories() {
        assert_eq!(
            mapper().relative_path("https://dict.example/VBA/ch1/lesson1.html", Some("Lesson One")),
            "ch1/Lesson One.md"
        );
    }

    #[test]
    fn nested_url_without_title() {
        assert_eq!(
            mapper().relative_path("https://dict.example/VBA/ch1/lesson1.html", None),
            "ch1/lesson1.md"
        );
    }

    #[test]
    fn blank_title_falls_back_to_path() {
        assert_eq!(
            mapper().relative_path("https://dict.example/VBA/ch1/lesson1.html", Some("   ")),
            "ch1/lesson1.md"
        );
    }

    #[test]
    fn directory_urls_become_index() {
        let m = mapper();
        assert_eq!(m.relative_path("https://dict.example/VBA/", None), "index.md");
        assert_eq!(m.relative_path("https://dict.example/VBA/ch2/", None), "ch2/index.md");
    }

    #[test]
    fn title_is_sanitized() {
        assert_eq!(
            mapper().relative_path(
                "https://dict.example/VBA/a.html",
                Some(r#"What is <VBA>: "a/b\c" | d? *"#)
            ),
            "What is _VBA__ _a_b_c_ _ d_ _.md"
        );
    }

    #[test]
    fn long_titles_are_truncated() {
        let title = "x".repeat(400);
        let path = mapper().relative_path("https://dict.example/VBA/a.html", Some(&title));
        assert_eq!(path.len(), MAX_STEM_BYTES + ".md".len());
    }

    #[test]
    fn multibyte_titles_fit_the_filename_limit() {
        // 3 bytes per character: 200 characters would be 600 bytes.
        let title = "漢字".repeat(100);
        let path = mapper().relative_path("https://dict.example/VBA/a.html", Some(&title));

        assert!(path.len() <= MAX_FILENAME_BYTES, "{} bytes", path.len());
        assert!(path.ends_with(".md"));
        assert!(path.trim_end_matches(".md").chars().all(|c| c == '漢' || c == '字'));

        let suffixed = with_suffix(&path, 1_000);
        assert!(suffixed.len() <= MAX_FILENAME_BYTES);

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(&suffixed), "body").unwrap();
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to_bytes("abc", 10), "abc");
        assert_eq!(truncate_to_bytes("漢字", 4), "漢");
        assert_eq!(truncate_to_bytes("漢字", 2), "");
    }

    #[test]
    fn unmappable_urls_use_hash() {
        let m = mapper();
        let path = m.relative_path("not a url", None);
        assert_eq!(path, format!("{}.md", &compute_hash("not a url")[..8]));

        let outside = m.relative_path("https://dict.example/other/page.html", None);
        assert_eq!(outside.len(), 8 + 3);
    }

    #[test]
    fn mapping_is_deterministic() {
        let m = mapper();
        for (url, title) in [
            ("https://dict.example/VBA/start.html", Some("Start Now")),
            ("https://dict.example/VBA/ch1/lesson1.html", None),
            ("garbage", None),
        ] {
            assert_eq!(m.relative_path(url, title), m.relative_path(url, title));
        }
    }

    #[test]
    fn extensionless_and_dotted_names() {
        let m = mapper();
        assert_eq!(m.relative_path("https://dict.example/VBA/api/Range", None), "api/Range.md");
        assert_eq!(
            m.relative_path("https://dict.example/VBA/api/Range.Value.html", None),
            "api/Range.Value.md"
        );
    }

    #[test]
    fn allocator_suffixes_collisions() {
        let alloc = PathAllocator::new();
        let a = alloc.claim("https://dict.example/VBA/a.html", "Intro.md");
        let b = alloc.claim("https://dict.example/VBA/b.html", "Intro.md");
        let c = alloc.claim("https://dict.example/VBA/c.html", "intro.md");

        assert_eq!(a, Claim { path: "Intro.md".into(), collided: false });
        assert_eq!(b, Claim { path: "Intro-2.md".into(), collided: true });
        assert_eq!(c.path, "intro-3.md");
    }

    #[test]
    fn allocator_returns_same_path_for_same_url() {
        let alloc = PathAllocator::new();
        let first = alloc.claim("https://dict.example/VBA/a.html", "ch1/Intro.md");
        let again = alloc.claim("https://dict.example/VBA/a.html#x", "ch1/Intro.md");
        assert_eq!(first, again);
        assert!(!again.collided);
    }
}
