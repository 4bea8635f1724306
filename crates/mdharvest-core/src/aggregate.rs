//! Aggregated output: every successful page of a run in one Markdown file,
//! optionally with normalized heading levels and a table of contents.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use url::Url;

use crate::headings::{Anchors, TOC_TITLE, outline, shift_headings, table_of_contents};
use crate::mapper::{MAX_STEM_BYTES, sanitize_filename, truncate_to_bytes};
use crate::models::{OutputFile, Page, single_line};

const FILE_SUFFIX: &str = "_aggregated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateOptions {
    pub include_toc: bool,
    /// Deepest heading level listed in the table of contents (1-6).
    pub toc_max_level: usize,
    /// Keep the first page's levels and push later pages one level down.
    pub normalize_headings: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            include_toc: true,
            toc_max_level: 3,
            normalize_headings: true,
        }
    }
}

/// Builds the aggregated file for `pages`, in the order given.
///
/// Returns `None` when no page succeeded.
pub fn aggregate_file(
    base_url: &str,
    pages: &[&Page],
    options: &AggregateOptions,
    with_frontmatter: bool,
    output_root: &Path,
    aggregated_at: DateTime<Utc>,
) -> Option<OutputFile> {
    let successful: Vec<&Page> = pages.iter().copied().filter(|p| p.is_success()).collect();
    let failed: Vec<&str> = pages
        .iter()
        .filter(|p| !p.is_success())
        .map(|p| p.source_url.as_str())
        .collect();
    let first = successful.first()?;

    let title = first
        .title
        .clone()
        .unwrap_or_else(|| url_stem(base_url).unwrap_or_else(|| "index".to_string()));
    let normalize = options.normalize_headings && successful.len() > 1;

    let sections: Vec<String> = successful
        .iter()
        .enumerate()
        .map(|(i, page)| {
            let body = if normalize {
                shift_headings(&page.markdown, usize::from(i > 0))
            } else {
                page.markdown.clone()
            };
            format!("{}\n\n*Source: <{}>*", body.trim_end(), page.source_url)
        })
        .collect();
    let body = sections.join("\n\n---\n\n") + "\n";

    let mut content = String::new();
    if with_frontmatter {
        let header = Header {
            title: &title,
            base_url,
            sources: successful.iter().map(|p| p.source_url.as_str()).collect(),
            failed,
            aggregated_at,
            options,
            normalized: normalize,
        };
        content.push_str(&header.render());
    }
    if options.include_toc {
        let mut anchors = Anchors::new();
        anchors.reserve(TOC_TITLE);
        let toc = table_of_contents(&outline(&body, &mut anchors), options.toc_max_level);
        if !toc.is_empty() {
            content.push_str(&toc);
            content.push('\n');
        }
    }
    content.push_str(&body);

    let relative_path = format!("{}{FILE_SUFFIX}.md", file_stem(&title, base_url));
    tracing::debug!(path = %relative_path, pages = successful.len(), "Assembled aggregated document");

    Some(OutputFile {
        absolute_path: output_root.join(&relative_path),
        relative_path,
        content,
        frontmatter: None,
    })
}

/// Last non-empty path segment of `url` without its extension.
fn url_stem(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let stem = match last.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => last,
    };
    Some(stem.to_string())
}

fn file_stem(title: &str, base_url: &str) -> String {
    let name = Some(sanitize_filename(title))
        .filter(|name| !name.is_empty())
        .or_else(|| url_stem(base_url).map(|stem| sanitize_filename(&stem)))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "index".to_string());
    truncate_to_bytes(&name, MAX_STEM_BYTES - FILE_SUFFIX.len()).to_string()
}

struct Header<'a> {
    title: &'a str,
    base_url: &'a str,
    sources: Vec<&'a str>,
    failed: Vec<&'a str>,
    aggregated_at: DateTime<Utc>,
    options: &'a AggregateOptions,
    normalized: bool,
}

impl Header<'_> {
    fn render(&self) -> String {
        let mut block = String::from("---\n");
        block.push_str(&format!("title: {}\n", single_line(self.title)));
        block.push_str(&format!("base_url: {}\n", self.base_url));
        push_list(&mut block, "source_urls", &self.sources);
        push_list(&mut block, "failed_urls", &self.failed);
        block.push_str(&format!(
            "aggregated_at: {}\n",
            self.aggregated_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        block.push_str(&format!("total_pages: {}\n", self.sources.len() + self.failed.len()));
        block.push_str(&format!("successful_pages: {}\n", self.sources.len()));
        block.push_str(&format!("include_toc: {}\n", self.options.include_toc));
        if self.options.include_toc {
            block.push_str(&format!("toc_max_level: {}\n", self.options.toc_max_level));
        }
        block.push_str(&format!("headings_normalized: {}\n", self.normalized));
        block.push_str("---\n\n");
        block
    }
}

fn push_list(block: &mut String, key: &str, items: &[&str]) {
    if items.is_empty() {
        block.push_str(&format!("{key}: []\n"));
        return;
    }
    block.push_str(&format!("{key}:\n"));
    for item in items {
        block.push_str(&format!("  - {item}\n"));
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::RawPage;

    const START: &str = "https://dict.example/VBA/start.html";

    fn page(url: &str, title: Option<&str>, markdown: &str) -> Page {
        Page::from_raw(RawPage {
            source_url: url.to_string(),
            title: title.map(str::to_string),
            markdown: markdown.to_string(),
            ..Default::default()
        })
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn pages() -> Vec<Page> {
        vec![
            page(START, Some("VBA Guide"), "# VBA Guide\n\nIntro.\n\n## Editor\n\nOpen it."),
            page(
                "https://dict.example/VBA/ch1/vars.html",
                Some("Variables"),
                "Variables\n=========\n\n## Dim\n\n### Scope\n",
            ),
            Page::failed("https://dict.example/VBA/gone.html", "Upstream returned HTTP 404"),
        ]
    }

    fn build(pages: &[Page], options: &AggregateOptions, frontmatter: bool) -> Option<OutputFile> {
        let refs: Vec<&Page> = pages.iter().collect();
        aggregate_file(START, &refs, options, frontmatter, Path::new("/out"), at())
    }

    #[test]
    fn combines_pages_with_toc_and_normalized_headings() {
        let file = build(&pages(), &AggregateOptions::default(), true).unwrap();

        assert_eq!(file.relative_path, "VBA Guide_aggregated.md");
        assert_eq!(file.absolute_path, Path::new("/out/VBA Guide_aggregated.md"));

        let expected = "\
---
title: VBA Guide
base_url: https://dict.example/VBA/start.html
source_urls:
  - https://dict.example/VBA/start.html
  - https://dict.example/VBA/ch1/vars.html
failed_urls:
  - https://dict.example/VBA/gone.html
aggregated_at: 2026-03-01T12:00:00Z
total_pages: 3
successful_pages: 2
include_toc: true
toc_max_level: 3
headings_normalized: true
---

## Table of Contents

- [VBA Guide](#vba-guide)
  - [Editor](#editor)
  - [Variables](#variables)
    - [Dim](#dim)

# VBA Guide

Intro.

## Editor

Open it.

*Source: <https://dict.example/VBA/start.html>*

---

## Variables

### Dim

#### Scope

*Source: <https://dict.example/VBA/ch1/vars.html>*
";
        assert_eq!(file.render(), expected);
    }

    #[test]
    fn plain_concatenation_without_options() {
        let options = AggregateOptions {
            include_toc: false,
            toc_max_level: 3,
            normalize_headings: false,
        };
        let file = build(&pages(), &options, false).unwrap();

        assert!(file.content.starts_with("# VBA Guide\n"));
        assert!(file.content.contains("Variables\n=========\n\n## Dim"));
        assert!(!file.content.contains(TOC_TITLE));
    }

    #[test]
    fn single_page_keeps_its_levels() {
        let only = vec![page(START, None, "## Lone\n\ntext")];
        let file = build(&only, &AggregateOptions::default(), true).unwrap();

        assert_eq!(file.relative_path, "start_aggregated.md");
        assert!(file.content.contains("headings_normalized: false\n"));
        assert!(file.content.contains("failed_urls: []\n"));
        assert!(file.content.contains("- [Lone](#lone)\n\n## Lone\n"));
    }

    #[test]
    fn nothing_to_aggregate() {
        let failed = vec![Page::failed(START, "timeout")];
        assert!(build(&failed, &AggregateOptions::default(), true).is_none());
    }

    #[test]
    fn long_titles_leave_room_for_the_suffix() {
        let title = "漢".repeat(200);
        let stem = file_stem(&title, START);
        assert!(format!("{stem}{FILE_SUFFIX}.md").len() <= crate::mapper::MAX_FILENAME_BYTES);
    }
}
