//! Heading analysis for Markdown documents: outlines with anchor ids,
//! heading-level shifts and tables of contents.
//!
//! Headings are located with pulldown-cmark, so `#` lines inside code blocks
//! are never mistaken for headings. Setext headings are rewritten as ATX
//! whenever levels are shifted.

use std::collections::HashSet;
use std::ops::Range;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};

pub const TOC_TITLE: &str = "Table of Contents";
const MAX_LEVEL: usize = 6;

/// One heading of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: usize,
    pub title: String,
    pub anchor: String,
}

/// A heading with its position in the source.
struct Located {
    level: usize,
    title: String,
    /// The whole heading block, underline included for setext headings.
    span: Range<usize>,
    /// The inline content, `None` for an empty heading.
    inner: Option<Range<usize>>,
}

fn locate(markdown: &str) -> Vec<Located> {
    let mut found = Vec::new();
    let mut current: Option<Located> = None;

    for (event, range) in Parser::new(markdown).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                current = Some(Located {
                    level: level as usize,
                    title: String::new(),
                    span: range,
                    inner: None,
                });
            }
            Event::End(TagEnd::Heading(_)) => found.extend(current.take()),
            event => {
                let Some(heading) = current.as_mut() else {
                    continue;
                };
                heading.inner = Some(match heading.inner.take() {
                    Some(inner) => inner.start.min(range.start)..inner.end.max(range.end),
                    None => range,
                });
                match event {
                    Event::Text(text) | Event::Code(text) => heading.title.push_str(&text),
                    Event::SoftBreak | Event::HardBreak => heading.title.push(' '),
                    _ => {}
                }
            }
        }
    }

    found
}

/// Hands out unique anchor ids in document order.
#[derive(Debug, Default)]
pub struct Anchors {
    used: HashSet<String>,
}

impl Anchors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an id as taken without a heading, e.g. one a renderer adds.
    pub fn reserve(&mut self, title: &str) {
        self.used.insert(slugify(title));
    }

    /// Returns the id for `title`; repeats get `-1`, `-2`, ...
    pub fn assign(&mut self, title: &str) -> String {
        let base = slugify(title);
        let mut anchor = base.clone();
        let mut n = 0;
        while !self.used.insert(anchor.clone()) {
            n += 1;
            anchor = format!("{base}-{n}");
        }
        anchor
    }
}

/// Lowercase; letters, digits, `_` kept; whitespace and `-` runs become one
/// `-`; everything else dropped. Never empty.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut dash = false;
    for c in title.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() || c == '_' {
            if dash && !slug.is_empty() {
                slug.push('-');
            }
            dash = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("heading");
    }
    slug
}

/// Lists the headings of `markdown` with anchor ids drawn from `anchors`.
pub fn outline(markdown: &str, anchors: &mut Anchors) -> Vec<Heading> {
    locate(markdown)
        .into_iter()
        .map(|h| Heading {
            level: h.level,
            anchor: anchors.assign(&h.title),
            title: h.title.trim().to_string(),
        })
        .collect()
}

/// Moves every heading `by` levels deeper, capped at level 6, writing all of
/// them in ATX form. Everything else is left untouched.
pub fn shift_headings(markdown: &str, by: usize) -> String {
    let mut out = String::with_capacity(markdown.len() + 16);
    let mut last = 0;

    for heading in locate(markdown) {
        out.push_str(&markdown[last..heading.span.start]);

        let level = (heading.level + by).min(MAX_LEVEL);
        out.push_str(&"#".repeat(level));
        if let Some(inner) = heading.inner {
            let text: Vec<&str> = markdown[inner].lines().map(str::trim).collect();
            out.push(' ');
            out.push_str(&text.join(" "));
        }
        if markdown[heading.span.clone()].ends_with('\n') {
            out.push('\n');
        }
        last = heading.span.end;
    }

    out.push_str(&markdown[last..]);
    out
}

/// Renders a nested list of links to the headings up to `max_level`,
/// indented relative to the shallowest one. Empty when nothing qualifies.
pub fn table_of_contents(headings: &[Heading], max_level: usize) -> String {
    let entries: Vec<&Heading> = headings
        .iter()
        .filter(|h| h.level <= max_level && !h.title.is_empty())
        .collect();
    let Some(top) = entries.iter().map(|h| h.level).min() else {
        return String::new();
    };

    let mut toc = format!("## {TOC_TITLE}\n\n");
    for heading in entries {
        let title = heading.title.replace('[', "\\[").replace(']', "\\]");
        toc.push_str(&"  ".repeat(heading.level - top));
        toc.push_str(&format!("- [{title}](#{})\n", heading.anchor));
    }
    toc
}
