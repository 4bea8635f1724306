use std::collections::HashSet;
use std::sync::Mutex;

use crate::links::normalize_url;

/// Records which URLs have been accepted for processing.
///
/// Shared by every worker of a run; the seen-set and the skip counter are
/// updated under one lock so a URL can never be accepted twice.
#[derive(Debug, Default)]
pub struct DedupTracker {
    inner: Mutex<DedupInner>,
}

#[derive(Debug, Default)]
struct DedupInner {
    seen: HashSet<String>,
    skipped: usize,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DedupInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns true the first time a URL is seen, false (counting a skip)
    /// on every later occurrence.
    pub fn accept(&self, url: &str) -> bool {
        let key = normalize_url(url);
        let mut inner = self.lock();
        if inner.seen.insert(key) {
            true
        } else {
            inner.skipped += 1;
            tracing::debug!(%url, "Skipping duplicate URL");
            false
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().seen.contains(&normalize_url(url))
    }

    pub fn accepted(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn skipped(&self) -> usize {
        self.lock().skipped
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn second_occurrence_is_skipped() {
        let tracker = DedupTracker::new();
        assert!(tracker.accept("https://dict.example/VBA/start.html"));
        assert!(!tracker.accept("https://dict.example/VBA/start.html"));
        assert_eq!(tracker.accepted(), 1);
        assert_eq!(tracker.skipped(), 1);
    }

    #[test]
    fn fragments_do_not_create_new_urls() {
        let tracker = DedupTracker::new();
        assert!(tracker.accept("https://dict.example/VBA/a.html#one"));
        assert!(!tracker.accept("https://dict.example/VBA/a.html#two"));
    }

    #[test]
    fn query_strings_are_distinct() {
        let tracker = DedupTracker::new();
        assert!(tracker.accept("https://dict.example/VBA/a.html?page=1"));
        assert!(tracker.accept("https://dict.example/VBA/a.html?page=2"));
        assert!(tracker.contains("https://dict.example/VBA/a.html?page=2"));
        assert_eq!(tracker.skipped(), 0);
    }

    #[test]
    fn concurrent_workers_accept_once() {
        let tracker = Arc::new(DedupTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.accept("https://dict.example/VBA/race.html"))
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|accepted| *accepted)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(tracker.skipped(), 7);
    }
}
