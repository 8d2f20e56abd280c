use crate::content::PageContent;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Snapshot of a [`PageContentPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentPoolStats {
    pub count: usize,
    pub memory: usize,
    pub limit: usize,
    pub reference_index: usize,
}

#[derive(Default)]
struct PoolInner {
    contents: Vec<Arc<PageContent>>,
    reference_index: usize,
}

/// Registry of loaded contents, trimmed to a memory budget by distance from
/// the page being viewed
pub struct PageContentPool {
    inner: Mutex<PoolInner>,
    limit: usize,
}

struct Candidate {
    content: Arc<PageContent>,
    locked: bool,
    distance: usize,
    size: usize,
}

impl PageContentPool {
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Register freshly loaded content and trim to the budget
    pub fn add(&self, content: Arc<PageContent>) {
        self.inner.lock().contents.push(content);
        self.cleanup(self.limit);
    }

    pub fn set_reference_index(&self, index: usize) {
        self.inner.lock().reference_index = index;
    }

    pub fn reference_index(&self) -> usize {
        self.inner.lock().reference_index
    }

    /// Trim to the configured budget
    pub fn cleanup_to_limit(&self) -> usize {
        self.cleanup(self.limit)
    }

    /// Unload content until the tracked total fits in `limit` bytes.
    ///
    /// Locked content always survives. Unlocked content is kept nearest the
    /// reference index first; once the running total passes `limit` that
    /// entry and every farther one is unloaded. Returns the number unloaded.
    pub fn cleanup(&self, limit: usize) -> usize {
        let evicted = {
            let mut inner = self.inner.lock();
            let reference = inner.reference_index;

            let mut seen = HashSet::new();
            inner
                .contents
                .retain(|content| seen.insert(Arc::as_ptr(content)) && content.is_loaded());

            // State and size are read once, under the lock
            let mut candidates: Vec<Candidate> = inner
                .contents
                .drain(..)
                .map(|content| Candidate {
                    locked: content.state().is_locked(),
                    distance: content.index().abs_diff(reference),
                    size: content.content_memory_size(),
                    content,
                })
                .collect();
            candidates.sort_by_key(|c| (!c.locked, c.distance));

            let mut total = 0usize;
            let mut cut = candidates.len();
            for (i, candidate) in candidates.iter().enumerate() {
                total = total.saturating_add(candidate.size);
                if !candidate.locked && total > limit {
                    cut = i;
                    break;
                }
            }

            let evicted = candidates.split_off(cut);
            inner.contents = candidates.into_iter().map(|c| c.content).collect();
            evicted
        };

        let mut unloaded = 0;
        for candidate in evicted {
            let content = candidate.content;
            if content.state().is_locked() {
                // Locked after the snapshot was taken
                trace!(index = content.index(), "content locked during cleanup, keeping");
                self.inner.lock().contents.push(content);
                continue;
            }
            content.unload_content();
            unloaded += 1;
        }
        if unloaded > 0 {
            debug!(unloaded, limit, "content pool trimmed");
        }
        unloaded
    }

    /// Forget everything, e.g. when the book closes
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.contents.clear();
        inner.reference_index = 0;
    }

    pub fn contains(&self, content: &Arc<PageContent>) -> bool {
        self.inner
            .lock()
            .contents
            .iter()
            .any(|c| Arc::ptr_eq(c, content))
    }

    pub fn stats(&self) -> ContentPoolStats {
        let inner = self.inner.lock();
        ContentPoolStats {
            count: inner.contents.len(),
            memory: inner.contents.iter().map(|c| c.content_memory_size()).sum(),
            limit: self.limit,
            reference_index: inner.reference_index,
        }
    }
}
