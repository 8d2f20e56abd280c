use crate::picture::PictureSource;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Snapshot of a [`PictureSourcePool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePoolStats {
    pub count: usize,
    pub memory: usize,
    pub limit: usize,
}

/// Registry of picture sources bounding the raw-data memory tier.
///
/// Sources are owned by their contents and tracked weakly; a source that has
/// been dropped simply disappears on the next compaction.
pub struct PictureSourcePool {
    sources: Mutex<Vec<Weak<PictureSource>>>,
    limit: usize,
}

impl PictureSourcePool {
    pub fn new(limit: usize) -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn add(&self, source: &Arc<PictureSource>) {
        self.sources.lock().push(Arc::downgrade(source));
        self.trim_if_over_limit();
    }

    /// Run a cleanup when tracked raw data exceeds the budget
    pub fn trim_if_over_limit(&self) -> usize {
        if self.total_memory() > self.limit {
            self.cleanup()
        } else {
            0
        }
    }

    fn total_memory(&self) -> usize {
        self.sources
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|source| source.memory_size())
            .sum()
    }

    /// Release every unlocked source; returns the bytes freed
    pub fn cleanup(&self) -> usize {
        let releasable: Vec<Arc<PictureSource>> = {
            let mut sources = self.sources.lock();
            sources.retain(|source| source.strong_count() > 0);
            sources
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|source| source.is_loaded() && !source.is_locked())
                .collect()
        };

        let mut freed = 0;
        for source in releasable {
            // A decode may have started since the snapshot
            if source.is_locked() {
                continue;
            }
            freed += source.memory_size();
            source.release();
        }

        let remaining = self.total_memory();
        if freed > 0 {
            debug!(freed, remaining, "picture sources released");
        }
        freed
    }

    pub fn clear(&self) {
        self.sources.lock().clear();
    }

    pub fn stats(&self) -> SourcePoolStats {
        let sources: Vec<_> = self.sources.lock().iter().filter_map(Weak::upgrade).collect();
        SourcePoolStats {
            count: sources.len(),
            memory: sources.iter().map(|s| s.memory_size()).sum(),
            limit: self.limit,
        }
    }
}
