//! Persistent thumbnail cache
//!
//! Wraps the thumbnail database with the policy the rest of Leafview relies
//! on: reads never fail (errors are a miss), writes go through a bounded
//! background queue, and a disabled cache turns every operation into a no-op.

use crate::header::ThumbnailCacheHeader;
use crate::save_queue::{SaveError, SaveQueue};
use crate::ThumbnailCacheConfig;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thumbnail_db::ThumbnailDb;
use tracing::{debug, info, warn};

/// Persistent thumbnail cache manager
pub struct ThumbnailCache {
    store: Option<Arc<Mutex<ThumbnailDb>>>,
    saver: Option<SaveQueue>,
    counters: Arc<CacheCounters>,
    db_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) saved: AtomicU64,
    pub(crate) save_failures: AtomicU64,
    pub(crate) dropped: AtomicU64,
}

impl ThumbnailCache {
    /// Open the cache described by `config`, or a disabled cache if it is turned off
    pub fn open(config: &ThumbnailCacheConfig) -> Result<Self> {
        if !config.enabled {
            info!("thumbnail cache disabled");
            return Ok(Self::disabled());
        }
        let path = config.resolved_path()?;
        Self::open_at(&path, config)
    }

    /// Open the cache database at a specific path
    pub fn open_at(db_path: &Path, config: &ThumbnailCacheConfig) -> Result<Self> {
        let db = ThumbnailDb::open(db_path)?;
        if let Some(days) = config.expiry_days {
            if let Err(e) = db.delete_expired(days) {
                warn!(error = %e, "failed to delete expired thumbnails");
            }
        }

        let store = Arc::new(Mutex::new(db));
        let counters = Arc::new(CacheCounters::default());
        let saver = SaveQueue::spawn(
            Arc::clone(&store),
            Arc::clone(&counters),
            config.save_queue_capacity,
        )
        .context("Failed to start thumbnail save worker")?;

        debug!(path = %db_path.display(), "thumbnail cache opened");
        Ok(Self {
            store: Some(store),
            saver: Some(saver),
            counters,
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// A cache that stores nothing and never hits
    pub fn disabled() -> Self {
        Self {
            store: None,
            saver: None,
            counters: Arc::new(CacheCounters::default()),
            db_path: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Look up a thumbnail. Store errors are logged and reported as a miss.
    pub fn load(&self, header: &ThumbnailCacheHeader) -> Option<Vec<u8>> {
        let store = self.store.as_ref()?;
        let result = store.lock().load(header.key());
        match result {
            Ok(Some(data)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(key = %header, error = %e, "thumbnail cache read failed");
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write a thumbnail synchronously, replacing any existing row
    pub fn save(&self, header: &ThumbnailCacheHeader, data: &[u8]) -> Result<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        store.lock().save(header.key(), data)?;
        self.counters.saved.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Queue a thumbnail for saving on the background thread
    pub fn enqueue_save(&self, header: ThumbnailCacheHeader, data: Arc<[u8]>) -> Result<(), SaveError> {
        match &self.saver {
            Some(saver) => saver.push(header, data),
            None => Ok(()),
        }
    }

    /// Wait until all queued saves have been written
    pub fn flush(&self) -> Result<(), SaveError> {
        match &self.saver {
            Some(saver) => saver.flush(),
            None => Ok(()),
        }
    }

    /// Remove every stored thumbnail
    pub fn clear(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store.lock().clear()?;
        }
        Ok(())
    }

    /// Number of stored thumbnails
    pub fn entry_count(&self) -> Result<i64> {
        match &self.store {
            Some(store) => store.lock().count(),
            None => Ok(0),
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            saved: self.counters.saved.load(Ordering::Relaxed),
            save_failures: self.counters.save_failures.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics for monitoring and debugging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub saved: u64,
    pub save_failures: u64,
    /// Saves rejected because the queue was full
    pub dropped: u64,
}

impl CacheStats {
    pub fn hit_rate_percent(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            (self.hits as f64 / lookups as f64) * 100.0
        }
    }
}
