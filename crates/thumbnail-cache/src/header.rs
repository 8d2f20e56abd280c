//! Structural cache key for persisted thumbnails
//!
//! The key is derived purely from file identity so a thumbnail can be found
//! again without opening the source entry.

use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Cache key for one thumbnail, computed from entry identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailCacheHeader {
    key: String,
}

impl ThumbnailCacheHeader {
    /// Hash an entry's full name, byte length, last write time and an optional
    /// appendix (e.g. a page-within-archive marker).
    pub fn new(
        full_name: &str,
        length: u64,
        last_write_time: Option<SystemTime>,
        appendix: Option<&str>,
    ) -> Self {
        let modified_time = last_write_time
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_millis())
            .unwrap_or(0);

        let mut hasher = Sha256::new();
        hasher.update(full_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(length.to_le_bytes());
        hasher.update(modified_time.to_le_bytes());
        if let Some(appendix) = appendix {
            hasher.update([1u8]);
            hasher.update(appendix.as_bytes());
        }

        let result = hasher.finalize();
        // Use first 16 bytes (32 hex chars) for a compact but collision-resistant key
        Self {
            key: hex::encode(&result[..16]),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ThumbnailCacheHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
