//! Persistent thumbnail caching for Leafview
//!
//! This crate owns everything about a page's small preview image that does not
//! depend on how the page itself is decoded: the structural cache key derived
//! from file identity, the in-memory [`Thumbnail`] holder with its sentinel
//! values, JPEG generation from a decoded image, and the durable SQLite-backed
//! [`ThumbnailCache`] with its bounded background save queue.
//!
//! # Features
//!
//! - **Content-addressed keys**: SHA-256 of entry name, length, mtime and an appendix
//! - **Sentinels**: empty, media and folder thumbnails that never hit the disk
//! - **Async persistence**: saves are batched on a background thread with backpressure
//! - **Color extraction**: dominant color swatches for placeholder backgrounds

pub mod cache;
pub mod generate;
pub mod header;
pub mod save_queue;
pub mod thumbnail;

pub use cache::{CacheStats, ThumbnailCache};
pub use generate::{encode_thumbnail, extract_color_swatch, ColorSwatch, ThumbnailSettings};
pub use header::ThumbnailCacheHeader;
pub use save_queue::SaveError;
pub use thumbnail::{Thumbnail, ThumbnailType};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the persistent thumbnail cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailCacheConfig {
    /// When false the cache is never opened and every thumbnail is generated from source
    pub enabled: bool,
    /// Database file; defaults to [`default_cache_path`]
    pub path: Option<PathBuf>,
    pub save_queue_capacity: usize,
    /// Thumbnails saved longer ago than this are deleted when the cache opens
    pub expiry_days: Option<u32>,
}

impl Default for ThumbnailCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            save_queue_capacity: 256,
            expiry_days: Some(180),
        }
    }
}

impl ThumbnailCacheConfig {
    /// The database path this configuration resolves to
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => default_cache_path(),
        }
    }
}

/// Default location of the thumbnail database
pub fn default_cache_path() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir().context("Unable to find cache directory")?;
    Ok(cache_dir.join("leafview").join("thumbs.db"))
}
