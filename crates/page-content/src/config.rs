use crate::picture::Size;
use serde::{Deserialize, Serialize};
use thumbnail_cache::ThumbnailSettings;

const MB: usize = 1024 * 1024;

/// Content loading and memory configuration for one book session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Budget for decoded page bitmaps
    pub content_memory_limit_mb: usize,
    /// Budget for raw source buffers
    pub picture_source_memory_limit_mb: usize,
    /// Upper bound for a rasterized page when no resize filter is set
    pub maximum_size: Size,
    /// When set, pages are rasterized to fit this size instead of their original size
    pub resize_filter: Option<Size>,
    /// Largest single allocation a decoder may make
    pub decode_alloc_limit_mb: Option<u64>,
    pub retry_on_memory_pressure: bool,
    /// How many levels of nested archives are searched for a folder thumbnail
    pub archive_search_range: usize,
    /// Nominal size reported by media pages
    pub media_placeholder_size: Size,
    /// Treat GIFs as animated pages (still frame + extracted file)
    pub animation_enabled: bool,
    /// Keep the original file name when extracting temp files for external playback
    pub keep_temp_file_name: bool,
    pub job_workers: usize,
    pub thumbnail: ThumbnailSettings,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            content_memory_limit_mb: 100,
            picture_source_memory_limit_mb: 200,
            maximum_size: Size::new(4096, 4096),
            resize_filter: None,
            decode_alloc_limit_mb: Some(512),
            retry_on_memory_pressure: true,
            archive_search_range: 2,
            media_placeholder_size: Size::new(1280, 720),
            animation_enabled: true,
            keep_temp_file_name: true,
            job_workers: 2,
            thumbnail: ThumbnailSettings::default(),
        }
    }
}

impl ContentConfig {
    pub fn content_memory_limit(&self) -> usize {
        self.content_memory_limit_mb.saturating_mul(MB)
    }

    pub fn picture_source_memory_limit(&self) -> usize {
        self.picture_source_memory_limit_mb.saturating_mul(MB)
    }

    pub fn decode_alloc_limit(&self) -> Option<u64> {
        self.decode_alloc_limit_mb
            .map(|mb| mb.saturating_mul(MB as u64))
    }
}
