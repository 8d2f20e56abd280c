//! Per-book content context
//!
//! Everything a book session shares between its pages: configuration, the
//! thumbnail cache handle, both memory pools, the decoders and the job engine.
//! Pages and contents hold it weakly, so dropping the context ends the
//! session and any later load becomes a no-op.

use crate::config::ContentConfig;
use crate::error::Result;
use crate::job::{JobEngine, PriorityJobEngine};
use crate::picture::{DecodeLimits, ImageDecoder, PictureDecoder};
use crate::pool::{PageContentPool, PictureSourcePool};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thumbnail_cache::ThumbnailCache;
use tracing::{debug, info};

pub struct ContentContext {
    config: ContentConfig,
    thumbnail_cache: Arc<ThumbnailCache>,
    content_pool: PageContentPool,
    source_pool: PictureSourcePool,
    image_decoder: Arc<dyn PictureDecoder>,
    pdf_decoder: Option<Arc<dyn PictureDecoder>>,
    job_engine: Arc<dyn JobEngine>,
    reclaims: AtomicU64,
}

impl ContentContext {
    pub fn builder(config: ContentConfig) -> ContentContextBuilder {
        ContentContextBuilder {
            config,
            thumbnail_cache: None,
            image_decoder: None,
            pdf_decoder: None,
            job_engine: None,
        }
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    pub fn thumbnail_cache(&self) -> &Arc<ThumbnailCache> {
        &self.thumbnail_cache
    }

    pub fn content_pool(&self) -> &PageContentPool {
        &self.content_pool
    }

    pub fn source_pool(&self) -> &PictureSourcePool {
        &self.source_pool
    }

    pub fn image_decoder(&self) -> Arc<dyn PictureDecoder> {
        Arc::clone(&self.image_decoder)
    }

    pub fn pdf_decoder(&self) -> Option<Arc<dyn PictureDecoder>> {
        self.pdf_decoder.clone()
    }

    pub fn job_engine(&self) -> &Arc<dyn JobEngine> {
        &self.job_engine
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_alloc: self.config.decode_alloc_limit(),
        }
    }

    /// Free what both pools can give back; used before retrying a decode
    pub fn reclaim_memory(&self) {
        let freed = self.source_pool.cleanup();
        let unloaded = self.content_pool.cleanup_to_limit();
        self.reclaims.fetch_add(1, Ordering::Relaxed);
        debug!(freed, unloaded, "memory reclaimed");
    }

    /// How many reclaim passes have run
    pub fn reclaim_count(&self) -> u64 {
        self.reclaims.load(Ordering::Relaxed)
    }

    /// Book close: forget tracked content and push out pending thumbnail saves
    pub fn close(&self) {
        self.content_pool.clear();
        self.source_pool.clear();
        if let Err(e) = self.thumbnail_cache.flush() {
            debug!(error = %e, "thumbnail saves not flushed");
        }
        info!("content context closed");
    }
}

impl fmt::Debug for ContentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentContext")
            .field("content_pool", &self.content_pool.stats())
            .field("source_pool", &self.source_pool.stats())
            .field("cache_enabled", &self.thumbnail_cache.is_enabled())
            .field("pdf", &self.pdf_decoder.is_some())
            .finish()
    }
}

pub struct ContentContextBuilder {
    config: ContentConfig,
    thumbnail_cache: Option<Arc<ThumbnailCache>>,
    image_decoder: Option<Arc<dyn PictureDecoder>>,
    pdf_decoder: Option<Arc<dyn PictureDecoder>>,
    job_engine: Option<Arc<dyn JobEngine>>,
}

impl ContentContextBuilder {
    /// Defaults to a disabled cache
    pub fn thumbnail_cache(mut self, cache: Arc<ThumbnailCache>) -> Self {
        self.thumbnail_cache = Some(cache);
        self
    }

    /// Defaults to [`ImageDecoder`]
    pub fn image_decoder(mut self, decoder: Arc<dyn PictureDecoder>) -> Self {
        self.image_decoder = Some(decoder);
        self
    }

    pub fn pdf_decoder(mut self, decoder: Arc<dyn PictureDecoder>) -> Self {
        self.pdf_decoder = Some(decoder);
        self
    }

    /// Defaults to a [`PriorityJobEngine`] with the configured worker count
    pub fn job_engine(mut self, engine: Arc<dyn JobEngine>) -> Self {
        self.job_engine = Some(engine);
        self
    }

    /// Without an explicit job engine this must run inside a tokio runtime
    pub fn build(self) -> Result<Arc<ContentContext>> {
        let job_engine = match self.job_engine {
            Some(engine) => engine,
            None => Arc::new(PriorityJobEngine::new(self.config.job_workers)?),
        };
        let thumbnail_cache = self
            .thumbnail_cache
            .unwrap_or_else(|| Arc::new(ThumbnailCache::disabled()));
        let image_decoder = self
            .image_decoder
            .unwrap_or_else(|| Arc::new(ImageDecoder));

        Ok(Arc::new(ContentContext {
            content_pool: PageContentPool::new(self.config.content_memory_limit()),
            source_pool: PictureSourcePool::new(self.config.picture_source_memory_limit()),
            config: self.config,
            thumbnail_cache,
            image_decoder,
            pdf_decoder: self.pdf_decoder,
            job_engine,
            reclaims: AtomicU64::new(0),
        }))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileEntry;
    use crate::content::PageContent;
    use crate::picture::test_support::write_png;
    use tempfile::tempdir;
    use thumbnail_cache::ThumbnailCacheConfig;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_thumbnails_persist_across_contexts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 400, 300);
        let cache_config = ThumbnailCacheConfig {
            path: Some(dir.path().join("thumbs.db")),
            ..Default::default()
        };

        let first_cache = Arc::new(ThumbnailCache::open(&cache_config).unwrap());
        let context = ContentContext::builder(ContentConfig::default())
            .thumbnail_cache(Arc::clone(&first_cache))
            .build()
            .unwrap();
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        content.load_thumbnail(&CancellationToken::new()).await.unwrap();
        assert!(content.thumbnail().is_unique_image());
        context.close();
        drop(context);
        drop(first_cache);

        let cache = Arc::new(ThumbnailCache::open(&cache_config).unwrap());
        let context = ContentContext::builder(ContentConfig::default())
            .thumbnail_cache(Arc::clone(&cache))
            .build()
            .unwrap();
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        content.load_thumbnail(&CancellationToken::new()).await.unwrap();

        assert!(content.thumbnail().is_unique_image());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(context.source_pool().stats().count, 0);
    }

    #[tokio::test]
    async fn test_defaults() {
        let context = ContentContext::builder(ContentConfig::default()).build().unwrap();
        assert!(!context.thumbnail_cache().is_enabled());
        assert!(context.pdf_decoder().is_none());
        assert_eq!(context.image_decoder().name(), "image");
        assert_eq!(context.decode_limits().max_alloc, Some(512 * 1024 * 1024));
        assert_eq!(context.content_pool().limit(), 100 * 1024 * 1024);

        context.reclaim_memory();
        assert_eq!(context.reclaim_count(), 1);
    }
}
