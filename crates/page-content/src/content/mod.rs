//! Page content and its per-variant loaders
//!
//! A [`PageContent`] is the decodable payload of one page. Its variant is
//! fixed when it is built from an archive entry; everything variant-specific
//! lives in a loader implementing [`ContentLoader`], while the shared contract
//! lives here:
//!
//! - loads are serialized per content, so concurrent callers never decode twice
//! - a cancelled load publishes nothing and returns [`ContentError::Cancelled`]
//! - any other failure becomes an alert [`PageMessage`]
//! - a successful content load fires the loaded listeners once and registers
//!   the content with the context's content pool

mod archive;
mod bitmap;
mod constant;
mod media;
mod state;

pub use state::{PageContentState, StateCell};

use crate::archive::{ArchiveEntry, EntryKind};
use crate::config::ContentConfig;
use crate::context::ContentContext;
use crate::error::{ContentError, Result};
use crate::picture::{PictureInfo, Size};
use archive::ArchiveLoader;
use async_trait::async_trait;
use bitmap::{AnimatedLoader, BitmapLoader};
use constant::{ConstLoader, FileLoader};
use image::DynamicImage;
use media::MediaLoader;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use thumbnail_cache::{Thumbnail, ThumbnailCache, ThumbnailCacheHeader, ThumbnailType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageIcon {
    Info,
    Warning,
    Alert,
}

/// Text shown in place of a page that has no displayable payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMessage {
    pub icon: MessageIcon,
    pub text: String,
}

impl PageMessage {
    pub fn new(icon: MessageIcon, text: impl Into<String>) -> Self {
        Self {
            icon,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(MessageIcon::Info, text)
    }

    pub fn alert(text: impl Into<String>) -> Self {
        Self::new(MessageIcon::Alert, text)
    }
}

impl fmt::Display for PageMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Bitmap,
    Animated,
    Media,
    Pdf,
    Archive,
    Const,
    File,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentKind::Bitmap => "bitmap",
            ContentKind::Animated => "animated",
            ContentKind::Media => "media",
            ContentKind::Pdf => "pdf",
            ContentKind::Archive => "archive",
            ContentKind::Const => "const",
            ContentKind::File => "file",
        };
        f.write_str(name)
    }
}

/// Everything a loader needs for one load step
pub(crate) struct LoadScope {
    pub(crate) context: Arc<ContentContext>,
    pub(crate) entry: Option<Arc<dyn ArchiveEntry>>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) thumbnail: Arc<Thumbnail>,
    pub(crate) header: Option<ThumbnailCacheHeader>,
}

impl LoadScope {
    pub(crate) fn entry(&self) -> Result<&Arc<dyn ArchiveEntry>> {
        self.entry
            .as_ref()
            .ok_or_else(|| ContentError::Decode("page has no entry".into()))
    }

    pub(crate) fn config(&self) -> &ContentConfig {
        self.context.config()
    }

    pub(crate) fn cache(&self) -> &ThumbnailCache {
        self.context.thumbnail_cache()
    }

    /// True when the thumbnail is valid, consulting the persistent cache first.
    ///
    /// The store lookup runs on the blocking pool; a cancelled lookup stores nothing.
    pub(crate) async fn thumbnail_from_cache(&self, token: &CancellationToken) -> Result<bool> {
        if self.thumbnail.is_valid() {
            return Ok(true);
        }
        let Some(header) = self.header.clone() else {
            return Ok(false);
        };
        if !self.cache().is_enabled() {
            return Ok(false);
        }

        let cache = Arc::clone(self.context.thumbnail_cache());
        let key = header.clone();
        let cached = run_blocking(token, move || Ok(cache.load(&key))).await?;
        Ok(match cached {
            Some(bytes) => self.thumbnail.initialize_cached(bytes, &header),
            None => false,
        })
    }

    pub(crate) fn store_thumbnail(&self, bytes: Option<Vec<u8>>) {
        self.thumbnail
            .initialize(bytes, self.cache(), self.header.as_ref());
    }
}

/// Variant-specific load, unload and thumbnail steps
#[async_trait]
pub(crate) trait ContentLoader: Send + Sync {
    /// Payload present
    fn is_loaded(&self) -> bool;

    async fn load_content(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()>;

    async fn load_thumbnail(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()>;

    /// Release the heavy payload; safe to repeat
    fn unload_content(&self);

    fn content_memory_size(&self) -> usize {
        0
    }

    fn picture_source_memory_size(&self) -> usize {
        0
    }
}

/// Run blocking decode work off the async workers, racing it against `token`.
///
/// On cancellation the blocking task is detached and its result discarded.
pub(crate) async fn run_blocking<T, F>(token: &CancellationToken, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    if token.is_cancelled() {
        return Err(ContentError::Cancelled);
    }
    let task = tokio::task::spawn_blocking(f);
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ContentError::Cancelled),
        joined = task => match joined {
            Ok(result) => result,
            Err(e) => Err(ContentError::Other(anyhow::anyhow!("decode task failed: {e}"))),
        },
    }
}

/// [`run_blocking`] with one reclaim-and-retry on memory pressure.
///
/// A memory failure that survives the retry is reported as a decode failure.
pub(crate) async fn decode_with_retry<T, F>(scope: &LoadScope, token: &CancellationToken, f: F) -> Result<T>
where
    F: Fn() -> Result<T> + Clone + Send + 'static,
    T: Send + 'static,
{
    match run_blocking(token, f.clone()).await {
        Err(e) if e.is_out_of_memory() && scope.config().retry_on_memory_pressure => {
            warn!(error = %e, "decode hit memory pressure, reclaiming and retrying");
            scope.context.reclaim_memory();
            run_blocking(token, f).await.map_err(into_decode_failure)
        }
        result => result.map_err(into_decode_failure),
    }
}

fn into_decode_failure(e: ContentError) -> ContentError {
    match e {
        ContentError::OutOfMemory(message) => ContentError::Decode(message),
        other => other,
    }
}

enum Loader {
    Bitmap(BitmapLoader),
    Animated(AnimatedLoader),
    Media(MediaLoader),
    Pdf(BitmapLoader),
    Archive(ArchiveLoader),
    Const(ConstLoader),
    File(FileLoader),
}

impl Loader {
    fn as_loader(&self) -> &dyn ContentLoader {
        match self {
            Loader::Bitmap(loader) | Loader::Pdf(loader) => loader,
            Loader::Animated(loader) => loader,
            Loader::Media(loader) => loader,
            Loader::Archive(loader) => loader,
            Loader::Const(loader) => loader,
            Loader::File(loader) => loader,
        }
    }

    fn kind(&self) -> ContentKind {
        match self {
            Loader::Bitmap(_) => ContentKind::Bitmap,
            Loader::Animated(_) => ContentKind::Animated,
            Loader::Media(_) => ContentKind::Media,
            Loader::Pdf(_) => ContentKind::Pdf,
            Loader::Archive(_) => ContentKind::Archive,
            Loader::Const(_) => ContentKind::Const,
            Loader::File(_) => ContentKind::File,
        }
    }

    fn bitmap(&self) -> Option<&BitmapLoader> {
        match self {
            Loader::Bitmap(loader) | Loader::Pdf(loader) => Some(loader),
            Loader::Animated(loader) => Some(loader.bitmap()),
            _ => None,
        }
    }
}

type Listener = Arc<dyn Fn() + Send + Sync>;

/// The decodable payload of one page
pub struct PageContent {
    index: usize,
    entry: RwLock<Option<Arc<dyn ArchiveEntry>>>,
    appendix: Option<String>,
    state: Arc<StateCell>,
    message: RwLock<Option<PageMessage>>,
    thumbnail: Arc<Thumbnail>,
    loader: Loader,
    context: Weak<ContentContext>,
    load_lock: tokio::sync::Mutex<()>,
    loaded: Mutex<Vec<Listener>>,
}

impl PageContent {
    /// Build the content variant matching `entry`
    pub fn for_entry(index: usize, entry: Arc<dyn ArchiveEntry>, context: &Arc<ContentContext>) -> Arc<Self> {
        Self::for_entry_with_appendix(index, entry, None, context)
    }

    /// Like [`PageContent::for_entry`], with an extra cache-key discriminator
    pub fn for_entry_with_appendix(
        index: usize,
        entry: Arc<dyn ArchiveEntry>,
        appendix: Option<String>,
        context: &Arc<ContentContext>,
    ) -> Arc<Self> {
        let thumbnail = Arc::new(Thumbnail::new());
        let mut message = None;
        let loader = match entry.kind() {
            EntryKind::Archive => Loader::Archive(ArchiveLoader::new(Arc::clone(&thumbnail))),
            EntryKind::AnimatedImage if context.config().animation_enabled => {
                Loader::Animated(AnimatedLoader::new())
            }
            EntryKind::Image | EntryKind::AnimatedImage => Loader::Bitmap(BitmapLoader::for_image()),
            EntryKind::Media => Loader::Media(MediaLoader::new()),
            EntryKind::Pdf => Loader::Pdf(BitmapLoader::pdf()),
            EntryKind::Unknown => {
                message = Some(PageMessage::info(format!(
                    "{} is not a supported page",
                    entry.entry_name()
                )));
                Loader::File(FileLoader)
            }
        };
        Arc::new(Self::new(index, Some(entry), appendix, thumbnail, loader, message, context))
    }

    /// A content that only carries a named thumbnail type
    pub fn constant(
        index: usize,
        entry: Option<Arc<dyn ArchiveEntry>>,
        thumbnail_type: ThumbnailType,
        context: &Arc<ContentContext>,
    ) -> Arc<Self> {
        let thumbnail = Arc::new(Thumbnail::new());
        let loader = Loader::Const(ConstLoader::new(thumbnail_type, Arc::clone(&thumbnail)));
        Arc::new(Self::new(index, entry, None, thumbnail, loader, None, context))
    }

    /// A placeholder that only shows `message`
    pub fn file(
        index: usize,
        entry: Option<Arc<dyn ArchiveEntry>>,
        message: PageMessage,
        context: &Arc<ContentContext>,
    ) -> Arc<Self> {
        let thumbnail = Arc::new(Thumbnail::new());
        let loader = Loader::File(FileLoader);
        Arc::new(Self::new(index, entry, None, thumbnail, loader, Some(message), context))
    }

    fn new(
        index: usize,
        entry: Option<Arc<dyn ArchiveEntry>>,
        appendix: Option<String>,
        thumbnail: Arc<Thumbnail>,
        loader: Loader,
        message: Option<PageMessage>,
        context: &Arc<ContentContext>,
    ) -> Self {
        Self {
            index,
            entry: RwLock::new(entry),
            appendix,
            state: Arc::new(StateCell::default()),
            message: RwLock::new(message),
            thumbnail,
            loader,
            context: Arc::downgrade(context),
            load_lock: tokio::sync::Mutex::new(()),
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> ContentKind {
        self.loader.kind()
    }

    pub fn entry(&self) -> Option<Arc<dyn ArchiveEntry>> {
        self.entry.read().clone()
    }

    pub fn set_entry(&self, entry: Arc<dyn ArchiveEntry>) {
        *self.entry.write() = Some(entry);
    }

    pub fn state(&self) -> PageContentState {
        self.state.get()
    }

    /// Raise the requested state; a lower request never downgrades it
    pub fn request_state(&self, state: PageContentState) -> PageContentState {
        self.state.raise(state)
    }

    /// Overwrite the state; this is how a consumer releases a page
    pub fn set_state(&self, state: PageContentState) {
        self.state.set(state);
    }

    pub fn message(&self) -> Option<PageMessage> {
        self.message.read().clone()
    }

    pub fn thumbnail(&self) -> &Arc<Thumbnail> {
        &self.thumbnail
    }

    /// Message set, or the variant's payload present
    pub fn is_loaded(&self) -> bool {
        self.message.read().is_some() || self.loader.as_loader().is_loaded()
    }

    pub fn is_resizable(&self) -> bool {
        matches!(self.loader, Loader::Pdf(_))
    }

    /// Picture metadata, once the source has been read
    pub fn picture_info(&self) -> Option<PictureInfo> {
        self.loader.bitmap().and_then(BitmapLoader::picture_info)
    }

    /// Presented size, when known
    pub fn size(&self) -> Option<Size> {
        match &self.loader {
            Loader::Media(_) => self
                .context
                .upgrade()
                .map(|context| context.config().media_placeholder_size),
            _ => self.picture_info().map(|info| info.size),
        }
    }

    /// The decoded display bitmap
    pub fn image(&self) -> Option<Arc<DynamicImage>> {
        self.loader.bitmap().and_then(BitmapLoader::image)
    }

    /// The extracted file of animated and media pages
    pub fn temp_file_path(&self) -> Option<PathBuf> {
        match &self.loader {
            Loader::Animated(loader) => loader.temp_file_path(),
            Loader::Media(loader) => loader.temp_file_path(),
            _ => None,
        }
    }

    pub fn content_memory_size(&self) -> usize {
        self.loader.as_loader().content_memory_size()
    }

    pub fn picture_source_memory_size(&self) -> usize {
        self.loader.as_loader().picture_source_memory_size()
    }

    pub fn thumbnail_header(&self) -> Option<ThumbnailCacheHeader> {
        self.entry.read().as_ref().map(|entry| {
            ThumbnailCacheHeader::new(
                entry.full_name(),
                entry.length(),
                entry.last_write_time(),
                self.appendix.as_deref(),
            )
        })
    }

    /// Called after each successful content load
    pub fn on_loaded(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.loaded.lock().push(Arc::new(listener));
    }

    fn raise_loaded(&self) {
        let listeners = self.loaded.lock().clone();
        for listener in listeners {
            listener();
        }
    }

    fn scope(&self, context: Arc<ContentContext>) -> LoadScope {
        LoadScope {
            context,
            entry: self.entry(),
            state: Arc::clone(&self.state),
            thumbnail: Arc::clone(&self.thumbnail),
            header: self.thumbnail_header(),
        }
    }

    async fn lock_for_load(&self, token: &CancellationToken) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ContentError::Cancelled),
            guard = self.load_lock.lock() => Ok(guard),
        }
    }

    /// Decode the payload. Idempotent; only cancellation is returned as an error.
    pub async fn load_content(self: &Arc<Self>, token: &CancellationToken) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        if token.is_cancelled() {
            return Err(ContentError::Cancelled);
        }
        let Some(context) = self.context.upgrade() else {
            debug!(index = self.index, "content context closed, skipping load");
            return Ok(());
        };

        let guard = self.lock_for_load(token).await?;
        if self.is_loaded() {
            return Ok(());
        }
        let scope = self.scope(context);
        let result = self.loader.as_loader().load_content(&scope, token).await;
        drop(guard);

        match result {
            Ok(()) => {
                debug!(
                    index = self.index,
                    kind = %self.kind(),
                    bytes = self.content_memory_size(),
                    "content loaded"
                );
                self.raise_loaded();
                scope.context.content_pool().add(Arc::clone(self));
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(index = self.index, kind = %self.kind(), error = %e, "content load failed");
                *self.message.write() = Some(PageMessage::alert(e.to_string()));
            }
        }
        Ok(())
    }

    /// Fill the thumbnail, from the cache when possible
    pub async fn load_thumbnail(self: &Arc<Self>, token: &CancellationToken) -> Result<()> {
        if self.thumbnail.is_valid() {
            return Ok(());
        }
        if token.is_cancelled() {
            return Err(ContentError::Cancelled);
        }
        let Some(context) = self.context.upgrade() else {
            return Ok(());
        };

        let _guard = self.lock_for_load(token).await?;
        if self.thumbnail.is_valid() {
            return Ok(());
        }
        let scope = self.scope(context);
        match self.loader.as_loader().load_thumbnail(&scope, token).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(index = self.index, error = %e, "thumbnail generation failed");
                scope.store_thumbnail(None);
            }
        }
        Ok(())
    }

    /// Rasterize at an explicit size without touching the loaded payload
    pub async fn create_image(self: &Arc<Self>, size: Size, token: &CancellationToken) -> Result<DynamicImage> {
        let context = self.context.upgrade().ok_or(ContentError::Closed)?;
        let Some(bitmap) = self.loader.bitmap() else {
            return Err(ContentError::Decode(format!(
                "{} pages cannot be rasterized",
                self.kind()
            )));
        };
        bitmap.create_image(&self.scope(context), size, token).await
    }

    /// Release the heavy payload
    pub fn unload_content(&self) {
        if self.loader.as_loader().is_loaded() {
            debug!(index = self.index, kind = %self.kind(), "content unloaded");
        }
        self.loader.as_loader().unload_content();
    }
}

impl fmt::Debug for PageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageContent")
            .field("index", &self.index)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("loaded", &self.is_loaded())
            .field("message", &*self.message.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileEntry;
    use crate::context::test_support::test_context;
    use crate::picture::test_support::{write_png, CountingDecoder};
    use crate::picture::PictureDecoder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    fn counting_context(decoder: Arc<CountingDecoder>) -> Arc<ContentContext> {
        test_context(ContentConfig::default(), decoder as Arc<dyn PictureDecoder>)
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 64, 48);
        let decoder = Arc::new(CountingDecoder::default());
        let context = counting_context(Arc::clone(&decoder));

        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        content.on_loaded(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let token = CancellationToken::new();
        let (a, b) = tokio::join!(content.load_content(&token), content.load_content(&token));
        a.unwrap();
        b.unwrap();
        content.load_content(&token).await.unwrap();

        assert_eq!(content.kind(), ContentKind::Bitmap);
        assert!(content.is_loaded());
        assert_eq!(decoder.decode_count(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(content.size(), Some(Size::new(64, 48)));
        assert_eq!(content.content_memory_size(), 64 * 48 * 3);
        assert_eq!(context.content_pool().stats().count, 1);
    }

    #[tokio::test]
    async fn test_thumbnail_then_content_reuses_source() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 600, 300);
        let decoder = Arc::new(CountingDecoder::default());
        let context = counting_context(Arc::clone(&decoder));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        let token = CancellationToken::new();

        content.load_thumbnail(&token).await.unwrap();
        assert!(content.thumbnail().is_unique_image());
        assert!(!content.is_loaded());
        assert_eq!(context.source_pool().stats().count, 1);

        content.load_content(&token).await.unwrap();
        assert!(content.is_loaded());
        assert_eq!(context.source_pool().stats().count, 1);
        assert_eq!(decoder.decode_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_load_publishes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 16, 16);
        let context = counting_context(Arc::new(CountingDecoder::default()));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);

        let token = CancellationToken::new();
        token.cancel();
        let err = content.load_content(&token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!content.is_loaded());
        assert!(content.message().is_none());

        let err = content.load_thumbnail(&token).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!content.thumbnail().is_valid());
    }

    #[tokio::test]
    async fn test_cancel_during_decode_publishes_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 16, 16);
        let decoder = Arc::new(CountingDecoder::slow(Duration::from_millis(300)));
        let context = counting_context(decoder);
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        content.on_loaded(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = content.load_content(&token).await;
        assert!(matches!(result, Err(ContentError::Cancelled)));
        assert!(!content.is_loaded());
        assert!(content.image().is_none());
        assert!(content.message().is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(context.content_pool().stats().count, 0);

        // A later uncancelled load still succeeds
        content.load_content(&CancellationToken::new()).await.unwrap();
        assert!(content.image().is_some());
    }

    #[tokio::test]
    async fn test_cache_lookup_honours_cancellation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 16, 16);
        let cache_config = thumbnail_cache::ThumbnailCacheConfig {
            path: Some(dir.path().join("thumbs.db")),
            ..Default::default()
        };
        let cache = Arc::new(ThumbnailCache::open(&cache_config).unwrap());
        let decoder = Arc::new(CountingDecoder::default());
        let context = ContentContext::builder(ContentConfig::default())
            .thumbnail_cache(Arc::clone(&cache))
            .image_decoder(Arc::clone(&decoder) as Arc<dyn PictureDecoder>)
            .job_engine(Arc::new(crate::job::test_support::RecordingEngine::default()))
            .build()
            .unwrap();
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        let header = content.thumbnail_header().unwrap();
        cache.save(&header, &[0xFF, 0xD8, 0xFF, 0xD9]).unwrap();

        let scope = content.scope(Arc::clone(&context));
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = scope.thumbnail_from_cache(&cancelled).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!content.thumbnail().is_valid());

        assert!(scope.thumbnail_from_cache(&CancellationToken::new()).await.unwrap());
        assert!(content.thumbnail().is_unique_image());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(decoder.decode_count(), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_becomes_message() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 16, 16);
        let context = counting_context(Arc::new(CountingDecoder::broken()));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        let token = CancellationToken::new();

        content.load_content(&token).await.unwrap();
        assert!(content.is_loaded());
        assert!(content.image().is_none());
        let message = content.message().unwrap();
        assert_eq!(message.icon, MessageIcon::Alert);
        assert!(message.text.contains("corrupt picture"));

        content.load_thumbnail(&token).await.unwrap();
        assert!(content.thumbnail().is_empty_image());
    }

    #[tokio::test]
    async fn test_memory_pressure_retries_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 16, 16);
        let decoder = Arc::new(CountingDecoder::failing_oom(1));
        let context = counting_context(Arc::clone(&decoder));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);

        content.load_content(&CancellationToken::new()).await.unwrap();
        assert!(content.image().is_some());
        assert_eq!(decoder.decode_count(), 2);
        assert_eq!(context.reclaim_count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_memory_pressure_is_a_decode_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 16, 16);
        let decoder = Arc::new(CountingDecoder::failing_oom(2));
        let context = counting_context(Arc::clone(&decoder));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);

        content.load_content(&CancellationToken::new()).await.unwrap();
        assert_eq!(decoder.decode_count(), 2);
        let message = content.message().unwrap();
        assert!(message.text.starts_with("decode failed"));
    }

    #[tokio::test]
    async fn test_resize_filter_bounds_display_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 400, 200);
        let config = ContentConfig {
            resize_filter: Some(Size::new(100, 100)),
            ..Default::default()
        };
        let context = test_context(config, Arc::new(crate::picture::ImageDecoder));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        let token = CancellationToken::new();

        content.load_content(&token).await.unwrap();
        let image = content.image().unwrap();
        assert_eq!((image.width(), image.height()), (100, 50));

        let large = content.create_image(Size::new(40, 20), &token).await.unwrap();
        assert_eq!((large.width(), large.height()), (40, 20));
    }

    #[tokio::test]
    async fn test_unload_releases_payload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 16, 16);
        let context = counting_context(Arc::new(CountingDecoder::default()));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);

        content.unload_content();
        content.load_content(&CancellationToken::new()).await.unwrap();
        content.unload_content();
        content.unload_content();
        assert!(!content.is_loaded());
        assert_eq!(content.content_memory_size(), 0);
    }

    #[tokio::test]
    async fn test_state_requests_merge_with_max() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 4, 4);
        let context = counting_context(Arc::new(CountingDecoder::default()));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);

        content.request_state(PageContentState::View);
        content.request_state(PageContentState::Ahead);
        assert_eq!(content.state(), PageContentState::View);
        content.set_state(PageContentState::None);
        assert_eq!(content.state(), PageContentState::None);
    }

    #[tokio::test]
    async fn test_unknown_entry_is_file_placeholder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"text").unwrap();
        let context = counting_context(Arc::new(CountingDecoder::default()));
        let content = PageContent::for_entry(3, FileEntry::new(&path).unwrap(), &context);

        assert_eq!(content.kind(), ContentKind::File);
        assert!(content.is_loaded());
        assert_eq!(content.message().unwrap().icon, MessageIcon::Info);
        content.load_thumbnail(&CancellationToken::new()).await.unwrap();
        assert!(!content.thumbnail().is_valid());
    }

    #[tokio::test]
    async fn test_closed_context() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 4, 4);
        let context = counting_context(Arc::new(CountingDecoder::default()));
        let content = PageContent::for_entry(0, FileEntry::new(&path).unwrap(), &context);
        drop(context);

        content.load_content(&CancellationToken::new()).await.unwrap();
        assert!(!content.is_loaded());
        let err = content
            .create_image(Size::new(2, 2), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Closed));
    }
}
