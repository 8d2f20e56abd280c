use super::{decode_with_retry, run_blocking, ContentLoader, LoadScope};
use crate::archive::TempFile;
use crate::error::{ContentError, Result};
use crate::picture::{PictureInfo, PictureSource, Size};
use async_trait::async_trait;
use image::DynamicImage;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::Arc;
use thumbnail_cache::encode_thumbnail;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderKind {
    Image,
    Pdf,
}

/// Pictures rasterized through a [`PictureSource`]; also serves PDF pages.
///
/// A PDF load only measures the page. Its pixels are produced at render time
/// through [`BitmapLoader::create_image`].
pub(crate) struct BitmapLoader {
    decoder_kind: DecoderKind,
    source: Mutex<Option<Arc<PictureSource>>>,
    image: RwLock<Option<Arc<DynamicImage>>>,
    measured: RwLock<Option<PictureInfo>>,
}

impl BitmapLoader {
    pub(crate) fn for_image() -> Self {
        Self::new(DecoderKind::Image)
    }

    pub(crate) fn pdf() -> Self {
        Self::new(DecoderKind::Pdf)
    }

    fn new(decoder_kind: DecoderKind) -> Self {
        Self {
            decoder_kind,
            source: Mutex::new(None),
            image: RwLock::new(None),
            measured: RwLock::new(None),
        }
    }

    /// The picture source, created and registered on first use
    pub(crate) fn source(&self, scope: &LoadScope) -> Result<Arc<PictureSource>> {
        let mut slot = self.source.lock();
        if let Some(source) = slot.as_ref() {
            return Ok(Arc::clone(source));
        }

        let decoder = match self.decoder_kind {
            DecoderKind::Image => scope.context.image_decoder(),
            DecoderKind::Pdf => scope
                .context
                .pdf_decoder()
                .ok_or_else(|| ContentError::Decode("no PDF renderer is configured".into()))?,
        };
        let source = Arc::new(PictureSource::new(
            Arc::clone(scope.entry()?),
            decoder,
            Arc::clone(&scope.state),
            scope.context.decode_limits(),
        ));
        *slot = Some(Arc::clone(&source));
        drop(slot);

        scope.context.source_pool().add(&source);
        Ok(source)
    }

    pub(crate) fn image(&self) -> Option<Arc<DynamicImage>> {
        self.image.read().clone()
    }

    pub(crate) fn picture_info(&self) -> Option<PictureInfo> {
        self.source.lock().as_ref().and_then(|source| source.cached_info())
    }

    /// Decode the display bitmap: the resize filter size when configured,
    /// otherwise the original size bounded by the maximum
    async fn decode_display(&self, scope: &LoadScope, token: &CancellationToken) -> Result<DynamicImage> {
        let source = self.source(scope)?;
        let filter = scope.config().resize_filter;
        let maximum = scope.config().maximum_size;
        decode_with_retry(scope, token, move || -> Result<DynamicImage> {
            let _lease = source.lease();
            let info = source.picture_info()?;
            let target = filter.map(|filter| info.size.limit(filter));
            source.create_image(target, maximum)
        })
        .await
    }

    /// Read the picture metadata without rasterizing
    async fn measure(&self, scope: &LoadScope, token: &CancellationToken) -> Result<PictureInfo> {
        let source = self.source(scope)?;
        run_blocking(token, move || -> Result<PictureInfo> {
            let _lease = source.lease();
            source.picture_info()
        })
        .await
    }

    fn publish(&self, image: DynamicImage) {
        *self.image.write() = Some(Arc::new(image));
    }

    pub(crate) async fn create_image(
        &self,
        scope: &LoadScope,
        size: Size,
        token: &CancellationToken,
    ) -> Result<DynamicImage> {
        let source = self.source(scope)?;
        decode_with_retry(scope, token, move || {
            let _lease = source.lease();
            source.create_image(Some(size), size)
        })
        .await
    }
}

#[async_trait]
impl ContentLoader for BitmapLoader {
    fn is_loaded(&self) -> bool {
        match self.decoder_kind {
            DecoderKind::Image => self.image.read().is_some(),
            DecoderKind::Pdf => self.measured.read().is_some(),
        }
    }

    async fn load_content(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()> {
        if self.decoder_kind == DecoderKind::Pdf {
            let info = self.measure(scope, token).await?;
            if token.is_cancelled() {
                return Err(ContentError::Cancelled);
            }
            *self.measured.write() = Some(info);
            return Ok(());
        }

        let image = self.decode_display(scope, token).await?;
        if token.is_cancelled() {
            return Err(ContentError::Cancelled);
        }
        self.publish(image);
        Ok(())
    }

    async fn load_thumbnail(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()> {
        if scope.thumbnail_from_cache(token).await? {
            return Ok(());
        }
        let settings = scope.config().thumbnail.clone();

        let bytes = match self.image() {
            // Content already decoded: encode from it instead of the source
            Some(image) => {
                run_blocking(token, move || -> Result<Vec<u8>> {
                    Ok(encode_thumbnail(&image, &settings)?)
                })
                .await?
            }
            None => {
                let source = self.source(scope)?;
                decode_with_retry(scope, token, move || {
                    let _lease = source.lease();
                    source.create_thumbnail(&settings)
                })
                .await?
            }
        };
        scope.store_thumbnail(Some(bytes));
        Ok(())
    }

    fn unload_content(&self) {
        self.image.write().take();
        self.measured.write().take();
    }

    fn content_memory_size(&self) -> usize {
        self.image
            .read()
            .as_ref()
            .map(|image| image.as_bytes().len())
            .unwrap_or(0)
    }

    fn picture_source_memory_size(&self) -> usize {
        self.source
            .lock()
            .as_ref()
            .map(|source| source.memory_size())
            .unwrap_or(0)
    }
}

/// Animated pictures: a still frame plus the extracted file for playback
pub(crate) struct AnimatedLoader {
    bitmap: BitmapLoader,
    temp_file: Mutex<Option<Arc<TempFile>>>,
}

impl AnimatedLoader {
    pub(crate) fn new() -> Self {
        Self {
            bitmap: BitmapLoader::for_image(),
            temp_file: Mutex::new(None),
        }
    }

    pub(crate) fn bitmap(&self) -> &BitmapLoader {
        &self.bitmap
    }

    pub(crate) fn temp_file_path(&self) -> Option<PathBuf> {
        self.temp_file
            .lock()
            .as_ref()
            .map(|file| file.path().to_path_buf())
    }
}

#[async_trait]
impl ContentLoader for AnimatedLoader {
    fn is_loaded(&self) -> bool {
        self.bitmap.is_loaded() && self.temp_file.lock().is_some()
    }

    async fn load_content(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()> {
        let source = self.bitmap.source(scope)?;
        let entry = Arc::clone(scope.entry()?);
        let keep_name = scope.config().keep_temp_file_name;
        let filter = scope.config().resize_filter;
        let maximum = scope.config().maximum_size;

        let (still, temp_file) = decode_with_retry(scope, token, move || -> Result<(DynamicImage, TempFile)> {
            let _lease = source.lease();
            let info = source.picture_info()?;
            let still = source.create_image(filter.map(|filter| info.size.limit(filter)), maximum)?;
            let temp_file = entry.extract_to_temp(keep_name)?;
            Ok((still, temp_file))
        })
        .await?;

        if token.is_cancelled() {
            return Err(ContentError::Cancelled);
        }
        self.bitmap.publish(still);
        *self.temp_file.lock() = Some(Arc::new(temp_file));
        Ok(())
    }

    async fn load_thumbnail(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()> {
        self.bitmap.load_thumbnail(scope, token).await
    }

    fn unload_content(&self) {
        self.bitmap.unload_content();
        self.temp_file.lock().take();
    }

    fn content_memory_size(&self) -> usize {
        self.bitmap.content_memory_size()
    }

    fn picture_source_memory_size(&self) -> usize {
        self.bitmap.picture_source_memory_size()
    }
}
