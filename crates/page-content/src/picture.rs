//! Picture metadata and re-decodable source handles
//!
//! A [`PictureSource`] reads the original bytes of one entry once, keeps them
//! as the raw memory tier, and can rasterize at any requested size through a
//! [`PictureDecoder`]. The raw buffer may be released at any time by the
//! picture source pool; it is simply read again on the next request.

use crate::archive::ArchiveEntry;
use crate::content::StateCell;
use crate::error::{ContentError, Result};
use image::{DynamicImage, GenericImageView, ImageReader, Limits};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thumbnail_cache::{encode_thumbnail, extract_color_swatch, ColorSwatch, ThumbnailSettings};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Scale to fit inside `bounds`, preserving aspect ratio (may upscale)
    pub fn fit_within(&self, bounds: Size) -> Size {
        if self.is_empty() || bounds.is_empty() {
            return *self;
        }
        let ratio = f64::min(
            bounds.width as f64 / self.width as f64,
            bounds.height as f64 / self.height as f64,
        );
        Size::new(
            ((self.width as f64 * ratio).round() as u32).max(1),
            ((self.height as f64 * ratio).round() as u32).max(1),
        )
    }

    /// Shrink to fit inside `bounds`; never upscales
    pub fn limit(&self, bounds: Size) -> Size {
        if self.width <= bounds.width && self.height <= bounds.height {
            *self
        } else {
            self.fit_within(bounds)
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Metadata of an original picture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureInfo {
    /// Size the picture is presented at
    pub size: Size,
    /// Size stored in the source data
    pub original_size: Size,
    pub bits_per_pixel: u32,
    /// Filled after the first rasterization
    pub dominant_color: Option<ColorSwatch>,
    pub decoder: String,
}

impl PictureInfo {
    pub fn new(size: Size, bits_per_pixel: u32, decoder: &str) -> Self {
        Self {
            size,
            original_size: size,
            bits_per_pixel,
            dominant_color: None,
            decoder: decoder.to_string(),
        }
    }
}

/// Decoder constraints applied to every rasterization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_alloc: Option<u64>,
}

/// Rasterizer backend for one family of pictures
pub trait PictureDecoder: Send + Sync {
    fn name(&self) -> &str;

    /// Read size information without decoding pixels
    fn read_info(&self, data: &[u8]) -> Result<PictureInfo>;

    /// Decode, scaled to `size` when given
    fn decode(&self, data: &[u8], size: Option<Size>, limits: &DecodeLimits) -> Result<DynamicImage>;
}

/// Decoder for the raster formats supported by the `image` crate
#[derive(Debug, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    fn reader<'a>(data: &'a [u8], limits: &DecodeLimits) -> Result<ImageReader<Cursor<&'a [u8]>>> {
        let mut reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        let mut decode_limits = Limits::default();
        decode_limits.max_alloc = limits.max_alloc;
        reader.limits(decode_limits);
        Ok(reader)
    }
}

impl PictureDecoder for ImageDecoder {
    fn name(&self) -> &str {
        "image"
    }

    fn read_info(&self, data: &[u8]) -> Result<PictureInfo> {
        let reader = Self::reader(data, &DecodeLimits::default())?;
        let (width, height) = reader.into_dimensions()?;
        // Bit depth needs a decoder; 32 matches what every page is rasterized to
        Ok(PictureInfo::new(Size::new(width, height), 32, self.name()))
    }

    fn decode(&self, data: &[u8], size: Option<Size>, limits: &DecodeLimits) -> Result<DynamicImage> {
        let img = Self::reader(data, limits)?.decode()?;
        let (width, height) = img.dimensions();
        match size {
            Some(size) if !size.is_empty() && size != Size::new(width, height) => {
                Ok(img.resize_exact(size.width, size.height, image::imageops::FilterType::Triangle))
            }
            _ => Ok(img),
        }
    }
}

/// Lazily loaded, re-decodable handle to one entry's original data
pub struct PictureSource {
    entry: Arc<dyn ArchiveEntry>,
    decoder: Arc<dyn PictureDecoder>,
    owner_state: Arc<StateCell>,
    limits: DecodeLimits,
    data: Mutex<Option<Arc<Vec<u8>>>>,
    info: Mutex<Option<PictureInfo>>,
    leases: AtomicUsize,
}

impl PictureSource {
    pub fn new(
        entry: Arc<dyn ArchiveEntry>,
        decoder: Arc<dyn PictureDecoder>,
        owner_state: Arc<StateCell>,
        limits: DecodeLimits,
    ) -> Self {
        Self {
            entry,
            decoder,
            owner_state,
            limits,
            data: Mutex::new(None),
            info: Mutex::new(None),
            leases: AtomicUsize::new(0),
        }
    }

    pub fn entry(&self) -> &Arc<dyn ArchiveEntry> {
        &self.entry
    }

    /// Hold the source locked for the duration of a decode
    pub fn lease(self: &Arc<Self>) -> SourceLease {
        self.leases.fetch_add(1, Ordering::AcqRel);
        SourceLease {
            source: Arc::clone(self),
        }
    }

    /// Locked sources are never released by the pool
    pub fn is_locked(&self) -> bool {
        self.leases.load(Ordering::Acquire) > 0 || self.owner_state.get().is_locked()
    }

    pub fn is_loaded(&self) -> bool {
        self.data.lock().is_some()
    }

    /// Bytes held by the raw buffer
    pub fn memory_size(&self) -> usize {
        self.data.lock().as_ref().map(|d| d.len()).unwrap_or(0)
    }

    /// Drop the raw buffer; the next request reads the entry again
    pub fn release(&self) {
        if self.data.lock().take().is_some() {
            trace!(entry = self.entry.entry_name(), "picture source released");
        }
    }

    fn raw_data(&self) -> Result<Arc<Vec<u8>>> {
        if let Some(data) = self.data.lock().as_ref() {
            return Ok(Arc::clone(data));
        }
        let data = Arc::new(self.entry.read_all()?);
        debug!(entry = self.entry.entry_name(), bytes = data.len(), "picture source loaded");
        *self.data.lock() = Some(Arc::clone(&data));
        Ok(data)
    }

    /// Picture metadata, read once
    pub fn picture_info(&self) -> Result<PictureInfo> {
        if let Some(info) = self.info.lock().as_ref() {
            return Ok(info.clone());
        }
        let data = self.raw_data()?;
        let info = self.decoder.read_info(&data)?;
        *self.info.lock() = Some(info.clone());
        Ok(info)
    }

    /// The cached metadata, if it has been read
    pub fn cached_info(&self) -> Option<PictureInfo> {
        self.info.lock().clone()
    }

    /// Rasterize at `size`, or at the original size bounded by `maximum`
    pub fn create_image(&self, size: Option<Size>, maximum: Size) -> Result<DynamicImage> {
        let info = self.picture_info()?;
        let target = size.unwrap_or_else(|| info.size.limit(maximum));
        if target.is_empty() {
            return Err(ContentError::Decode(format!(
                "{} has no pixels",
                self.entry.entry_name()
            )));
        }

        let data = self.raw_data()?;
        let img = self.decoder.decode(&data, Some(target), &self.limits)?;

        let mut info_slot = self.info.lock();
        if let Some(info) = info_slot.as_mut() {
            if info.dominant_color.is_none() {
                info.dominant_color = Some(extract_color_swatch(&img));
            }
        }
        Ok(img)
    }

    /// Encode a thumbnail straight from the source
    pub fn create_thumbnail(&self, settings: &ThumbnailSettings) -> Result<Vec<u8>> {
        let info = self.picture_info()?;
        let bounds = Size::new(settings.size, settings.size);
        let img = self.create_image(Some(info.size.limit(bounds)), info.size)?;
        Ok(encode_thumbnail(&img, settings)?)
    }
}

impl fmt::Debug for PictureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PictureSource")
            .field("entry", &self.entry.entry_name())
            .field("decoder", &self.decoder.name())
            .field("memory_size", &self.memory_size())
            .field("leases", &self.leases.load(Ordering::Relaxed))
            .finish()
    }
}

/// Keeps a [`PictureSource`] locked while alive
pub struct SourceLease {
    source: Arc<PictureSource>,
}

impl SourceLease {
    pub fn source(&self) -> &Arc<PictureSource> {
        &self.source
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        self.source.leases.fetch_sub(1, Ordering::AcqRel);
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::archive::FileEntry;
    use crate::content::PageContentState;
    use tempfile::tempdir;

    fn source_for(path: &std::path::Path, decoder: Arc<dyn PictureDecoder>) -> Arc<PictureSource> {
        let entry = FileEntry::new(path).unwrap();
        Arc::new(PictureSource::new(
            entry,
            decoder,
            Arc::new(StateCell::default()),
            DecodeLimits::default(),
        ))
    }

    #[test]
    fn test_size_fitting() {
        let size = Size::new(4000, 3000);
        assert_eq!(size.limit(Size::new(2000, 2000)), Size::new(2000, 1500));
        assert_eq!(size.limit(Size::new(8000, 8000)), size);
        assert_eq!(Size::new(100, 50).fit_within(Size::new(400, 400)), Size::new(400, 200));
        assert_eq!(Size::new(3, 4).area(), 12);
        assert!(Size::new(0, 10).is_empty());
    }

    #[test]
    fn test_picture_info_and_image() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("page.png");
        write_png(&path, 200, 100);
        let source = source_for(&path, Arc::new(ImageDecoder));

        let info = source.picture_info()?;
        assert_eq!(info.size, Size::new(200, 100));
        assert_eq!(info.decoder, "image");
        assert!(source.is_loaded());
        assert!(source.memory_size() > 0);

        let img = source.create_image(None, Size::new(100, 100))?;
        assert_eq!(img.dimensions(), (100, 50));
        assert!(source.cached_info().and_then(|i| i.dominant_color).is_some());
        Ok(())
    }

    #[test]
    fn test_release_and_reload() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("page.png");
        write_png(&path, 20, 20);
        let source = source_for(&path, Arc::new(ImageDecoder));

        source.picture_info()?;
        source.release();
        assert!(!source.is_loaded());
        assert_eq!(source.memory_size(), 0);

        // Re-reads transparently
        let img = source.create_image(Some(Size::new(10, 10)), Size::new(100, 100))?;
        assert_eq!(img.dimensions(), (10, 10));
        assert!(source.is_loaded());
        Ok(())
    }

    #[test]
    fn test_lock_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.png");
        write_png(&path, 4, 4);
        let state = Arc::new(StateCell::default());
        let source = Arc::new(PictureSource::new(
            FileEntry::new(&path).unwrap(),
            Arc::new(ImageDecoder),
            Arc::clone(&state),
            DecodeLimits::default(),
        ));

        assert!(!source.is_locked());
        {
            let _lease = source.lease();
            assert!(source.is_locked());
        }
        assert!(!source.is_locked());

        state.raise(PageContentState::Ahead);
        assert!(source.is_locked());
    }

    #[test]
    fn test_thumbnail_from_source() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("page.png");
        write_png(&path, 1000, 500);
        let source = source_for(&path, Arc::new(ImageDecoder));

        let bytes = source.create_thumbnail(&ThumbnailSettings { size: 100, quality: 70 })?;
        let thumb = image::load_from_memory(&bytes).map_err(ContentError::from)?;
        assert_eq!(thumb.dimensions(), (100, 50));
        Ok(())
    }

    #[test]
    fn test_unreadable_data_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("page.png");
        std::fs::write(&path, b"garbage").unwrap();
        let source = source_for(&path, Arc::new(ImageDecoder));
        assert!(source.picture_info().is_err());
    }
}
