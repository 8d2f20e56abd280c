//! In-memory thumbnail holder
//!
//! A [`Thumbnail`] is either not yet attempted, one of the sentinel types, or
//! a unique encoded image. Once it holds a value it never goes back to the
//! unattempted state. Decoding to a bitmap happens on every request and is
//! never cached beyond the encoded bytes.

use crate::cache::ThumbnailCache;
use crate::header::ThumbnailCacheHeader;
use anyhow::{Context, Result};
use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const ICON_SIZE: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThumbnailType {
    /// A real encoded picture
    Unique,
    /// Deliberately blank, e.g. after a failed decode
    Empty,
    Media,
    Folder,
}

#[derive(Clone)]
enum ThumbnailImage {
    Unique(Arc<[u8]>),
    Empty,
    Media,
    Folder,
}

impl ThumbnailImage {
    fn thumbnail_type(&self) -> ThumbnailType {
        match self {
            ThumbnailImage::Unique(_) => ThumbnailType::Unique,
            ThumbnailImage::Empty => ThumbnailType::Empty,
            ThumbnailImage::Media => ThumbnailType::Media,
            ThumbnailImage::Folder => ThumbnailType::Folder,
        }
    }
}

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct Thumbnail {
    image: RwLock<Option<ThumbnailImage>>,
    changed: Mutex<Vec<Listener>>,
    touched: Mutex<Vec<Listener>>,
}

impl Thumbnail {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any value (sentinel or unique) has been set
    pub fn is_valid(&self) -> bool {
        self.image.read().is_some()
    }

    pub fn is_unique_image(&self) -> bool {
        matches!(*self.image.read(), Some(ThumbnailImage::Unique(_)))
    }

    pub fn is_empty_image(&self) -> bool {
        matches!(*self.image.read(), Some(ThumbnailImage::Empty))
    }

    pub fn thumbnail_type(&self) -> Option<ThumbnailType> {
        self.image.read().as_ref().map(ThumbnailImage::thumbnail_type)
    }

    /// Try to fill the thumbnail from the persistent cache.
    ///
    /// Returns true if the thumbnail is valid afterwards. A hit performs no
    /// decode work and is not saved again.
    pub fn initialize_from_cache(&self, cache: &ThumbnailCache, header: &ThumbnailCacheHeader) -> bool {
        if self.is_valid() {
            return true;
        }
        match cache.load(header) {
            Some(bytes) => self.initialize_cached(bytes, header),
            None => false,
        }
    }

    /// Store bytes already read from the cache for `header`; they are not saved again
    pub fn initialize_cached(&self, bytes: Vec<u8>, header: &ThumbnailCacheHeader) -> bool {
        let stored = {
            let mut image = self.image.write();
            if image.is_some() {
                false
            } else {
                *image = Some(ThumbnailImage::Unique(Arc::from(bytes)));
                true
            }
        };
        if stored {
            debug!(key = %header, "thumbnail cache hit");
            self.raise_changed();
        }
        true
    }

    /// Store a freshly encoded thumbnail.
    ///
    /// `None` (or empty bytes) stores the empty sentinel so a failed picture is
    /// not retried. New unique bytes are queued for saving when a header is given.
    pub fn initialize(
        &self,
        bytes: Option<Vec<u8>>,
        cache: &ThumbnailCache,
        header: Option<&ThumbnailCacheHeader>,
    ) {
        let saved = {
            let mut image = self.image.write();
            if image.is_some() {
                return;
            }
            match bytes {
                Some(bytes) if !bytes.is_empty() => {
                    let data: Arc<[u8]> = Arc::from(bytes);
                    *image = Some(ThumbnailImage::Unique(Arc::clone(&data)));
                    Some(data)
                }
                _ => {
                    *image = Some(ThumbnailImage::Empty);
                    None
                }
            }
        };
        self.raise_changed();

        if let (Some(data), Some(header)) = (saved, header) {
            if let Err(e) = cache.enqueue_save(header.clone(), data) {
                debug!(key = %header, error = %e, "thumbnail not queued for saving");
            }
        }
    }

    /// Store one of the named sentinel types
    pub fn initialize_type(&self, thumbnail_type: ThumbnailType) {
        {
            let mut image = self.image.write();
            if image.is_some() {
                return;
            }
            *image = Some(match thumbnail_type {
                // A unique type without bytes is meaningless; treat it as blank
                ThumbnailType::Unique | ThumbnailType::Empty => ThumbnailImage::Empty,
                ThumbnailType::Media => ThumbnailImage::Media,
                ThumbnailType::Folder => ThumbnailImage::Folder,
            });
        }
        self.raise_changed();
    }

    /// Encoded bytes of a unique thumbnail. Counts as a touch.
    pub fn bytes(&self) -> Option<Arc<[u8]>> {
        self.touch();
        match &*self.image.read() {
            Some(ThumbnailImage::Unique(data)) => Some(Arc::clone(data)),
            _ => None,
        }
    }

    /// Decode to a displayable bitmap.
    ///
    /// Returns `None` before the thumbnail is initialized; sentinels decode to
    /// fixed assets. Counts as a touch.
    pub fn bitmap(&self) -> Result<Option<DynamicImage>> {
        self.touch();
        let image = self.image.read().clone();
        match image {
            None => Ok(None),
            Some(ThumbnailImage::Unique(data)) => image::load_from_memory(&data)
                .map(Some)
                .context("Failed to decode thumbnail"),
            Some(ThumbnailImage::Empty) => Ok(Some(empty_image())),
            Some(ThumbnailImage::Media) => Ok(Some(media_icon())),
            Some(ThumbnailImage::Folder) => Ok(Some(folder_icon())),
        }
    }

    /// Mark the thumbnail as recently used
    pub fn touch(&self) {
        let listeners = self.touched.lock().clone();
        for listener in listeners {
            listener();
        }
    }

    pub fn on_changed(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.changed.lock().push(Arc::new(listener));
    }

    pub fn on_touched(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.touched.lock().push(Arc::new(listener));
    }

    fn raise_changed(&self) {
        let listeners = self.changed.lock().clone();
        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let image = self.image.read();
        f.debug_struct("Thumbnail")
            .field("type", &image.as_ref().map(ThumbnailImage::thumbnail_type))
            .field(
                "bytes",
                &match &*image {
                    Some(ThumbnailImage::Unique(data)) => data.len(),
                    _ => 0,
                },
            )
            .finish()
    }
}

/// The fixed asset shown for an empty thumbnail: a single transparent pixel
pub fn empty_image() -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])))
}

fn media_icon() -> DynamicImage {
    let mut icon = RgbaImage::from_pixel(ICON_SIZE, ICON_SIZE, Rgba([32, 32, 40, 255]));
    // Film strip perforations along both edges
    for y in (4..ICON_SIZE).step_by(12) {
        for dy in 0..6 {
            for dx in 0..6 {
                icon.put_pixel(4 + dx, y + dy, Rgba([220, 220, 220, 255]));
                icon.put_pixel(ICON_SIZE - 10 + dx, y + dy, Rgba([220, 220, 220, 255]));
            }
        }
    }
    DynamicImage::ImageRgba8(icon)
}

fn folder_icon() -> DynamicImage {
    let mut icon = RgbaImage::from_pixel(ICON_SIZE, ICON_SIZE, Rgba([0, 0, 0, 0]));
    for y in 16..56 {
        for x in 6..58 {
            icon.put_pixel(x, y, Rgba([232, 178, 64, 255]));
        }
    }
    for y in 10..16 {
        for x in 6..28 {
            icon.put_pixel(x, y, Rgba([232, 178, 64, 255]));
        }
    }
    DynamicImage::ImageRgba8(icon)
}
