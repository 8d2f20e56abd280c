use std::io;
use thiserror::Error;

/// Errors raised while loading page content.
///
/// Only [`ContentError::Cancelled`] ever reaches callers of the page-level
/// load operations; everything else is turned into a page message.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("operation cancelled")]
    Cancelled,

    /// Allocation failed or exceeded the decode limit; worth one retry after
    /// memory has been reclaimed.
    ///
    /// With [`ImageDecoder`](crate::picture::ImageDecoder) the limit is the
    /// fixed `decode_alloc_limit_mb`, which reclaiming does not change: a
    /// picture over that limit fails the retry too. Only decoders that fail on
    /// actual memory pressure can recover.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("image error: {0}")]
    Image(image::ImageError),

    /// The book this content belongs to has been closed
    #[error("content context closed")]
    Closed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ContentError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ContentError::Cancelled)
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, ContentError::OutOfMemory(_))
    }
}

impl From<image::ImageError> for ContentError {
    fn from(e: image::ImageError) -> Self {
        match &e {
            image::ImageError::Limits(limit) => match limit.kind() {
                image::error::LimitErrorKind::InsufficientMemory => {
                    ContentError::OutOfMemory(e.to_string())
                }
                _ => ContentError::Image(e),
            },
            _ => ContentError::Image(e),
        }
    }
}

pub type Result<T, E = ContentError> = std::result::Result<T, E>;
