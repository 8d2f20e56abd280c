//! Memory pools for the two content tiers
//!
//! [`PageContentPool`] bounds decoded display bitmaps with a spatial policy;
//! [`PictureSourcePool`] bounds raw source buffers with a simple release-all
//! policy. Both keep their lock to list bookkeeping and unload outside it.

mod content_pool;
mod source_pool;

pub use content_pool::{ContentPoolStats, PageContentPool};
pub use source_pool::{PictureSourcePool, SourcePoolStats};
