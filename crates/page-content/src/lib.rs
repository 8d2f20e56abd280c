//! Page content loading, scheduling and memory eviction for Leafview
//!
//! This crate turns archive entries into displayable bitmaps and thumbnails:
//!
//! - [`PageContent`] is the decodable payload of a page, one variant per media kind
//! - [`PictureSource`] holds original bytes and re-rasterizes at any size
//! - [`PageJob`] collapses repeated load requests into one prioritized job
//! - [`PageContentPool`] and [`PictureSourcePool`] keep memory under budget,
//!   evicting what is farthest from the page being viewed
//! - [`ContentContext`] ties one book session together
//!
//! Thumbnails are looked up in the persistent `thumbnail_cache` before any
//! decode and new ones are saved back through its background queue.

pub mod archive;
pub mod config;
pub mod content;
pub mod context;
pub mod error;
pub mod job;
pub mod page;
pub mod picture;
pub mod pool;
pub mod prefetch;

pub use archive::{ArchiveEntry, EntryKind, FileEntry, TempFile};
pub use config::ContentConfig;
pub use content::{ContentKind, MessageIcon, PageContent, PageContentState, PageMessage};
pub use context::{ContentContext, ContentContextBuilder};
pub use error::{ContentError, Result};
pub use job::{
    JobCommand, JobEngine, JobPriority, JobRequestHandle, JobRequestOptions, JobStatus, PageJob,
    PageJobCommand, PriorityJobEngine,
};
pub use page::Page;
pub use picture::{DecodeLimits, ImageDecoder, PictureDecoder, PictureInfo, PictureSource, Size};
pub use pool::{ContentPoolStats, PageContentPool, PictureSourcePool, SourcePoolStats};
pub use prefetch::{PrefetchPlan, PrefetchProgress, Prefetcher};
