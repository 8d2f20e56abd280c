use super::{decode_with_retry, run_blocking, ContentLoader, LoadScope};
use crate::archive::{ArchiveEntry, EntryKind};
use crate::error::Result;
use crate::picture::PictureSource;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use thumbnail_cache::{Thumbnail, ThumbnailType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the folder search settled on
enum Found {
    Image(Arc<dyn ArchiveEntry>),
    Media,
}

/// Search `book` for the entry its thumbnail is made from.
///
/// Direct children are depth 1. Each level is scanned by name for the first
/// image or media entry before descending into nested books, and nothing
/// deeper than `range` is visited.
fn search(book: &dyn ArchiveEntry, depth: usize, range: usize) -> io::Result<Option<Found>> {
    let entries = book.entries()?;
    for entry in &entries {
        match entry.kind() {
            kind if kind.is_image() => return Ok(Some(Found::Image(Arc::clone(entry)))),
            EntryKind::Media => return Ok(Some(Found::Media)),
            _ => {}
        }
    }
    if depth >= range {
        return Ok(None);
    }
    for entry in entries.iter().filter(|e| e.kind() == EntryKind::Archive) {
        match search(entry.as_ref(), depth + 1, range) {
            Ok(Some(found)) => return Ok(Some(found)),
            Ok(None) => {}
            Err(e) => debug!(entry = entry.entry_name(), error = %e, "skipping unreadable book"),
        }
    }
    Ok(None)
}

/// Folder and nested-archive pages; the thumbnail is their only payload
pub(crate) struct ArchiveLoader {
    thumbnail: Arc<Thumbnail>,
}

impl ArchiveLoader {
    pub(crate) fn new(thumbnail: Arc<Thumbnail>) -> Self {
        Self { thumbnail }
    }

    async fn encode_entry(
        &self,
        scope: &LoadScope,
        entry: Arc<dyn ArchiveEntry>,
        token: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let decoder = match (entry.kind(), scope.context.pdf_decoder()) {
            (EntryKind::Pdf, Some(pdf)) => pdf,
            _ => scope.context.image_decoder(),
        };
        let source = Arc::new(PictureSource::new(
            entry,
            decoder,
            Arc::clone(&scope.state),
            scope.context.decode_limits(),
        ));
        let settings = scope.config().thumbnail.clone();
        decode_with_retry(scope, token, move || {
            let _lease = source.lease();
            source.create_thumbnail(&settings)
        })
        .await
    }
}

#[async_trait]
impl ContentLoader for ArchiveLoader {
    fn is_loaded(&self) -> bool {
        self.thumbnail.is_valid()
    }

    async fn load_content(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()> {
        match self.load_thumbnail(scope, token).await {
            Err(e) if !e.is_cancelled() => {
                warn!(error = %e, "folder thumbnail failed");
                scope.store_thumbnail(None);
                Ok(())
            }
            result => result,
        }
    }

    async fn load_thumbnail(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()> {
        if scope.thumbnail_from_cache(token).await? {
            return Ok(());
        }
        let entry = Arc::clone(scope.entry()?);

        match entry.kind() {
            EntryKind::Media => scope.thumbnail.initialize_type(ThumbnailType::Media),
            EntryKind::Archive => {
                let range = scope.config().archive_search_range;
                let book = Arc::clone(&entry);
                let found = run_blocking(token, move || -> Result<Option<Found>> {
                    Ok(search(book.as_ref(), 1, range)?)
                })
                .await?;
                match found {
                    Some(Found::Media) => scope.thumbnail.initialize_type(ThumbnailType::Media),
                    Some(Found::Image(image)) => {
                        debug!(book = entry.entry_name(), image = image.entry_name(), "folder thumbnail source");
                        let bytes = self.encode_entry(scope, image, token).await?;
                        scope.store_thumbnail(Some(bytes));
                    }
                    None => {
                        debug!(book = entry.entry_name(), "no picture found for folder thumbnail");
                        scope.store_thumbnail(None);
                    }
                }
            }
            _ => {
                let bytes = self.encode_entry(scope, entry, token).await?;
                scope.store_thumbnail(Some(bytes));
            }
        }
        Ok(())
    }

    fn unload_content(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileEntry;
    use crate::config::ContentConfig;
    use crate::content::{ContentKind, PageContent};
    use crate::context::test_support::test_context;
    use crate::picture::test_support::write_png;
    use crate::picture::ImageDecoder;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    /// `root/d1/.../dN/page.png` with N nested folders below `root`
    fn nested_book(root: &Path, depth: usize) {
        let mut dir = root.to_path_buf();
        for level in 1..depth {
            dir = dir.join(format!("d{level}"));
        }
        fs::create_dir_all(&dir).unwrap();
        write_png(&dir.join("page.png"), 32, 32);
    }

    async fn folder_thumbnail(root: &Path) -> Arc<PageContent> {
        let context = test_context(ContentConfig::default(), Arc::new(ImageDecoder));
        let content = PageContent::for_entry(0, FileEntry::new(root).unwrap(), &context);
        assert_eq!(content.kind(), ContentKind::Archive);
        content.load_thumbnail(&CancellationToken::new()).await.unwrap();
        content
    }

    #[tokio::test]
    async fn test_image_at_depth_two_is_found() {
        let dir = tempdir().unwrap();
        nested_book(dir.path(), 2);
        let content = folder_thumbnail(dir.path()).await;
        assert!(content.thumbnail().is_unique_image());
        assert!(content.is_loaded());
    }

    #[tokio::test]
    async fn test_image_at_depth_three_is_not_found() {
        let dir = tempdir().unwrap();
        nested_book(dir.path(), 3);
        let content = folder_thumbnail(dir.path()).await;
        assert!(content.thumbnail().is_empty_image());
        assert!(!content.thumbnail().is_unique_image());
    }

    #[tokio::test]
    async fn test_media_first_uses_media_sentinel() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp4"), b"clip").unwrap();
        write_png(&dir.path().join("b.png"), 8, 8);
        let content = folder_thumbnail(dir.path()).await;
        assert_eq!(content.thumbnail().thumbnail_type(), Some(ThumbnailType::Media));
    }

    #[tokio::test]
    async fn test_direct_images_win_over_nested_books() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a").join("clip.mp4"), b"clip").unwrap();
        write_png(&dir.path().join("z.png"), 8, 8);
        let content = folder_thumbnail(dir.path()).await;
        assert!(content.thumbnail().is_unique_image());
    }

    #[tokio::test]
    async fn test_load_content_is_thumbnail() {
        let dir = tempdir().unwrap();
        let context = test_context(ContentConfig::default(), Arc::new(ImageDecoder));
        let content = PageContent::for_entry(0, FileEntry::new(dir.path()).unwrap(), &context);
        content.load_content(&CancellationToken::new()).await.unwrap();
        assert!(content.is_loaded());
        assert!(content.thumbnail().is_empty_image());
        assert!(content.message().is_none());
    }

    #[test]
    fn test_search_range_limits_depth() {
        let dir = tempdir().unwrap();
        nested_book(dir.path(), 3);
        let book = FileEntry::new(dir.path()).unwrap();
        assert!(search(book.as_ref(), 1, 2).unwrap().is_none());
        assert!(matches!(search(book.as_ref(), 1, 3).unwrap(), Some(Found::Image(_))));
    }
}
