use super::{ContentLoader, LoadScope};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thumbnail_cache::{Thumbnail, ThumbnailType};
use tokio_util::sync::CancellationToken;

/// Content that is nothing but a named thumbnail
pub(crate) struct ConstLoader {
    thumbnail_type: ThumbnailType,
    thumbnail: Arc<Thumbnail>,
}

impl ConstLoader {
    pub(crate) fn new(thumbnail_type: ThumbnailType, thumbnail: Arc<Thumbnail>) -> Self {
        Self {
            thumbnail_type,
            thumbnail,
        }
    }
}

#[async_trait]
impl ContentLoader for ConstLoader {
    fn is_loaded(&self) -> bool {
        self.thumbnail.is_valid()
    }

    async fn load_content(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()> {
        self.load_thumbnail(scope, token).await
    }

    async fn load_thumbnail(&self, _scope: &LoadScope, _token: &CancellationToken) -> Result<()> {
        self.thumbnail.initialize_type(self.thumbnail_type);
        Ok(())
    }

    fn unload_content(&self) {}
}

/// Placeholder page; its message is the whole payload
pub(crate) struct FileLoader;

#[async_trait]
impl ContentLoader for FileLoader {
    fn is_loaded(&self) -> bool {
        false
    }

    async fn load_content(&self, _scope: &LoadScope, _token: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn load_thumbnail(&self, _scope: &LoadScope, _token: &CancellationToken) -> Result<()> {
        Ok(())
    }

    fn unload_content(&self) {}
}

#[cfg(test)]
mod tests {
    use crate::config::ContentConfig;
    use crate::content::{ContentKind, MessageIcon, PageContent, PageMessage};
    use crate::context::test_support::test_context;
    use crate::picture::ImageDecoder;
    use std::sync::Arc;
    use thumbnail_cache::ThumbnailType;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_const_only_carries_its_type() {
        let context = test_context(ContentConfig::default(), Arc::new(ImageDecoder));
        let content = PageContent::constant(0, None, ThumbnailType::Folder, &context);
        assert_eq!(content.kind(), ContentKind::Const);
        assert!(!content.is_loaded());

        content.load_content(&CancellationToken::new()).await.unwrap();
        assert!(content.is_loaded());
        assert_eq!(content.thumbnail().thumbnail_type(), Some(ThumbnailType::Folder));
        assert!(content.thumbnail().bitmap().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_placeholder_is_loaded_by_message() {
        let context = test_context(ContentConfig::default(), Arc::new(ImageDecoder));
        let content = PageContent::file(
            4,
            None,
            PageMessage::new(MessageIcon::Warning, "missing"),
            &context,
        );
        let token = CancellationToken::new();
        content.load_content(&token).await.unwrap();
        content.load_thumbnail(&token).await.unwrap();
        assert!(content.is_loaded());
        assert_eq!(content.message().unwrap().text, "missing");
        assert_eq!(content.content_memory_size(), 0);
    }
}
