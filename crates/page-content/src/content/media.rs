use super::{run_blocking, ContentLoader, LoadScope};
use crate::archive::TempFile;
use crate::error::{ContentError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use thumbnail_cache::ThumbnailType;
use tokio_util::sync::CancellationToken;

/// Video and audio pages: never decoded, only extracted for external playback
pub(crate) struct MediaLoader {
    temp_file: Mutex<Option<Arc<TempFile>>>,
}

impl MediaLoader {
    pub(crate) fn new() -> Self {
        Self {
            temp_file: Mutex::new(None),
        }
    }

    pub(crate) fn temp_file_path(&self) -> Option<PathBuf> {
        self.temp_file
            .lock()
            .as_ref()
            .map(|file| file.path().to_path_buf())
    }
}

#[async_trait]
impl ContentLoader for MediaLoader {
    fn is_loaded(&self) -> bool {
        self.temp_file.lock().is_some()
    }

    async fn load_content(&self, scope: &LoadScope, token: &CancellationToken) -> Result<()> {
        let entry = Arc::clone(scope.entry()?);
        let keep_name = scope.config().keep_temp_file_name;
        let temp_file = run_blocking(token, move || -> Result<TempFile> {
            Ok(entry.extract_to_temp(keep_name)?)
        })
        .await?;

        if token.is_cancelled() {
            return Err(ContentError::Cancelled);
        }
        *self.temp_file.lock() = Some(Arc::new(temp_file));
        Ok(())
    }

    async fn load_thumbnail(&self, scope: &LoadScope, _token: &CancellationToken) -> Result<()> {
        scope.thumbnail.initialize_type(ThumbnailType::Media);
        Ok(())
    }

    fn unload_content(&self) {
        self.temp_file.lock().take();
    }
}
