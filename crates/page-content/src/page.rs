use crate::archive::ArchiveEntry;
use crate::content::{PageContent, PageContentState};
use crate::context::ContentContext;
use crate::error::{ContentError, Result};
use crate::job::{JobPriority, JobRequestHandle, JobRequestOptions, PageJob, PageJobCommand};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thumbnail_cache::Thumbnail;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One viewable unit of a book
pub struct Page {
    index: usize,
    entry: Arc<dyn ArchiveEntry>,
    content: RwLock<Arc<PageContent>>,
    visible: AtomicBool,
    pagemark: AtomicBool,
    jobs: Mutex<HashMap<PageJobCommand, Arc<PageJob>>>,
    context: Weak<ContentContext>,
    this: Weak<Page>,
}

impl Page {
    pub fn new(index: usize, entry: Arc<dyn ArchiveEntry>, context: &Arc<ContentContext>) -> Arc<Self> {
        let content = PageContent::for_entry(index, Arc::clone(&entry), context);
        Self::with_content(index, entry, content, context)
    }

    /// A page around an already built content
    pub fn with_content(
        index: usize,
        entry: Arc<dyn ArchiveEntry>,
        content: Arc<PageContent>,
        context: &Arc<ContentContext>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            index,
            entry,
            content: RwLock::new(content),
            visible: AtomicBool::new(false),
            pagemark: AtomicBool::new(false),
            jobs: Mutex::new(HashMap::new()),
            context: Arc::downgrade(context),
            this: this.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn entry(&self) -> &Arc<dyn ArchiveEntry> {
        &self.entry
    }

    pub fn content(&self) -> Arc<PageContent> {
        Arc::clone(&self.content.read())
    }

    pub fn thumbnail(&self) -> Arc<Thumbnail> {
        Arc::clone(self.content.read().thumbnail())
    }

    pub async fn load_content(&self, token: &CancellationToken) -> Result<()> {
        self.content().load_content(token).await
    }

    pub async fn load_thumbnail(&self, token: &CancellationToken) -> Result<()> {
        self.content().load_thumbnail(token).await
    }

    pub fn unload(&self) {
        self.content().unload_content();
    }

    pub fn content_memory_size(&self) -> usize {
        self.content().content_memory_size()
    }

    pub fn state(&self) -> PageContentState {
        self.content().state()
    }

    pub fn request_state(&self, state: PageContentState) -> PageContentState {
        self.content().request_state(state)
    }

    pub fn set_state(&self, state: PageContentState) {
        self.content().set_state(state);
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    pub fn is_pagemarked(&self) -> bool {
        self.pagemark.load(Ordering::Relaxed)
    }

    pub fn set_pagemark(&self, pagemark: bool) {
        self.pagemark.store(pagemark, Ordering::Relaxed);
    }

    /// The job wrapper for `command`, created on first use
    pub fn job(&self, command: PageJobCommand) -> Result<Arc<PageJob>> {
        let context = self.context.upgrade().ok_or(ContentError::Closed)?;
        let mut jobs = self.jobs.lock();
        let job = jobs.entry(command).or_insert_with(|| {
            Arc::new(PageJob::new(
                self.this.clone(),
                command,
                Arc::clone(context.job_engine()),
            ))
        });
        Ok(Arc::clone(job))
    }

    /// Schedule a content load, collapsing with any outstanding one
    pub fn request_content(&self, priority: JobPriority, options: JobRequestOptions) -> Result<JobRequestHandle> {
        Ok(self.job(PageJobCommand::Content)?.request(priority, options))
    }

    pub fn request_thumbnail(&self, priority: JobPriority, options: JobRequestOptions) -> Result<JobRequestHandle> {
        Ok(self.job(PageJobCommand::Thumbnail)?.request(priority, options))
    }

    /// Cancel any outstanding jobs of this page
    pub fn cancel_jobs(&self) {
        for job in self.jobs.lock().values() {
            job.cancel();
        }
    }

    /// Replace the content with a fresh one built from the entry
    pub fn reset(&self) -> Result<()> {
        let context = self.context.upgrade().ok_or(ContentError::Closed)?;
        self.cancel_jobs();
        let fresh = PageContent::for_entry(self.index, Arc::clone(&self.entry), &context);
        let old = std::mem::replace(&mut *self.content.write(), fresh);
        old.unload_content();
        debug!(index = self.index, "page reset");
        Ok(())
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("entry", &self.entry.entry_name())
            .field("content", &*self.content.read())
            .field("visible", &self.is_visible())
            .field("pagemark", &self.is_pagemarked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileEntry;
    use crate::config::ContentConfig;
    use crate::job::{JobStatus, PriorityJobEngine};
    use crate::picture::test_support::write_png;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_job_loads_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 20, 10);
        let context = ContentContext::builder(ContentConfig::default())
            .job_engine(Arc::new(PriorityJobEngine::new(1).unwrap()))
            .build()
            .unwrap();
        let page = Page::new(0, FileEntry::new(&path).unwrap(), &context);

        let first = page
            .request_content(JobPriority::Ahead, JobRequestOptions::default())
            .unwrap();
        let second = page
            .request_content(JobPriority::View, JobRequestOptions::default())
            .unwrap();
        assert!(first.same_request(&second));

        let status = tokio::time::timeout(Duration::from_secs(5), first.wait(&CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert!(page.content().is_loaded());
        assert_eq!(page.content_memory_size(), 20 * 10 * 3);

        page.job(PageJobCommand::Content)
            .unwrap()
            .wait(&CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 4, 4);
        let context = crate::context::test_support::test_context(
            ContentConfig::default(),
            Arc::new(crate::picture::ImageDecoder),
        );
        let page = Page::new(2, FileEntry::new(&path).unwrap(), &context);
        page.load_content(&CancellationToken::new()).await.unwrap();
        page.request_state(PageContentState::View);
        let before = page.content();

        let handle = page
            .request_content(JobPriority::View, JobRequestOptions::default())
            .unwrap();
        page.reset().unwrap();

        assert!(handle.is_cancelled());
        assert!(!Arc::ptr_eq(&before, &page.content()));
        assert!(!before.is_loaded());
        assert!(!page.content().is_loaded());
        assert_eq!(page.state(), PageContentState::None);
    }

    #[tokio::test]
    async fn test_flags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("001.png");
        write_png(&path, 4, 4);
        let context = crate::context::test_support::test_context(
            ContentConfig::default(),
            Arc::new(crate::picture::ImageDecoder),
        );
        let page = Page::new(0, FileEntry::new(&path).unwrap(), &context);
        page.set_visible(true);
        page.set_pagemark(true);
        assert!(page.is_visible() && page.is_pagemarked());

        drop(context);
        assert!(matches!(page.reset(), Err(ContentError::Closed)));
    }
}
