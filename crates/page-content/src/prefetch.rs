//! View-centred prefetch of page content
//!
//! Given the pages on screen, requests them at view priority and then expands
//! outward, alternating before and after the viewport, at ahead priority.
//! Pages that fall out of range on the next move are released and their
//! outstanding jobs cancelled, so work follows the reader.

use crate::content::PageContentState;
use crate::context::ContentContext;
use crate::error::Result;
use crate::job::{JobPriority, JobRequestHandle, JobRequestOptions, JobStatus};
use crate::page::Page;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Pages to request around a viewport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchPlan {
    pub viewport_start: usize,
    pub viewport_end: usize,
    /// `(index, in_viewport)`, most urgent first
    pub order: Vec<(usize, bool)>,
}

impl PrefetchPlan {
    /// Plan `ahead` pages on each side of `viewport_start..viewport_start + viewport_size`
    pub fn new(page_count: usize, viewport_start: usize, viewport_size: usize, ahead: usize) -> Self {
        let viewport_start = viewport_start.min(page_count);
        let viewport_end = viewport_start.saturating_add(viewport_size).min(page_count);

        let mut order: Vec<(usize, bool)> = (viewport_start..viewport_end).map(|i| (i, true)).collect();

        // Interleave before/after to expand outward from the viewport
        let mut before = (viewport_start.saturating_sub(ahead)..viewport_start).rev();
        let mut after = viewport_end..viewport_end.saturating_add(ahead).min(page_count);
        loop {
            let mut added = false;
            if let Some(index) = after.next() {
                order.push((index, false));
                added = true;
            }
            if let Some(index) = before.next() {
                order.push((index, false));
                added = true;
            }
            if !added {
                break;
            }
        }

        Self {
            viewport_start,
            viewport_end,
            order,
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().map(|(index, _)| *index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.order.iter().any(|(i, _)| *i == index)
    }
}

/// Progress of the requests issued for the current plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrefetchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub viewport_total: usize,
    pub viewport_completed: usize,
}

impl PrefetchProgress {
    pub fn completion_percentage(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.completed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn viewport_completion_percentage(&self) -> f64 {
        if self.viewport_total == 0 {
            100.0
        } else {
            (self.viewport_completed as f64 / self.viewport_total as f64) * 100.0
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completed + self.failed >= self.total
    }
}

struct Requested {
    index: usize,
    in_viewport: bool,
    handle: JobRequestHandle,
}

/// Issues content requests for a book's pages as the view moves
pub struct Prefetcher {
    pages: Vec<Arc<Page>>,
    context: Arc<ContentContext>,
    ahead: usize,
    requested: Mutex<Vec<Requested>>,
}

impl Prefetcher {
    pub fn new(pages: Vec<Arc<Page>>, context: Arc<ContentContext>, ahead: usize) -> Self {
        Self {
            pages,
            context,
            ahead,
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn pages(&self) -> &[Arc<Page>] {
        &self.pages
    }

    /// Move the view to `viewport_start..viewport_start + viewport_size`
    pub fn view(&self, viewport_start: usize, viewport_size: usize) -> Result<PrefetchPlan> {
        let plan = PrefetchPlan::new(self.pages.len(), viewport_start, viewport_size, self.ahead);
        self.context.content_pool().set_reference_index(plan.viewport_start);

        let mut requested = self.requested.lock();
        let planned: HashSet<usize> = plan.indices().collect();
        for old in requested.drain(..) {
            if !planned.contains(&old.index) {
                let page = &self.pages[old.index];
                page.set_state(PageContentState::None);
                page.cancel_jobs();
            }
        }

        for &(index, in_viewport) in &plan.order {
            let page = &self.pages[index];
            let (state, priority) = if in_viewport {
                (PageContentState::View, JobPriority::View)
            } else {
                (PageContentState::Ahead, JobPriority::Ahead)
            };
            // The previous plan's state may be higher; this one decides
            page.set_state(state);
            let handle = page.request_content(priority, JobRequestOptions::default())?;
            requested.push(Requested {
                index,
                in_viewport,
                handle,
            });
        }
        debug!(
            start = plan.viewport_start,
            end = plan.viewport_end,
            requested = requested.len(),
            "prefetch planned"
        );
        Ok(plan)
    }

    /// Request thumbnails for every page, nearest the viewport first
    pub fn request_thumbnails(&self, viewport_start: usize, viewport_size: usize) -> Result<Vec<JobRequestHandle>> {
        let plan = PrefetchPlan::new(self.pages.len(), viewport_start, viewport_size, self.pages.len());
        plan.order
            .iter()
            .map(|&(index, in_viewport)| {
                let priority = if in_viewport {
                    JobPriority::Thumbnail
                } else {
                    JobPriority::Background
                };
                self.pages[index].request_thumbnail(priority, JobRequestOptions::weak())
            })
            .collect()
    }

    pub fn progress(&self) -> PrefetchProgress {
        let requested = self.requested.lock();
        let mut progress = PrefetchProgress {
            total: requested.len(),
            ..Default::default()
        };
        for request in requested.iter() {
            if request.in_viewport {
                progress.viewport_total += 1;
            }
            match request.handle.status() {
                JobStatus::Completed => {
                    progress.completed += 1;
                    if request.in_viewport {
                        progress.viewport_completed += 1;
                    }
                }
                JobStatus::Failed | JobStatus::Cancelled => progress.failed += 1,
                JobStatus::Pending | JobStatus::Running => {}
            }
        }
        progress
    }

    /// Wait for the viewport pages of the current plan
    pub async fn wait_viewport(&self, token: &CancellationToken) -> Result<()> {
        let handles: Vec<JobRequestHandle> = self
            .requested
            .lock()
            .iter()
            .filter(|r| r.in_viewport)
            .map(|r| r.handle.clone())
            .collect();
        for handle in handles {
            handle.wait(token).await?;
        }
        Ok(())
    }

    /// Release every page and cancel outstanding requests
    pub fn cancel(&self) {
        for request in self.requested.lock().drain(..) {
            let page = &self.pages[request.index];
            page.set_state(PageContentState::None);
            page.cancel_jobs();
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::FileEntry;
    use crate::config::ContentConfig;
    use crate::context::test_support::test_context;
    use crate::picture::test_support::write_png;
    use crate::picture::ImageDecoder;
    use tempfile::tempdir;

    #[test]
    fn test_plan_expands_outward() {
        let plan = PrefetchPlan::new(10, 4, 2, 2);
        assert_eq!((plan.viewport_start, plan.viewport_end), (4, 6));
        assert_eq!(plan.indices().collect::<Vec<_>>(), vec![4, 5, 6, 3, 7, 2]);
        assert!(plan.order[..2].iter().all(|(_, in_viewport)| *in_viewport));
    }

    #[test]
    fn test_plan_clamps_to_book() {
        let plan = PrefetchPlan::new(3, 1, 10, 5);
        assert_eq!(plan.viewport_end, 3);
        assert_eq!(plan.indices().collect::<Vec<_>>(), vec![1, 2, 0]);

        let empty = PrefetchPlan::new(0, 4, 2, 2);
        assert!(empty.order.is_empty());
    }

    #[test]
    fn test_progress_calculations() {
        let progress = PrefetchProgress {
            total: 8,
            completed: 2,
            failed: 0,
            viewport_total: 2,
            viewport_completed: 1,
        };
        assert_eq!(progress.completion_percentage(), 25.0);
        assert_eq!(progress.viewport_completion_percentage(), 50.0);
        assert!(!progress.is_finished());
    }

    #[tokio::test]
    async fn test_moving_view_releases_pages() {
        let dir = tempdir().unwrap();
        let context = test_context(ContentConfig::default(), Arc::new(ImageDecoder));
        let pages: Vec<_> = (0..10)
            .map(|index| {
                let path = dir.path().join(format!("{index:03}.png"));
                write_png(&path, 4, 4);
                Page::new(index, FileEntry::new(&path).unwrap(), &context)
            })
            .collect();
        let prefetcher = Prefetcher::new(pages.clone(), Arc::clone(&context), 1);

        prefetcher.view(0, 1).unwrap();
        assert_eq!(pages[0].state(), PageContentState::View);
        assert_eq!(pages[1].state(), PageContentState::Ahead);
        let first = pages[1].job(crate::job::PageJobCommand::Content).unwrap().current().unwrap();

        prefetcher.view(5, 1).unwrap();
        assert_eq!(context.content_pool().reference_index(), 5);
        assert_eq!(pages[0].state(), PageContentState::None);
        assert_eq!(pages[1].state(), PageContentState::None);
        assert!(first.is_cancelled());
        assert_eq!(pages[5].state(), PageContentState::View);
        assert_eq!(pages[4].state(), PageContentState::Ahead);
        assert_eq!(pages[6].state(), PageContentState::Ahead);
        assert_eq!(prefetcher.progress().total, 3);
        assert_eq!(prefetcher.progress().viewport_total, 1);

        prefetcher.cancel();
        assert_eq!(pages[5].state(), PageContentState::None);
    }
}
