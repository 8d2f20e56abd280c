use super::engine::{JobCommand, JobEngine};
use super::request::{JobPriority, JobRequestHandle};
use crate::error::Result;
use crate::page::Page;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// What a [`PageJob`] loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageJobCommand {
    Content,
    Thumbnail,
}

impl fmt::Display for PageJobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageJobCommand::Content => f.write_str("content"),
            PageJobCommand::Thumbnail => f.write_str("thumbnail"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobRequestOptions {
    /// Only a strictly higher priority may change an outstanding request.
    /// Every request already behaves this way, so the flag changes nothing.
    pub weak_priority: bool,
}

impl JobRequestOptions {
    pub fn weak() -> Self {
        Self {
            weak_priority: true,
        }
    }
}

struct PageJobRunner {
    page: Weak<Page>,
    command: PageJobCommand,
}

#[async_trait]
impl JobCommand for PageJobRunner {
    async fn execute(&self, token: CancellationToken) -> Result<()> {
        let Some(page) = self.page.upgrade() else {
            return Ok(());
        };
        match self.command {
            PageJobCommand::Content => page.load_content(&token).await,
            PageJobCommand::Thumbnail => page.load_thumbnail(&token).await,
        }
    }

    fn name(&self) -> String {
        match self.page.upgrade() {
            Some(page) => format!("page {} {}", page.index(), self.command),
            None => format!("page {}", self.command),
        }
    }
}

/// Collapses repeated requests for one (page, command) into one scheduled job
pub struct PageJob {
    page: Weak<Page>,
    command: PageJobCommand,
    engine: Arc<dyn JobEngine>,
    request: Mutex<Option<JobRequestHandle>>,
}

impl PageJob {
    pub fn new(page: Weak<Page>, command: PageJobCommand, engine: Arc<dyn JobEngine>) -> Self {
        Self {
            page,
            command,
            engine,
            request: Mutex::new(None),
        }
    }

    pub fn command(&self) -> PageJobCommand {
        self.command
    }

    /// Schedule the job, or raise the outstanding one to `priority`
    pub fn request(&self, priority: JobPriority, options: JobRequestOptions) -> JobRequestHandle {
        let mut request = self.request.lock();
        if let Some(handle) = request.as_ref() {
            if !handle.is_completed() {
                // Weak or not, an outstanding request is only ever raised
                let current = handle.priority();
                if priority > current {
                    trace!(command = %self.command, from = %current, to = %priority, weak = options.weak_priority, "job priority raised");
                    handle.change_priority(priority);
                }
                return handle.clone();
            }
        }

        let runner = Arc::new(PageJobRunner {
            page: self.page.clone(),
            command: self.command,
        });
        let handle = self.engine.add(runner, priority);
        *request = Some(handle.clone());
        handle
    }

    /// Cancel the outstanding request; the next request starts fresh
    pub fn cancel(&self) {
        if let Some(handle) = self.request.lock().take() {
            handle.cancel();
        }
    }

    pub fn current(&self) -> Option<JobRequestHandle> {
        self.request.lock().clone()
    }

    /// Wait for the outstanding request. Cancelling `token` ends only the wait.
    pub async fn wait(&self, token: &CancellationToken) -> Result<()> {
        let handle = self.request.lock().clone();
        if let Some(handle) = handle {
            handle.wait(token).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for PageJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageJob")
            .field("command", &self.command)
            .field("request", &*self.request.lock())
            .finish()
    }
}
