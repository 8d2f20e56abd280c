use crate::error::{ContentError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Scheduling priority, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobPriority {
    #[default]
    Background = 0,
    Thumbnail = 1,
    Ahead = 2,
    View = 3,
}

impl JobPriority {
    fn from_u8(value: u8) -> Self {
        match value {
            3 => JobPriority::View,
            2 => JobPriority::Ahead,
            1 => JobPriority::Thumbnail,
            _ => JobPriority::Background,
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPriority::Background => "background",
            JobPriority::Thumbnail => "thumbnail",
            JobPriority::Ahead => "ahead",
            JobPriority::View => "view",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed)
    }
}

struct RequestInner {
    id: u64,
    priority: AtomicU8,
    token: CancellationToken,
    status: watch::Sender<JobStatus>,
}

/// Shared handle to one scheduled job.
///
/// Consumers change its priority, cancel it, or wait for it; engines read the
/// current priority when dequeuing and report status transitions.
#[derive(Clone)]
pub struct JobRequestHandle {
    inner: Arc<RequestInner>,
}

impl JobRequestHandle {
    pub fn new(id: u64, priority: JobPriority) -> Self {
        let (status, _) = watch::channel(JobStatus::Pending);
        Self {
            inner: Arc::new(RequestInner {
                id,
                priority: AtomicU8::new(priority as u8),
                token: CancellationToken::new(),
                status,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn priority(&self) -> JobPriority {
        JobPriority::from_u8(self.inner.priority.load(Ordering::Acquire))
    }

    /// Only observed by the engine while the job is still queued
    pub fn change_priority(&self, priority: JobPriority) {
        self.inner.priority.store(priority as u8, Ordering::Release);
    }

    /// Cancel the job. A queued job never runs; a running one sees its token cancelled.
    pub fn cancel(&self) {
        self.inner.token.cancel();
        self.inner.status.send_if_modified(|status| {
            if *status == JobStatus::Pending {
                *status = JobStatus::Cancelled;
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn status(&self) -> JobStatus {
        *self.inner.status.borrow()
    }

    pub fn is_completed(&self) -> bool {
        self.status().is_finished()
    }

    /// Token handed to the running command
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Report a status transition; finished states are final
    pub fn set_status(&self, status: JobStatus) {
        self.inner.status.send_if_modified(|current| {
            if current.is_finished() || *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Wait until the job finishes. Cancelling `token` ends the wait, not the job.
    pub async fn wait(&self, token: &CancellationToken) -> Result<JobStatus> {
        let mut status = self.inner.status.subscribe();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ContentError::Cancelled),
            finished = status.wait_for(|s| s.is_finished()) => finished
                .map(|s| *s)
                .map_err(|_| ContentError::Closed),
        }
    }

    pub fn same_request(&self, other: &JobRequestHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for JobRequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequestHandle")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_priority_order() {
        assert!(JobPriority::View > JobPriority::Ahead);
        assert!(JobPriority::Ahead > JobPriority::Thumbnail);
        assert!(JobPriority::Thumbnail > JobPriority::Background);
    }

    #[test]
    fn test_cancel_pending() {
        let handle = JobRequestHandle::new(1, JobPriority::Ahead);
        handle.change_priority(JobPriority::View);
        assert_eq!(handle.priority(), JobPriority::View);

        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.status(), JobStatus::Cancelled);
        assert!(handle.is_completed());

        // Finished states are final
        handle.set_status(JobStatus::Running);
        assert_eq!(handle.status(), JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_cancel_does_not_cancel_job() {
        let handle = JobRequestHandle::new(1, JobPriority::View);
        let waiter = CancellationToken::new();
        let cancel = waiter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let err = handle.wait(&waiter).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!handle.is_cancelled());
        assert_eq!(handle.status(), JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_wait_sees_completion() {
        let handle = JobRequestHandle::new(7, JobPriority::Thumbnail);
        let worker = handle.clone();
        tokio::spawn(async move {
            worker.set_status(JobStatus::Running);
            worker.set_status(JobStatus::Completed);
        });
        let status = handle.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
    }
}
