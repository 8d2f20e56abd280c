use super::request::{JobPriority, JobRequestHandle, JobStatus};
use crate::error::{ContentError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A unit of work run by a [`JobEngine`]
#[async_trait]
pub trait JobCommand: Send + Sync {
    async fn execute(&self, token: CancellationToken) -> Result<()>;

    fn name(&self) -> String {
        "job".to_string()
    }
}

/// Priority scheduler that runs [`JobCommand`]s
pub trait JobEngine: Send + Sync {
    fn add(&self, command: Arc<dyn JobCommand>, priority: JobPriority) -> JobRequestHandle;
}

struct QueuedJob {
    handle: JobRequestHandle,
    command: Arc<dyn JobCommand>,
}

struct Shared {
    queue: Mutex<Vec<QueuedJob>>,
    notify: Notify,
    paused: AtomicBool,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl Shared {
    /// Take the queued job with the highest current priority, oldest first
    fn pop(&self) -> Option<QueuedJob> {
        let mut queue = self.queue.lock();
        queue.retain(|job| !job.handle.is_cancelled());

        let mut best: Option<(usize, JobPriority)> = None;
        for (i, job) in queue.iter().enumerate() {
            let priority = job.handle.priority();
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((i, priority));
            }
        }
        best.map(|(i, _)| queue.remove(i))
    }
}

/// Tokio worker pool dequeuing by mutable priority
pub struct PriorityJobEngine {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl PriorityJobEngine {
    /// Start `workers` workers on the current tokio runtime
    pub fn new(workers: usize) -> Result<Self> {
        Self::start(workers, false)
    }

    /// Start with dequeuing suspended until [`PriorityJobEngine::resume`]
    pub fn paused(workers: usize) -> Result<Self> {
        Self::start(workers, true)
    }

    fn start(workers: usize, paused: bool) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ContentError::Other(anyhow::anyhow!("job engine needs a tokio runtime: {e}")))?;
        let shared = Arc::new(Shared {
            queue: Mutex::new(Vec::new()),
            notify: Notify::new(),
            paused: AtomicBool::new(paused),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        });

        let workers = (0..workers.max(1))
            .map(|worker| runtime.spawn(run_worker(worker, Arc::clone(&shared))))
            .collect();
        debug!(paused, "job engine started");
        Ok(Self { shared, workers })
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl JobEngine for PriorityJobEngine {
    fn add(&self, command: Arc<dyn JobCommand>, priority: JobPriority) -> JobRequestHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = JobRequestHandle::new(id, priority);
        self.shared.queue.lock().push(QueuedJob {
            handle: handle.clone(),
            command,
        });
        self.shared.notify.notify_waiters();
        handle
    }
}

impl Drop for PriorityJobEngine {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        for job in self.shared.queue.lock().drain(..) {
            job.handle.cancel();
        }
    }
}

async fn run_worker(worker: usize, shared: Arc<Shared>) {
    loop {
        let job = loop {
            if shared.shutdown.is_cancelled() {
                return;
            }
            // Register before checking the queue so an add in between is not missed
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !shared.paused.load(Ordering::Acquire) {
                if let Some(job) = shared.pop() {
                    break job;
                }
            }
            tokio::select! {
                _ = shared.shutdown.cancelled() => return,
                _ = &mut notified => {}
            }
        };

        let handle = job.handle;
        if handle.is_cancelled() {
            continue;
        }
        handle.set_status(JobStatus::Running);
        let name = job.command.name();
        let token = handle.cancellation_token();

        let status = match job.command.execute(token.clone()).await {
            Ok(()) if token.is_cancelled() => JobStatus::Cancelled,
            Ok(()) => JobStatus::Completed,
            Err(e) if e.is_cancelled() => JobStatus::Cancelled,
            Err(e) => {
                warn!(worker, job = %name, error = %e, "job failed");
                JobStatus::Failed
            }
        };
        handle.set_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records the order commands ran in
    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl JobCommand for Record {
        async fn execute(&self, _token: CancellationToken) -> Result<()> {
            self.log.lock().push(self.label);
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl JobCommand for Fail {
        async fn execute(&self, _token: CancellationToken) -> Result<()> {
            Err(ContentError::Decode("broken".into()))
        }
    }

    fn record(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn JobCommand> {
        Arc::new(Record {
            label,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn test_runs_by_current_priority() {
        let engine = PriorityJobEngine::paused(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let background = engine.add(record("background", &log), JobPriority::Background);
        let first_ahead = engine.add(record("ahead-1", &log), JobPriority::Ahead);
        let second_ahead = engine.add(record("ahead-2", &log), JobPriority::Ahead);
        let raised = engine.add(record("raised", &log), JobPriority::Thumbnail);
        raised.change_priority(JobPriority::View);
        let cancelled = engine.add(record("cancelled", &log), JobPriority::View);
        cancelled.cancel();
        assert_eq!(engine.pending_count(), 5);

        engine.resume();
        let token = CancellationToken::new();
        for handle in [&background, &first_ahead, &second_ahead, &raised] {
            assert_eq!(handle.wait(&token).await.unwrap(), JobStatus::Completed);
        }
        assert_eq!(cancelled.status(), JobStatus::Cancelled);
        assert_eq!(*log.lock(), vec!["raised", "ahead-1", "ahead-2", "background"]);
    }

    #[tokio::test]
    async fn test_failed_job_status() {
        let engine = PriorityJobEngine::new(2).unwrap();
        let handle = engine.add(Arc::new(Fail), JobPriority::View);
        let status = tokio::time::timeout(Duration::from_secs(5), handle.wait(&CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, JobStatus::Failed);
        assert_eq!(engine.worker_count(), 2);
    }

    #[test]
    fn test_requires_runtime() {
        assert!(PriorityJobEngine::new(1).is_err());
    }

    #[tokio::test]
    async fn test_drop_cancels_pending() {
        let engine = PriorityJobEngine::paused(1).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = engine.add(record("never", &log), JobPriority::View);
        drop(engine);
        assert_eq!(handle.status(), JobStatus::Cancelled);
        assert!(log.lock().is_empty());
    }
}
