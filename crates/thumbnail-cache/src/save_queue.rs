//! Bounded background queue for thumbnail persistence
//!
//! Saves are handed to a dedicated thread through a bounded channel. A full
//! queue is reported to the caller instead of blocking the decode path, and
//! consecutive saves are written in one transaction.

use crate::cache::CacheCounters;
use crate::header::ThumbnailCacheHeader;
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use thumbnail_db::ThumbnailDb;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SaveError {
    #[error("thumbnail save queue is full")]
    QueueFull,
    #[error("thumbnail save queue is closed")]
    Closed,
}

enum SaveMessage {
    Save(ThumbnailCacheHeader, Arc<[u8]>),
    Flush(mpsc::Sender<()>),
}

pub(crate) struct SaveQueue {
    tx: Option<SyncSender<SaveMessage>>,
    worker: Option<thread::JoinHandle<()>>,
    counters: Arc<CacheCounters>,
}

impl SaveQueue {
    pub(crate) fn spawn(
        store: Arc<Mutex<ThumbnailDb>>,
        counters: Arc<CacheCounters>,
        capacity: usize,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new()
            .name("thumbnail-save".to_string())
            .spawn(move || run_worker(rx, store, worker_counters))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            counters,
        })
    }

    pub(crate) fn push(&self, header: ThumbnailCacheHeader, data: Arc<[u8]>) -> Result<(), SaveError> {
        let tx = self.tx.as_ref().ok_or(SaveError::Closed)?;
        match tx.try_send(SaveMessage::Save(header, data)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(SaveError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(SaveError::Closed),
        }
    }

    /// Block until every save queued before this call has been written
    pub(crate) fn flush(&self) -> Result<(), SaveError> {
        let tx = self.tx.as_ref().ok_or(SaveError::Closed)?;
        let (ack_tx, ack_rx) = mpsc::channel();
        tx.send(SaveMessage::Flush(ack_tx))
            .map_err(|_| SaveError::Closed)?;
        ack_rx.recv().map_err(|_| SaveError::Closed)
    }
}

impl Drop for SaveQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is left and exit
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(rx: Receiver<SaveMessage>, store: Arc<Mutex<ThumbnailDb>>, counters: Arc<CacheCounters>) {
    debug!("thumbnail save worker started");
    while let Ok(message) = rx.recv() {
        let mut batch = Vec::new();
        let mut pending_flush = None;
        match message {
            SaveMessage::Save(header, data) => batch.push((header, data)),
            SaveMessage::Flush(ack) => pending_flush = Some(ack),
        }

        // Drain whatever else is already queued, stopping at a flush marker
        while pending_flush.is_none() {
            match rx.try_recv() {
                Ok(SaveMessage::Save(header, data)) => batch.push((header, data)),
                Ok(SaveMessage::Flush(ack)) => pending_flush = Some(ack),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if !batch.is_empty() {
            write_batch(&store, &counters, batch);
        }
        if let Some(ack) = pending_flush {
            let _ = ack.send(());
        }
    }
    debug!("thumbnail save worker stopped");
}

fn write_batch(
    store: &Mutex<ThumbnailDb>,
    counters: &CacheCounters,
    batch: Vec<(ThumbnailCacheHeader, Arc<[u8]>)>,
) {
    let count = batch.len() as u64;
    let items: Vec<(String, Vec<u8>)> = batch
        .into_iter()
        .map(|(header, data)| (header.key().to_string(), data.to_vec()))
        .collect();

    match store.lock().save_batch(&items) {
        Ok(()) => {
            counters.saved.fetch_add(count, Ordering::Relaxed);
        }
        Err(e) => {
            warn!(count, error = %e, "failed to save thumbnails");
            counters.save_failures.fetch_add(count, Ordering::Relaxed);
        }
    }
}
