//! Transfer queue — manages multiple queued uploads/downloads with
//! bounded concurrency, whole-item retry, cancellation, and progress
//! bookkeeping.
//!
//! The queue owns all of its mutable state: task ids come from an
//! atomic counter and live progress sits in an instance-held map fed
//! by the engine's progress callback.

use crate::ftp::client::FtpClient;
use crate::ftp::error::FtpResult;
use crate::ftp::types::*;
use chrono::Utc;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, Semaphore};

/// The transfer queue holding items and configuration.
pub struct TransferQueue {
    items: HashMap<u64, TransferItem>,
    order: VecDeque<u64>,
    config: TransferQueueConfig,
    semaphore: Arc<Semaphore>,
    /// Live per-item progress, written from the engine callback.
    progress: Arc<StdMutex<HashMap<u64, TransferProgress>>>,
    /// Task id source for this queue.
    next_id: AtomicU64,
}

impl TransferQueue {
    pub fn new(config: TransferQueueConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            items: HashMap::new(),
            order: VecDeque::new(),
            config,
            semaphore,
            progress: Arc::new(StdMutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue a new transfer and return its id.
    pub fn enqueue(
        &mut self,
        direction: TransferDirection,
        local_path: &str,
        remote_path: &str,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let item = TransferItem {
            id,
            direction,
            local_path: local_path.to_string(),
            remote_path: remote_path.to_string(),
            state: TransferState::Queued,
            total_bytes: -1,
            transferred_bytes: 0,
            error: None,
            retry_count: 0,
            max_retries: self.config.default_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.items.insert(id, item);
        self.order.push_back(id);
        id
    }

    /// Cancel a queued or in-progress transfer.
    pub fn cancel(&mut self, id: u64) -> bool {
        match self.items.get_mut(&id) {
            Some(item)
                if matches!(
                    item.state,
                    TransferState::Queued | TransferState::InProgress | TransferState::Retrying
                ) =>
            {
                item.state = TransferState::Cancelled;
                item.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Cancel everything still pending or running.
    pub fn cancel_all(&mut self) {
        for item in self.items.values_mut() {
            if matches!(
                item.state,
                TransferState::Queued | TransferState::InProgress | TransferState::Retrying
            ) {
                item.state = TransferState::Cancelled;
                item.completed_at = Some(Utc::now());
            }
        }
    }

    /// Remove finished items older than `max_age_secs`.
    pub fn prune(&mut self, max_age_secs: i64) {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_age_secs);
        let stale: Vec<u64> = self
            .items
            .iter()
            .filter(|(_, item)| {
                matches!(
                    item.state,
                    TransferState::Completed | TransferState::Cancelled | TransferState::Failed
                ) && item.completed_at.map(|t| t < cutoff).unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.items.remove(id);
            self.order.retain(|x| x != id);
            if let Ok(mut map) = self.progress.lock() {
                map.remove(id);
            }
        }
    }

    /// Pop the next item that is still queued.
    pub fn next_pending(&mut self) -> Option<u64> {
        while let Some(id) = self.order.pop_front() {
            if let Some(item) = self.items.get(&id) {
                if item.state == TransferState::Queued {
                    return Some(id);
                }
            }
        }
        None
    }

    pub fn get(&self, id: u64) -> Option<&TransferItem> {
        self.items.get(&id)
    }

    pub fn list(&self) -> Vec<&TransferItem> {
        self.items.values().collect()
    }

    /// Latest progress snapshot for an item.
    pub fn get_progress(&self, id: u64) -> Option<TransferProgress> {
        self.progress.lock().ok().and_then(|m| m.get(&id).copied())
    }

    /// Callback handed to the engine; records per-chunk progress into
    /// the queue's own registry.
    pub fn progress_sink(&self, id: u64) -> impl FnMut(TransferProgress) + Send + 'static {
        let map = self.progress.clone();
        move |p| {
            if let Ok(mut m) = map.lock() {
                m.insert(id, p);
            }
        }
    }

    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }

    // ─── State transitions ───────────────────────────────────────

    pub fn mark_started(&mut self, id: u64) {
        if let Some(item) = self.items.get_mut(&id) {
            item.state = TransferState::InProgress;
            item.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self, id: u64, transferred: u64) {
        if let Some(item) = self.items.get_mut(&id) {
            item.state = TransferState::Completed;
            item.transferred_bytes = transferred;
            item.completed_at = Some(Utc::now());
        }
    }

    pub fn mark_failed(&mut self, id: u64, error: &str) {
        if let Some(item) = self.items.get_mut(&id) {
            item.state = TransferState::Failed;
            item.error = Some(error.to_string());
            item.completed_at = Some(Utc::now());
        }
    }

    /// Put a failed item back at the end of the queue for another try.
    pub fn requeue(&mut self, id: u64, error: &str) {
        if let Some(item) = self.items.get_mut(&id) {
            item.state = TransferState::Queued;
            item.error = Some(error.to_string());
            item.retry_count += 1;
            item.started_at = None;
            self.order.push_back(id);
        }
    }
}

impl Default for TransferQueue {
    fn default() -> Self {
        Self::new(TransferQueueConfig::default())
    }
}

/// Process the next pending item over the shared session.
/// Returns `false` when the queue has nothing left to do.
pub async fn process_next(
    queue: &Arc<Mutex<TransferQueue>>,
    client: &Arc<Mutex<FtpClient>>,
) -> bool {
    let (id, direction, local, remote, sink, sem) = {
        let mut q = queue.lock().await;
        let id = match q.next_pending() {
            Some(id) => id,
            None => return false,
        };
        q.mark_started(id);
        let item = match q.get(id) {
            Some(i) => i,
            None => return false,
        };
        (
            id,
            item.direction,
            item.local_path.clone(),
            item.remote_path.clone(),
            q.progress_sink(id),
            q.semaphore(),
        )
    };

    let permit = match sem.acquire_owned().await {
        Ok(p) => p,
        Err(_) => {
            queue.lock().await.mark_failed(id, "queue shut down");
            return true;
        }
    };

    let result: FtpResult<u64> = {
        let mut c = client.lock().await;
        match direction {
            TransferDirection::Download => c.download(&remote, &local, sink).await,
            TransferDirection::Upload => c.upload(&local, &remote, sink).await,
        }
    };
    drop(permit);

    let mut q = queue.lock().await;
    match result {
        Ok(transferred) => {
            debug!("transfer {} completed ({} bytes)", id, transferred);
            q.mark_completed(id, transferred);
        }
        Err(e) => {
            // an item cancelled while in flight keeps its state
            match q.get(id).map(|i| (i.state.clone(), i.retry_count < i.max_retries)) {
                Some((TransferState::Cancelled, _)) => {}
                Some((_, true)) => q.requeue(id, &e.to_string()),
                _ => q.mark_failed(id, &e.to_string()),
            }
        }
    }
    true
}

/// Drain the whole queue over one session.
pub async fn drain_queue(queue: Arc<Mutex<TransferQueue>>, client: Arc<Mutex<FtpClient>>) {
    while process_next(&queue, &client).await {}
}
