//! Asynchronous rollup jobs: the hop that carries a cascade one level up.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rollup_common::WorkItemId;

/// A claimed unit of work. `attempts` counts this attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupJob {
    pub id: i64,
    pub work_item_ids: Vec<WorkItemId>,
    pub attempts: i32,
}

/// Trait boundary for the job queue.
///
/// Delivery is at-least-once: a job that fails or whose worker dies is handed
/// out again, which is safe because a rollup pass is idempotent.
#[async_trait]
pub trait RollupQueue: Send + Sync {
    async fn enqueue(&self, work_item_ids: Vec<WorkItemId>) -> Result<()>;

    /// Take the next runnable job, if any.
    async fn claim(&self) -> Result<Option<RollupJob>>;

    async fn complete(&self, job_id: i64) -> Result<()>;

    /// Record a failed attempt. With `retry` the job becomes runnable again,
    /// otherwise it is dead-lettered.
    async fn fail(&self, job_id: i64, error: &str, retry: bool) -> Result<()>;
}

#[async_trait]
impl<Q: RollupQueue + ?Sized> RollupQueue for Arc<Q> {
    async fn enqueue(&self, work_item_ids: Vec<WorkItemId>) -> Result<()> {
        (**self).enqueue(work_item_ids).await
    }

    async fn claim(&self) -> Result<Option<RollupJob>> {
        (**self).claim().await
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        (**self).complete(job_id).await
    }

    async fn fail(&self, job_id: i64, error: &str, retry: bool) -> Result<()> {
        (**self).fail(job_id, error, retry).await
    }
}

// ---------------------------------------------------------------------------
// MemoryRollupQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    pending: VecDeque<RollupJob>,
    running: HashMap<i64, RollupJob>,
    dead: Vec<(RollupJob, String)>,
    enqueued: Vec<Vec<WorkItemId>>,
}

/// FIFO queue in a mutex. Records every `enqueue()` call for test assertions.
/// Retries are immediately runnable.
#[derive(Debug, Default)]
pub struct MemoryRollupQueue {
    state: Mutex<QueueState>,
}

impl MemoryRollupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every node set ever enqueued, in order.
    pub fn enqueued(&self) -> Vec<Vec<WorkItemId>> {
        self.lock().enqueued.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Dead-lettered jobs with their last error.
    pub fn dead(&self) -> Vec<(RollupJob, String)> {
        self.lock().dead.clone()
    }
}

#[async_trait]
impl RollupQueue for MemoryRollupQueue {
    async fn enqueue(&self, work_item_ids: Vec<WorkItemId>) -> Result<()> {
        let mut state = self.lock();
        state.next_id += 1;
        let job = RollupJob {
            id: state.next_id,
            work_item_ids: work_item_ids.clone(),
            attempts: 0,
        };
        state.enqueued.push(work_item_ids);
        state.pending.push_back(job);
        Ok(())
    }

    async fn claim(&self) -> Result<Option<RollupJob>> {
        let mut state = self.lock();
        let Some(mut job) = state.pending.pop_front() else {
            return Ok(None);
        };
        job.attempts += 1;
        state.running.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        self.lock()
            .running
            .remove(&job_id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("rollup job {job_id} is not running"))
    }

    async fn fail(&self, job_id: i64, error: &str, retry: bool) -> Result<()> {
        let mut state = self.lock();
        let job = state
            .running
            .remove(&job_id)
            .ok_or_else(|| anyhow!("rollup job {job_id} is not running"))?;
        if retry {
            state.pending.push_back(job);
        } else {
            state.dead.push((job, error.to_string()));
        }
        Ok(())
    }
}
