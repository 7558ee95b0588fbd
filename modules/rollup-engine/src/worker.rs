//! Job worker: claims rollup jobs and runs them through the update service.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use rollup_common::{RollupError, WorkerConfig};
use rollup_store::RollupQueue;

use crate::service::{RollupSummary, RollupUpdateService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Nothing was runnable.
    Idle,
    Completed { job_id: i64, summary: RollupSummary },
    Retrying { job_id: i64, attempts: i32 },
    DeadLettered { job_id: i64, attempts: i32 },
}

pub struct RollupWorker {
    queue: Arc<dyn RollupQueue>,
    service: Arc<RollupUpdateService>,
    config: WorkerConfig,
}

impl RollupWorker {
    /// Consumes the queue the service cascades into, so one worker carries a
    /// cascade all the way to the root.
    pub fn new(service: Arc<RollupUpdateService>, config: WorkerConfig) -> Self {
        Self {
            queue: service.queue().clone(),
            service,
            config,
        }
    }

    /// Claim and run at most one job.
    pub async fn run_once(&self) -> Result<JobOutcome> {
        let Some(job) = self.queue.claim().await? else {
            return Ok(JobOutcome::Idle);
        };

        match self.service.execute(&job.work_item_ids).await {
            Ok(summary) => {
                self.queue.complete(job.id).await?;
                Ok(JobOutcome::Completed { job_id: job.id, summary })
            }
            Err(e) => {
                let last_error = format!("{e:#}");
                if job.attempts < self.config.max_attempts {
                    warn!(job_id = job.id, attempts = job.attempts, error = %last_error, "Rollup job failed, will retry");
                    self.queue.fail(job.id, &last_error, true).await?;
                    Ok(JobOutcome::Retrying {
                        job_id: job.id,
                        attempts: job.attempts,
                    })
                } else {
                    let exhausted = RollupError::JobExhausted {
                        job_id: job.id,
                        attempts: job.attempts,
                        last_error: last_error.clone(),
                    };
                    warn!(job_id = job.id, error = %exhausted, "Rollup job dead-lettered");
                    self.queue.fail(job.id, &last_error, false).await?;
                    Ok(JobOutcome::DeadLettered {
                        job_id: job.id,
                        attempts: job.attempts,
                    })
                }
            }
        }
    }

    /// Run jobs until the queue is idle or `limit` jobs have been handled.
    /// Returns the number of jobs handled.
    pub async fn drain(&self, limit: usize) -> Result<usize> {
        let mut handled = 0;
        while handled < limit {
            if self.run_once().await? == JobOutcome::Idle {
                break;
            }
            handled += 1;
        }
        Ok(handled)
    }

    /// Poll the queue until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            max_attempts = self.config.max_attempts,
            poll_interval = ?self.config.poll_interval,
            "Rollup worker started"
        );

        while !*shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(outcome) => outcome == JobOutcome::Idle,
                Err(e) => {
                    error!(error = %e, "Rollup worker iteration failed");
                    true
                }
            };
            if !idle {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Rollup worker stopped");
        Ok(())
    }
}
