//! PgRollupQueue: rollup jobs in the `rollup_jobs` table.
//!
//! `claim` locks with `FOR UPDATE SKIP LOCKED`, so concurrent workers never
//! take the same job.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use rollup_common::WorkItemId;

use crate::queue::{RollupJob, RollupQueue};

#[derive(Clone)]
pub struct PgRollupQueue {
    pool: PgPool,
    retry_backoff: Duration,
}

impl PgRollupQueue {
    /// `retry_backoff` is multiplied by the attempt count to delay a retry.
    pub fn new(pool: PgPool, retry_backoff: Duration) -> Self {
        Self { pool, retry_backoff }
    }

    /// Hand jobs left `running` by a dead worker back to the queue.
    pub async fn release_stale(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE rollup_jobs
            SET status = 'pending', updated_at = now()
            WHERE status = 'running'
              AND updated_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;

        let released = result.rows_affected();
        if released > 0 {
            warn!(released, "Released stale rollup jobs");
        }
        Ok(released)
    }
}

#[async_trait]
impl RollupQueue for PgRollupQueue {
    async fn enqueue(&self, work_item_ids: Vec<WorkItemId>) -> Result<()> {
        sqlx::query("INSERT INTO rollup_jobs (work_item_ids) VALUES ($1)")
            .bind(&work_item_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim(&self) -> Result<Option<RollupJob>> {
        let row = sqlx::query_as::<_, (i64, Vec<i64>, i32)>(
            r#"
            UPDATE rollup_jobs
            SET status = 'running', attempts = attempts + 1, updated_at = now()
            WHERE id = (
                SELECT id
                FROM rollup_jobs
                WHERE status = 'pending' AND run_after <= now()
                ORDER BY run_after, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, work_item_ids, attempts
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, work_item_ids, attempts)| RollupJob {
            id,
            work_item_ids,
            attempts,
        }))
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM rollup_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, job_id: i64, error: &str, retry: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rollup_jobs
            SET status = CASE WHEN $3 THEN 'pending' ELSE 'dead' END,
                run_after = now() + make_interval(secs => attempts * $4),
                last_error = $2,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(retry)
        .bind(self.retry_backoff.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
