//! RollupUpdateService: the only writer of derived DateSource fields.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use rollup_common::{RollupConfig, WorkItemId};
use rollup_store::{RollupQueue, RollupStore};

use crate::walker::HierarchyWalker;

/// What one `execute` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupSummary {
    pub batches: usize,
    /// DateSource rows written (fixed fields included, left untouched).
    pub updated: usize,
    /// Requested ids that no longer exist.
    pub skipped: Vec<WorkItemId>,
    /// Parents handed to the job queue, across all batches.
    pub cascaded: Vec<WorkItemId>,
}

pub struct RollupUpdateService {
    store: Arc<dyn RollupStore>,
    queue: Arc<dyn RollupQueue>,
    walker: HierarchyWalker,
    config: RollupConfig,
}

impl RollupUpdateService {
    pub fn new(store: Arc<dyn RollupStore>, queue: Arc<dyn RollupQueue>, config: RollupConfig) -> Self {
        Self {
            walker: HierarchyWalker::new(store.clone()),
            store,
            queue,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn RollupStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn RollupQueue> {
        &self.queue
    }

    pub fn config(&self) -> RollupConfig {
        self.config
    }

    /// Recompute the derived dates of `ids` and enqueue their parents.
    ///
    /// Batches run in order; a failed batch is rolled back and returned as an
    /// error without cascading, and later batches are not attempted.
    pub async fn execute(&self, ids: &[WorkItemId]) -> Result<RollupSummary> {
        let mut summary = RollupSummary::default();
        if ids.is_empty() {
            return Ok(summary);
        }

        let ids: Vec<WorkItemId> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let mut cascaded = BTreeSet::new();

        for (index, batch) in ids.chunks(self.config.batch_size.max(1)).enumerate() {
            let existing = self.store.existing_work_items(batch).await?;
            if existing.len() < batch.len() {
                let missing: Vec<WorkItemId> = batch.iter().copied().filter(|id| !existing.contains(id)).collect();
                debug!(batch = index, ?missing, "Skipping work items that no longer exist");
                summary.skipped.extend(missing);
            }
            if existing.is_empty() {
                continue;
            }

            let created = self.store.ensure_dates_sources(&existing).await?;
            let hierarchy = self.walker.expand(&existing).await?;

            let updated = self
                .store
                .apply_rollup(&hierarchy.layers(), self.config.legacy_mirror)
                .await
                .with_context(|| format!("rolling up batch {index} of {} work items", existing.len()))?;

            let parents = hierarchy.parents_to_cascade();
            debug!(
                batch = index,
                size = existing.len(),
                created,
                updated = updated.len(),
                parents = parents.len(),
                "Rollup batch committed"
            );

            summary.batches += 1;
            summary.updated += updated.len();

            if !parents.is_empty() {
                info!(count = parents.len(), ?parents, "Enqueuing rollup cascade");
                self.queue
                    .enqueue(parents.clone())
                    .await
                    .context("enqueuing rollup cascade")?;
                cascaded.extend(parents);
            }
        }

        summary.cascaded = cascaded.into_iter().collect();
        Ok(summary)
    }
}
