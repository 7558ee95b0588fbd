//! The persistence seam for rolled-up dates.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use rollup_common::{
    DateField, DatesSource, FixedDatesUpdate, MilestoneId, ParentLink, RolledUpDate, WorkItem,
    WorkItemId,
};

/// Everything the rollup engine reads and writes.
///
/// Implemented by `PgRollupStore` (postgres) and `MemoryRollupStore` (tests,
/// embedded use). Also implemented for `Arc<S>` so one store can be shared
/// between the service, the dispatcher and test assertions.
#[async_trait]
pub trait RollupStore: Send + Sync {
    /// The subset of `ids` that still exist, in ascending order.
    async fn existing_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<WorkItemId>>;

    async fn work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>>;

    async fn dates_source(&self, id: WorkItemId) -> Result<Option<DatesSource>>;

    /// Child → parent edges for every node reachable by following child links
    /// from `ids`, at any depth.
    async fn descendant_links(&self, ids: &[WorkItemId]) -> Result<Vec<ParentLink>>;

    /// Child → parent edges for the members of `ids` that have a parent.
    async fn parent_links(&self, ids: &[WorkItemId]) -> Result<Vec<ParentLink>>;

    /// Work items currently linked to a milestone.
    async fn work_items_with_milestone(&self, milestone_id: MilestoneId) -> Result<Vec<WorkItemId>>;

    /// For each parent in `parents`, the extremal `field` value across its
    /// direct children, with the provenance of the winning row. Parents without
    /// a contributing child are absent from the map. One query per call.
    async fn rolled_up_dates(
        &self,
        parents: &[WorkItemId],
        field: DateField,
    ) -> Result<HashMap<WorkItemId, RolledUpDate>>;

    /// Create missing DateSource rows for `ids`, seeded from legacy direct
    /// dates. Returns how many rows were created.
    async fn ensure_dates_sources(&self, ids: &[WorkItemId]) -> Result<u64>;

    /// Recompute and persist the unfixed fields of every node in `layers`,
    /// layer by layer, in a single transaction. When `mirror` is set, the new
    /// values are written through to legacy epic rows after the primary write.
    /// Returns the resulting rows.
    async fn apply_rollup(&self, layers: &[Vec<WorkItemId>], mirror: bool) -> Result<Vec<DatesSource>>;

    /// The fixing operation's write: create the DateSource if needed, apply
    /// `update`, and mirror when `mirror` is set. Fails with
    /// `RollupError::NotFound` for a missing work item.
    async fn set_fixed_dates(
        &self,
        id: WorkItemId,
        update: &FixedDatesUpdate,
        mirror: bool,
    ) -> Result<DatesSource>;
}

// ---------------------------------------------------------------------------
// Arc<S> blanket
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: RollupStore + ?Sized> RollupStore for Arc<S> {
    async fn existing_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<WorkItemId>> {
        (**self).existing_work_items(ids).await
    }

    async fn work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>> {
        (**self).work_item(id).await
    }

    async fn dates_source(&self, id: WorkItemId) -> Result<Option<DatesSource>> {
        (**self).dates_source(id).await
    }

    async fn descendant_links(&self, ids: &[WorkItemId]) -> Result<Vec<ParentLink>> {
        (**self).descendant_links(ids).await
    }

    async fn parent_links(&self, ids: &[WorkItemId]) -> Result<Vec<ParentLink>> {
        (**self).parent_links(ids).await
    }

    async fn work_items_with_milestone(&self, milestone_id: MilestoneId) -> Result<Vec<WorkItemId>> {
        (**self).work_items_with_milestone(milestone_id).await
    }

    async fn rolled_up_dates(
        &self,
        parents: &[WorkItemId],
        field: DateField,
    ) -> Result<HashMap<WorkItemId, RolledUpDate>> {
        (**self).rolled_up_dates(parents, field).await
    }

    async fn ensure_dates_sources(&self, ids: &[WorkItemId]) -> Result<u64> {
        (**self).ensure_dates_sources(ids).await
    }

    async fn apply_rollup(&self, layers: &[Vec<WorkItemId>], mirror: bool) -> Result<Vec<DatesSource>> {
        (**self).apply_rollup(layers, mirror).await
    }

    async fn set_fixed_dates(
        &self,
        id: WorkItemId,
        update: &FixedDatesUpdate,
        mirror: bool,
    ) -> Result<DatesSource> {
        (**self).set_fixed_dates(id, update, mirror).await
    }
}
