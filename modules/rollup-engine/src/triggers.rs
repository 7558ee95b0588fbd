//! Event → node-set triggers.
//!
//! Each trigger names the attributes it cares about and decides which work
//! items an event invalidates. An event that does not declare what changed
//! never matches.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;

use rollup_common::{WorkItemEvent, WorkItemId};
use rollup_store::RollupStore;

#[async_trait]
pub trait RollupTrigger: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(&self, event: &WorkItemEvent) -> bool;

    /// Work items whose derived dates the event invalidates.
    async fn resolve_targets(&self, event: &WorkItemEvent, store: &dyn RollupStore) -> Result<Vec<WorkItemId>>;
}

/// True when the event declares a change to any of `attributes`.
fn touches(event: &WorkItemEvent, attributes: &[&str]) -> bool {
    event
        .changed()
        .is_some_and(|changed| changed.iter().any(|c| attributes.contains(c)))
}

async fn parents_of(store: &dyn RollupStore, ids: &[WorkItemId]) -> Result<BTreeSet<WorkItemId>> {
    Ok(store
        .parent_links(ids)
        .await?
        .into_iter()
        .map(|l| l.parent_id)
        .collect())
}

/// The standard trigger set.
pub fn default_triggers() -> Vec<Box<dyn RollupTrigger>> {
    vec![
        Box::new(MilestoneDatesTrigger),
        Box::new(WorkItemDatesTrigger),
        Box::new(ReparentTrigger),
        Box::new(BulkHierarchyTrigger),
        Box::new(CreatedWorkItemTrigger),
        Box::new(DeletedWorkItemTrigger),
    ]
}

// ---------------------------------------------------------------------------
// Milestone dates
// ---------------------------------------------------------------------------

/// A milestone's dates moved: every parent of a work item on that milestone
/// rolls up a different value.
pub struct MilestoneDatesTrigger;

impl MilestoneDatesTrigger {
    pub const ATTRIBUTES: &'static [&'static str] = &["start_date", "due_date"];
}

#[async_trait]
impl RollupTrigger for MilestoneDatesTrigger {
    fn name(&self) -> &'static str {
        "milestone_dates"
    }

    fn matches(&self, event: &WorkItemEvent) -> bool {
        matches!(event, WorkItemEvent::MilestoneUpdated { .. }) && touches(event, Self::ATTRIBUTES)
    }

    async fn resolve_targets(&self, event: &WorkItemEvent, store: &dyn RollupStore) -> Result<Vec<WorkItemId>> {
        let WorkItemEvent::MilestoneUpdated { milestone_id, .. } = event else {
            return Ok(Vec::new());
        };
        let linked = store.work_items_with_milestone(*milestone_id).await?;
        if linked.is_empty() {
            return Ok(Vec::new());
        }
        Ok(parents_of(store, &linked).await?.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Work item dates
// ---------------------------------------------------------------------------

/// A work item's own dates or milestone changed: its parent rolls up a
/// different value.
pub struct WorkItemDatesTrigger;

impl WorkItemDatesTrigger {
    pub const ATTRIBUTES: &'static [&'static str] = &[
        "milestone_id",
        "start_date",
        "due_date",
        "start_and_due_date",
        "dates_source",
    ];
}

#[async_trait]
impl RollupTrigger for WorkItemDatesTrigger {
    fn name(&self) -> &'static str {
        "work_item_dates"
    }

    fn matches(&self, event: &WorkItemEvent) -> bool {
        matches!(event, WorkItemEvent::WorkItemUpdated { .. }) && touches(event, Self::ATTRIBUTES)
    }

    async fn resolve_targets(&self, event: &WorkItemEvent, store: &dyn RollupStore) -> Result<Vec<WorkItemId>> {
        let WorkItemEvent::WorkItemUpdated { work_item_id, .. } = event else {
            return Ok(Vec::new());
        };
        Ok(parents_of(store, &[*work_item_id]).await?.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Reparenting
// ---------------------------------------------------------------------------

/// A work item moved: the old parent loses its contribution, the new parent
/// gains it.
pub struct ReparentTrigger;

#[async_trait]
impl RollupTrigger for ReparentTrigger {
    fn name(&self) -> &'static str {
        "reparent"
    }

    fn matches(&self, event: &WorkItemEvent) -> bool {
        matches!(
            event,
            WorkItemEvent::WorkItemReparented { previous_parent_id, parent_id, .. }
                if previous_parent_id != parent_id
        )
    }

    async fn resolve_targets(&self, event: &WorkItemEvent, _store: &dyn RollupStore) -> Result<Vec<WorkItemId>> {
        let WorkItemEvent::WorkItemReparented {
            work_item_id,
            previous_parent_id,
            parent_id,
        } = event
        else {
            return Ok(Vec::new());
        };
        let targets: BTreeSet<WorkItemId> = [Some(*work_item_id), *previous_parent_id, *parent_id]
            .into_iter()
            .flatten()
            .collect();
        Ok(targets.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Bulk hierarchy changes
// ---------------------------------------------------------------------------

/// Many work items moved or changed dates at once.
pub struct BulkHierarchyTrigger;

impl BulkHierarchyTrigger {
    pub const ATTRIBUTES: &'static [&'static str] = &[
        "parent_id",
        "hierarchy",
        "milestone_id",
        "start_date",
        "due_date",
        "start_and_due_date",
    ];
}

#[async_trait]
impl RollupTrigger for BulkHierarchyTrigger {
    fn name(&self) -> &'static str {
        "bulk_hierarchy"
    }

    fn matches(&self, event: &WorkItemEvent) -> bool {
        matches!(event, WorkItemEvent::HierarchyBulkUpdated { .. }) && touches(event, Self::ATTRIBUTES)
    }

    async fn resolve_targets(&self, event: &WorkItemEvent, store: &dyn RollupStore) -> Result<Vec<WorkItemId>> {
        let WorkItemEvent::HierarchyBulkUpdated {
            work_item_ids,
            previous_parent_ids,
            ..
        } = event
        else {
            return Ok(Vec::new());
        };
        let mut targets = parents_of(store, work_item_ids).await?;
        targets.extend(previous_parent_ids.iter().copied());
        Ok(targets.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// A new child may bring dates or a milestone to its parent.
pub struct CreatedWorkItemTrigger;

#[async_trait]
impl RollupTrigger for CreatedWorkItemTrigger {
    fn name(&self) -> &'static str {
        "created_work_item"
    }

    fn matches(&self, event: &WorkItemEvent) -> bool {
        matches!(event, WorkItemEvent::WorkItemCreated { parent_id: Some(_), .. })
    }

    async fn resolve_targets(&self, event: &WorkItemEvent, _store: &dyn RollupStore) -> Result<Vec<WorkItemId>> {
        match event {
            WorkItemEvent::WorkItemCreated {
                parent_id: Some(parent_id),
                ..
            } => Ok(vec![*parent_id]),
            _ => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

/// A deleted child no longer contributes to its former parent.
pub struct DeletedWorkItemTrigger;

#[async_trait]
impl RollupTrigger for DeletedWorkItemTrigger {
    fn name(&self) -> &'static str {
        "deleted_work_item"
    }

    fn matches(&self, event: &WorkItemEvent) -> bool {
        matches!(event, WorkItemEvent::WorkItemDeleted { parent_id: Some(_), .. })
    }

    async fn resolve_targets(&self, event: &WorkItemEvent, _store: &dyn RollupStore) -> Result<Vec<WorkItemId>> {
        match event {
            WorkItemEvent::WorkItemDeleted {
                parent_id: Some(parent_id),
                ..
            } => Ok(vec![*parent_id]),
            _ => Ok(Vec::new()),
        }
    }
}
