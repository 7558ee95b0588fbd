//! Hierarchy walking for a batch: what lies below it, what lies directly above.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;

use rollup_common::{ParentLink, WorkItemId};
use rollup_store::RollupStore;

#[derive(Clone)]
pub struct HierarchyWalker {
    store: Arc<dyn RollupStore>,
}

impl HierarchyWalker {
    pub fn new(store: Arc<dyn RollupStore>) -> Self {
        Self { store }
    }

    /// Read everything needed to order and cascade a batch.
    pub async fn expand(&self, ids: &[WorkItemId]) -> Result<BatchHierarchy> {
        let descendant_links = self.store.descendant_links(ids).await?;
        let parent_links = self.store.parent_links(ids).await?;
        Ok(BatchHierarchy::new(ids, descendant_links, parent_links))
    }

    /// All nodes reachable by following child links from `ids`, at any depth.
    pub async fn descendants(&self, ids: &[WorkItemId]) -> Result<HashSet<WorkItemId>> {
        let links = self.store.descendant_links(ids).await?;
        Ok(links.into_iter().map(|l| l.work_item_id).collect())
    }

    /// Parents of `ids` that will not already be recomputed with `ids`.
    pub async fn direct_parents_excluding_descendants(&self, ids: &[WorkItemId]) -> Result<Vec<WorkItemId>> {
        Ok(self.expand(ids).await?.parents_to_cascade())
    }
}

/// A batch together with its descendants and direct parents.
#[derive(Debug, Clone)]
pub struct BatchHierarchy {
    members: BTreeSet<WorkItemId>,
    descendant_parent: HashMap<WorkItemId, WorkItemId>,
    parent_links: Vec<ParentLink>,
}

impl BatchHierarchy {
    pub fn new(ids: &[WorkItemId], descendant_links: Vec<ParentLink>, parent_links: Vec<ParentLink>) -> Self {
        Self {
            members: ids.iter().copied().collect(),
            descendant_parent: descendant_links
                .into_iter()
                .map(|l| (l.work_item_id, l.parent_id))
                .collect(),
            parent_links,
        }
    }

    pub fn is_descendant(&self, id: WorkItemId) -> bool {
        self.descendant_parent.contains_key(&id)
    }

    /// Batch members grouped so that every member comes after all of its
    /// in-batch descendants: deepest layer first.
    pub fn layers(&self) -> Vec<Vec<WorkItemId>> {
        let mut by_depth: BTreeMap<usize, Vec<WorkItemId>> = BTreeMap::new();
        for &id in &self.members {
            by_depth.entry(self.member_ancestor_count(id)).or_default().push(id);
        }
        by_depth.into_values().rev().collect()
    }

    /// Parents to enqueue for the next pass: every direct parent of a member,
    /// minus members and descendants of the batch.
    pub fn parents_to_cascade(&self) -> Vec<WorkItemId> {
        let parents: BTreeSet<WorkItemId> = self
            .parent_links
            .iter()
            .map(|l| l.parent_id)
            .filter(|p| !self.members.contains(p) && !self.is_descendant(*p))
            .collect();
        parents.into_iter().collect()
    }

    fn member_ancestor_count(&self, id: WorkItemId) -> usize {
        let mut seen = HashSet::from([id]);
        let mut count = 0;
        let mut current = id;
        while let Some(&parent) = self.descendant_parent.get(&current) {
            if !seen.insert(parent) {
                break;
            }
            if self.members.contains(&parent) {
                count += 1;
            }
            current = parent;
        }
        count
    }
}
