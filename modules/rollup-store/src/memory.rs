//! MemoryRollupStore: the whole hierarchy in a mutex.
//!
//! A batch is applied to a copy of the state and swapped in only when every
//! step succeeded, so a failed batch leaves nothing behind.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

use rollup_common::{
    DateField, DatesSource, FixedDatesUpdate, LegacyEpicDates, Milestone, MilestoneId,
    ParentLink, RolledUpDate, RollupError, WorkItem, WorkItemId,
};

use crate::finder::{collect_candidates, select_extremes, ChildDates};
use crate::store::RollupStore;

#[derive(Debug, Clone, Default)]
struct State {
    work_items: BTreeMap<WorkItemId, WorkItem>,
    milestones: HashMap<MilestoneId, Milestone>,
    dates_sources: BTreeMap<WorkItemId, DatesSource>,
    legacy_epics: BTreeMap<WorkItemId, LegacyEpicDates>,
}

impl State {
    fn children_of(&self, parents: &BTreeSet<WorkItemId>) -> Vec<&WorkItem> {
        self.work_items
            .values()
            .filter(|w| w.parent_id.is_some_and(|p| parents.contains(&p)))
            .collect()
    }

    fn rolled_up(&self, parents: &[WorkItemId], field: DateField) -> HashMap<WorkItemId, RolledUpDate> {
        let parents: BTreeSet<WorkItemId> = parents.iter().copied().collect();
        let children = self.children_of(&parents).into_iter().map(|child| ChildDates {
            child,
            milestone: child.milestone_id.and_then(|m| self.milestones.get(&m)),
            dates_source: self.dates_sources.get(&child.id),
        });
        select_extremes(&collect_candidates(children, field), field)
    }

    fn mirror(&mut self, id: WorkItemId) {
        if let (Some(source), Some(legacy)) = (self.dates_sources.get(&id), self.legacy_epics.get_mut(&id)) {
            *legacy = LegacyEpicDates::mirror_of(source);
        }
    }
}

/// In-memory store for tests and embedded use. Thread-safe.
#[derive(Default)]
pub struct MemoryRollupStore {
    state: Mutex<State>,
    fail_next_apply: AtomicBool,
}

impl MemoryRollupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_work_item(&self, work_item: WorkItem) {
        self.lock().work_items.insert(work_item.id, work_item);
    }

    pub fn insert_milestone(&self, milestone: Milestone) {
        self.lock().milestones.insert(milestone.id, milestone);
    }

    pub fn insert_dates_source(&self, source: DatesSource) {
        self.lock().dates_sources.insert(source.work_item_id, source);
    }

    /// Give a work item a legacy epic row so it receives mirror writes.
    pub fn insert_legacy_epic(&self, id: WorkItemId) {
        self.lock().legacy_epics.insert(
            id,
            LegacyEpicDates {
                work_item_id: id,
                ..Default::default()
            },
        );
    }

    pub fn update_milestone(&self, id: MilestoneId, start_date: Option<NaiveDate>, due_date: Option<NaiveDate>) {
        if let Some(milestone) = self.lock().milestones.get_mut(&id) {
            milestone.start_date = start_date;
            milestone.due_date = due_date;
        }
    }

    pub fn set_parent(&self, id: WorkItemId, parent_id: Option<WorkItemId>) {
        if let Some(item) = self.lock().work_items.get_mut(&id) {
            item.parent_id = parent_id;
        }
    }

    pub fn set_milestone(&self, id: WorkItemId, milestone_id: Option<MilestoneId>) {
        if let Some(item) = self.lock().work_items.get_mut(&id) {
            item.milestone_id = milestone_id;
        }
    }

    pub fn set_legacy_dates(&self, id: WorkItemId, start_date: Option<NaiveDate>, due_date: Option<NaiveDate>) {
        if let Some(item) = self.lock().work_items.get_mut(&id) {
            item.start_date = start_date;
            item.due_date = due_date;
        }
    }

    /// Overwrite the derived value of an existing DateSource, as a child's own
    /// recomputation would.
    pub fn set_derived_date(&self, id: WorkItemId, field: DateField, value: Option<NaiveDate>) {
        if let Some(source) = self.lock().dates_sources.get_mut(&id) {
            match field {
                DateField::Start => source.start_date = value,
                DateField::Due => source.due_date = value,
            }
        }
    }

    /// Remove a work item with its DateSource and legacy row. Children are
    /// detached, as the parent-link table would do.
    pub fn delete_work_item(&self, id: WorkItemId) {
        let mut state = self.lock();
        state.work_items.remove(&id);
        state.dates_sources.remove(&id);
        state.legacy_epics.remove(&id);
        for item in state.work_items.values_mut() {
            if item.parent_id == Some(id) {
                item.parent_id = None;
            }
        }
    }

    pub fn legacy_epic(&self, id: WorkItemId) -> Option<LegacyEpicDates> {
        self.lock().legacy_epics.get(&id).cloned()
    }

    /// Every DateSource row, ordered by work item id.
    pub fn dates_sources(&self) -> Vec<DatesSource> {
        self.lock().dates_sources.values().cloned().collect()
    }

    /// Make the next `apply_rollup` fail after computing, so nothing is committed.
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RollupStore for MemoryRollupStore {
    async fn existing_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<WorkItemId>> {
        let state = self.lock();
        let existing: BTreeSet<WorkItemId> = ids
            .iter()
            .copied()
            .filter(|id| state.work_items.contains_key(id))
            .collect();
        Ok(existing.into_iter().collect())
    }

    async fn work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>> {
        Ok(self.lock().work_items.get(&id).cloned())
    }

    async fn dates_source(&self, id: WorkItemId) -> Result<Option<DatesSource>> {
        Ok(self.lock().dates_sources.get(&id).cloned())
    }

    async fn descendant_links(&self, ids: &[WorkItemId]) -> Result<Vec<ParentLink>> {
        let state = self.lock();
        let mut links = Vec::new();
        let mut visited: BTreeSet<WorkItemId> = BTreeSet::new();
        let mut frontier: VecDeque<WorkItemId> = ids.iter().copied().collect();

        while let Some(parent) = frontier.pop_front() {
            for item in state.work_items.values() {
                if item.parent_id != Some(parent) || !visited.insert(item.id) {
                    continue;
                }
                links.push(ParentLink {
                    work_item_id: item.id,
                    parent_id: parent,
                });
                frontier.push_back(item.id);
            }
        }

        Ok(links)
    }

    async fn parent_links(&self, ids: &[WorkItemId]) -> Result<Vec<ParentLink>> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.work_items.get(id))
            .filter_map(|item| {
                item.parent_id.map(|parent_id| ParentLink {
                    work_item_id: item.id,
                    parent_id,
                })
            })
            .collect())
    }

    async fn work_items_with_milestone(&self, milestone_id: MilestoneId) -> Result<Vec<WorkItemId>> {
        Ok(self
            .lock()
            .work_items
            .values()
            .filter(|w| w.milestone_id == Some(milestone_id))
            .map(|w| w.id)
            .collect())
    }

    async fn rolled_up_dates(
        &self,
        parents: &[WorkItemId],
        field: DateField,
    ) -> Result<HashMap<WorkItemId, RolledUpDate>> {
        Ok(self.lock().rolled_up(parents, field))
    }

    async fn ensure_dates_sources(&self, ids: &[WorkItemId]) -> Result<u64> {
        let mut state = self.lock();
        let mut created = 0;
        for id in ids {
            let Some(item) = state.work_items.get(id) else {
                continue;
            };
            if state.dates_sources.contains_key(id) {
                continue;
            }
            let seeded = DatesSource::seeded(item);
            state.dates_sources.insert(*id, seeded);
            created += 1;
        }
        Ok(created)
    }

    async fn apply_rollup(&self, layers: &[Vec<WorkItemId>], mirror: bool) -> Result<Vec<DatesSource>> {
        let mut state = self.lock();
        let mut next = state.clone();

        for layer in layers {
            let members: BTreeSet<WorkItemId> = layer.iter().copied().collect();
            let with_children: BTreeSet<WorkItemId> = next
                .children_of(&members)
                .into_iter()
                .filter_map(|child| child.parent_id)
                .collect();

            for field in DateField::ALL {
                let rolled_up = next.rolled_up(layer, field);
                for id in layer {
                    let Some(source) = next.dates_sources.get_mut(id) else {
                        continue;
                    };
                    if with_children.contains(id) {
                        source.apply_rolled_up(field, rolled_up.get(id).copied());
                    } else {
                        source.apply_leaf(field);
                    }
                }
            }
        }

        let ids: Vec<WorkItemId> = layers.iter().flatten().copied().collect();
        if mirror {
            for id in &ids {
                next.mirror(*id);
            }
        }

        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            bail!("injected failure while applying rollup to {} work items", ids.len());
        }

        let updated = ids
            .iter()
            .filter_map(|id| next.dates_sources.get(id).cloned())
            .collect();
        *state = next;
        Ok(updated)
    }

    async fn set_fixed_dates(
        &self,
        id: WorkItemId,
        update: &FixedDatesUpdate,
        mirror: bool,
    ) -> Result<DatesSource> {
        let mut state = self.lock();
        let Some(item) = state.work_items.get(&id) else {
            return Err(RollupError::NotFound(id).into());
        };
        let seeded = DatesSource::seeded(item);

        let source = state.dates_sources.entry(id).or_insert(seeded);
        source.apply_fixed(update);
        let result = source.clone();

        if mirror {
            state.mirror(id);
        }
        Ok(result)
    }
}
