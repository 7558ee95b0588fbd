//! Shared fixtures for the in-memory rollup tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use rollup_common::{DatesSource, RollupConfig, WorkItem, WorkItemId, WorkItemType};
use rollup_engine::RollupUpdateService;
use rollup_store::{MemoryRollupQueue, MemoryRollupStore};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryRollupStore>,
    pub queue: Arc<MemoryRollupQueue>,
    pub service: Arc<RollupUpdateService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(RollupConfig::default())
    }

    pub fn with_config(config: RollupConfig) -> Self {
        let store = Arc::new(MemoryRollupStore::new());
        let queue = Arc::new(MemoryRollupQueue::new());
        let service = Arc::new(RollupUpdateService::new(store.clone(), queue.clone(), config));
        Self { store, queue, service }
    }

    pub fn epic(&self, id: WorkItemId, parent: Option<WorkItemId>) {
        let mut item = WorkItem::new(id, WorkItemType::Epic);
        item.parent_id = parent;
        self.store.insert_work_item(item);
    }

    /// A child whose dates are pinned: recomputing it leaves them in place.
    pub fn fixed_child(&self, id: WorkItemId, parent: WorkItemId, start: Option<NaiveDate>, due: Option<NaiveDate>) {
        self.store
            .insert_work_item(WorkItem::new(id, WorkItemType::Issue).with_parent(parent));
        self.store.insert_dates_source(DatesSource {
            work_item_id: id,
            start_date: start,
            due_date: due,
            start_date_fixed: start,
            due_date_fixed: due,
            start_date_is_fixed: true,
            due_date_is_fixed: true,
            ..Default::default()
        });
    }

    /// A child with a plain, unfixed DateSource row.
    pub fn child_with_source(&self, id: WorkItemId, parent: WorkItemId, start: Option<NaiveDate>, due: Option<NaiveDate>) {
        self.store
            .insert_work_item(WorkItem::new(id, WorkItemType::Issue).with_parent(parent));
        self.store.insert_dates_source(DatesSource {
            work_item_id: id,
            start_date: start,
            due_date: due,
            ..Default::default()
        });
    }

    pub fn source(&self, id: WorkItemId) -> DatesSource {
        self.store
            .dates_sources()
            .into_iter()
            .find(|s| s.work_item_id == id)
            .unwrap_or_else(|| panic!("no DateSource for {id}"))
    }
}
