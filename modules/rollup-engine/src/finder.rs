use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use rollup_common::{DateField, RolledUpDate, WorkItemId};
use rollup_store::RollupStore;

/// Both rolled-up fields for one parent. `None` means no child contributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolledUpDates {
    pub start: Option<RolledUpDate>,
    pub due: Option<RolledUpDate>,
}

/// Read-only access to what a parent's children currently roll up to.
#[derive(Clone)]
pub struct RollupFinder {
    store: Arc<dyn RollupStore>,
}

impl RollupFinder {
    pub fn new(store: Arc<dyn RollupStore>) -> Self {
        Self { store }
    }

    pub async fn for_parent(&self, parent_id: WorkItemId) -> Result<RolledUpDates> {
        Ok(self
            .for_parents(&[parent_id])
            .await?
            .remove(&parent_id)
            .unwrap_or_default())
    }

    /// One query per field regardless of how many parents are asked for.
    /// Parents without contributing children are absent.
    pub async fn for_parents(&self, parent_ids: &[WorkItemId]) -> Result<HashMap<WorkItemId, RolledUpDates>> {
        let starts = self.store.rolled_up_dates(parent_ids, DateField::Start).await?;
        let dues = self.store.rolled_up_dates(parent_ids, DateField::Due).await?;

        let mut result: HashMap<WorkItemId, RolledUpDates> = HashMap::new();
        for (parent_id, start) in starts {
            result.entry(parent_id).or_default().start = Some(start);
        }
        for (parent_id, due) in dues {
            result.entry(parent_id).or_default().due = Some(due);
        }
        Ok(result)
    }
}
