//! Fixing dates, and reading the dates consumers see.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use rollup_common::{EffectiveDates, FixedDatesUpdate, RollupError, WorkItemId};
use rollup_store::RollupStore;

use crate::service::RollupUpdateService;

/// The DateSource snapshot for a work item, falling back to its legacy direct
/// dates when no DateSource exists yet. `None` for a missing work item.
pub async fn effective_dates(store: &dyn RollupStore, id: WorkItemId) -> Result<Option<EffectiveDates>> {
    if let Some(source) = store.dates_source(id).await? {
        return Ok(Some(EffectiveDates::from_dates_source(&source)));
    }
    Ok(store
        .work_item(id)
        .await?
        .map(|work_item| EffectiveDates::from_legacy(&work_item)))
}

/// The "fix / unfix a date" entry point.
///
/// Writes the fixed values and flags, then recomputes the work item right away
/// so a field switched back to rolled-up takes its derived value, and its
/// ancestors are enqueued.
pub struct FixedDatesService {
    rollup: Arc<RollupUpdateService>,
}

impl FixedDatesService {
    pub fn new(rollup: Arc<RollupUpdateService>) -> Self {
        Self { rollup }
    }

    pub async fn execute(&self, id: WorkItemId, update: FixedDatesUpdate) -> Result<EffectiveDates> {
        let store = self.rollup.store();

        if update.is_empty() {
            debug!(work_item_id = id, "No date changes requested");
        } else {
            store
                .set_fixed_dates(id, &update, self.rollup.config().legacy_mirror)
                .await?;
            self.rollup.execute(&[id]).await?;
        }

        effective_dates(&**store, id)
            .await?
            .ok_or_else(|| RollupError::NotFound(id).into())
    }
}
