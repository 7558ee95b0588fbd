//! Routes domain events to the rollup.
//!
//! Every registered trigger that matches an event contributes targets; the
//! union is recomputed inline or handed to the job queue, depending on the
//! configured [`DispatchMode`].

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use rollup_common::{DispatchMode, RollupError, WorkItemEvent, WorkItemId};

use crate::service::{RollupSummary, RollupUpdateService};
use crate::triggers::{default_triggers, RollupTrigger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No trigger matched, or the matching triggers resolved no targets.
    Ignored,
    Recomputed(RollupSummary),
    Enqueued(Vec<WorkItemId>),
}

pub struct RollupDispatcher {
    triggers: Vec<Box<dyn RollupTrigger>>,
    service: Arc<RollupUpdateService>,
    mode: DispatchMode,
}

impl RollupDispatcher {
    /// A dispatcher with no triggers registered.
    pub fn new(service: Arc<RollupUpdateService>, mode: DispatchMode) -> Self {
        Self {
            triggers: Vec::new(),
            service,
            mode,
        }
    }

    pub fn with_default_triggers(service: Arc<RollupUpdateService>, mode: DispatchMode) -> Self {
        Self {
            triggers: default_triggers(),
            service,
            mode,
        }
    }

    pub fn with_trigger(mut self, trigger: impl RollupTrigger + 'static) -> Self {
        self.register(trigger);
        self
    }

    pub fn register(&mut self, trigger: impl RollupTrigger + 'static) {
        self.triggers.push(Box::new(trigger));
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub async fn handle(&self, event: &WorkItemEvent) -> Result<DispatchOutcome> {
        let matching: Vec<&dyn RollupTrigger> = self
            .triggers
            .iter()
            .map(|t| t.as_ref())
            .filter(|t| t.matches(event))
            .collect();

        if matching.is_empty() {
            debug!(event_type = event.event_type(), "No rollup trigger matched");
            return Ok(DispatchOutcome::Ignored);
        }

        let store = self.service.store();
        let resolved = try_join_all(matching.iter().map(|t| t.resolve_targets(event, &**store))).await?;
        let targets: Vec<WorkItemId> = resolved
            .into_iter()
            .flatten()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let triggers: Vec<&str> = matching.iter().map(|t| t.name()).collect();
        if targets.is_empty() {
            debug!(event_type = event.event_type(), ?triggers, "Rollup triggers resolved no targets");
            return Ok(DispatchOutcome::Ignored);
        }

        info!(
            event_type = event.event_type(),
            ?triggers,
            count = targets.len(),
            mode = ?self.mode,
            "Dispatching rollup"
        );

        match self.mode {
            DispatchMode::Inline => Ok(DispatchOutcome::Recomputed(self.service.execute(&targets).await?)),
            DispatchMode::Async => {
                self.service.queue().enqueue(targets.clone()).await?;
                Ok(DispatchOutcome::Enqueued(targets))
            }
        }
    }

    /// Handle an event as read from an event log. A payload that cannot be
    /// understood is logged and ignored rather than guessed at.
    pub async fn handle_stored(&self, event_type: &str, payload: &serde_json::Value) -> Result<DispatchOutcome> {
        match WorkItemEvent::from_stored(event_type, payload) {
            Ok(event) => self.handle(&event).await,
            Err(reason) => {
                let error = RollupError::MalformedEvent(reason);
                warn!(event_type, error = %error, "Ignoring malformed event");
                Ok(DispatchOutcome::Ignored)
            }
        }
    }
}
