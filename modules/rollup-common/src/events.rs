//! Domain events that can invalidate rolled-up dates.
//!
//! Events arrive from the bus as `(event_type, payload)` pairs. The `type` tag
//! is the event type; the rest of the payload is the variant's fields.

use serde::{Deserialize, Serialize};

use crate::types::{MilestoneId, WorkItemId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkItemEvent {
    /// A milestone's attributes changed.
    MilestoneUpdated {
        milestone_id: MilestoneId,
        #[serde(default)]
        changed_attributes: Option<Vec<String>>,
    },

    /// A work item's attributes or widgets changed.
    WorkItemUpdated {
        work_item_id: WorkItemId,
        #[serde(default)]
        changed_attributes: Option<Vec<String>>,
        #[serde(default)]
        changed_widgets: Vec<String>,
    },

    /// A work item moved under a different parent (or out of the hierarchy).
    WorkItemReparented {
        work_item_id: WorkItemId,
        previous_parent_id: Option<WorkItemId>,
        parent_id: Option<WorkItemId>,
    },

    /// Many work items changed at once (bulk edit, bulk move).
    HierarchyBulkUpdated {
        work_item_ids: Vec<WorkItemId>,
        #[serde(default)]
        previous_parent_ids: Vec<WorkItemId>,
        #[serde(default)]
        changed_attributes: Option<Vec<String>>,
    },

    /// A work item was created. `parent_id` is the parent it was created under.
    WorkItemCreated {
        work_item_id: WorkItemId,
        #[serde(default)]
        parent_id: Option<WorkItemId>,
    },

    /// A work item was deleted. `parent_id` is its parent at deletion time.
    WorkItemDeleted {
        work_item_id: WorkItemId,
        parent_id: Option<WorkItemId>,
    },
}

impl WorkItemEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkItemEvent::MilestoneUpdated { .. } => "milestone_updated",
            WorkItemEvent::WorkItemUpdated { .. } => "work_item_updated",
            WorkItemEvent::WorkItemReparented { .. } => "work_item_reparented",
            WorkItemEvent::HierarchyBulkUpdated { .. } => "hierarchy_bulk_updated",
            WorkItemEvent::WorkItemCreated { .. } => "work_item_created",
            WorkItemEvent::WorkItemDeleted { .. } => "work_item_deleted",
        }
    }

    /// Every attribute and widget name the event declares as changed.
    ///
    /// `None` when the event carries no declaration at all, which callers must
    /// treat as "cannot tell" rather than "nothing changed".
    pub fn changed(&self) -> Option<Vec<&str>> {
        match self {
            WorkItemEvent::MilestoneUpdated {
                changed_attributes, ..
            }
            | WorkItemEvent::HierarchyBulkUpdated {
                changed_attributes, ..
            } => changed_attributes
                .as_ref()
                .map(|attrs| attrs.iter().map(String::as_str).collect()),
            WorkItemEvent::WorkItemUpdated {
                changed_attributes,
                changed_widgets,
                ..
            } => {
                if changed_attributes.is_none() && changed_widgets.is_empty() {
                    return None;
                }
                Some(
                    changed_attributes
                        .iter()
                        .flatten()
                        .chain(changed_widgets.iter())
                        .map(String::as_str)
                        .collect(),
                )
            }
            WorkItemEvent::WorkItemReparented { .. } => Some(vec!["parent_id"]),
            WorkItemEvent::WorkItemCreated { .. } | WorkItemEvent::WorkItemDeleted { .. } => Some(vec!["id"]),
        }
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Event serialization should never fail")
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }

    /// Decode a stored `(event_type, payload)` pair. The payload's own `type`
    /// tag is filled in from `event_type` when absent, and must agree with it
    /// when present.
    pub fn from_stored(event_type: &str, payload: &serde_json::Value) -> Result<Self, String> {
        let mut payload = payload.clone();
        let object = payload
            .as_object_mut()
            .ok_or_else(|| format!("payload for {event_type} is not an object"))?;
        match object.get("type").and_then(|t| t.as_str()) {
            Some(tag) if tag != event_type => {
                return Err(format!("payload tag {tag} does not match {event_type}"));
            }
            Some(_) => {}
            None => {
                object.insert("type".into(), serde_json::Value::String(event_type.into()));
            }
        }
        Self::from_payload(&payload).map_err(|e| e.to_string())
    }
}
