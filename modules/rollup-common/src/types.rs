use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type WorkItemId = i64;
pub type MilestoneId = i64;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemType {
    Issue,
    Task,
    Epic,
    Objective,
}

impl WorkItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemType::Issue => "issue",
            WorkItemType::Task => "task",
            WorkItemType::Epic => "epic",
            WorkItemType::Objective => "objective",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "issue" => Some(WorkItemType::Issue),
            "task" => Some(WorkItemType::Task),
            "epic" => Some(WorkItemType::Epic),
            "objective" => Some(WorkItemType::Objective),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two rolled-up date fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateField {
    Start,
    Due,
}

impl DateField {
    pub const ALL: [DateField; 2] = [DateField::Start, DateField::Due];

    /// Column name shared by `work_items`, `milestones` and `work_item_dates_sources`.
    pub fn column(&self) -> &'static str {
        match self {
            DateField::Start => "start_date",
            DateField::Due => "due_date",
        }
    }

    /// Earliest start wins, latest due wins.
    pub fn sort_order(&self) -> &'static str {
        match self {
            DateField::Start => "ASC",
            DateField::Due => "DESC",
        }
    }

    /// True when `candidate` strictly beats `current` for this field.
    /// Ties keep the row that was seen first.
    pub fn is_better(&self, candidate: NaiveDate, current: NaiveDate) -> bool {
        match self {
            DateField::Start => candidate < current,
            DateField::Due => candidate > current,
        }
    }
}

impl std::fmt::Display for DateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

// --- Hierarchy ---

/// A hierarchy member. `start_date` / `due_date` are the legacy direct dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub parent_id: Option<WorkItemId>,
    pub work_item_type: WorkItemType,
    pub milestone_id: Option<MilestoneId>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

impl WorkItem {
    pub fn new(id: WorkItemId, work_item_type: WorkItemType) -> Self {
        Self {
            id,
            parent_id: None,
            work_item_type,
            milestone_id: None,
            start_date: None,
            due_date: None,
        }
    }

    pub fn with_parent(mut self, parent_id: WorkItemId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_milestone(mut self, milestone_id: MilestoneId) -> Self {
        self.milestone_id = Some(milestone_id);
        self
    }

    pub fn with_dates(mut self, start_date: Option<NaiveDate>, due_date: Option<NaiveDate>) -> Self {
        self.start_date = start_date;
        self.due_date = due_date;
        self
    }

    pub fn legacy_date(&self, field: DateField) -> Option<NaiveDate> {
        match field {
            DateField::Start => self.start_date,
            DateField::Due => self.due_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

impl Milestone {
    pub fn date(&self, field: DateField) -> Option<NaiveDate> {
        match field {
            DateField::Start => self.start_date,
            DateField::Due => self.due_date,
        }
    }
}

/// A child → parent edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentLink {
    pub work_item_id: WorkItemId,
    pub parent_id: WorkItemId,
}

// --- Dates ---

/// The extremal candidate for one parent and one field, with the provenance of
/// the exact row that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolledUpDate {
    pub value: NaiveDate,
    pub sourcing_milestone_id: Option<MilestoneId>,
    pub sourcing_work_item_id: Option<WorkItemId>,
}

/// Derived per-work-item date record. Created lazily, never deleted on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatesSource {
    pub work_item_id: WorkItemId,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub start_date_fixed: Option<NaiveDate>,
    pub due_date_fixed: Option<NaiveDate>,
    pub start_date_is_fixed: bool,
    pub due_date_is_fixed: bool,
    pub start_date_sourcing_milestone_id: Option<MilestoneId>,
    pub due_date_sourcing_milestone_id: Option<MilestoneId>,
    pub start_date_sourcing_work_item_id: Option<WorkItemId>,
    pub due_date_sourcing_work_item_id: Option<WorkItemId>,
}

impl DatesSource {
    /// A fresh record seeded from the work item's legacy direct dates, so the
    /// first aggregation has a baseline instead of nulls.
    pub fn seeded(work_item: &WorkItem) -> Self {
        Self {
            work_item_id: work_item.id,
            start_date: work_item.start_date,
            due_date: work_item.due_date,
            ..Default::default()
        }
    }

    pub fn date(&self, field: DateField) -> Option<NaiveDate> {
        match field {
            DateField::Start => self.start_date,
            DateField::Due => self.due_date,
        }
    }

    pub fn is_fixed(&self, field: DateField) -> bool {
        match field {
            DateField::Start => self.start_date_is_fixed,
            DateField::Due => self.due_date_is_fixed,
        }
    }

    /// True when `field` carries no provenance, i.e. it still holds the value
    /// the record was seeded with rather than one rolled up from children.
    pub fn holds_own_date(&self, field: DateField) -> bool {
        match field {
            DateField::Start => {
                self.start_date_sourcing_milestone_id.is_none() && self.start_date_sourcing_work_item_id.is_none()
            }
            DateField::Due => {
                self.due_date_sourcing_milestone_id.is_none() && self.due_date_sourcing_work_item_id.is_none()
            }
        }
    }

    /// Apply a rollup result for a work item with no children. A leaf keeps
    /// its own seeded date; a value previously rolled up from children that
    /// have since gone is cleared.
    pub fn apply_leaf(&mut self, field: DateField) {
        if self.holds_own_date(field) {
            return;
        }
        self.apply_rolled_up(field, None);
    }

    /// Overwrite the derived value and provenance of `field`.
    /// No-op when the field is fixed.
    pub fn apply_rolled_up(&mut self, field: DateField, rolled_up: Option<RolledUpDate>) {
        if self.is_fixed(field) {
            return;
        }
        let value = rolled_up.map(|r| r.value);
        let milestone = rolled_up.and_then(|r| r.sourcing_milestone_id);
        let work_item = rolled_up.and_then(|r| r.sourcing_work_item_id);
        match field {
            DateField::Start => {
                self.start_date = value;
                self.start_date_sourcing_milestone_id = milestone;
                self.start_date_sourcing_work_item_id = work_item;
            }
            DateField::Due => {
                self.due_date = value;
                self.due_date_sourcing_milestone_id = milestone;
                self.due_date_sourcing_work_item_id = work_item;
            }
        }
    }

    /// Apply the fixing operation's changes. A field left fixed after the update
    /// takes its fixed value and drops its provenance.
    pub fn apply_fixed(&mut self, update: &FixedDatesUpdate) {
        if let Some(value) = update.start_date_fixed {
            self.start_date_fixed = value;
        }
        if let Some(value) = update.due_date_fixed {
            self.due_date_fixed = value;
        }
        if let Some(flag) = update.start_date_is_fixed {
            self.start_date_is_fixed = flag;
        }
        if let Some(flag) = update.due_date_is_fixed {
            self.due_date_is_fixed = flag;
        }
        if self.start_date_is_fixed {
            self.start_date = self.start_date_fixed;
            self.start_date_sourcing_milestone_id = None;
            self.start_date_sourcing_work_item_id = None;
        }
        if self.due_date_is_fixed {
            self.due_date = self.due_date_fixed;
            self.due_date_sourcing_milestone_id = None;
            self.due_date_sourcing_work_item_id = None;
        }
    }
}

/// Changes requested by the "fix/unfix a date" operation.
///
/// `None` leaves a column untouched; `Some(None)` clears a fixed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedDatesUpdate {
    pub start_date_fixed: Option<Option<NaiveDate>>,
    pub due_date_fixed: Option<Option<NaiveDate>>,
    pub start_date_is_fixed: Option<bool>,
    pub due_date_is_fixed: Option<bool>,
}

impl FixedDatesUpdate {
    /// Fix both fields to the given values.
    pub fn fixed(start_date: Option<NaiveDate>, due_date: Option<NaiveDate>) -> Self {
        Self {
            start_date_fixed: Some(start_date),
            due_date_fixed: Some(due_date),
            start_date_is_fixed: Some(true),
            due_date_is_fixed: Some(true),
        }
    }

    /// Switch both fields back to rolled-up values, keeping stored fixed values.
    pub fn rolled_up() -> Self {
        Self {
            start_date_is_fixed: Some(false),
            due_date_is_fixed: Some(false),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// The legacy duplicated representation, kept in sync by write-through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEpicDates {
    pub work_item_id: WorkItemId,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub start_date_fixed: Option<NaiveDate>,
    pub due_date_fixed: Option<NaiveDate>,
    pub start_date_is_fixed: bool,
    pub due_date_is_fixed: bool,
    pub start_date_sourcing_milestone_id: Option<MilestoneId>,
    pub due_date_sourcing_milestone_id: Option<MilestoneId>,
    pub start_date_sourcing_epic_id: Option<WorkItemId>,
    pub due_date_sourcing_epic_id: Option<WorkItemId>,
}

impl LegacyEpicDates {
    pub fn mirror_of(source: &DatesSource) -> Self {
        Self {
            work_item_id: source.work_item_id,
            start_date: source.start_date,
            end_date: source.due_date,
            start_date_fixed: source.start_date_fixed,
            due_date_fixed: source.due_date_fixed,
            start_date_is_fixed: source.start_date_is_fixed,
            due_date_is_fixed: source.due_date_is_fixed,
            start_date_sourcing_milestone_id: source.start_date_sourcing_milestone_id,
            due_date_sourcing_milestone_id: source.due_date_sourcing_milestone_id,
            start_date_sourcing_epic_id: source.start_date_sourcing_work_item_id,
            due_date_sourcing_epic_id: source.due_date_sourcing_work_item_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatesOrigin {
    /// Read from the work item's DateSource row.
    DatesSource,
    /// No DateSource row yet; read from the legacy direct dates.
    Legacy,
}

/// Read-side snapshot returned by `effective_dates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveDates {
    pub work_item_id: WorkItemId,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub start_date_is_fixed: bool,
    pub due_date_is_fixed: bool,
    pub start_date_sourcing_milestone_id: Option<MilestoneId>,
    pub due_date_sourcing_milestone_id: Option<MilestoneId>,
    pub start_date_sourcing_work_item_id: Option<WorkItemId>,
    pub due_date_sourcing_work_item_id: Option<WorkItemId>,
    pub origin: DatesOrigin,
}

impl EffectiveDates {
    pub fn from_dates_source(source: &DatesSource) -> Self {
        Self {
            work_item_id: source.work_item_id,
            start_date: source.start_date,
            due_date: source.due_date,
            start_date_is_fixed: source.start_date_is_fixed,
            due_date_is_fixed: source.due_date_is_fixed,
            start_date_sourcing_milestone_id: source.start_date_sourcing_milestone_id,
            due_date_sourcing_milestone_id: source.due_date_sourcing_milestone_id,
            start_date_sourcing_work_item_id: source.start_date_sourcing_work_item_id,
            due_date_sourcing_work_item_id: source.due_date_sourcing_work_item_id,
            origin: DatesOrigin::DatesSource,
        }
    }

    pub fn from_legacy(work_item: &WorkItem) -> Self {
        Self {
            work_item_id: work_item.id,
            start_date: work_item.start_date,
            due_date: work_item.due_date,
            start_date_is_fixed: false,
            due_date_is_fixed: false,
            start_date_sourcing_milestone_id: None,
            due_date_sourcing_milestone_id: None,
            start_date_sourcing_work_item_id: None,
            due_date_sourcing_work_item_id: None,
            origin: DatesOrigin::Legacy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn start_prefers_earlier_and_due_prefers_later() {
        assert!(DateField::Start.is_better(date(2024, 1, 1), date(2024, 1, 2)));
        assert!(!DateField::Start.is_better(date(2024, 1, 2), date(2024, 1, 1)));
        assert!(DateField::Due.is_better(date(2024, 3, 1), date(2024, 2, 1)));
        assert!(!DateField::Due.is_better(date(2024, 3, 1), date(2024, 3, 1)));
    }

    #[test]
    fn rolled_up_value_does_not_touch_fixed_field() {
        let mut source = DatesSource {
            work_item_id: 1,
            start_date: Some(date(2024, 5, 1)),
            start_date_fixed: Some(date(2024, 5, 1)),
            start_date_is_fixed: true,
            ..Default::default()
        };
        let rolled = RolledUpDate {
            value: date(2024, 1, 1),
            sourcing_milestone_id: Some(9),
            sourcing_work_item_id: None,
        };

        source.apply_rolled_up(DateField::Start, Some(rolled));
        source.apply_rolled_up(DateField::Due, Some(rolled));

        assert_eq!(source.start_date, Some(date(2024, 5, 1)));
        assert_eq!(source.start_date_sourcing_milestone_id, None);
        assert_eq!(source.due_date, Some(date(2024, 1, 1)));
        assert_eq!(source.due_date_sourcing_milestone_id, Some(9));
    }

    #[test]
    fn no_contributor_clears_value_and_provenance() {
        let mut source = DatesSource {
            work_item_id: 1,
            due_date: Some(date(2024, 5, 1)),
            due_date_sourcing_work_item_id: Some(4),
            ..Default::default()
        };
        source.apply_rolled_up(DateField::Due, None);
        assert_eq!(source.due_date, None);
        assert_eq!(source.due_date_sourcing_work_item_id, None);
    }

    #[test]
    fn leaf_keeps_its_seeded_date_but_drops_a_stale_rollup() {
        let mut source = DatesSource {
            work_item_id: 3,
            start_date: Some(date(2024, 1, 10)),
            due_date: Some(date(2024, 2, 10)),
            due_date_sourcing_work_item_id: Some(8),
            ..Default::default()
        };

        source.apply_leaf(DateField::Start);
        source.apply_leaf(DateField::Due);

        assert_eq!(source.start_date, Some(date(2024, 1, 10)));
        assert_eq!(source.due_date, None);
        assert_eq!(source.due_date_sourcing_work_item_id, None);
    }

    #[test]
    fn fixing_copies_fixed_value_and_clears_provenance() {
        let mut source = DatesSource {
            work_item_id: 1,
            start_date: Some(date(2024, 1, 1)),
            start_date_sourcing_milestone_id: Some(3),
            ..Default::default()
        };
        source.apply_fixed(&FixedDatesUpdate {
            start_date_fixed: Some(Some(date(2024, 2, 2))),
            start_date_is_fixed: Some(true),
            ..Default::default()
        });
        assert_eq!(source.start_date, Some(date(2024, 2, 2)));
        assert_eq!(source.start_date_sourcing_milestone_id, None);
        assert!(source.start_date_is_fixed);
        assert!(!source.due_date_is_fixed);
    }

    #[test]
    fn unfixing_keeps_stored_fixed_value() {
        let mut source = DatesSource {
            work_item_id: 1,
            start_date: Some(date(2024, 2, 2)),
            start_date_fixed: Some(date(2024, 2, 2)),
            start_date_is_fixed: true,
            ..Default::default()
        };
        source.apply_fixed(&FixedDatesUpdate::rolled_up());
        assert!(!source.start_date_is_fixed);
        assert_eq!(source.start_date_fixed, Some(date(2024, 2, 2)));
    }

    #[test]
    fn work_item_type_round_trips_through_text() {
        for t in [
            WorkItemType::Issue,
            WorkItemType::Task,
            WorkItemType::Epic,
            WorkItemType::Objective,
        ] {
            assert_eq!(WorkItemType::parse(t.as_str()), Some(t));
        }
        assert_eq!(WorkItemType::parse("requirement"), None);
    }
}
