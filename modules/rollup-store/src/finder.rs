//! In-memory rollup candidate merge.
//!
//! Each child contributes at most one candidate per field, taken from the first
//! source that has a value: its milestone, else its DateSource row, else its
//! legacy direct date. Candidates are unioned in that source order and the
//! extremal row per parent wins, keeping the first-seen row on ties.

use std::collections::HashMap;

use rollup_common::{DateField, DatesSource, Milestone, RolledUpDate, WorkItem, WorkItemId};

/// Where a candidate row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Milestone,
    DatesSource,
    Legacy,
}

/// One row of the candidate union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub parent_id: WorkItemId,
    pub rolled_up: RolledUpDate,
    pub source: CandidateSource,
}

/// What the merge needs to know about one child.
#[derive(Debug, Clone, Copy)]
pub struct ChildDates<'a> {
    pub child: &'a WorkItem,
    pub milestone: Option<&'a Milestone>,
    pub dates_source: Option<&'a DatesSource>,
}

impl ChildDates<'_> {
    /// The single candidate this child contributes for `field`, if any.
    pub fn candidate(&self, field: DateField) -> Option<Candidate> {
        let parent_id = self.child.parent_id?;

        if let Some(milestone) = self.milestone {
            if let Some(value) = milestone.date(field) {
                return Some(Candidate {
                    parent_id,
                    rolled_up: RolledUpDate {
                        value,
                        sourcing_milestone_id: Some(milestone.id),
                        sourcing_work_item_id: None,
                    },
                    source: CandidateSource::Milestone,
                });
            }
        }

        let (value, source) = match self.dates_source {
            Some(ds) => (ds.date(field)?, CandidateSource::DatesSource),
            None => (self.child.legacy_date(field)?, CandidateSource::Legacy),
        };

        Some(Candidate {
            parent_id,
            rolled_up: RolledUpDate {
                value,
                sourcing_milestone_id: None,
                sourcing_work_item_id: Some(self.child.id),
            },
            source,
        })
    }
}

/// Union of the three candidate sets: milestone rows, then DateSource rows,
/// then legacy rows.
pub fn collect_candidates<'a>(
    children: impl IntoIterator<Item = ChildDates<'a>>,
    field: DateField,
) -> Vec<Candidate> {
    let mut milestone_rows = Vec::new();
    let mut dates_source_rows = Vec::new();
    let mut legacy_rows = Vec::new();

    for child in children {
        if let Some(candidate) = child.candidate(field) {
            match candidate.source {
                CandidateSource::Milestone => milestone_rows.push(candidate),
                CandidateSource::DatesSource => dates_source_rows.push(candidate),
                CandidateSource::Legacy => legacy_rows.push(candidate),
            }
        }
    }

    milestone_rows.extend(dates_source_rows);
    milestone_rows.extend(legacy_rows);
    milestone_rows
}

/// Group by parent and keep the extremal row for `field`.
pub fn select_extremes(
    candidates: &[Candidate],
    field: DateField,
) -> HashMap<WorkItemId, RolledUpDate> {
    let mut best: HashMap<WorkItemId, RolledUpDate> = HashMap::new();
    for candidate in candidates {
        best.entry(candidate.parent_id)
            .and_modify(|current| {
                if field.is_better(candidate.rolled_up.value, current.value) {
                    *current = candidate.rolled_up;
                }
            })
            .or_insert(candidate.rolled_up);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rollup_common::WorkItemType;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn child(id: WorkItemId, parent: WorkItemId) -> WorkItem {
        WorkItem::new(id, WorkItemType::Issue).with_parent(parent)
    }

    #[test]
    fn milestone_value_takes_precedence_over_own_dates() {
        let item = child(2, 1).with_milestone(10).with_dates(Some(date(2024, 1, 1)), None);
        let milestone = Milestone {
            id: 10,
            start_date: Some(date(2024, 3, 1)),
            due_date: None,
        };
        let dates = ChildDates {
            child: &item,
            milestone: Some(&milestone),
            dates_source: None,
        };

        let start = dates.candidate(DateField::Start).unwrap();
        assert_eq!(start.source, CandidateSource::Milestone);
        assert_eq!(start.rolled_up.value, date(2024, 3, 1));
        assert_eq!(start.rolled_up.sourcing_milestone_id, Some(10));
        assert_eq!(start.rolled_up.sourcing_work_item_id, None);

        // Milestone has no due date, and the child has no DateSource: no due candidate
        // from legacy either, since legacy due is null.
        assert!(dates.candidate(DateField::Due).is_none());
    }

    #[test]
    fn dates_source_row_hides_legacy_value() {
        let item = child(2, 1).with_dates(Some(date(2024, 1, 1)), Some(date(2024, 9, 1)));
        let ds = DatesSource {
            work_item_id: 2,
            start_date: None,
            due_date: Some(date(2024, 6, 1)),
            ..Default::default()
        };
        let dates = ChildDates {
            child: &item,
            milestone: None,
            dates_source: Some(&ds),
        };

        assert!(dates.candidate(DateField::Start).is_none());
        let due = dates.candidate(DateField::Due).unwrap();
        assert_eq!(due.source, CandidateSource::DatesSource);
        assert_eq!(due.rolled_up.value, date(2024, 6, 1));
        assert_eq!(due.rolled_up.sourcing_work_item_id, Some(2));
    }

    #[test]
    fn orphan_contributes_nothing() {
        let item = WorkItem::new(5, WorkItemType::Issue).with_dates(Some(date(2024, 1, 1)), None);
        let dates = ChildDates {
            child: &item,
            milestone: None,
            dates_source: None,
        };
        assert!(dates.candidate(DateField::Start).is_none());
    }

    #[test]
    fn extremes_carry_provenance_of_winning_row() {
        let a = child(2, 1).with_milestone(10);
        let b = child(3, 1);
        let c = child(4, 1).with_dates(Some(date(2024, 1, 10)), Some(date(2024, 2, 1)));
        let milestone = Milestone {
            id: 10,
            start_date: Some(date(2024, 1, 5)),
            due_date: Some(date(2024, 3, 1)),
        };
        let b_source = DatesSource {
            work_item_id: 3,
            start_date: Some(date(2024, 1, 1)),
            due_date: Some(date(2024, 2, 15)),
            ..Default::default()
        };
        let children = [
            ChildDates {
                child: &a,
                milestone: Some(&milestone),
                dates_source: None,
            },
            ChildDates {
                child: &b,
                milestone: None,
                dates_source: Some(&b_source),
            },
            ChildDates {
                child: &c,
                milestone: None,
                dates_source: None,
            },
        ];

        let starts = select_extremes(&collect_candidates(children, DateField::Start), DateField::Start);
        assert_eq!(
            starts[&1],
            RolledUpDate {
                value: date(2024, 1, 1),
                sourcing_milestone_id: None,
                sourcing_work_item_id: Some(3),
            }
        );

        let dues = select_extremes(&collect_candidates(children, DateField::Due), DateField::Due);
        assert_eq!(
            dues[&1],
            RolledUpDate {
                value: date(2024, 3, 1),
                sourcing_milestone_id: Some(10),
                sourcing_work_item_id: None,
            }
        );
    }

    #[test]
    fn candidates_are_grouped_per_parent() {
        let a = child(2, 1).with_dates(Some(date(2024, 1, 1)), None);
        let b = child(3, 7).with_dates(Some(date(2023, 1, 1)), None);
        let children = [
            ChildDates {
                child: &a,
                milestone: None,
                dates_source: None,
            },
            ChildDates {
                child: &b,
                milestone: None,
                dates_source: None,
            },
        ];
        let starts = select_extremes(&collect_candidates(children, DateField::Start), DateField::Start);
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[&1].value, date(2024, 1, 1));
        assert_eq!(starts[&7].value, date(2023, 1, 1));
    }
}
