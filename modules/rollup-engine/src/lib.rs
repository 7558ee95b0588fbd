//! Hierarchical date roll-up engine.
//!
//! A changed work item invalidates its ancestors' derived dates. Triggers turn
//! domain events into node sets, the update service recomputes those nodes in
//! bounded transactional batches, and each batch hands its parents to the job
//! queue so propagation proceeds one level per asynchronous hop.

pub mod dates;
pub mod dispatch;
pub mod finder;
pub mod service;
pub mod triggers;
pub mod walker;
pub mod worker;

pub use dates::{effective_dates, FixedDatesService};
pub use dispatch::{DispatchOutcome, RollupDispatcher};
pub use finder::{RolledUpDates, RollupFinder};
pub use service::{RollupSummary, RollupUpdateService};
pub use triggers::RollupTrigger;
pub use walker::{BatchHierarchy, HierarchyWalker};
pub use worker::{JobOutcome, RollupWorker};
