//! Persistence for rolled-up work item dates.
//!
//! `RollupStore` is the read/write seam the engine runs against and
//! `RollupQueue` carries cascades between passes. Both come in a Postgres
//! flavour and an in-memory flavour with identical semantics.

pub mod finder;
pub mod memory;
pub mod pg_queue;
pub mod postgres;
pub mod queue;
pub mod store;

pub use memory::MemoryRollupStore;
pub use pg_queue::PgRollupQueue;
pub use postgres::PgRollupStore;
pub use queue::{MemoryRollupQueue, RollupJob, RollupQueue};
pub use store::RollupStore;
