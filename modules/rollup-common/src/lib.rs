pub mod types;
pub mod events;
pub mod config;
pub mod error;

pub use types::*;
pub use events::WorkItemEvent;
pub use config::{Config, DispatchMode, RollupConfig, WorkerConfig};
pub use error::RollupError;
