use thiserror::Error;

use crate::types::WorkItemId;

#[derive(Error, Debug)]
pub enum RollupError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Work item not found: {0}")]
    NotFound(WorkItemId),

    #[error("Malformed event payload: {0}")]
    MalformedEvent(String),

    #[error("Rollup job {job_id} exhausted {attempts} attempts: {last_error}")]
    JobExhausted {
        job_id: i64,
        attempts: i32,
        last_error: String,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
