use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("unknown queue '{0}'")]
    UnknownQueue(String),

    #[error("invalid task payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("task timed out after {0:?}")]
    Timeout(Duration),
}
