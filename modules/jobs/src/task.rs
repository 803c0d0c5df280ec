use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::JobError;

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_MAX_RETRY: u32 = 25;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Per-task delivery options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    /// Retries after the first attempt; `0` means run once.
    pub max_retry: u32,
    pub queue: String,
    /// Deadline for a single attempt.
    pub timeout: Duration,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            max_retry: DEFAULT_MAX_RETRY,
            queue: DEFAULT_QUEUE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A unit of background work: a type string routing it to a handler and an
/// opaque JSON payload.
#[derive(Debug, Clone)]
pub struct Task {
    kind: String,
    payload: Vec<u8>,
    options: TaskOptions,
}

impl Task {
    pub fn new(kind: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            options: TaskOptions::default(),
        }
    }

    /// Serialize `payload` as JSON.
    pub fn json<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self, JobError> {
        Ok(Self::new(kind, serde_json::to_vec(payload)?))
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.options.max_retry = max_retry;
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.options.queue = queue.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Returned by [`crate::JobClient::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: String,
    pub kind: String,
    pub queue: String,
}
