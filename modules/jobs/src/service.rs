use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use runtime::JobsConfig;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::broker::{Broker, Envelope};
use crate::{JobClient, JobError, Task};

/// Longest wait between two attempts of the same task.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10 * 60);

/// Processes one task type. A returned error schedules a retry.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, task: &Task) -> anyhow::Result<()>;
}

/// `base * 2^attempt`, capped at [`MAX_RETRY_DELAY`].
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
}

/// In-process background job server.
///
/// Tasks are pulled from weighted queues by a single dispatcher and run on
/// at most `concurrency` workers. `start` spawns the dispatcher, `stop`
/// cancels it along with pending retries and waits for in-flight tasks.
pub struct JobService {
    broker: Arc<Broker>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    concurrency: usize,
    retry_base_delay: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl JobService {
    pub fn new(cfg: &JobsConfig) -> Self {
        Self {
            broker: Arc::new(Broker::new(cfg.queues.clone())),
            handlers: HashMap::new(),
            concurrency: cfg.concurrency.max(1),
            retry_base_delay: cfg.retry_base_delay,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Route tasks of type `kind` to `handler`.
    pub fn with_handler(mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind.into(), handler);
        self
    }

    pub fn client(&self) -> JobClient {
        JobClient::new(self.broker.clone())
    }

    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("job service already started");
            return;
        }
        tracing::info!(
            concurrency = self.concurrency,
            queues = ?self.broker.weights(),
            handlers = self.handlers.len(),
            "starting background job server"
        );

        let worker = Arc::new(Worker {
            broker: self.broker.clone(),
            handlers: self.handlers.clone(),
            retry_base_delay: self.retry_base_delay,
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        self.tracker
            .spawn(dispatch(worker, semaphore).in_current_span());
    }

    pub async fn stop(&self) {
        tracing::info!("stopping background job server");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(pending = self.broker.pending(), "background job server stopped");
    }
}

struct Worker {
    broker: Arc<Broker>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    retry_base_delay: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

async fn dispatch(worker: Arc<Worker>, semaphore: Arc<Semaphore>) {
    loop {
        let permit = tokio::select! {
            _ = worker.cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let envelope = tokio::select! {
            _ = worker.cancel.cancelled() => break,
            envelope = worker.broker.next() => envelope,
        };

        let w = worker.clone();
        worker.tracker.spawn(
            async move {
                w.run(envelope).await;
                drop(permit);
            }
            .in_current_span(),
        );
    }
    tracing::debug!("job dispatcher stopped");
}

impl Worker {
    async fn run(&self, envelope: Envelope) {
        let span = tracing::info_span!(
            "job",
            task_id = %envelope.id,
            task_type = %envelope.task.kind(),
            queue = %envelope.task.options().queue,
            attempt = envelope.attempt,
        );
        async move {
            let Some(handler) = self.handlers.get(envelope.task.kind()) else {
                tracing::error!("no handler registered for task type, dropping task");
                return;
            };

            let timeout = envelope.task.options().timeout;
            let result = match tokio::time::timeout(timeout, handler.process(&envelope.task)).await
            {
                Ok(result) => result,
                Err(_) => Err(JobError::Timeout(timeout).into()),
            };

            match result {
                Ok(()) => tracing::debug!("task completed"),
                Err(err) => self.retry_or_drop(envelope, err),
            }
        }
        .instrument(span)
        .await
    }

    fn retry_or_drop(&self, mut envelope: Envelope, err: anyhow::Error) {
        let detail = format!("{err:#}");
        let max_retry = envelope.task.options().max_retry;
        if envelope.attempt >= max_retry {
            tracing::error!(
                error = %detail,
                attempts = envelope.attempt + 1,
                "task failed after exhausting retries, dropping"
            );
            return;
        }

        let delay = retry_delay(self.retry_base_delay, envelope.attempt);
        tracing::warn!(
            error = %detail,
            retry_in_ms = delay.as_millis() as u64,
            "task failed, scheduling retry"
        );
        envelope.attempt += 1;

        let broker = self.broker.clone();
        let cancel = self.cancel.clone();
        let requeue = async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(task_id = %envelope.id, "pending retry discarded on shutdown");
                }
                _ = tokio::time::sleep(delay) => {
                    let task_id = envelope.id.clone();
                    if let Err(e) = broker.push(envelope) {
                        tracing::error!(task_id = %task_id, error = %e, "failed to requeue task");
                    }
                }
            }
        };
        self.tracker.spawn(requeue.in_current_span());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 0), Duration::from_secs(1));
        assert_eq!(retry_delay(base, 1), Duration::from_secs(2));
        assert_eq!(retry_delay(base, 4), Duration::from_secs(16));
    }

    #[test]
    fn retry_delay_is_capped() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(base, 10), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(base, 40), MAX_RETRY_DELAY);
        assert_eq!(retry_delay(Duration::from_secs(3600), 0), MAX_RETRY_DELAY);
    }
}
