//! In-process queue storage shared by [`JobClient`] and the dispatcher.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;

use crate::{JobError, Task, TaskInfo};

pub(crate) struct Envelope {
    pub id: String,
    pub task: Task,
    /// Retries already performed.
    pub attempt: u32,
}

pub(crate) struct Broker {
    weights: BTreeMap<String, u32>,
    queues: Mutex<BTreeMap<String, VecDeque<Envelope>>>,
    notify: Notify,
}

impl Broker {
    pub fn new(weights: BTreeMap<String, u32>) -> Self {
        let queues = weights
            .keys()
            .map(|name| (name.clone(), VecDeque::new()))
            .collect();
        Self {
            weights,
            queues: Mutex::new(queues),
            notify: Notify::new(),
        }
    }

    pub fn weights(&self) -> &BTreeMap<String, u32> {
        &self.weights
    }

    pub fn push(&self, envelope: Envelope) -> Result<(), JobError> {
        {
            let mut queues = self.queues.lock();
            let queue_name = envelope.task.options().queue.as_str();
            let Some(queue) = queues.get_mut(queue_name) else {
                return Err(JobError::UnknownQueue(queue_name.to_owned()));
            };
            queue.push_back(envelope);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Pop from a non-empty queue chosen at random, proportionally to its weight.
    pub fn try_pop(&self) -> Option<Envelope> {
        let mut queues = self.queues.lock();
        let candidates: Vec<(&str, u32)> = queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(name, _)| {
                let weight = self.weights.get(name).copied().unwrap_or(1).max(1);
                (name.as_str(), weight)
            })
            .collect();
        let total: u32 = candidates.iter().map(|(_, w)| w).sum();
        if total == 0 {
            return None;
        }
        let roll = rand::rng().random_range(0..total);
        let name = pick_queue(&candidates, roll)?.to_owned();
        queues.get_mut(&name)?.pop_front()
    }

    /// Wait until a task is available. Cancel-safe.
    pub async fn next(&self) -> Envelope {
        loop {
            let notified = self.notify.notified();
            if let Some(envelope) = self.try_pop() {
                return envelope;
            }
            notified.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }
}

/// Map `roll` in `0..sum(weights)` onto a queue.
pub(crate) fn pick_queue<'a>(candidates: &[(&'a str, u32)], roll: u32) -> Option<&'a str> {
    let mut upper = 0u32;
    for (name, weight) in candidates {
        upper = upper.saturating_add(*weight);
        if roll < upper {
            return Some(name);
        }
    }
    None
}

/// Enqueues tasks for the [`crate::JobService`] that created it. Cheap to clone.
#[derive(Clone)]
pub struct JobClient {
    broker: Arc<Broker>,
}

impl JobClient {
    pub(crate) fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    pub fn enqueue(&self, task: Task) -> Result<TaskInfo, JobError> {
        let info = TaskInfo {
            id: uuid::Uuid::new_v4().to_string(),
            kind: task.kind().to_owned(),
            queue: task.options().queue.clone(),
        };
        self.broker.push(Envelope {
            id: info.id.clone(),
            task,
            attempt: 0,
        })?;
        tracing::debug!(task_id = %info.id, task_type = %info.kind, queue = %info.queue, "task enqueued");
        Ok(info)
    }

    /// Tasks waiting to be picked up.
    pub fn pending(&self) -> usize {
        self.broker.pending()
    }
}
