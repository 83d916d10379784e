use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, Notify, oneshot};

use crate::config::LanguageConfig;
use crate::sandbox::{ExecutionOutcome, Submission};

/// A pending execution together with the channel its result goes back on
pub struct ExecutionMessage {
    pub id: u64,
    pub submission: Submission,
    pub language: LanguageConfig,
    pub responder: oneshot::Sender<anyhow::Result<ExecutionOutcome>>,
}

/// Bounded FIFO of pending executions shared by the server and the workers
pub struct ExecutionQueue {
    queue: Mutex<VecDeque<ExecutionMessage>>,
    notify: Notify,
    capacity: usize,
    next_id: AtomicU64,
}

impl ExecutionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueues `job`, handing it back when the queue is full
    pub async fn push(&self, job: ExecutionMessage) -> Result<(), ExecutionMessage> {
        {
            let mut queue = self.queue.lock().await;
            if queue.len() >= self.capacity {
                return Err(job);
            }
            queue.push_back(job);
        }
        self.notify.notify_one();
        Ok(())
    }

    pub async fn pop(&self) -> ExecutionMessage {
        loop {
            if let Some(job) = self.queue.lock().await.pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
