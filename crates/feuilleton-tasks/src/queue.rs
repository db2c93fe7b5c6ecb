//! In-process task queue with priority lanes.
//!
//! Three named lanes mirror the deployment queues: `beats_high`,
//! `generation_medium`, `maintenance_low`. Workers drain lanes strictly in
//! priority order; submitters get the result back through a oneshot, which
//! composes into the chord-like barrier the distributed beat writer needs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    BeatsHigh,
    GenerationMedium,
    MaintenanceLow,
}

impl Lane {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Lane::BeatsHigh => "beats_high",
            Lane::GenerationMedium => "generation_medium",
            Lane::MaintenanceLow => "maintenance_low",
        }
    }

    fn index(self) -> usize {
        match self {
            Lane::BeatsHigh => 0,
            Lane::GenerationMedium => 1,
            Lane::MaintenanceLow => 2,
        }
    }
}

type Job = BoxFuture<'static, ()>;

struct QueueShared {
    lanes: [Mutex<VecDeque<Job>>; 3],
    notify: Notify,
    shutdown: AtomicBool,
}

impl QueueShared {
    fn pop_highest(&self) -> Option<Job> {
        for lane in &self.lanes {
            if let Some(job) = lane.lock().pop_front() {
                return Some(job);
            }
        }
        None
    }
}

/// Worker pool over the three lanes. Workers are stateless; scale by count.
pub struct TaskQueue {
    shared: Arc<QueueShared>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl TaskQueue {
    /// Start `worker_count` workers on the current runtime.
    #[must_use]
    pub fn start(worker_count: usize) -> Arc<Self> {
        let shared = Arc::new(QueueShared {
            lanes: [
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
                Mutex::new(VecDeque::new()),
            ],
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        });
        let mut workers = Vec::with_capacity(worker_count.max(1));
        for worker_id in 0..worker_count.max(1) {
            let shared = Arc::clone(&shared);
            workers.push(tokio::spawn(async move {
                loop {
                    if let Some(job) = shared.pop_highest() {
                        job.await;
                        continue;
                    }
                    if shared.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    shared.notify.notified().await;
                }
                tracing::debug!(worker_id, "queue worker stopped");
            }));
        }
        Arc::new(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Enqueue a job on a lane; the receiver resolves with its output. A
    /// dropped receiver does not cancel the job.
    pub fn submit<T, F>(&self, lane: Lane, job: F) -> oneshot::Receiver<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let wrapped: Job = async move {
            let output = job.await;
            let _ = sender.send(output);
        }
        .boxed();
        self.shared.lanes[lane.index()].lock().push_back(wrapped);
        self.shared.notify.notify_one();
        receiver
    }

    /// Jobs currently waiting on a lane (running jobs excluded).
    #[must_use]
    pub fn pending(&self, lane: Lane) -> usize {
        self.shared.lanes[lane.index()].lock().len()
    }

    /// Stop accepting progress: workers exit once the lanes drain.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    /// Abort workers outright (tests).
    pub fn abort(&self) {
        for worker in self.workers.lock().drain(..) {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn results_come_back_through_the_receiver() {
        let queue = TaskQueue::start(2);
        let receiver = queue.submit(Lane::GenerationMedium, async { 21 * 2 });
        assert_eq!(receiver.await.unwrap(), 42);
        queue.shutdown();
    }

    #[tokio::test]
    async fn beats_preempt_maintenance() {
        // Single worker: submission order low-then-high, execution order
        // must be high first once the worker wakes.
        let queue = TaskQueue::start(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        // Park the worker on a long job so both lanes fill while it's busy.
        let gate = Arc::new(Notify::new());
        let gate_wait = Arc::clone(&gate);
        let _busy = queue.submit(Lane::GenerationMedium, async move {
            gate_wait.notified().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let order_low = Arc::clone(&order);
        let low = queue.submit(Lane::MaintenanceLow, async move {
            order_low.lock().push("low");
        });
        let order_high = Arc::clone(&order);
        let high = queue.submit(Lane::BeatsHigh, async move {
            order_high.lock().push("high");
        });

        gate.notify_one();
        let _ = high.await;
        let _ = low.await;
        assert_eq!(*order.lock(), vec!["high", "low"]);
        queue.shutdown();
    }

    #[tokio::test]
    async fn barrier_over_many_jobs() {
        let queue = TaskQueue::start(4);
        let receivers: Vec<_> = (0..10)
            .map(|index| queue.submit(Lane::BeatsHigh, async move { index }))
            .collect();
        let results = futures::future::join_all(receivers).await;
        let values: Vec<i32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        queue.shutdown();
    }
}
