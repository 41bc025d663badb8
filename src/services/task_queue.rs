use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::error::CoreError;

/// Scheduling priority for queued tasks. Higher priorities run first;
/// equal priorities run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Low,
    Normal,
    High,
}

type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedTask {
    priority: TaskPriority,
    seq: u64,
    future: TaskFuture,
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
        // Max-heap: higher priority wins, then earlier submission.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Awaitable handle for a queued task's result.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Resolves once the task has run; `Err(QueueClosed)` if the queue
    /// shut down before the task produced a result.
    pub async fn wait(self) -> Result<T, CoreError> {
        self.rx.await.map_err(|_| CoreError::QueueClosed)
    }
}

/// Bounded-concurrency task runner.
///
/// Tasks are queued through an unbounded channel into a scheduler task
/// that releases at most `concurrency` of them at a time. Dropping the
/// queue closes intake; tasks already accepted still drain.
pub struct BackgroundTaskQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    seq: AtomicU64,
}

impl BackgroundTaskQueue {
    /// Spawn the scheduler. Must be called within a tokio runtime.
    pub fn new(concurrency: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        tokio::spawn(run_scheduler(rx, semaphore));
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Queue a future for execution. The returned handle resolves with the
    /// future's output once it has been scheduled and run.
    pub fn add<T, F>(&self, priority: TaskPriority, future: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let task = QueuedTask {
            priority,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            future: Box::pin(async move {
                let _ = result_tx.send(future.await);
            }),
        };
        // A send failure means the scheduler is gone; the dropped oneshot
        // sender surfaces that as QueueClosed on the handle.
        let _ = self.tx.send(task);
        TaskHandle { rx: result_rx }
    }
}

async fn run_scheduler(mut rx: mpsc::UnboundedReceiver<QueuedTask>, semaphore: Arc<Semaphore>) {
    let mut pending: BinaryHeap<QueuedTask> = BinaryHeap::new();
    let mut open = true;

    loop {
        while let Ok(task) = rx.try_recv() {
            pending.push(task);
        }

        if pending.is_empty() {
            if !open {
                break;
            }
            match rx.recv().await {
                Some(task) => pending.push(task),
                None => open = false,
            }
            continue;
        }

        if open {
            tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    let Ok(permit) = permit else { break };
                    if let Some(task) = pending.pop() {
                        tokio::spawn(async move {
                            task.future.await;
                            drop(permit);
                        });
                    }
                }
                incoming = rx.recv() => match incoming {
                    Some(task) => pending.push(task),
                    None => open = false,
                },
            }
        } else {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if let Some(task) = pending.pop() {
                tokio::spawn(async move {
                    task.future.await;
                    drop(permit);
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn runs_tasks_and_returns_results() {
        let queue = BackgroundTaskQueue::new(3);
        let handle = queue.add(TaskPriority::Normal, async { 21 * 2 });
        assert_eq!(handle.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let queue = BackgroundTaskQueue::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let active = active.clone();
                let peak = peak.clone();
                queue.add(TaskPriority::Normal, async move {
                    let now = active.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                    peak.fetch_max(now, AtomicOrdering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    active.fetch_sub(1, AtomicOrdering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert!(peak.load(AtomicOrdering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn higher_priority_runs_first() {
        let queue = BackgroundTaskQueue::new(1);
        let release = Arc::new(Notify::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        // Occupy the single slot so the next two tasks queue up together.
        let blocker = {
            let release = release.clone();
            queue.add(TaskPriority::Normal, async move {
                release.notified().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let low = {
            let order = order.clone();
            queue.add(TaskPriority::Low, async move {
                order.lock().await.push("low");
            })
        };
        let high = {
            let order = order.clone();
            queue.add(TaskPriority::High, async move {
                order.lock().await.push("high");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        blocker.wait().await.unwrap();
        high.wait().await.unwrap();
        low.wait().await.unwrap();
        assert_eq!(*order.lock().await, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let queue = BackgroundTaskQueue::new(1);
        let release = Arc::new(Notify::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let blocker = {
            let release = release.clone();
            queue.add(TaskPriority::Normal, async move {
                release.notified().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let order = order.clone();
                queue.add(TaskPriority::Normal, async move {
                    order.lock().await.push(i);
                })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        blocker.wait().await.unwrap();
        for handle in handles {
            handle.wait().await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn queued_tasks_drain_after_drop() {
        let queue = BackgroundTaskQueue::new(1);
        let handle = queue.add(TaskPriority::Normal, async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            7
        });
        drop(queue);
        assert_eq!(handle.wait().await.unwrap(), 7);
    }
}
