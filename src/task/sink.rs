//! A bounded pool of named worker threads executing submitted tasks by
//! priority, plus one dedicated thread draining a separate cancellation
//! queue so cleanup work never waits behind user-visible tasks (spec
//! §4.D). Grounded on `ThreadPoolTaskScheduler.cpp`'s `QueueImpl`/worker
//! loop shape, translated from its condition-variable `SyncQueue` to a
//! `parking_lot::Condvar` guarding a [`PriorityQueue`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::context::{CancellationContext, CancellationToken, LoggingContext};
use crate::task::priority_queue::PriorityQueue;

/// Priority used by [`TaskSink`]'s default-priority submissions.
pub const NORMAL_PRIORITY: i32 = 0;

type BoxedTask = Box<dyn FnOnce(&CancellationContext) + Send + 'static>;

/// Registry of every job currently queued or executing, keyed by submission
/// id, so [`TaskSink::cancel_all`] can reach contexts it does not otherwise
/// hold a reference to. Cleared as each job finishes.
type InflightRegistry = Arc<DashMap<u64, CancellationContext>>;

struct Job {
    id: u64,
    task: BoxedTask,
    context: CancellationContext,
    logging: LoggingContext,
}

struct Queue {
    state: Mutex<QueueState>,
    condvar: Condvar,
}

struct QueueState {
    items: PriorityQueue<Job>,
    closed: bool,
}

impl Queue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: PriorityQueue::new(),
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    fn push(&self, priority: i32, job: Job) {
        let mut state = self.state.lock();
        state.items.push(priority, job);
        self.condvar.notify_one();
    }

    /// Blocks until a job is available or the queue is closed (returns
    /// `None` in the latter case, mirroring `SyncQueue::Pull`'s `false`).
    fn pull(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.items.pop() {
                return Some(job);
            }
            if state.closed {
                return None;
            }
            self.condvar.wait(&mut state);
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.condvar.notify_all();
    }
}

/// A submission interface to a fixed pool of worker threads (spec §4.D).
/// `N = 1` is valid and yields strictly serial execution of user-visible
/// work (the cancellation queue still runs on its own thread).
pub struct TaskSink {
    queue: Arc<Queue>,
    cancel_queue: Arc<Queue>,
    workers: Vec<std::thread::JoinHandle<()>>,
    inflight: InflightRegistry,
    next_id: AtomicU64,
}

impl TaskSink {
    pub fn new(thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let queue = Arc::new(Queue::new());
        let cancel_queue = Arc::new(Queue::new());
        let inflight: InflightRegistry = Arc::new(DashMap::new());

        let mut workers = Vec::with_capacity(thread_count + 1);
        for idx in 0..thread_count {
            let queue = Arc::clone(&queue);
            let inflight = Arc::clone(&inflight);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("olp-pool-{idx}"))
                    .spawn(move || worker_loop(queue, inflight))
                    .expect("failed to spawn olp task sink worker thread"),
            );
        }

        {
            let cancel_queue = Arc::clone(&cancel_queue);
            let inflight = Arc::clone(&inflight);
            workers.push(
                std::thread::Builder::new()
                    .name("olp-pool-cancel".to_string())
                    .spawn(move || worker_loop(cancel_queue, inflight))
                    .expect("failed to spawn olp cancellation worker thread"),
            );
        }

        Self {
            queue,
            cancel_queue,
            workers,
            inflight,
            next_id: AtomicU64::new(0),
        }
    }

    /// Enqueues `task(context)` at `priority`; `callback(result)` runs on a
    /// pool thread once `task` completes. Returns a token that cancels the
    /// task's context. The ambient `tracing` span at call time is captured
    /// and restored while the task and its callback run.
    pub fn submit<R, F, C>(&self, task: F, callback: C, priority: i32, parent: &CancellationContext) -> CancellationToken
    where
        R: Send + 'static,
        F: FnOnce(&CancellationContext) -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        let context = parent.child();
        let token = CancellationToken::new(context.clone());
        let logging = LoggingContext::capture();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let boxed: BoxedTask = Box::new(move |ctx: &CancellationContext| {
            let result = task(ctx);
            callback(result);
        });

        self.inflight.insert(id, context.clone());
        self.queue.push(
            priority,
            Job {
                id,
                task: boxed,
                context,
                logging,
            },
        );
        token
    }

    /// Enqueues cleanup work that must not wait behind user-visible tasks.
    pub fn submit_cancellation(&self, task: impl FnOnce(&CancellationContext) + Send + 'static) {
        let context = CancellationContext::new();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.inflight.insert(id, context.clone());
        self.cancel_queue.push(
            NORMAL_PRIORITY,
            Job {
                id,
                task: Box::new(task),
                context,
                logging: LoggingContext::capture(),
            },
        );
    }

    /// Signals every outstanding task's context; workers drain quickly as
    /// each task cooperatively observes cancellation.
    pub fn cancel_all(&self) {
        for entry in self.inflight.iter() {
            entry.value().cancel();
        }
    }
}

impl Drop for TaskSink {
    fn drop(&mut self) {
        self.queue.close();
        self.cancel_queue.close();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(queue: Arc<Queue>, inflight: InflightRegistry) {
    while let Some(job) = queue.pull() {
        job.logging.restore(|| {
            (job.task)(&job.context);
        });
        inflight.remove(&job.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::sync::mpsc;

    #[test]
    fn runs_submitted_task_and_callback() {
        let sink = TaskSink::new(2);
        let parent = CancellationContext::new();
        let (tx, rx) = mpsc::channel();
        sink.submit(
            |_ctx| 21 + 21,
            move |result: i32| {
                tx.send(result).unwrap();
            },
            NORMAL_PRIORITY,
            &parent,
        );
        assert_eq!(rx.recv().unwrap(), 42);
    }

    #[test]
    fn single_thread_pool_is_strictly_serial() {
        let sink = TaskSink::new(1);
        let parent = CancellationContext::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();

        for i in 0..5 {
            let order = Arc::clone(&order);
            let tx = tx.clone();
            sink.submit(
                move |_ctx| {
                    order.lock().push(i);
                },
                move |_: ()| {
                    tx.send(()).unwrap();
                },
                NORMAL_PRIORITY,
                &parent,
            );
        }
        for _ in 0..5 {
            rx.recv().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn cancelling_token_is_observable_inside_task() {
        let sink = TaskSink::new(1);
        let parent = CancellationContext::new();
        let seen_cancelled = Arc::new(AtomicBool::new(false));
        let seen2 = Arc::clone(&seen_cancelled);
        let started = Arc::new(AtomicU32::new(0));
        let started2 = Arc::clone(&started);
        let (tx, rx) = mpsc::channel();

        let token = sink.submit(
            move |ctx: &CancellationContext| {
                started2.fetch_add(1, Ordering::SeqCst);
                // Cooperative loop a real task would perform.
                while !ctx.is_cancelled() {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
                seen2.store(true, Ordering::SeqCst);
            },
            move |_: ()| {
                tx.send(()).unwrap();
            },
            NORMAL_PRIORITY,
            &parent,
        );

        while started.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        token.cancel();
        rx.recv().unwrap();
        assert!(seen_cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_all_signals_every_outstanding_task_context() {
        let sink = TaskSink::new(2);
        let parent = CancellationContext::new();
        let started = Arc::new(AtomicU32::new(0));
        let seen_cancelled = Arc::new(AtomicU32::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..3 {
            let started = Arc::clone(&started);
            let seen_cancelled = Arc::clone(&seen_cancelled);
            let tx = tx.clone();
            sink.submit(
                move |ctx: &CancellationContext| {
                    started.fetch_add(1, Ordering::SeqCst);
                    while !ctx.is_cancelled() {
                        std::thread::sleep(std::time::Duration::from_millis(5));
                    }
                    seen_cancelled.fetch_add(1, Ordering::SeqCst);
                },
                move |_: ()| tx.send(()).unwrap(),
                NORMAL_PRIORITY,
                &parent,
            );
        }

        while started.load(Ordering::SeqCst) < 2 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        sink.cancel_all();
        for _ in 0..3 {
            rx.recv().unwrap();
        }
        assert_eq!(seen_cancelled.load(Ordering::SeqCst), 3);
        assert!(sink.inflight.is_empty());
    }
}
