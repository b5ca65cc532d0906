//! Fixed-size worker pool with polling admission control.
//!
//! Submitting blocks the caller while `active + queued` is at the ceiling,
//! re-checking every poll interval. Nothing is ever rejected while the pool
//! runs; callers are simply slowed down to the pool's pace.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::config::PoolConfig;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was dropped before it ran")]
    Dropped,
    #[error("pool is shut down")]
    Shutdown,
}

/// Result slot of a submitted task.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the task has run (or was discarded).
    pub fn join(self) -> Result<T, TaskError> {
        self.rx.recv().unwrap_or(Err(TaskError::Dropped))
    }
}

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    work_ready: Condvar,
    active: AtomicUsize,
    completed: AtomicU64,
    shutdown: AtomicBool,
    live_workers: Mutex<usize>,
    terminated: Condvar,
}

pub struct BoundedPool {
    name: Arc<str>,
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    ceiling: usize,
    poll_interval: Duration,
}

impl BoundedPool {
    /// Pool of `workers` threads with the default ceiling of twice that.
    pub fn new(name: &str, workers: usize) -> Result<Self> {
        Self::with_config(name, &PoolConfig::new(workers))
    }

    pub fn with_config(name: &str, config: &PoolConfig) -> Result<Self> {
        ensure!(config.workers > 0, "pool {name} needs at least one worker");
        ensure!(
            config.ceiling > config.workers,
            "pool {name}: ceiling {} must exceed worker count {}",
            config.ceiling,
            config.workers
        );

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            work_ready: Condvar::new(),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            live_workers: Mutex::new(0),
            terminated: Condvar::new(),
        });
        let pool = Self {
            name: Arc::from(name),
            shared,
            workers: Mutex::new(Vec::with_capacity(config.workers)),
            ceiling: config.ceiling,
            poll_interval: config.poll_interval,
        };

        for n in 1..=config.workers {
            let shared = Arc::clone(&pool.shared);
            *pool.shared.live_workers.lock() += 1;
            let spawned = thread::Builder::new()
                .name(format!("{name}-{n}"))
                .spawn(move || worker_loop(shared));
            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    *pool.shared.live_workers.lock() -= 1;
                    pool.shutdown();
                    return Err(e).with_context(|| format!("spawning worker {name}-{n}"));
                }
            }
        }
        tracing::debug!(pool = name, workers = config.workers, ceiling = config.ceiling, "pool started");
        Ok(pool)
    }

    /// Runs `task` on the pool, blocking first while the pool is at its ceiling.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let rejected = tx.clone();
        let name = Arc::clone(&self.name);
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                let msg = panic_message(payload);
                tracing::error!(pool = %name, "task panicked: {msg}");
                TaskError::Panicked(msg)
            });
            let _ = tx.send(result);
        });
        if !self.enqueue(job) {
            let _ = rejected.send(Err(TaskError::Shutdown));
        }
        TaskHandle { rx }
    }

    /// Fire-and-forget variant of [`submit`](Self::submit).
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = Arc::clone(&self.name);
        let job: Job = Box::new(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!(pool = %name, "task panicked: {}", panic_message(payload));
            }
        });
        if !self.enqueue(job) {
            tracing::warn!(pool = %self.name, "task submitted after shutdown was dropped");
        }
    }

    fn enqueue(&self, job: Job) -> bool {
        loop {
            {
                let mut queue = self.shared.queue.lock();
                if self.shared.shutdown.load(Ordering::SeqCst) {
                    return false;
                }
                if self.shared.active.load(Ordering::SeqCst) + queue.len() < self.ceiling {
                    queue.push_back(job);
                    self.shared.work_ready.notify_one();
                    return true;
                }
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Stops admitting work; queued tasks still run.
    pub fn shutdown(&self) {
        let _queue = self.shared.queue.lock();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.work_ready.notify_all();
    }

    /// Stops admitting work and discards every task that has not started.
    /// Returns the number of discarded tasks.
    pub fn shutdown_now(&self) -> usize {
        let mut queue = self.shared.queue.lock();
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let dropped = queue.len();
        queue.clear();
        self.shared.work_ready.notify_all();
        dropped
    }

    /// Waits for all workers to exit. Only returns `true` after a shutdown
    /// was requested; `None` waits without limit.
    pub fn await_termination(&self, timeout: Option<Duration>) -> bool {
        let mut live = self.shared.live_workers.lock();
        match timeout {
            None => {
                while *live > 0 {
                    self.shared.terminated.wait(&mut live);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while *live > 0 {
                    if self.shared.terminated.wait_until(&mut live, deadline).timed_out() {
                        return *live == 0;
                    }
                }
                true
            }
        }
    }

    /// Graceful shutdown, unbounded wait, then a forced shutdown for anything left.
    pub fn shutdown_and_await(&self) {
        self.shutdown();
        self.await_termination(None);
        let stragglers = self.shutdown_now();
        if stragglers > 0 {
            tracing::warn!(pool = %self.name, stragglers, "dropped pending tasks");
        }
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        tracing::debug!(pool = %self.name, completed = self.completed_count(), "pool terminated");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn queued_count(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for BoundedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.pop_front() {
                    // counted while the queue lock is held so active + queued never dips
                    shared.active.fetch_add(1, Ordering::SeqCst);
                    break Some(job);
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                shared.work_ready.wait(&mut queue);
            }
        };
        let Some(job) = job else { break };
        job();
        shared.active.fetch_sub(1, Ordering::SeqCst);
        shared.completed.fetch_add(1, Ordering::SeqCst);
    }

    let mut live = shared.live_workers.lock();
    *live -= 1;
    if *live == 0 {
        shared.terminated.notify_all();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast(workers: usize, ceiling: usize) -> PoolConfig {
        PoolConfig::new(workers)
            .with_ceiling(ceiling)
            .with_poll_interval(Duration::from_millis(2))
    }

    #[test]
    fn ceiling_must_exceed_workers() {
        assert!(BoundedPool::with_config("bad", &fast(4, 4)).is_err());
        assert!(BoundedPool::with_config("ok", &fast(4, 5)).is_ok());
    }

    #[test]
    fn admission_never_exceeds_ceiling() {
        let pool = Arc::new(BoundedPool::with_config("adm", &fast(2, 5)).unwrap());
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let sampler = {
            let pool = Arc::clone(&pool);
            let peak = Arc::clone(&peak);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let load = {
                        let queue = pool.shared.queue.lock();
                        pool.shared.active.load(Ordering::SeqCst) + queue.len()
                    };
                    peak.fetch_max(load, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };

        let submitters: Vec<_> = (0..3)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    for _ in 0..10 {
                        let done = Arc::clone(&done);
                        pool.execute(move || {
                            thread::sleep(Duration::from_millis(3));
                            done.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for s in submitters {
            s.join().unwrap();
        }

        pool.shutdown_and_await();
        stop.store(true, Ordering::SeqCst);
        sampler.join().unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 30);
        assert_eq!(pool.completed_count(), 30);
        assert!(peak.load(Ordering::SeqCst) <= 5, "peak load {}", peak.load(Ordering::SeqCst));
    }

    #[test]
    fn submit_returns_results() {
        let pool = BoundedPool::new("calc", 3).unwrap();
        let handles: Vec<_> = (0..20u64).map(|i| pool.submit(move || i * i)).collect();
        let sum: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(sum, (0..20u64).map(|i| i * i).sum::<u64>());
        pool.shutdown_and_await();
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = BoundedPool::new("boom", 1).unwrap();
        let bad = pool.submit(|| -> u32 { panic!("bad game") });
        let good = pool.submit(|| 7u32);
        assert_eq!(bad.join(), Err(TaskError::Panicked("bad game".into())));
        assert_eq!(good.join(), Ok(7));
        pool.shutdown_and_await();
    }

    #[test]
    fn workers_are_named() {
        let pool = BoundedPool::new("file", 1).unwrap();
        let name = pool.submit(|| thread::current().name().map(str::to_string)).join().unwrap();
        assert_eq!(name.as_deref(), Some("file-1"));
        pool.shutdown_and_await();
    }

    #[test]
    fn forced_shutdown_drops_pending() {
        let pool = BoundedPool::with_config("slow", &fast(1, 10)).unwrap();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let first = pool.submit(move || {
            let _ = gate_rx.recv();
        });
        // wait for the worker to pick up the blocking task
        while pool.active_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let pending: Vec<_> = (0..3).map(|i| pool.submit(move || i)).collect();
        assert_eq!(pool.shutdown_now(), 3);
        gate_tx.send(()).unwrap();

        assert!(pool.await_termination(Some(Duration::from_secs(5))));
        assert_eq!(first.join(), Ok(()));
        for h in pending {
            assert_eq!(h.join(), Err(TaskError::Dropped));
        }
        assert_eq!(pool.submit(|| 1).join(), Err(TaskError::Shutdown));
    }

    #[test]
    fn await_termination_times_out_while_running() {
        let pool = BoundedPool::new("idle", 1).unwrap();
        assert!(!pool.await_termination(Some(Duration::from_millis(20))));
        pool.shutdown();
        assert!(pool.await_termination(Some(Duration::from_secs(5))));
    }
}
