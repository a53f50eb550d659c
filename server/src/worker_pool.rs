//! Dynamically sized worker pool executing submitted tasks.
//!
//! The pool keeps between `min_workers` and `max_workers` tokio tasks draining
//! a bounded queue. `submit` never blocks: it either enqueues or reports
//! back-pressure with `PoolError::QueueFull`. The pool grows on queue pressure
//! and shrinks through idle timeouts, never dropping below the floor.

use futures_util::FutureExt;
use log::{debug, warn};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// A unit of work accepted by the pool.
type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Worker pool sizing knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    /// How long a worker waits for a task before it may retire.
    pub idle_timeout: Duration,
    /// Queue fill ratio above which a submit spawns another worker, in (0, 1].
    pub expand_threshold: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            min_workers: 5,
            max_workers: 50,
            queue_capacity: 1000,
            idle_timeout: Duration::from_secs(30),
            expand_threshold: 0.8,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("task queue is full")]
    QueueFull,
    #[error("worker pool is stopped")]
    Stopped,
}

/// Point-in-time snapshot of the pool counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub min: usize,
    pub max: usize,
    pub current: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
}

struct PoolInner {
    config: PoolConfig,
    queue_tx: mpsc::Sender<Task>,
    queue_rx: Mutex<mpsc::Receiver<Task>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    current: AtomicUsize,
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicU64,
    stopped: AtomicBool,
    next_worker_id: AtomicUsize,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Cheap-to-clone handle to the pool; all clones share the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> WorkerPool {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        WorkerPool {
            inner: Arc::new(PoolInner {
                config,
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
                shutdown_tx,
                shutdown_rx,
                current: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
                next_worker_id: AtomicUsize::new(1),
                workers: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawns the minimum worker set. Requires a running tokio runtime.
    pub fn start(&self) {
        for _ in 0..self.inner.config.min_workers {
            Self::spawn_worker(&self.inner);
        }
        debug!("worker pool started with {} workers", self.inner.config.min_workers);
    }

    /// Enqueues a task without blocking.
    ///
    /// A successful submit guarantees the task runs exactly once, unless the
    /// pool is stopped first (then it runs zero times).
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(PoolError::Stopped);
        }

        // The counter must rise before the task is visible to a worker;
        // otherwise a fast dequeue decrements first and `queued` wraps.
        self.inner.queued.fetch_add(1, Ordering::AcqRel);
        match self.inner.queue_tx.try_send(Box::pin(task)) {
            Ok(()) => {
                self.maybe_expand();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.queued.fetch_sub(1, Ordering::AcqRel);
                Err(PoolError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.inner.queued.fetch_sub(1, Ordering::AcqRel);
                Err(PoolError::Stopped)
            }
        }
    }

    pub fn stats(&self) -> PoolState {
        let inner = &self.inner;
        PoolState {
            min: inner.config.min_workers,
            max: inner.config.max_workers,
            current: inner.current.load(Ordering::Acquire),
            active: inner.active.load(Ordering::Acquire),
            queued: inner.queued.load(Ordering::Acquire),
            completed: inner.completed.load(Ordering::Acquire),
        }
    }

    /// Stops the pool: new submits are refused, queued-but-unstarted tasks are
    /// abandoned, running tasks finish. Waits for workers up to
    /// `drain_deadline`.
    pub async fn stop(&self, drain_deadline: Duration) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = lock_workers(&self.inner);
            workers.drain(..).collect()
        };

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(drain_deadline, drain).await.is_err() {
            warn!("worker pool drain deadline expired with workers still running");
        }

        // Abandoned tasks are dropped now so the resources they captured
        // (sockets, buffers) are released with the pool, not after it.
        let mut queue = self.inner.queue_rx.lock().await;
        while queue.try_recv().is_ok() {
            self.inner.queued.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn maybe_expand(&self) {
        let inner = &self.inner;
        let queued = inner.queued.load(Ordering::Acquire);
        let pressure = queued as f64 / inner.config.queue_capacity as f64;
        if pressure > inner.config.expand_threshold {
            Self::spawn_worker(inner);
        }
    }

    /// Reserves a slot in `current` and spawns a worker into it. Returns false
    /// when the pool is already at its ceiling.
    fn spawn_worker(inner: &Arc<PoolInner>) -> bool {
        let mut current = inner.current.load(Ordering::Acquire);
        loop {
            if current >= inner.config.max_workers {
                return false;
            }
            match inner.current.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        let id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(worker_loop(Arc::clone(inner), id));
        lock_workers(inner).push(handle);
        true
    }
}

fn lock_workers(inner: &PoolInner) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
    inner.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Wakeup {
    Task(Task),
    Idle,
    Shutdown,
}

async fn worker_loop(inner: Arc<PoolInner>, id: usize) {
    let mut shutdown_rx = inner.shutdown_rx.clone();
    debug!("worker {} started", id);

    loop {
        let wakeup = {
            let mut queue = inner.queue_rx.lock().await;
            tokio::select! {
                _ = shutdown_rx.changed() => Wakeup::Shutdown,
                task = queue.recv() => match task {
                    Some(task) => Wakeup::Task(task),
                    None => Wakeup::Shutdown,
                },
                _ = tokio::time::sleep(inner.config.idle_timeout) => Wakeup::Idle,
            }
        };

        match wakeup {
            Wakeup::Task(task) => {
                inner.queued.fetch_sub(1, Ordering::AcqRel);
                inner.active.fetch_add(1, Ordering::AcqRel);
                if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                    warn!("worker {}: task panicked", id);
                }
                inner.active.fetch_sub(1, Ordering::AcqRel);
                inner.completed.fetch_add(1, Ordering::AcqRel);
            }
            Wakeup::Idle => {
                if try_retire(&inner) {
                    debug!("worker {} retired after {:?} idle", id, inner.config.idle_timeout);
                    return;
                }
            }
            Wakeup::Shutdown => {
                inner.current.fetch_sub(1, Ordering::AcqRel);
                debug!("worker {} stopped", id);
                return;
            }
        }
    }
}

/// Atomically gives up this worker's slot, refusing to shrink below the floor.
fn try_retire(inner: &PoolInner) -> bool {
    let mut current = inner.current.load(Ordering::Acquire);
    loop {
        if current <= inner.config.min_workers {
            return false;
        }
        match inner.current.compare_exchange_weak(
            current,
            current - 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}
