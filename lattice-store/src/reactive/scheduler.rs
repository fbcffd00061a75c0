//! Commit Scheduler
//!
//! The scheduler is the cooperative task queue that deferred commits run on.
//! It plays the role of a microtask queue: work enqueued during the current
//! synchronous call stack runs only when the owner drains the queue, after
//! that work has finished and before anything unrelated is started.
//!
//! # Algorithm
//!
//! 1. A store's first effective write since its last commit enqueues one
//!    commit task.
//! 2. Further writes in the same tick join the pending batch and enqueue
//!    nothing.
//! 3. [`Scheduler::run_until_idle`] pops tasks in FIFO order. Tasks enqueued
//!    while draining (for example by a watcher that writes to a store) run
//!    in the same drain, after everything that was already queued.
//!
//! A drain stops early once the configured task budget is spent, which keeps
//! a watcher that writes on every commit from spinning forever. Whatever is
//! left stays queued for the next drain.
//!
//! # Thread Safety
//!
//! The queue is guarded by a mutex, so a scheduler can be shared across
//! threads, but ordering guarantees assume a single driving thread. No lock
//! is held while a task runs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{trace, warn};

/// Default number of tasks a single drain may execute.
pub const DEFAULT_TASK_BUDGET: usize = 10_000;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Tuning knobs for a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum tasks run by one call to [`Scheduler::run_until_idle`].
    pub task_budget: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_budget: DEFAULT_TASK_BUDGET,
        }
    }
}

/// Cooperative FIFO queue for deferred commits.
///
/// Cloning a scheduler yields another handle to the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    queue: Mutex<VecDeque<Task>>,
    draining: AtomicBool,
    config: SchedulerConfig,
}

/// Clears the draining flag when a drain ends, even by panic.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler with the given configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.inner.config
    }

    /// Queue a task to run on the next drain.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.lock().push_back(Box::new(task));
    }

    /// Run queued tasks until the queue is empty or the budget is spent.
    ///
    /// Returns the number of tasks executed. Calling this from inside a
    /// running task is a no-op that returns 0; the outer drain picks up
    /// anything the task enqueued.
    pub fn run_until_idle(&self) -> usize {
        if self.inner.draining.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let _guard = DrainGuard(&self.inner.draining);

        let budget = self.inner.config.task_budget;
        let mut ran = 0;

        while ran < budget {
            // Pop in its own statement so the lock is released before the
            // task runs; tasks are free to enqueue more work.
            let task = self.inner.queue.lock().pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            ran += 1;
        }

        let left = self.pending();
        if left > 0 {
            warn!(budget, left, "scheduler task budget exhausted, deferring remaining tasks");
        } else {
            trace!(ran, "scheduler idle");
        }

        ran
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_idle(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("config", &self.inner.config)
            .finish()
    }
}
