//! Reactive Primitives
//!
//! This module implements the machinery behind a store: write batching,
//! memoized getters, commit watchers and the scheduler that defers commits.
//!
//! # Concepts
//!
//! ## Batching
//!
//! All writes go through a [`StateProxy`]. Writes made during one tick are
//! collected into a single batch and committed once, when the
//! [`Scheduler`] next drains. Readers see writes immediately; watchers see
//! one `(old, new)` pair per batch.
//!
//! ## Getters
//!
//! A getter is a derived value held in a [`GetterCache`]. It is computed on
//! first read and memoized until the next commit invalidates the cache.
//!
//! ## Watchers
//!
//! A [`WatcherRegistry`] holds global watchers, which see every commit, and
//! field watchers, which see only commits that wrote their field.
//!
//! # Implementation Notes
//!
//! Commits are deferred to a cooperative queue rather than run inline, the
//! same way Vue and Pinia use the microtask queue. Nothing here spawns
//! threads.

mod context;
mod getters;
mod proxy;
mod scheduler;
mod subscriber;
mod watchers;

pub use getters::{GetterCache, GetterFn, GetterState};
pub use proxy::{BatchStatus, ChangedFields, Commit, CommitHandler, StateProxy};
pub use scheduler::{Scheduler, SchedulerConfig, Task, DEFAULT_TASK_BUDGET};
pub use subscriber::{Subscription, WatcherId};
pub use watchers::{DispatchReport, GlobalWatcher, KeyWatcher, WatcherRegistry};

pub(crate) use subscriber::WatchTarget;
