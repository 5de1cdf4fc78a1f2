//! Priority work-queue pool with pluggable worker providers.
//!
//! A [`WorkPool`] accepts small units of work ([`Item`]s), sorts them into
//! three priority bands, and arranges for a bounded number of worker
//! executions to drain them. The pool never spawns threads itself: a
//! [`Provider`] converts each slot grant into a real execution of
//! [`WorkPool::run_worker`], whether that is a fresh OS thread, a task on
//! some host scheduler, or the calling thread in a test. [`ThreadProvider`]
//! is the bundled thread-per-grant implementation.
//!
//! Shutdown is deterministic: once [`shutdown`](WorkPool::shutdown) or
//! [`shutdown_now`](WorkPool::shutdown_now) has been requested no new work
//! is admitted, every accepted item is still released exactly once, and
//! the optional shutdown handler runs exactly once when the last worker
//! slot drains out. [`close`](WorkPool::close) finishes the teardown
//! synchronously on the calling thread.
//!
//! ```
//! use work_pool::{Builder, Priority, ThreadProvider};
//!
//! let provider = ThreadProvider::new();
//! let pool = Builder::new().max_threads(2).build(provider.clone()).unwrap();
//! provider.bind(&pool);
//!
//! pool.submit_fn(Priority::Normal, || println!("hello from the pool")).unwrap();
//!
//! pool.shutdown();
//! pool.close();
//! ```

#![deny(warnings, missing_docs, missing_debug_implementations)]

mod error;
mod item;
mod list;
mod pool;
mod provider;
mod queue;

pub use error::{BuildError, SubmitError};
pub use item::{Item, Priority};
pub use pool::{Builder, WorkPool};
pub use provider::{Provider, ThreadConfig, ThreadProvider};
pub use queue::Ticket;
