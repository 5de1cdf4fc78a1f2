//! Worker acquisition: the pool asks a provider for executions of its
//! dequeue entry point instead of spawning threads itself.

use std::fmt;
use std::mem;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::pool::WorkPool;

/// Source of worker executions for a pool.
///
/// The pool never creates threads. Whenever it wants one more execution of
/// [`WorkPool::run_worker`] it asks its provider, which may run the entry
/// point on a fresh OS thread, a host scheduler, or anything else that
/// eventually calls it. Implementations must be thread-safe and reentrant:
/// the pool may call `submit` from any thread, including one of the
/// provider's own workers.
pub trait Provider: Send + Sync + 'static {
    /// Arrange for one additional execution of the pool's worker entry
    /// point, now or soon. Returning `false` means no execution will
    /// happen and the pool treats the slot grant as revoked.
    ///
    /// Called with no pool lock held; may block briefly.
    fn submit(&self) -> bool;

    /// Advisory stall report: `threads` slots are granted but only
    /// `active_threads` of them have entered the drain loop within the
    /// keep-alive window. The provider may spawn additional help or ignore
    /// this.
    fn submit_lost_work(&self, active_threads: u32, threads: u32);

    /// Stop producing worker executions. Once this returns, no further
    /// call to [`WorkPool::run_worker`] may occur.
    fn close(&self);
}

/// Worker-thread options for [`ThreadProvider`].
#[derive(Debug, Clone, Default)]
pub struct ThreadConfig {
    /// Prefix for worker thread names; threads are named `{prefix}{n}`.
    pub name_prefix: Option<String>,
    /// Stack size for worker threads, in bytes.
    pub stack_size: Option<usize>,
}

/// A [`Provider`] that spawns one OS thread per granted slot.
///
/// The provider has to be bound to the pool it serves after the pool is
/// built; until then every grant is refused:
///
/// ```
/// use work_pool::{Builder, ThreadProvider};
///
/// let provider = ThreadProvider::new();
/// let pool = Builder::new().max_threads(4).build(provider.clone()).unwrap();
/// provider.bind(&pool);
/// ```
///
/// `close` drops the pool handle first and then joins every thread it
/// spawned; it relies on [`WorkPool::close`]'s precondition that nothing
/// submits concurrently once the teardown has begun.
#[derive(Clone)]
pub struct ThreadProvider {
    inner: Arc<Shared>,
}

struct Shared {
    config: ThreadConfig,
    pool: Mutex<Option<WorkPool>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_thread_id: AtomicUsize,
}

impl ThreadProvider {
    /// Create a provider with default thread options.
    pub fn new() -> ThreadProvider {
        ThreadProvider::with_config(ThreadConfig::default())
    }

    /// Create a provider with explicit thread options.
    pub fn with_config(config: ThreadConfig) -> ThreadProvider {
        ThreadProvider {
            inner: Arc::new(Shared {
                config,
                pool: Mutex::new(None),
                workers: Mutex::new(Vec::new()),
                next_thread_id: AtomicUsize::new(1),
            }),
        }
    }

    /// Attach the pool this provider feeds. Grants made before `bind` are
    /// refused.
    pub fn bind(&self, pool: &WorkPool) {
        *self.inner.pool.lock().unwrap() = Some(pool.clone());
    }

    fn spawn_worker(&self) -> bool {
        let pool = match self.inner.pool.lock().unwrap().clone() {
            Some(pool) => pool,
            None => return false,
        };

        let mut builder = thread::Builder::new();
        if let Some(stack_size) = self.inner.config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        if let Some(prefix) = &self.inner.config.name_prefix {
            let id = self.inner.next_thread_id.fetch_add(1, Relaxed);
            builder = builder.name(format!("{}{}", prefix, id));
        }

        match builder.spawn(move || pool.run_worker()) {
            Ok(handle) => {
                self.inner.workers.lock().unwrap().push(handle);
                true
            }
            Err(err) => {
                warn!(%err, "failed to spawn a worker thread");
                false
            }
        }
    }
}

impl Default for ThreadProvider {
    fn default() -> ThreadProvider {
        ThreadProvider::new()
    }
}

impl fmt::Debug for ThreadProvider {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ThreadProvider")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Provider for ThreadProvider {
    fn submit(&self) -> bool {
        self.spawn_worker()
    }

    fn submit_lost_work(&self, active_threads: u32, threads: u32) {
        warn!(
            active_threads,
            threads, "granted workers went missing, spawning replacements"
        );

        // Surplus executions exit the worker entry point immediately, so
        // replacing every missing grant cannot overshoot.
        for _ in active_threads..threads {
            if !self.spawn_worker() {
                break;
            }
        }
    }

    fn close(&self) {
        // Clear the pool handle first so no new thread can be spawned,
        // then wait for everything already spawned to finish.
        self.inner.pool.lock().unwrap().take();

        let workers = mem::take(&mut *self.inner.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }
}
