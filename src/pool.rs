//! The pool core: one mutex-guarded state block and the algorithms that
//! keep the queue, the slot counters, and the shutdown lifecycle
//! consistent across every entry and exit path.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{BuildError, SubmitError};
use crate::item::{FnItem, Item, Priority};
use crate::provider::Provider;
use crate::queue::{PriorityQueue, Ticket};

/// How long granted slots may sit idle before the keep-alive probe tells
/// the provider about lost work.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(150_000);

type ShutdownHandler = Box<dyn FnOnce() + Send + 'static>;

// Lifecycle of a pool.
//
//   None:     accepting and running work
//   Wait:     no new items; queued items still run their actions
//   Abort:    no new items; queued items are released without running
//   Complete: closed, nothing runs anymore
//
// None -> Wait and None -> Abort happen in `shutdown`/`shutdown_now` (or
// `close`, which coerces None to Abort). Complete is set only by `close`,
// once the queue is empty and no slot is active. The shutdown handler
// fires exactly once, on the transition that observes the pool quiescent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    None,
    Wait,
    Abort,
    Complete,
}

/// Pool configuration.
///
/// ```
/// use work_pool::{Builder, ThreadProvider};
///
/// let provider = ThreadProvider::new();
/// let pool = Builder::new()
///     .max_threads(8)
///     .on_shutdown(|| println!("drained"))
///     .build(provider.clone())
///     .unwrap();
/// provider.bind(&pool);
/// ```
pub struct Builder {
    max_threads: u32,
    keep_alive: Duration,
    shutdown_handler: Option<ShutdownHandler>,
}

// ===== impl Builder =====

impl Builder {
    /// Returns a builder with default values: one slot per CPU, the
    /// standard keep-alive window, and no shutdown handler.
    pub fn new() -> Builder {
        Builder {
            max_threads: num_cpus::get() as u32,
            keep_alive: KEEP_ALIVE_INTERVAL,
            shutdown_handler: None,
        }
    }

    /// Cap on concurrently granted worker slots. Must be at least 1.
    pub fn max_threads(mut self, val: u32) -> Self {
        self.max_threads = val;
        self
    }

    /// Stall window after which the keep-alive probe reports lost work to
    /// the provider.
    pub fn keep_alive(mut self, val: Duration) -> Self {
        self.keep_alive = val;
        self
    }

    /// Callback invoked exactly once when the pool reaches terminal
    /// quiescence after a shutdown has been requested.
    pub fn on_shutdown<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.shutdown_handler = Some(Box::new(f));
        self
    }

    /// Build a pool that acquires its workers from `provider`.
    pub fn build<P: Provider>(self, provider: P) -> Result<WorkPool, BuildError> {
        if self.max_threads == 0 {
            return Err(BuildError::InvalidMaxThreads);
        }

        Ok(WorkPool {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: PriorityQueue::new(),
                    threads: 0,
                    active_threads: 0,
                    shutdown_state: ShutdownState::None,
                    handler_fired: false,
                    shutdown_handler: self.shutdown_handler,
                    last_tick: Instant::now(),
                }),
                provider: Box::new(provider),
                max_threads: self.max_threads,
                keep_alive: self.keep_alive,
            }),
        })
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SOME: &&str = &"Some(_)";
        const NONE: &&str = &"None";

        fmt.debug_struct("Builder")
            .field("max_threads", &self.max_threads)
            .field("keep_alive", &self.keep_alive)
            .field(
                "shutdown_handler",
                if self.shutdown_handler.is_some() {
                    SOME
                } else {
                    NONE
                },
            )
            .finish()
    }
}

struct Shared {
    queue: PriorityQueue,

    // Logical worker slots granted to the pool: one per outstanding
    // provider execution that has not yet exited `run_worker`.
    threads: u32,

    // Granted slots whose execution has entered the drain loop. Always
    // <= threads while the lock is free.
    active_threads: u32,

    shutdown_state: ShutdownState,
    handler_fired: bool,
    shutdown_handler: Option<ShutdownHandler>,

    // Timestamp of the last keep-alive event; see `keepalive_locked`.
    last_tick: Instant,
}

struct Inner {
    shared: Mutex<Shared>,
    provider: Box<dyn Provider>,
    max_threads: u32,
    keep_alive: Duration,
}

/// Handle to a priority work-queue pool.
///
/// The pool queues submitted [`Item`]s in three priority bands and drains
/// them on worker executions obtained from its [`Provider`]. Handles are
/// cheap to clone and share one pool.
///
/// For the pool's guarantees around shutdown see
/// [`shutdown`](WorkPool::shutdown), [`shutdown_now`](WorkPool::shutdown_now)
/// and [`close`](WorkPool::close).
pub struct WorkPool {
    inner: Arc<Inner>,
}

// ===== impl WorkPool =====

impl Clone for WorkPool {
    fn clone(&self) -> WorkPool {
        WorkPool {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for WorkPool {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("WorkPool").finish()
    }
}

impl WorkPool {
    /// Hand an item to the pool.
    ///
    /// On success the item is queued, and a worker execution may have been
    /// requested from the provider; the returned ticket can
    /// [`cancel`](WorkPool::cancel) the item while it is still queued. The
    /// two rejection cases differ in who releases the item; see
    /// [`SubmitError`].
    pub fn submit(&self, item: Box<dyn Item>, priority: Priority) -> Result<Ticket, SubmitError> {
        let inner = &*self.inner;
        let mut shared = inner.shared.lock().unwrap();

        if shared.shutdown_state != ShutdownState::None {
            drop(shared);
            trace!("submit refused, pool is shutting down");
            item.release();
            return Err(SubmitError::ShuttingDown);
        }

        self.keepalive_locked(&mut shared);

        let ticket = shared.queue.push(item, priority);
        trace!(?priority, queued = shared.queue.len(), "item queued");

        if shared.threads >= inner.max_threads {
            // Enough slots are outstanding to drain this item.
            return Ok(ticket);
        }

        shared.threads += 1;
        shared.last_tick = Instant::now();
        drop(shared);

        // A refused grant is not rolled back here; the next worker
        // execution (or `close`) reconciles the count and drains the
        // queue.
        if inner.provider.submit() {
            Ok(ticket)
        } else {
            debug!("provider refused a worker grant");
            Err(SubmitError::ProviderRejected)
        }
    }

    /// Submit a closure as a normal [`Item`] whose release is a no-op.
    pub fn submit_fn<F>(&self, priority: Priority, f: F) -> Result<Ticket, SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(FnItem::new(f)), priority)
    }

    /// Pull a still-queued item back out of the pool.
    ///
    /// Returns `true`, after releasing the item, iff the ticket was still
    /// live. Once a worker has popped the item the ticket is stale and the
    /// action/release sequence runs to completion regardless.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        let mut shared = self.inner.shared.lock().unwrap();

        match shared.queue.remove(ticket) {
            Some(item) => {
                drop(shared);
                item.release();
                true
            }
            None => false,
        }
    }

    /// Run the keep-alive probe.
    ///
    /// Embedders with their own timing source call this periodically so
    /// the pool can notice slots the provider granted but never delivered.
    /// Submitting runs the same probe implicitly.
    pub fn keepalive(&self) {
        let mut shared = self.inner.shared.lock().unwrap();
        self.keepalive_locked(&mut shared);
    }

    fn keepalive_locked(&self, shared: &mut Shared) {
        if shared.active_threads >= shared.threads {
            return;
        }

        let now = Instant::now();
        if now.duration_since(shared.last_tick) < self.inner.keep_alive {
            return;
        }
        shared.last_tick = now;

        debug!(
            active_threads = shared.active_threads,
            threads = shared.threads,
            "granted workers have not shown up, reporting lost work"
        );
        self.inner
            .provider
            .submit_lost_work(shared.active_threads, shared.threads);
    }

    /// Begin a graceful shutdown.
    ///
    /// No new items are admitted, queued items still run, and the shutdown
    /// handler fires exactly once when the last worker slot drains out (or
    /// immediately, if none is outstanding). Must not be called from
    /// inside a worker execution, and must not be called twice.
    pub fn shutdown(&self) {
        self.shutdown_inner(false);
    }

    /// Begin an abortive shutdown.
    ///
    /// Like [`shutdown`](WorkPool::shutdown), except items still queued
    /// are released without their actions ever running.
    pub fn shutdown_now(&self) {
        self.shutdown_inner(true);
    }

    fn shutdown_inner(&self, abortive: bool) {
        let mut shared = self.inner.shared.lock().unwrap();

        if shared.shutdown_state != ShutdownState::None {
            drop(shared);
            debug_assert!(false, "pool is already shutting down");
            return;
        }

        shared.shutdown_state = if abortive {
            ShutdownState::Abort
        } else {
            ShutdownState::Wait
        };
        debug!(
            abortive,
            queued = shared.queue.len(),
            threads = shared.threads,
            "shutdown requested"
        );

        if shared.threads > 0 || shared.active_threads > 0 {
            // The last exiting worker fires the handler; prod the
            // provider now in case those workers never arrived.
            self.keepalive_locked(&mut shared);
            return;
        }

        debug_assert!(shared.queue.is_empty());
        debug_assert!(!shared.handler_fired);
        self.try_quiesce(shared);
    }

    /// Tear the pool down synchronously.
    ///
    /// Grants itself a worker slot, drains anything still queued on the
    /// calling thread under abort semantics, then closes the provider.
    /// When `close` returns, every accepted item has been released, no
    /// worker execution is running or will run, and the pool is inert.
    ///
    /// Must not be called from inside a worker execution, and nothing may
    /// use the pool once `close` has begun.
    pub fn close(&self) {
        {
            let mut shared = self.inner.shared.lock().unwrap();

            if shared.shutdown_state == ShutdownState::None {
                shared.shutdown_state = ShutdownState::Abort;
            }
            debug_assert!(
                shared.shutdown_state != ShutdownState::Complete,
                "pool closed twice"
            );

            // Transient self-grant so the drain below owns a slot; this
            // is the one place where `threads` may reach max_threads + 1.
            shared.threads += 1;
            debug!(queued = shared.queue.len(), "closing pool");
        }

        self.run_worker();

        self.inner.provider.close();

        let mut shared = self.inner.shared.lock().unwrap();
        debug_assert!(shared.queue.is_empty());
        debug_assert_eq!(0, shared.active_threads);
        shared.shutdown_state = ShutdownState::Complete;
    }

    /// The worker entry point.
    ///
    /// Providers call this once per granted slot, on whatever thread they
    /// arranged. It claims the slot, drains the queue in priority order
    /// (running `action` and `release` with the pool unlocked), then gives
    /// the slot back, firing the shutdown handler if it was the last one
    /// out during a shutdown. Calling it more often than slots were
    /// granted is harmless: surplus executions return immediately.
    pub fn run_worker(&self) {
        let inner = &*self.inner;
        let mut shared = inner.shared.lock().unwrap();

        shared.last_tick = Instant::now();

        if shared.active_threads >= shared.threads {
            // Over-grant: every slot already has a running execution.
            // Leave the counters alone, this execution never claimed one.
            trace!("surplus worker execution, exiting");
            return;
        }

        shared.active_threads += 1;

        if shared.active_threads > shared.threads {
            // Lost a race with an exiting worker that decremented
            // `threads` after the check above. Give everything back.
            shared.threads -= 1;
            shared.active_threads -= 1;
            return;
        }

        loop {
            debug_assert!(shared.threads >= 1);
            debug_assert!(shared.active_threads <= shared.threads);
            debug_assert!(shared.shutdown_state != ShutdownState::Complete);

            let observed = shared.shutdown_state;
            let mut item = match shared.queue.pop() {
                Some(item) => item,
                None => break,
            };
            drop(shared);

            if observed != ShutdownState::Abort {
                item.action();
            }
            item.release();

            shared = inner.shared.lock().unwrap();
        }

        shared.threads -= 1;
        shared.active_threads -= 1;

        self.try_quiesce(shared);
    }

    // Terminal-quiescence check. The path that flips `handler_fired` is
    // the only one allowed to run the handler, and runs it outside the
    // lock so it can call back into the pool.
    fn try_quiesce(&self, mut shared: MutexGuard<'_, Shared>) {
        if shared.shutdown_state == ShutdownState::None
            || shared.active_threads != 0
            || shared.handler_fired
        {
            return;
        }

        debug_assert!(shared.queue.is_empty());
        shared.handler_fired = true;
        let handler = shared.shutdown_handler.take();
        drop(shared);

        debug!("pool is quiescent");
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Cap on concurrently granted worker slots.
    pub fn max_threads(&self) -> u32 {
        self.inner.max_threads
    }

    /// Currently granted worker slots.
    pub fn thread_count(&self) -> u32 {
        self.inner.shared.lock().unwrap().threads
    }

    /// Granted slots currently inside the drain loop.
    pub fn active_thread_count(&self) -> u32 {
        self.inner.shared.lock().unwrap().active_threads
    }

    /// Items waiting in the queue.
    pub fn queued(&self) -> usize {
        self.inner.shared.lock().unwrap().queue.len()
    }
}
