/// A unit of work accepted by a pool.
///
/// The pool calls `action` at most once, and never once an abortive
/// shutdown has been observed. It then consumes the item through `release`,
/// which runs exactly once for every item the pool accepted: after the
/// action, on cancellation, on rejection during shutdown, or while draining
/// under abort. Both calls are made with no pool lock held, so an item may
/// call back into the pool that is running it.
pub trait Item: Send + 'static {
    /// Run the payload.
    fn action(&mut self);

    /// Reclaim whatever the item owns. Runs exactly once, always last.
    fn release(self: Box<Self>) {}
}

/// Scheduling class of a submitted item.
///
/// Bands drain in strict priority order; within one band items run in
/// submission order. There is no ageing, so a sustained stream of
/// high-priority work can starve the lower bands.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Runs only once the normal and high bands are empty.
    Low,
    /// The band used by default.
    #[default]
    Normal,
    /// Drains ahead of all normal and low items.
    High,
}

// Adapter used by `submit_fn`.
pub(crate) struct FnItem<F>(Option<F>);

impl<F> FnItem<F> {
    pub(crate) fn new(f: F) -> FnItem<F> {
        FnItem(Some(f))
    }
}

impl<F> Item for FnItem<F>
where
    F: FnOnce() + Send + 'static,
{
    fn action(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}
