//! Per-subscriber state — demand accounting, cancellation, and the
//! work-in-progress serializer that keeps each subscriber's drain
//! single-threaded without locks.
//!
//! # The WIP serializer
//!
//! Producer threads, `request` callers, and cancellation race to drain the
//! same subscription. [`enter`](ReplaySubscription::enter) increments the
//! WIP counter and admits only the thread that saw zero; every other
//! signal is recorded by the increment alone. When the winner finishes a
//! pass it calls [`leave`](ReplaySubscription::leave) with the number of
//! signals it has absorbed; a nonzero result means more signals arrived
//! mid-pass and the winner loops again. At most one thread ever executes
//! the drain body, and no signal is lost.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::buffer::{Cursor, ReplayBuffer};
use crate::error::{InvalidDemandError, SignalError};
use crate::processor::ProcessorInner;
use crate::subscriber::{Subscriber, Subscription};

/// State for one subscriber attached to a
/// [`ReplayProcessor`](crate::ReplayProcessor).
///
/// Created by `subscribe` and handed to the subscriber through
/// `on_subscribe`. Lives until cancelled or until its subscriber has
/// received the terminal signal; on either event the replay cursor is
/// released so the history it pinned can be reclaimed.
pub struct ReplaySubscription<T> {
    /// Downstream delivery callbacks.
    pub(crate) subscriber: Arc<dyn Subscriber<T>>,

    /// The buffer this subscription replays from.
    pub(crate) buffer: Arc<ReplayBuffer<T>>,

    /// Backreference for unregistering on cancel.
    parent: Weak<ProcessorInner<T>>,

    /// Replay position, owned by whichever thread holds the WIP serializer.
    pub(crate) cursor: Cursor<T>,

    /// Outstanding demand. Saturates at `u64::MAX`, which means unbounded
    /// and is never decremented.
    requested: AtomicU64,

    /// Work-in-progress counter for the drain serializer.
    wip: AtomicU32,

    cancelled: AtomicBool,
}

impl<T> ReplaySubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        subscriber: Arc<dyn Subscriber<T>>,
        buffer: Arc<ReplayBuffer<T>>,
        parent: Weak<ProcessorInner<T>>,
    ) -> Self {
        Self {
            subscriber,
            buffer,
            parent,
            cursor: Cursor::new(),
            requested: AtomicU64::new(0),
            wip: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Grants permission to deliver up to `n` more values. See
    /// [`Subscription::request`].
    pub fn request(&self, n: u64) {
        if n == 0 {
            self.cancel();
            let error: SignalError = Arc::new(InvalidDemandError);
            self.subscriber.on_error(error);
            return;
        }
        self.add_demand(n);
        self.buffer.drain(self);
    }

    /// Cancels this subscription. See [`Subscription::cancel`].
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            if let Some(parent) = self.parent.upgrade() {
                parent.remove(self);
            }
            // Winning the serializer here pins `wip` nonzero for the rest
            // of this subscription's life: no later drain can run a body
            // for a cancelled subscription.
            if self.enter() {
                self.cursor.release();
            }
        }
    }

    /// Whether `cancel` has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Adds `n` to the demand counter, saturating at `u64::MAX`.
    fn add_demand(&self, n: u64) {
        let mut current = self.requested.load(Ordering::Relaxed);
        loop {
            if current == u64::MAX {
                return;
            }
            let next = current.saturating_add(n);
            match self.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current outstanding demand.
    pub(crate) fn demand(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Consumes demand for `n` delivered values. Never called when demand
    /// is unbounded.
    pub(crate) fn produced(&self, n: u64) {
        self.requested.fetch_sub(n, Ordering::AcqRel);
    }

    /// Tries to take the drain serializer. Returns `true` only for the
    /// thread that saw a WIP of zero; all other callers just record their
    /// signal through the increment.
    pub(crate) fn enter(&self) -> bool {
        self.wip.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Releases `missed` absorbed signals from the serializer and returns
    /// the remaining count. Nonzero means a signal arrived during the pass
    /// and the caller must loop.
    pub(crate) fn leave(&self, missed: u32) -> u32 {
        self.wip.fetch_sub(missed, Ordering::AcqRel) - missed
    }
}

impl<T> Subscription for ReplaySubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn request(&self, n: u64) {
        ReplaySubscription::request(self, n);
    }

    fn cancel(&self) {
        ReplaySubscription::cancel(self);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
