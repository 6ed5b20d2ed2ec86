//! Replay storage strategies and the per-subscriber replay cursor.
//!
//! Two stores back the processor: an append-only segmented chain that keeps
//! the whole history, and a linked ring that keeps a bounded tail. Both are
//! written by a single producer and read concurrently by per-subscriber
//! drains; the strategy is fixed at construction.

pub(crate) mod bounded;
pub(crate) mod unbounded;

use std::sync::atomic::AtomicUsize;

use arc_swap::ArcSwapOption;

use self::bounded::{BoundedBuffer, RingNode};
use self::unbounded::{Segment, UnboundedBuffer};
use crate::config::{ReplayConfig, ReplayMode};
use crate::error::SignalError;
use crate::subscription::ReplaySubscription;

/// The active storage strategy.
pub(crate) enum ReplayBuffer<T> {
    Unbounded(UnboundedBuffer<T>),
    Bounded(BoundedBuffer<T>),
}

impl<T> ReplayBuffer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(config: &ReplayConfig) -> Self {
        let size = config.effective_buffer_size();
        match config.mode {
            ReplayMode::Unbounded => Self::Unbounded(UnboundedBuffer::new(size)),
            ReplayMode::Bounded => Self::Bounded(BoundedBuffer::new(size)),
        }
    }

    /// Appends a value. Single producer only.
    pub(crate) fn on_next(&self, value: T) {
        match self {
            Self::Unbounded(buffer) => buffer.on_next(value),
            Self::Bounded(buffer) => buffer.on_next(value),
        }
    }

    /// Latches the error terminal signal. Single producer only.
    pub(crate) fn on_error(&self, error: SignalError) {
        match self {
            Self::Unbounded(buffer) => buffer.on_error(error),
            Self::Bounded(buffer) => buffer.on_error(error),
        }
    }

    /// Latches the completion terminal signal. Single producer only.
    pub(crate) fn on_complete(&self) {
        match self {
            Self::Unbounded(buffer) => buffer.on_complete(),
            Self::Bounded(buffer) => buffer.on_complete(),
        }
    }

    /// Runs the drain loop for one subscription.
    pub(crate) fn drain(&self, rp: &ReplaySubscription<T>) {
        match self {
            Self::Unbounded(buffer) => buffer.drain(rp),
            Self::Bounded(buffer) => buffer.drain(rp),
        }
    }

    /// Whether a terminal signal has been latched.
    pub(crate) fn is_done(&self) -> bool {
        match self {
            Self::Unbounded(buffer) => buffer.is_done(),
            Self::Bounded(buffer) => buffer.is_done(),
        }
    }

    /// Number of values currently stored (total history when unbounded,
    /// retained tail when bounded).
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Unbounded(buffer) => buffer.len(),
            Self::Bounded(buffer) => buffer.len(),
        }
    }
}

/// Replay position of one subscriber.
///
/// Only the thread holding the subscription's WIP serializer touches the
/// cursor, and it writes the fields back exactly once per drain pass, so
/// outside observers always see a consistent position. The happens-before
/// edge between consecutive serializer owners is the WIP counter itself.
pub(crate) struct Cursor<T> {
    /// Logical stream position, `0..=size` (unbounded strategy).
    pub(crate) index: AtomicUsize,

    /// Offset of the next value within `segment` (unbounded strategy).
    pub(crate) offset: AtomicUsize,

    /// Segment whose slots `offset` indexes into. `None` means the drain
    /// has not started yet (start from the buffer head) or the cursor was
    /// released.
    pub(crate) segment: ArcSwapOption<Segment<T>>,

    /// Last node whose value was delivered (bounded strategy). `None` as
    /// above.
    pub(crate) node: ArcSwapOption<RingNode<T>>,
}

impl<T> Cursor<T> {
    pub(crate) fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
            offset: AtomicUsize::new(0),
            segment: ArcSwapOption::empty(),
            node: ArcSwapOption::empty(),
        }
    }

    /// Drops the pinned history so it can be reclaimed. Called on cancel
    /// and on terminal delivery.
    pub(crate) fn release(&self) {
        self.segment.store(None);
        self.node.store(None);
    }
}
