//! Unbounded replay storage — an append-only chain of fixed-capacity
//! segments.
//!
//! The producer owns the tail of the chain and a write cursor into it.
//! A value becomes visible through a two-step publication: the slot is
//! written first, then the shared `size` counter is incremented with
//! release ordering. Any drain that acquire-loads `size == k` may safely
//! read the first `k` slots of the chain. Segment-to-segment links are
//! published before the size increment that makes the new segment's first
//! slot visible.
//!
//! Segments are never freed while the buffer lives: unbounded means
//! unbounded. Per-subscriber cursors pin their current segment; releasing
//! the cursor (cancel or terminal) lets passed segments be reclaimed when
//! the buffer itself is dropped.
//!
//! # Single-producer contract
//!
//! `on_next`, `on_error`, and `on_complete` must be called by one producer
//! thread at a time, never concurrently with each other. `tail`,
//! `tail_index`, and the slot writes are unsynchronized under that
//! contract; `size` and `done` carry the cross-thread publication.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_utils::CachePadded;

use crate::error::SignalError;
use crate::subscription::ReplaySubscription;

/// One fixed-capacity block of value slots, linked to its successor.
pub(crate) struct Segment<T> {
    slots: Box<[UnsafeCell<Option<T>>]>,
    next: ArcSwapOption<Segment<T>>,
}

// SAFETY: slots are written only by the single producer, each slot exactly
// once, strictly before the release increment of the owning buffer's
// `size`; readers access a slot only after acquire-loading a `size` that
// covers it. The successor link is an atomic pointer swap.
unsafe impl<T: Send> Send for Segment<T> {}
// SAFETY: see above; concurrent readers only take `&T` out of published
// slots, which requires `T: Sync`, and clone it, which requires `T: Send`
// for the clone to cross threads.
unsafe impl<T: Send + Sync> Sync for Segment<T> {}

impl<T> Segment<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| UnsafeCell::new(None)).collect(),
            next: ArcSwapOption::empty(),
        }
    }

    /// Writes the slot at `index`.
    ///
    /// # Safety
    ///
    /// Caller is the single producer and `index` has not been published
    /// through the buffer's `size` yet.
    unsafe fn write(&self, index: usize, value: T) {
        *self.slots[index].get() = Some(value);
    }

    /// Reads the slot at `index`.
    ///
    /// # Safety
    ///
    /// The slot must have been published: the caller observed, with
    /// acquire ordering, a buffer `size` that covers this slot.
    unsafe fn read(&self, index: usize) -> T
    where
        T: Clone,
    {
        (*self.slots[index].get())
            .as_ref()
            .expect("published slot is empty")
            .clone()
    }

    pub(crate) fn next(&self) -> Option<Arc<Segment<T>>> {
        self.next.load_full()
    }
}

impl<T> Drop for Segment<T> {
    fn drop(&mut self) {
        // Unlink successors iteratively; dropping a long chain through the
        // recursive `Arc` drop would overflow the stack. A segment still
        // shared (buffer tail or a live cursor) stops the walk and is
        // freed by its remaining owner.
        let mut next = self.next.swap(None);
        while let Some(segment) = next {
            next = match Arc::try_unwrap(segment) {
                Ok(sole) => sole.next.swap(None),
                Err(_) => None,
            };
        }
    }
}

/// Append-only segmented store retaining the entire stream history.
pub(crate) struct UnboundedBuffer<T> {
    /// Fixed capacity of every segment.
    segment_size: usize,

    /// First segment of the chain. Immutable; every subscriber's replay
    /// starts here.
    head: Arc<Segment<T>>,

    /// Current append segment. Producer-only.
    tail: ArcSwap<Segment<T>>,

    /// Write cursor into `tail`, `0..=segment_size`. Producer-only.
    tail_index: AtomicUsize,

    /// Total number of values ever stored. Monotonic; the release store
    /// that publishes each value. Padded: every drain hammers this line.
    size: CachePadded<AtomicUsize>,

    /// Terminal latch.
    done: AtomicBool,

    /// Terminal error, written before `done`.
    error: UnsafeCell<Option<SignalError>>,
}

// SAFETY: `error` is written once by the single producer strictly before
// the release store of `done`, and read only after an acquire load of
// `done` returns true. All other shared state is atomic or `Segment`
// (see its impls).
unsafe impl<T: Send> Send for UnboundedBuffer<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for UnboundedBuffer<T> {}

impl<T> UnboundedBuffer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(segment_size: usize) -> Self {
        let first = Arc::new(Segment::new(segment_size));
        Self {
            segment_size,
            head: Arc::clone(&first),
            tail: ArcSwap::from(first),
            tail_index: AtomicUsize::new(0),
            size: CachePadded::new(AtomicUsize::new(0)),
            done: AtomicBool::new(false),
            error: UnsafeCell::new(None),
        }
    }

    /// Appends a value. Single producer only.
    pub(crate) fn on_next(&self, value: T) {
        let tail = self.tail.load_full();
        let index = self.tail_index.load(Ordering::Relaxed);
        if index == self.segment_size {
            let next = Arc::new(Segment::new(self.segment_size));
            // SAFETY: freshly allocated segment; slot 0 is unpublished
            // until the size increment below.
            unsafe { next.write(0, value) };
            // Link before the size increment so any reader that sees the
            // new size can follow the chain.
            tail.next.store(Some(Arc::clone(&next)));
            self.tail.store(next);
            self.tail_index.store(1, Ordering::Relaxed);
        } else {
            // SAFETY: single producer; `index` is beyond every published
            // slot of this segment.
            unsafe { tail.write(index, value) };
            self.tail_index.store(index + 1, Ordering::Relaxed);
        }
        self.size.fetch_add(1, Ordering::Release);
    }

    /// Latches the error terminal. Single producer only, at most once.
    pub(crate) fn on_error(&self, error: SignalError) {
        // SAFETY: single producer, written at most once, strictly before
        // the release store of `done` that publishes it.
        unsafe { *self.error.get() = Some(error) };
        self.done.store(true, Ordering::Release);
    }

    /// Latches the completion terminal. Single producer only.
    pub(crate) fn on_complete(&self) {
        self.done.store(true, Ordering::Release);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn terminal_error(&self) -> Option<SignalError> {
        // SAFETY: only called after an acquire load of `done` observed
        // true, which orders this read after the producer's write.
        unsafe { (*self.error.get()).clone() }
    }

    /// Emits the latched terminal signal to `rp`'s subscriber.
    fn finish(&self, rp: &ReplaySubscription<T>) {
        match self.terminal_error() {
            Some(error) => rp.subscriber.on_error(error),
            None => rp.subscriber.on_complete(),
        }
    }

    /// Drains buffered values to one subscriber, bounded by its demand.
    ///
    /// Guarded by the subscription's WIP serializer: at most one thread
    /// runs the body per subscription, and signals arriving mid-pass are
    /// picked up by the `leave` re-loop. The cursor is written back only
    /// on pass exit.
    pub(crate) fn drain(&self, rp: &ReplaySubscription<T>) {
        if !rp.enter() {
            return;
        }

        let mut missed = 1u32;
        let n = self.segment_size;

        loop {
            let r = rp.demand();
            let mut e = 0u64;

            let mut segment = rp
                .cursor
                .segment
                .load_full()
                .unwrap_or_else(|| Arc::clone(&self.head));
            let mut offset = rp.cursor.offset.load(Ordering::Relaxed);
            let mut index = rp.cursor.index.load(Ordering::Relaxed);

            while e != r {
                if rp.is_cancelled() {
                    rp.cursor.release();
                    return;
                }

                let done = self.done.load(Ordering::Acquire);
                let empty = index == self.size.load(Ordering::Acquire);

                if done && empty {
                    rp.cursor.release();
                    self.finish(rp);
                    return;
                }
                if empty {
                    break;
                }

                if offset == n {
                    // The successor was linked before the size increment
                    // that made `index` visible.
                    segment = segment.next().expect("segment chain broken");
                    offset = 0;
                }

                // SAFETY: `index < size` was observed with acquire
                // ordering, so this slot is published.
                let value = unsafe { segment.read(offset) };
                rp.subscriber.on_next(value);

                e += 1;
                offset += 1;
                index += 1;
            }

            // Demand exhausted: a terminal signal is still delivered if
            // the subscriber has caught up. Terminal consumes no demand.
            if e == r {
                if rp.is_cancelled() {
                    rp.cursor.release();
                    return;
                }

                let done = self.done.load(Ordering::Acquire);
                if done && index == self.size.load(Ordering::Acquire) {
                    rp.cursor.release();
                    self.finish(rp);
                    return;
                }
            }

            if e != 0 && r != u64::MAX {
                rp.produced(e);
            }

            rp.cursor.index.store(index, Ordering::Relaxed);
            rp.cursor.offset.store(offset, Ordering::Relaxed);
            rp.cursor.segment.store(Some(segment));

            missed = rp.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, Weak};

    use crate::buffer::ReplayBuffer;
    use crate::config::ReplayConfig;
    use crate::error::signal_error;
    use crate::subscriber::Subscriber;
    use crate::InvalidDemandError;

    #[derive(Debug, Clone, PartialEq)]
    enum Signal {
        Next(i64),
        Error(String),
        Complete,
    }

    #[derive(Default)]
    struct Recording {
        signals: Mutex<Vec<Signal>>,
    }

    impl Recording {
        fn signals(&self) -> Vec<Signal> {
            self.signals.lock().unwrap().clone()
        }
    }

    impl Subscriber<i64> for Recording {
        fn on_next(&self, value: i64) {
            self.signals.lock().unwrap().push(Signal::Next(value));
        }

        fn on_error(&self, error: SignalError) {
            self.signals
                .lock()
                .unwrap()
                .push(Signal::Error(error.to_string()));
        }

        fn on_complete(&self) {
            self.signals.lock().unwrap().push(Signal::Complete);
        }
    }

    fn attach(
        buffer: &Arc<ReplayBuffer<i64>>,
    ) -> (Arc<Recording>, Arc<ReplaySubscription<i64>>) {
        let recording = Arc::new(Recording::default());
        let rp = Arc::new(ReplaySubscription::new(
            Arc::clone(&recording) as Arc<dyn Subscriber<i64>>,
            Arc::clone(buffer),
            Weak::new(),
        ));
        (recording, rp)
    }

    fn unbounded(segment_size: usize) -> Arc<ReplayBuffer<i64>> {
        Arc::new(ReplayBuffer::new(&ReplayConfig::unbounded(segment_size)))
    }

    #[test]
    fn test_append_rolls_segments() {
        let buffer = unbounded(3);
        for v in 1..=7 {
            buffer.on_next(v);
        }
        assert_eq!(buffer.len(), 7);
    }

    #[test]
    fn test_replay_with_bounded_then_open_demand() {
        let buffer = unbounded(3);
        let (recording, rp) = attach(&buffer);

        for v in [10, 20, 30, 40, 50, 60, 70] {
            buffer.on_next(v);
        }
        buffer.on_complete();

        rp.request(3);
        assert_eq!(
            recording.signals(),
            vec![Signal::Next(10), Signal::Next(20), Signal::Next(30)]
        );

        rp.request(100);
        let mut expected: Vec<Signal> = [10, 20, 30, 40, 50, 60, 70]
            .into_iter()
            .map(Signal::Next)
            .collect();
        expected.push(Signal::Complete);
        assert_eq!(recording.signals(), expected);
    }

    #[test]
    fn test_late_subscriber_replays_from_start() {
        let buffer = unbounded(2);
        for v in 1..=4 {
            buffer.on_next(v);
        }

        let (recording, rp) = attach(&buffer);
        rp.request(u64::MAX);
        assert_eq!(
            recording.signals(),
            (1..=4).map(Signal::Next).collect::<Vec<_>>()
        );

        buffer.on_next(5);
        buffer.drain(&rp);
        buffer.on_complete();
        buffer.drain(&rp);

        let mut expected: Vec<Signal> = (1..=5).map(Signal::Next).collect();
        expected.push(Signal::Complete);
        assert_eq!(recording.signals(), expected);
    }

    #[test]
    fn test_error_replays_after_buffered_values() {
        let buffer = unbounded(4);
        buffer.on_next(1);
        buffer.on_next(2);
        buffer.on_error(signal_error(InvalidDemandError));

        let (recording, rp) = attach(&buffer);
        rp.request(u64::MAX);

        assert_eq!(
            recording.signals(),
            vec![
                Signal::Next(1),
                Signal::Next(2),
                Signal::Error("requested demand must be positive".into()),
            ]
        );
    }

    #[test]
    fn test_terminal_needs_no_demand() {
        let buffer = unbounded(4);
        let (recording, rp) = attach(&buffer);

        buffer.on_complete();
        buffer.drain(&rp);

        assert_eq!(recording.signals(), vec![Signal::Complete]);
    }

    #[test]
    fn test_terminal_waits_for_catchup() {
        let buffer = unbounded(4);
        let (recording, rp) = attach(&buffer);

        buffer.on_next(1);
        buffer.on_complete();

        // No demand yet: the buffered value blocks the terminal signal.
        buffer.drain(&rp);
        assert_eq!(recording.signals(), Vec::<Signal>::new());

        rp.request(1);
        assert_eq!(
            recording.signals(),
            vec![Signal::Next(1), Signal::Complete]
        );
    }

    #[test]
    fn test_demand_caps_delivery() {
        let buffer = unbounded(4);
        let (recording, rp) = attach(&buffer);

        for v in 1..=5 {
            buffer.on_next(v);
        }
        rp.request(2);

        assert_eq!(
            recording.signals(),
            vec![Signal::Next(1), Signal::Next(2)]
        );
    }

    #[test]
    fn test_cancelled_drain_delivers_nothing() {
        let buffer = unbounded(4);
        let (recording, rp) = attach(&buffer);
        buffer.on_next(1);

        rp.cancel();
        buffer.drain(&rp);
        rp.request(10);

        assert_eq!(recording.signals(), Vec::<Signal>::new());
    }

    #[test]
    fn test_concurrent_producer_and_requester_keep_order() {
        let buffer = unbounded(8);
        let (recording, rp) = attach(&buffer);

        let producer = {
            let buffer = Arc::clone(&buffer);
            let rp = Arc::clone(&rp);
            std::thread::spawn(move || {
                for v in 0..500 {
                    buffer.on_next(v);
                    buffer.drain(&rp);
                }
                buffer.on_complete();
                buffer.drain(&rp);
            })
        };

        // Request in small chunks until the terminal signal lands.
        while !recording
            .signals()
            .last()
            .is_some_and(|s| *s == Signal::Complete)
        {
            rp.request(7);
            std::thread::yield_now();
        }
        producer.join().unwrap();

        let signals = recording.signals();
        assert_eq!(signals.len(), 501);
        for (i, signal) in signals.iter().take(500).enumerate() {
            assert_eq!(*signal, Signal::Next(i as i64));
        }
        assert_eq!(signals[500], Signal::Complete);
    }
}
