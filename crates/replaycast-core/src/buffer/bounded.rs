//! Bounded replay storage — a sentinel-headed linked chain retaining at
//! most `limit` values.
//!
//! The ring is a linked chain rather than a circular array because a late
//! or slow subscriber may sit arbitrarily far behind the producer. Evicting
//! the oldest value only advances `head`; it never mutates an already
//! published `next` pointer, so a cursor holding an evicted node still
//! reads a consistent suffix of the stream. Nodes behind every cursor
//! become unreferenced and are reclaimed.
//!
//! A newly attached subscriber starts from the current `head`: latecomers
//! observe at most the last `limit` values.
//!
//! # Single-producer contract
//!
//! `on_next`, `on_error`, and `on_complete` must be called by one producer
//! thread at a time. `tail` and `size` are producer-only; `head` and the
//! node `next` links are the atomic publication points.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::error::SignalError;
use crate::subscription::ReplaySubscription;

/// One link of the ring: a value and a publishable successor pointer.
pub(crate) struct RingNode<T> {
    /// `None` only for the sentinel, which is never reachable through a
    /// `next` pointer.
    value: Option<T>,
    next: ArcSwapOption<RingNode<T>>,
}

impl<T> RingNode<T> {
    fn sentinel() -> Self {
        Self {
            value: None,
            next: ArcSwapOption::empty(),
        }
    }

    fn new(value: T) -> Self {
        Self {
            value: Some(value),
            next: ArcSwapOption::empty(),
        }
    }

    pub(crate) fn next(&self) -> Option<Arc<RingNode<T>>> {
        self.next.load_full()
    }
}

impl<T> Drop for RingNode<T> {
    fn drop(&mut self) {
        // Unlink successors iteratively; a slow subscriber can pin an
        // arbitrarily long evicted chain, and the recursive `Arc` drop
        // would overflow the stack on it. A node still shared (head,
        // tail, or another cursor) stops the walk.
        let mut next = self.next.swap(None);
        while let Some(node) = next {
            next = match Arc::try_unwrap(node) {
                Ok(sole) => sole.next.swap(None),
                Err(_) => None,
            };
        }
    }
}

/// Linked eviction ring retaining the last `limit` values.
pub(crate) struct BoundedBuffer<T> {
    /// Maximum number of retained values.
    limit: usize,

    /// Front of the chain. Advanced by the producer on eviction; the node
    /// it points at has already been consumed or evicted, so replay
    /// starts at `head.next`.
    head: ArcSwap<RingNode<T>>,

    /// Last appended node. Producer-only.
    tail: ArcSwap<RingNode<T>>,

    /// Retained value count, `0..=limit`. Producer-only.
    size: AtomicUsize,

    /// Terminal latch.
    done: AtomicBool,

    /// Terminal error, written before `done`.
    error: UnsafeCell<Option<SignalError>>,
}

// SAFETY: `error` is written once by the single producer strictly before
// the release store of `done`, and read only after an acquire load of
// `done` returns true. Everything else is atomic pointers and counters.
unsafe impl<T: Send> Send for BoundedBuffer<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for BoundedBuffer<T> {}

impl<T> BoundedBuffer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(limit: usize) -> Self {
        let sentinel = Arc::new(RingNode::sentinel());
        Self {
            limit,
            head: ArcSwap::from(Arc::clone(&sentinel)),
            tail: ArcSwap::from(sentinel),
            size: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            error: UnsafeCell::new(None),
        }
    }

    /// Appends a value, evicting the oldest when full. Single producer
    /// only.
    pub(crate) fn on_next(&self, value: T) {
        let node = Arc::new(RingNode::new(value));
        let tail = self.tail.load_full();
        // Publication point: once linked, the node is visible to every
        // drain following `next` from its cursor.
        tail.next.store(Some(Arc::clone(&node)));
        self.tail.store(node);

        let size = self.size.load(Ordering::Relaxed);
        if size == self.limit {
            // Evict the oldest: moving `head` forward never touches the
            // published links behind it.
            let head = self.head.load_full();
            if let Some(next) = head.next() {
                self.head.store(next);
            }
        } else {
            self.size.store(size + 1, Ordering::Relaxed);
        }
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
        self.size.load(Ordering::Relaxed)
    }

    fn terminal_error(&self) -> Option<SignalError> {
        // SAFETY: only called after an acquire load of `done` observed
        // true, which orders this read after the producer's write.
        unsafe { (*self.error.get()).clone() }
    }

    fn finish(&self, rp: &ReplaySubscription<T>) {
        match self.terminal_error() {
            Some(error) => rp.subscriber.on_error(error),
            None => rp.subscriber.on_complete(),
        }
    }

    /// Drains buffered values to one subscriber, bounded by its demand.
    ///
    /// Same serializer protocol as the unbounded drain; the cursor is the
    /// last node whose value was delivered, written back only on pass
    /// exit.
    pub(crate) fn drain(&self, rp: &ReplaySubscription<T>) {
        if !rp.enter() {
            return;
        }

        let mut missed = 1u32;

        loop {
            let r = rp.demand();
            let mut e = 0u64;

            let mut node = rp
                .cursor
                .node
                .load_full()
                .unwrap_or_else(|| self.head.load_full());

            while e != r {
                if rp.is_cancelled() {
                    rp.cursor.release();
                    return;
                }

                let done = self.done.load(Ordering::Acquire);
                let next = node.next();

                match next {
                    None if done => {
                        rp.cursor.release();
                        self.finish(rp);
                        return;
                    }
                    None => break,
                    Some(next) => {
                        // Only the sentinel carries no value, and it is
                        // never reachable through a `next` pointer.
                        if let Some(value) = next.value.as_ref() {
                            rp.subscriber.on_next(value.clone());
                        }
                        e += 1;
                        node = next;
                    }
                }
            }

            // Demand exhausted: terminal is still delivered once the
            // subscriber has caught up, consuming no demand.
            if e == r {
                if rp.is_cancelled() {
                    rp.cursor.release();
                    return;
                }

                let done = self.done.load(Ordering::Acquire);
                if done && node.next().is_none() {
                    rp.cursor.release();
                    self.finish(rp);
                    return;
                }
            }

            if e != 0 && r != u64::MAX {
                rp.produced(e);
            }

            rp.cursor.node.store(Some(node));

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

    fn bounded(limit: usize) -> Arc<ReplayBuffer<i64>> {
        Arc::new(ReplayBuffer::new(&ReplayConfig::bounded(limit)))
    }

    #[test]
    fn test_retains_at_most_limit() {
        let buffer = bounded(2);
        for v in 1..=5 {
            buffer.on_next(v);
        }
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_late_subscriber_sees_retained_tail() {
        let buffer = bounded(2);
        for v in 1..=5 {
            buffer.on_next(v);
        }

        let (recording, rp) = attach(&buffer);
        rp.request(u64::MAX);
        assert_eq!(
            recording.signals(),
            vec![Signal::Next(4), Signal::Next(5)]
        );

        buffer.on_complete();
        buffer.drain(&rp);
        assert_eq!(
            recording.signals(),
            vec![Signal::Next(4), Signal::Next(5), Signal::Complete]
        );
    }

    #[test]
    fn test_subscriber_under_limit_sees_everything() {
        let buffer = bounded(10);
        for v in 1..=5 {
            buffer.on_next(v);
        }

        let (recording, rp) = attach(&buffer);
        rp.request(u64::MAX);
        assert_eq!(
            recording.signals(),
            (1..=5).map(Signal::Next).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_in_flight_cursor_survives_eviction() {
        let buffer = bounded(2);
        buffer.on_next(1);
        buffer.on_next(2);

        // Position the cursor on value 1, then push far enough to evict
        // both observed nodes from the head.
        let (recording, rp) = attach(&buffer);
        rp.request(1);
        assert_eq!(recording.signals(), vec![Signal::Next(1)]);

        for v in 3..=6 {
            buffer.on_next(v);
        }

        // The cursor still reads the consistent suffix from where it
        // stopped, not from the advanced head.
        rp.request(u64::MAX);
        assert_eq!(
            recording.signals(),
            (1..=6).map(Signal::Next).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_error_replays_to_late_subscriber() {
        let buffer = bounded(4);
        buffer.on_next(1);
        buffer.on_error(signal_error(InvalidDemandError));

        let (recording, rp) = attach(&buffer);
        rp.request(u64::MAX);
        assert_eq!(
            recording.signals(),
            vec![
                Signal::Next(1),
                Signal::Error("requested demand must be positive".into()),
            ]
        );
    }

    #[test]
    fn test_terminal_needs_no_demand() {
        let buffer = bounded(4);
        let (recording, rp) = attach(&buffer);

        buffer.on_complete();
        buffer.drain(&rp);
        assert_eq!(recording.signals(), vec![Signal::Complete]);
    }

    #[test]
    fn test_cancel_mid_stream_stops_delivery() {
        let buffer = bounded(10);
        for v in 1..=5 {
            buffer.on_next(v);
        }

        let (recording, rp) = attach(&buffer);
        rp.request(3);
        assert_eq!(
            recording.signals(),
            vec![Signal::Next(1), Signal::Next(2), Signal::Next(3)]
        );

        rp.cancel();
        for v in 6..=10 {
            buffer.on_next(v);
            buffer.drain(&rp);
        }
        buffer.on_complete();
        buffer.drain(&rp);

        // No further callbacks of any kind after cancel.
        assert_eq!(recording.signals().len(), 3);

        // A fresh subscriber still replays the retained window.
        let (late, late_rp) = attach(&buffer);
        late_rp.request(u64::MAX);
        let mut expected: Vec<Signal> = (1..=10).map(Signal::Next).collect();
        expected.push(Signal::Complete);
        assert_eq!(late.signals(), expected);
    }

    #[test]
    fn test_slow_cursor_drop_frees_long_evicted_chain() {
        let buffer = bounded(1);
        let (recording, rp) = attach(&buffer);
        buffer.on_next(0);
        rp.request(1);
        assert_eq!(recording.signals(), vec![Signal::Next(0)]);

        // The cursor pins node 0 while eviction races far ahead,
        // stranding a long chain behind the head.
        for v in 1..=200_000 {
            buffer.on_next(v);
        }

        // Dropping the subscription must not blow the stack unwinding
        // that chain.
        rp.cancel();
        drop(rp);
    }

    #[test]
    fn test_concurrent_producer_and_requester_keep_order() {
        let buffer = bounded(1024);
        let (recording, rp) = attach(&buffer);
        rp.request(u64::MAX);

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
        producer.join().unwrap();

        let signals = recording.signals();
        assert_eq!(signals.len(), 501);
        for (i, signal) in signals.iter().take(500).enumerate() {
            assert_eq!(*signal, Signal::Next(i as i64));
        }
        assert_eq!(signals[500], Signal::Complete);
    }
}
