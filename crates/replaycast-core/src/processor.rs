//! The replay processor facade — routes producer signals into the buffer
//! and fans drain invocations out to every registered subscriber.
//!
//! # Threading
//!
//! The processor creates no threads of its own. Producer callbacks run on
//! the producer's thread, `request`/`cancel` on each subscriber's thread,
//! and every delivery happens inside whichever of those threads wins the
//! per-subscription drain serializer. No call blocks.
//!
//! # Single-producer contract
//!
//! `on_next`, `on_error`, and `on_complete` must be invoked serially by a
//! single upstream: never concurrently with themselves or each other.
//! Subscriber-side calls may race freely with the producer and with each
//! other.

use std::sync::Arc;

use crate::buffer::ReplayBuffer;
use crate::config::ReplayConfig;
use crate::drops::{DropHook, LogDrops};
use crate::error::SignalError;
use crate::registry::SubscriberSet;
use crate::subscriber::{FnSubscriber, Subscriber, Subscription};
use crate::subscription::ReplaySubscription;

/// Shared state behind every handle clone.
pub(crate) struct ProcessorInner<T> {
    pub(crate) buffer: Arc<ReplayBuffer<T>>,
    subscribers: SubscriberSet<T>,
    drops: Arc<dyn DropHook<T>>,
}

impl<T> ProcessorInner<T> {
    /// Unregisters `rp`, matching by identity.
    pub(crate) fn remove(&self, rp: &ReplaySubscription<T>) {
        self.subscribers.remove(std::ptr::from_ref(rp));
    }
}

/// Multicast replay processor.
///
/// Records a single upstream's value stream and re-emits it (the whole
/// history or a bounded tail, per [`ReplayConfig`]) to every subscriber,
/// each at its own requested pace.
///
/// # Example
///
/// ```rust,ignore
/// let processor = ReplayProcessor::unbounded(64);
///
/// processor.on_next("a");
/// processor.on_next("b");
///
/// // A late subscriber still sees the full history.
/// processor.subscribe_fn(|value| println!("{value}"));
/// processor.on_complete();
/// ```
pub struct ReplayProcessor<T> {
    inner: Arc<ProcessorInner<T>>,
}

impl<T> Clone for ReplayProcessor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ReplayProcessor<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a processor that retains the entire history in segments of
    /// `segment_size` values.
    #[must_use]
    pub fn unbounded(segment_size: usize) -> Self {
        Self::with_config(&ReplayConfig::unbounded(segment_size))
    }

    /// Creates a processor that retains the last `limit` values.
    #[must_use]
    pub fn bounded(limit: usize) -> Self {
        Self::with_config(&ReplayConfig::bounded(limit))
    }

    /// Creates a processor from a configuration, reporting post-terminal
    /// signals through [`LogDrops`].
    #[must_use]
    pub fn with_config(config: &ReplayConfig) -> Self {
        Self::with_drop_hook(config, Arc::new(LogDrops))
    }

    /// Creates a processor with a custom post-terminal signal hook.
    #[must_use]
    pub fn with_drop_hook(config: &ReplayConfig, drops: Arc<dyn DropHook<T>>) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                buffer: Arc::new(ReplayBuffer::new(config)),
                subscribers: SubscriberSet::new(),
                drops,
            }),
        }
    }

    /// Attaches a subscriber and returns its subscription handle.
    ///
    /// The subscriber receives `on_subscribe` with the same handle before
    /// this method returns. If the processor is already terminated the
    /// subscriber is drained immediately and observes the latched history
    /// and terminal signal as demand permits.
    pub fn subscribe(&self, subscriber: impl Subscriber<T> + 'static) -> Arc<ReplaySubscription<T>> {
        self.subscribe_arc(Arc::new(subscriber))
    }

    /// Attaches a pre-shared subscriber. See [`subscribe`](Self::subscribe).
    pub fn subscribe_arc(&self, subscriber: Arc<dyn Subscriber<T>>) -> Arc<ReplaySubscription<T>> {
        let rp = Arc::new(ReplaySubscription::new(
            subscriber,
            Arc::clone(&self.inner.buffer),
            Arc::downgrade(&self.inner),
        ));

        let handle: Arc<dyn Subscription> = rp.clone();
        rp.subscriber.on_subscribe(handle);

        if self.inner.subscribers.add(&rp) {
            // The subscriber may have cancelled from inside on_subscribe,
            // racing the registration.
            if rp.is_cancelled() {
                self.inner.remove(&rp);
            }
        } else {
            // Registry already terminated: drain so the subscriber
            // observes the latched terminal signal.
            self.inner.buffer.drain(&rp);
        }
        rp
    }

    /// Attaches a closure with unbounded demand.
    pub fn subscribe_fn(
        &self,
        f: impl Fn(T) + Send + Sync + 'static,
    ) -> Arc<ReplaySubscription<T>> {
        self.subscribe(FnSubscriber::new(f))
    }

    /// Producer handshake. Cancels `upstream` if this processor is already
    /// terminated, otherwise requests unbounded demand from it.
    pub fn on_subscribe(&self, upstream: &dyn Subscription) {
        if self.inner.buffer.is_done() {
            upstream.cancel();
        } else {
            upstream.request(u64::MAX);
        }
    }

    /// Records `value` and drains every registered subscriber.
    ///
    /// Single producer only. A value arriving after the terminal signal is
    /// routed to the drop hook, never to subscribers.
    pub fn on_next(&self, value: T) {
        let buffer = &self.inner.buffer;
        if buffer.is_done() {
            self.inner.drops.on_value_dropped(value);
            return;
        }
        buffer.on_next(value);
        // One snapshot per signal: subscribers added mid-loop pick the
        // value up through their own subscribe-time drain.
        for rp in &self.inner.subscribers.snapshot().entries {
            buffer.drain(rp);
        }
    }

    /// Latches `error` as the terminal signal and broadcasts it.
    ///
    /// Single producer only, at most one terminal signal. A second error
    /// is routed to the drop hook.
    pub fn on_error(&self, error: SignalError) {
        let buffer = &self.inner.buffer;
        if buffer.is_done() {
            self.inner.drops.on_error_dropped(error);
            return;
        }
        buffer.on_error(error);
        let roster = self.inner.subscribers.terminate_and_snapshot();
        for rp in &roster.entries {
            buffer.drain(rp);
        }
    }

    /// Latches completion as the terminal signal and broadcasts it.
    ///
    /// Single producer only. Dropped silently if already terminated.
    pub fn on_complete(&self) {
        let buffer = &self.inner.buffer;
        if buffer.is_done() {
            return;
        }
        buffer.on_complete();
        let roster = self.inner.subscribers.terminate_and_snapshot();
        for rp in &roster.entries {
            buffer.drain(rp);
        }
    }

    /// Whether any subscriber is currently registered.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.inner.subscribers.len() != 0
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Whether a terminal signal has been latched.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.buffer.is_done()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
