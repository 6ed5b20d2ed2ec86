//! Downstream contract — the [`Subscriber`] callback trait and the
//! [`Subscription`] handle it receives.
//!
//! Signal grammar per subscriber: `on_subscribe` exactly once, then zero or
//! more `on_next`, then at most one of `on_error` / `on_complete`. After a
//! terminal signal (or `cancel`) no further callbacks are invoked.
//!
//! Callbacks run on whichever thread triggered the drain: the producer's
//! thread or the thread calling `request`. They must not block and must not
//! panic; a panic propagates through the caller of the current drain.

use std::sync::Arc;

use crate::error::SignalError;

/// Backpressure handle for one subscriber.
///
/// Handed to the subscriber via [`Subscriber::on_subscribe`]. The same
/// trait is implemented by upstream handles given to
/// [`ReplayProcessor::on_subscribe`](crate::ReplayProcessor::on_subscribe).
pub trait Subscription: Send + Sync {
    /// Grants permission to deliver up to `n` more values.
    ///
    /// Demand accumulates and saturates at `u64::MAX`, which means
    /// unbounded demand. `n` must be positive; `request(0)` cancels the
    /// subscription and delivers [`InvalidDemandError`](crate::InvalidDemandError)
    /// through its error channel.
    fn request(&self, n: u64);

    /// Stops delivery. Idempotent; no callbacks of any kind follow,
    /// including terminal signals.
    fn cancel(&self);
}

/// Receiver of replayed values.
///
/// # Example
///
/// ```rust,ignore
/// struct Printer;
///
/// impl Subscriber<String> for Printer {
///     fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
///         subscription.request(u64::MAX);
///     }
///     fn on_next(&self, value: String) {
///         println!("{value}");
///     }
/// }
/// ```
pub trait Subscriber<T>: Send + Sync {
    /// Called exactly once, before any other signal, with the handle used
    /// to request demand and cancel.
    ///
    /// The default implementation drops the handle; such a subscriber only
    /// receives values if demand is requested through the handle returned
    /// by [`ReplayProcessor::subscribe`](crate::ReplayProcessor::subscribe).
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let _ = subscription;
    }

    /// Called once per delivered value, in producer emission order.
    fn on_next(&self, value: T);

    /// Terminal failure signal.
    ///
    /// Default implementation logs the error via `tracing::warn!`.
    fn on_error(&self, error: SignalError) {
        tracing::warn!(%error, "unhandled subscriber error");
    }

    /// Terminal completion signal. Default implementation is a no-op.
    fn on_complete(&self) {}
}

/// Adapter that wraps a closure into a [`Subscriber`].
///
/// Requests unbounded demand on subscribe, so the closure observes every
/// value as fast as the drain can deliver it.
pub struct FnSubscriber<F>(F);

impl<F> FnSubscriber<F> {
    /// Wraps `f` as an on-next-only subscriber.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<T, F> Subscriber<T> for FnSubscriber<F>
where
    F: Fn(T) + Send + Sync,
{
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(u64::MAX);
    }

    fn on_next(&self, value: T) {
        (self.0)(value);
    }
}
