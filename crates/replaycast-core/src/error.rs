//! Error types for the replay processor.
//!
//! Upstream failures are latched into the replay buffer and re-delivered to
//! every current and future subscriber, so the terminal error must be cheap
//! to share: [`SignalError`] is an `Arc` over any error type, and the same
//! instance is handed to each subscriber's `on_error`.

use std::sync::Arc;

/// Shared terminal error.
///
/// The upstream hands the processor one error; the processor replays that
/// exact instance to every subscriber that observes the terminal signal.
pub type SignalError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A subscriber requested zero demand.
///
/// The Reactive Streams contract requires `request(n)` with `n > 0`. The
/// offending subscription is cancelled and this error is delivered through
/// its `on_error` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("requested demand must be positive")]
pub struct InvalidDemandError;

/// Converts a concrete error into the shared [`SignalError`] form.
///
/// Convenience for producers terminating a processor:
///
/// ```rust,ignore
/// processor.on_error(signal_error(io_error));
/// ```
pub fn signal_error<E>(error: E) -> SignalError
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(error)
}
