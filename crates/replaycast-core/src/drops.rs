//! Out-of-band reporting for signals that cannot be delivered.
//!
//! Once the buffer has latched a terminal signal, further producer signals
//! are contract violations: they are never delivered to subscribers and are
//! instead routed to this hook. The hook is injected per processor rather
//! than being process-global.

use crate::error::SignalError;

/// Sink for post-terminal producer signals.
pub trait DropHook<T>: Send + Sync {
    /// A value arrived after the terminal latch.
    fn on_value_dropped(&self, value: T);

    /// An error arrived after the terminal latch.
    fn on_error_dropped(&self, error: SignalError);
}

/// Default hook that reports dropped signals through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDrops;

impl<T> DropHook<T> for LogDrops {
    fn on_value_dropped(&self, value: T) {
        let _ = value;
        tracing::warn!("value signalled after terminal; dropped");
    }

    fn on_error_dropped(&self, error: SignalError) {
        tracing::warn!(%error, "error signalled after terminal; dropped");
    }
}
