//! Replay processor configuration.
//!
//! The processor has exactly two knobs: the buffer strategy and its size.
//! The size means different things per strategy: segment capacity for the
//! unbounded buffer, retention limit for the bounded one.

/// Default buffer size (segment capacity or retention limit).
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Minimum buffer size. A segment or ring must hold at least one value.
pub const MIN_BUFFER_SIZE: usize = 1;

/// Maximum buffer size (prevents absurd per-segment allocations).
pub const MAX_BUFFER_SIZE: usize = 1 << 24;

/// Buffer strategy for the replay processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplayMode {
    /// Retain the entire history in a chain of fixed-capacity segments.
    ///
    /// Every subscriber, no matter how late it attaches, replays the
    /// stream from the first value. Memory grows without bound.
    #[default]
    Unbounded,

    /// Retain at most `buffer_size` values in a linked eviction ring.
    ///
    /// Late subscribers observe the tail of the recent history; values
    /// evicted before they attached are gone.
    Bounded,
}

/// Configuration for a [`ReplayProcessor`](crate::ReplayProcessor).
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Segment capacity (unbounded) or retention limit (bounded).
    pub buffer_size: usize,

    /// Buffer strategy.
    pub mode: ReplayMode,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            mode: ReplayMode::Unbounded,
        }
    }
}

impl ReplayConfig {
    /// Creates an unbounded configuration with the given segment capacity.
    #[must_use]
    pub fn unbounded(segment_size: usize) -> Self {
        Self {
            buffer_size: segment_size,
            mode: ReplayMode::Unbounded,
        }
    }

    /// Creates a bounded configuration retaining at most `limit` values.
    #[must_use]
    pub fn bounded(limit: usize) -> Self {
        Self {
            buffer_size: limit,
            mode: ReplayMode::Bounded,
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> ReplayConfigBuilder {
        ReplayConfigBuilder::default()
    }

    /// Returns the effective buffer size (clamped to the supported range).
    #[must_use]
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
    }
}

/// Builder for [`ReplayConfig`].
#[derive(Debug, Default)]
pub struct ReplayConfigBuilder {
    buffer_size: Option<usize>,
    mode: Option<ReplayMode>,
}

impl ReplayConfigBuilder {
    /// Sets the buffer size.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Sets the buffer strategy.
    #[must_use]
    pub fn mode(mut self, mode: ReplayMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ReplayConfig {
        ReplayConfig {
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            mode: self.mode.unwrap_or_default(),
        }
    }
}
