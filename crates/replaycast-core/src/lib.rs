//! # Replaycast Core
//!
//! A lock-free multicast replay buffer with reactive backpressure.
//!
//! [`ReplayProcessor`] accepts a value stream from a single upstream
//! producer and re-emits the recorded history (all of it, or a bounded
//! tail) to every downstream subscriber, each at its own `request(n)`
//! pace.
//!
//! ## Design Principles
//!
//! 1. **No locks, no threads**: only atomics; every delivery runs on a
//!    caller thread (the producer's or a requester's), and no call blocks
//! 2. **Per-subscriber serialization**: a work-in-progress counter admits
//!    at most one draining thread per subscriber while losing no signal
//! 3. **Exactly-once, in-order delivery**: each subscriber sees the
//!    stream without gaps or duplicates, ended by one terminal signal
//! 4. **Independent progress**: a slow or blocked subscriber never delays
//!    the others
//!
//! ## Example
//!
//! ```rust,ignore
//! use replaycast_core::ReplayProcessor;
//!
//! let processor = ReplayProcessor::unbounded(64);
//!
//! processor.on_next("alpha");
//! processor.on_next("beta");
//!
//! // Late subscribers replay the full history.
//! processor.subscribe_fn(|value| println!("{value}"));
//!
//! processor.on_complete();
//! ```
//!
//! ## Module Structure
//!
//! - [`config`]: Buffer strategy and sizing
//! - [`error`]: Error types and the shared terminal-error alias
//! - [`subscriber`]: The downstream `Subscriber`/`Subscription` contract
//! - [`drops`]: Out-of-band hook for post-terminal signals
//! - [`processor`]: The processor facade
//! - [`subscription`]: Per-subscriber state and backpressure
//!
//! ## Backpressure
//!
//! Demand is credit-based: a subscriber receives at most as many values as
//! it has requested, with `u64::MAX` meaning unbounded demand. Terminal
//! signals consume no demand, so a caught-up subscriber learns about
//! completion or failure even at zero credit.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Unsafe is confined to the buffer slot/latch publication protocols.
#![allow(unsafe_code)]

mod buffer;
pub mod config;
pub mod drops;
pub mod error;
pub mod processor;
mod registry;
pub mod subscriber;
pub mod subscription;

pub use config::{ReplayConfig, ReplayConfigBuilder, ReplayMode, DEFAULT_BUFFER_SIZE};
pub use drops::{DropHook, LogDrops};
pub use error::{signal_error, InvalidDemandError, SignalError};
pub use processor::ReplayProcessor;
pub use subscriber::{FnSubscriber, Subscriber, Subscription};
pub use subscription::ReplaySubscription;
