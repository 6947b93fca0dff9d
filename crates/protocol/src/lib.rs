//! The event-stream protocol for StepChain runs.
//!
//! One producer (the step driver), one consumer (whoever started the run).
//! Events are totally ordered per run; the stream closes exactly once, after
//! exactly one of `chain_completed`, `tools_requested`, or `chain_error`.
//! The [`legacy`] module adapts the stream to the older event shape.

pub mod event;
pub mod legacy;
pub mod stream;

pub use event::ChainEvent;
pub use legacy::{LegacyEvent, LegacyRun, adapt};
pub use stream::{EventSink, EventStream, channel};
