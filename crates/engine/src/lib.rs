//! StepChain execution engine.
//!
//! The crate that ties the rest of the workspace together: [`start`] runs a
//! chain cursor against a provider map, streaming ordered events and settling
//! exactly one [`RunResult`]; [`resume`] picks a paused run back up from the
//! pause cache with externally-produced tool results.

pub mod driver;
pub mod handle;
pub mod resume;
pub mod validator;

pub use driver::{RunOptions, start};
pub use handle::{RunHandle, RunOutcome, RunResult};
pub use resume::resume;
pub use validator::{ValidatedStep, validate_step};
