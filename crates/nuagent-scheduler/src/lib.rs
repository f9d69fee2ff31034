//! Dependency scheduling and parallel fan-out/fan-in execution for tool calls
//! within a single assistant turn.
//!
//! [`schedule`] groups an ordered list of classified tool calls into batches
//! that may run concurrently; [`execute_batch`] runs one such batch, preserving
//! input order and isolating per-call panics/errors.

mod batch;
mod executor;

pub use batch::{schedule, Classified, OpType, Scope};
pub use executor::{execute_batch, CallOutcome};
