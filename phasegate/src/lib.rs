//! Declarative multi-phase pipeline orchestration.
//!
//! A pipeline definition lists phases with input/output contracts, optional
//! enable predicates and human review gates. The engine walks the phases in
//! order, threads each phase's output into later inputs, checks outputs
//! against their contracts, collects artifact references, and assembles a
//! final [`core::assemble::PipelineResult`].
//!
//! - **[`core`]**: Pure logic (context lookup, input resolution, output
//!   validation, definition invariants, result assembly). No I/O.
//! - **[`io`]**: Side effects (definition and param loading, executor
//!   processes, review transports, the run store).
//!
//! Orchestration modules ([`pipeline`], [`gate`], [`plan`]) combine the two to
//! implement CLI commands.

pub mod clock;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
