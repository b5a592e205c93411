//! Deterministic, pure logic of the orchestration engine.
//!
//! Core modules are free of I/O. They operate on in-memory definitions, run
//! state and JSON documents, and return deterministic results suitable for
//! tests.

pub mod assemble;
pub mod context;
pub mod contract;
pub mod invariants;
pub mod ledger;
pub mod predicate;
pub mod repair;
pub mod resolve;
pub mod types;
pub mod validate;
