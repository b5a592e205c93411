//! Stable exit codes for phasegate CLI commands.

/// Command succeeded; for `run`, the pipeline completed and reported success.
pub const OK: i32 = 0;
/// Invalid definition, parameters or config, or an infrastructure failure.
pub const INVALID: i32 = 1;
/// A phase halted the run (configuration, execution or validation error).
pub const PHASE_FAILED: i32 = 2;
/// A review gate rejected the run.
pub const CANCELLED: i32 = 3;
/// Every phase completed but the success field was not `true`.
pub const UNSUCCESSFUL: i32 = 4;
