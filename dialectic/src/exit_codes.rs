//! Stable exit codes for the `dialectic` CLI.

/// The run finished (approved or turn budget exhausted), or a non-run command succeeded.
pub const OK: i32 = 0;
/// Setup failed: invalid config, missing requirements, credentials, or a failed initial plan.
pub const INVALID: i32 = 1;
/// The run was interrupted (SIGINT).
pub const INTERRUPTED: i32 = 130;
