//! Stable exit codes for `krya` CLI commands.

/// Command succeeded; for `krya run`, the job completed.
pub const OK: i32 = 0;
/// Invalid input, configuration or an internal error.
pub const INVALID: i32 = 1;
/// `krya run` exhausted its attempts without a successful execution.
pub const FAILED: i32 = 2;
/// `krya run` was stopped (Ctrl-C) before finishing.
pub const STOPPED: i32 = 3;
