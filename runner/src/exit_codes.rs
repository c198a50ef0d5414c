//! Stable exit codes for the `modrunner` CLI.

/// Every selected test passed.
pub const OK: i32 = 0;
/// The run finished but at least one test failed.
pub const FAILED: i32 = 1;
/// Invalid invocation, configuration, or a system error during the run.
pub const INVALID: i32 = 2;
