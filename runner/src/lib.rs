//! Test orchestration for module-based JavaScript applications.
//!
//! The pipeline mirrors a source tree (optionally instrumenting it for
//! coverage), discovers the modules its scripts register, selects the test
//! modules, runs them in batches through a test engine and merges the
//! per-run reports into one document. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (path filtering, registry,
//!   selection, event types, result aggregation). No I/O, fully testable in
//!   isolation.
//! - **[`io`]**: Side-effecting operations (filesystem walks, subprocesses,
//!   the engine session). Isolated behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`orchestrate`], [`pipeline`]) coordinate core
//! logic with I/O to implement the `test` command.

pub mod console;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod pipeline;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
