//! I/O helpers for the test pipeline.

pub mod artifacts;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod instrument;
pub mod process;
pub mod sandbox;
pub mod store;
pub mod sync;
