//! Shared utilities for the Kairo chat client workspace.
//!
//! - `logger`: tracing subscriber setup for binaries and tests
//! - `time`: clock abstraction and timestamp conversions

pub mod logger;
pub mod time;
