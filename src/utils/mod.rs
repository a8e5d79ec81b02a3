//! Shared utilities: error types and time sources.

pub mod errors;
pub mod time;
