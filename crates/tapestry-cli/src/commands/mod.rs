//! Subcommand implementations
//!
//! Each command returns `Ok(true)` when everything it looked at was
//! clean, `Ok(false)` when it reported problems.

pub mod check;
pub mod dump;
pub mod weave;
