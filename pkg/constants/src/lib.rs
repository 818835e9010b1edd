//! Centralized constants for the encore project.
//!
//! Store keys, channel names and tunable defaults live here so the election,
//! checkpoint and API crates agree on them.

pub mod defaults;
pub mod state;
