//! Foundation utilities shared by every concord crate.

pub mod canonicalization;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod types;
