//! CLI command implementations (facade).
//!
//! This module re-exports the command surface used by `run.rs` and CLI tests.
//! Implementations live in `commands/*`.

mod check;
mod config;
mod json_emit;

pub use check::{execute_check_command, load_api_request, render_report};
pub use config::execute_config_command;
pub use json_emit::{emit_config_json, emit_response_json};
