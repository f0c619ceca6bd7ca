//! JSON emit functions for CLI output
//!
//! Everything printed with `--json` goes through JCS (RFC 8785) so repeated
//! runs over the same inputs produce byte-identical output.

use anyhow::{Context, Result};
use std::collections::BTreeMap;

use crate::emit_jcs;
use crate::engine::ConsistencyResponse;

/// Emit a consistency response as canonical JSON
pub fn emit_response_json(response: &ConsistencyResponse) -> Result<String> {
    emit_jcs(response).context("Failed to emit consistency response JSON")
}

/// Emit the effective configuration as canonical JSON
pub fn emit_config_json(effective: &BTreeMap<String, (String, String)>) -> Result<String> {
    let entries: BTreeMap<&str, serde_json::Value> = effective
        .iter()
        .map(|(key, (value, source))| {
            (
                key.as_str(),
                serde_json::json!({ "value": value, "source": source }),
            )
        })
        .collect();
    emit_jcs(&entries).context("Failed to emit configuration JSON")
}
