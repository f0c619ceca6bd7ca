//! `concord config`: show the resolved configuration.

use anyhow::Result;

use super::json_emit::emit_config_json;
use crate::Config;

pub fn execute_config_command(json: bool, config: &Config) -> Result<()> {
    let effective = config.effective_config();

    if json {
        println!("{}", emit_config_json(&effective)?);
        return Ok(());
    }

    println!("Effective configuration:");
    for (key, (value, source)) in effective {
        println!("  {key} = {value} (from {source})");
    }
    Ok(())
}
