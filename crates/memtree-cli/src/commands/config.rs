use std::path::Path;

use anyhow::Result;
use serde_json::json;

use crate::config::CliConfig;
use crate::output::{OutputFormat, print_json};

pub fn run(config: &CliConfig, db_path: &Path, format: OutputFormat) -> Result<()> {
    if format.is_json() {
        return print_json(&json!({
            "config_path": CliConfig::default_path(),
            "db_path": db_path,
            "memory": config.memory,
        }));
    }

    let config_path = CliConfig::default_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("Config file: {config_path}");
    println!("Database:    {}", db_path.display());
    println!();
    println!("{}", toml::to_string_pretty(&config.memory)?);
    Ok(())
}
