//! Shared output formatting for CLI commands

use anyhow::{Context, Result};
use serde::Serialize;

/// Print data as pretty JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Read a file argument, with `-` meaning standard input
pub fn read_input(path: &str) -> Result<String> {
    if path == "-" {
        let mut buffer = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer)
            .context("Failed to read standard input")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path))
    }
}
