//! Output formatting utilities

use anyhow::Result;
use serde::Serialize;

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(data: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Print a value as TOML
pub fn print_toml<T: Serialize>(data: &T) -> Result<()> {
    println!("{}", toml::to_string_pretty(data)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("✓ {}", message);
}
