//! Reader listing.

use anyhow::{Context, Result};
use console::style;
use nfcloader::DriverKind;

/// List readers command implementation.
pub(crate) fn cmd_list_readers(driver: DriverKind, json: bool) -> Result<()> {
    let readers = nfcloader::list_readers(driver)
        .with_context(|| format!("Failed to list {driver} readers"))?;

    if json {
        let value = serde_json::json!({
            "driver": driver.name(),
            "readers": readers,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style(format!("Available {driver} readers:"))
            .bold()
            .underlined()
    );

    if readers.is_empty() {
        eprintln!("  {}", style("No readers found").dim());
    } else {
        for (index, name) in readers.iter().enumerate() {
            let marker = if index == 0 {
                format!(" {}", style("(default)").dim())
            } else {
                String::new()
            };
            eprintln!("  {} {}{}", style("•").green(), style(name).cyan(), marker);
        }
    }

    Ok(())
}
