//! Show committed positions

use anyhow::{Context, Result};
use tether_core::Config;
use tether_runtime::build_offset_store;

/// Print the last committed position as JSON, or `none`
pub async fn run(config: &Config, connector: Option<&str>) -> Result<()> {
    let name = connector.unwrap_or(&config.connector.name);
    let store = build_offset_store(&config.offsets);

    let last = store
        .read_last(name)
        .await
        .with_context(|| format!("Failed to read committed position for '{}'", name))?;

    match last {
        Some(index) => println!("{}", index),
        None => println!("none"),
    }
    Ok(())
}
