//! Write a default config: `gap-foundry init-config [path]`.

use std::path::Path;

use anyhow::{Result, bail};
use gap_foundry::config::AppConfig;

pub fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        );
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    AppConfig::default().save(path)?;
    println!("Created {}", path.display());
    Ok(())
}
