//! CLI command implementations.
//!
//! | Module        | Commands handled |
//! |---------------|------------------|
//! | `serve`       | `Serve`          |
//! | `check`       | `Check`          |
//! | `init_config` | `InitConfig`     |

pub mod check;
pub mod init_config;
pub mod serve;

use std::path::Path;

use anyhow::{Context, Result};
use gap_foundry::config::AppConfig;

pub use check::cmd_check;
pub use init_config::cmd_init_config;
pub use serve::{ServeOptions, cmd_serve};

/// Explicit `--config` must exist; otherwise `gapfoundry.toml` in the
/// working directory is used when present, defaults when not.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            AppConfig::load_or_default(&cwd)
        }
    }
}
