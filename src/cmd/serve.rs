//! HTTP server command: `gap-foundry serve`.

use std::sync::Arc;

use anyhow::Result;
use gap_foundry::config::{AppConfig, ProviderKind};
use gap_foundry::validation::capability::{AnalysisCapability, OpenAiCapability, ScriptedCapability};
use gap_foundry::validation::server;

/// Command-line overrides applied on top of the loaded config.
#[derive(Debug, Default)]
pub struct ServeOptions {
    pub port: Option<u16>,
    pub dev: bool,
    pub dry_run: bool,
}

pub fn build_capability(config: &AppConfig, dry_run: bool) -> Result<Arc<dyn AnalysisCapability>> {
    if dry_run {
        return Ok(Arc::new(ScriptedCapability::new()));
    }
    Ok(match config.capability.provider {
        ProviderKind::Openai => Arc::new(OpenAiCapability::from_config(&config.capability)?),
        ProviderKind::Scripted => Arc::new(ScriptedCapability::new()),
    })
}

pub async fn cmd_serve(mut config: AppConfig, options: ServeOptions) -> Result<()> {
    if let Some(port) = options.port {
        config.server.port = port;
    }
    if options.dev {
        config.server.dev_mode = true;
    }

    let capability = build_capability(&config, options.dry_run)?;
    if options.dry_run {
        println!(
            "{}",
            console::style("Dry run: stages return scripted output, no provider calls").yellow()
        );
    }
    tracing::info!(
        provider = capability.name(),
        data_dir = %config.server.data_dir.display(),
        "Starting validation server"
    );

    server::start_server(config, capability).await
}
