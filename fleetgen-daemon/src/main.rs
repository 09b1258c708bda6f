//! fleetgend entry point.

mod cli;
mod logging;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use fleetgen::{BollardDockerClient, FleetgenConfig, Generator, PipelineConfig, Wait};

use crate::cli::DaemonCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    logging::init_tracing(cli.log_level.as_deref(), &cli.log_format)?;

    let config = build_config(&cli).await?;

    if cli.validate {
        info!("configuration valid");
        return Ok(());
    }

    let endpoint = cli.endpoint.clone().or_else(|| config.endpoint.clone());
    let client = Arc::new(
        match endpoint.as_deref() {
            Some(endpoint) => BollardDockerClient::connect(endpoint),
            None => BollardDockerClient::connect_local(),
        }
        .context("failed to create docker client")?,
    );

    let generator = Generator::new(client, config).context("failed to build generator")?;

    info!("fleetgend starting");
    generator
        .run()
        .await
        .context("generator stopped with an error")?;
    info!("fleetgend shut down");
    Ok(())
}

/// Builds the pipeline configuration from either a TOML file or the
/// single-pipeline CLI flags.
async fn build_config(cli: &DaemonCli) -> Result<FleetgenConfig> {
    if let Some(path) = &cli.config {
        let config = FleetgenConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?;
        return Ok(config);
    }

    let Some(template) = cli.template.clone() else {
        bail!("either --config or a template argument is required");
    };

    let wait = Wait::parse(&cli.wait).context("invalid --wait value")?;

    let mut container_filter: HashMap<String, Vec<String>> = HashMap::new();
    for entry in &cli.container_filter {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("invalid --container-filter '{entry}': expected KEY=VALUE");
        };
        container_filter
            .entry(key.to_owned())
            .or_default()
            .push(value.to_owned());
    }

    let config = FleetgenConfig {
        endpoint: cli.endpoint.clone(),
        pipelines: vec![PipelineConfig {
            template: vec![template],
            dest: cli.dest.clone(),
            watch: cli.watch,
            wait,
            notify_cmd: cli.notify.clone(),
            notify_output: cli.notify_output,
            notify_containers: Default::default(),
            notify_containers_filter: Default::default(),
            notify_containers_signal: 0,
            container_filter,
            only_exposed: cli.only_exposed,
            only_published: cli.only_published,
            include_stopped: cli.include_stopped,
            keep_blank_lines: cli.keep_blank_lines,
            interval_secs: cli.interval,
        }],
    };
    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}
