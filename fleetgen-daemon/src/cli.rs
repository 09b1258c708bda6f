//! CLI argument definitions for fleetgend.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Fleetgen config generation daemon.
///
/// Regenerates templated configuration files from Docker container
/// state. Runs either from a TOML config file describing one or more
/// pipelines, or in single-pipeline mode from a positional template.
#[derive(Parser, Debug)]
#[command(name = "fleetgend")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to a fleetgen.toml configuration file.
    ///
    /// Mutually exclusive with a positional template.
    #[arg(short, long, conflicts_with = "template")]
    pub config: Option<PathBuf>,

    /// Template file for single-pipeline mode.
    pub template: Option<PathBuf>,

    /// Destination file; writes to stdout when omitted.
    pub dest: Option<PathBuf>,

    /// Regenerate on container events.
    #[arg(short, long)]
    pub watch: bool,

    /// Debounce window for event triggers, `min[:max]` (e.g. `500ms:2s`).
    #[arg(long, default_value = "")]
    pub wait: String,

    /// Regenerate every N seconds regardless of events; 0 disables.
    #[arg(long, default_value_t = 0)]
    pub interval: u64,

    /// Shell command to run after the destination changed.
    #[arg(long)]
    pub notify: Option<String>,

    /// Log the notify command's output.
    #[arg(long)]
    pub notify_output: bool,

    /// Only include containers with exposed ports.
    #[arg(long)]
    pub only_exposed: bool,

    /// Only include containers with published ports.
    #[arg(long)]
    pub only_published: bool,

    /// Include stopped containers.
    #[arg(long)]
    pub include_stopped: bool,

    /// Docker list filter (`key=value`, repeatable), e.g.
    /// `label=com.example.role=web` or `status=running`.
    #[arg(long = "container-filter", value_name = "KEY=VALUE")]
    pub container_filter: Vec<String>,

    /// Keep whitespace-only lines in the output.
    #[arg(long)]
    pub keep_blank_lines: bool,

    /// Docker endpoint, e.g. `unix:///var/run/docker.sock`.
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Validate configuration and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, pretty).
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}
