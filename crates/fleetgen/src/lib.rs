#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`FleetgenError`)
//! - [`config`]: TOML configuration (`FleetgenConfig`, `PipelineConfig`, `Wait`)
//! - [`event`]: Daemon events (`ContainerEvent`, `EventKind`)
//! - [`docker`]: Docker API abstraction (`DockerClient` trait, `BollardDockerClient`)
//! - [`context`]: Template-facing container model (`RuntimeContainer`, `DockerInfo`)
//! - [`path`]: Dotted-path value resolution (`deep_get`)
//! - [`template`]: Tera rendering and selection filters (`Renderer`, `TeraRenderer`)
//! - [`writer`]: Idempotent atomic destination updates (`write_output`)
//! - [`notify`]: Post-change actions (`execute_actions`)
//! - [`debounce`]: Min/max event debouncing (`spawn_debounce`)
//! - [`watcher`]: Event stream supervision (`EventWatcher`)
//! - [`generator`]: Pipeline orchestration (`Generator`)
//!
//! # Architecture
//!
//! ```text
//! docker events --> EventWatcher --fan-out--> debounce --> regenerate
//!                        |                                    |
//!                     resync ---------> regenerate_all        |
//!                                                             v
//!                                     render -> strip -> write_output
//!                                                             |
//!                                                  changed? -> notify/signals
//! ```

pub mod config;
pub mod context;
pub mod debounce;
pub mod docker;
pub mod error;
pub mod event;
pub mod generator;
pub mod notify;
pub mod path;
pub mod template;
pub mod watcher;
pub mod writer;

// --- Public API Re-exports ---

// Generator (main orchestrator)
pub use generator::Generator;

// Configuration
pub use config::{FleetgenConfig, PipelineConfig, Wait, RESTART_SIGNAL};

// Error
pub use error::FleetgenError;

// Events
pub use event::{ContainerEvent, EventKind};

// Docker API
pub use docker::{BollardDockerClient, DockerClient};

// Container model
pub use context::{DockerInfo, DockerInfoCache, RuntimeContainer};

// Templates
pub use template::{Renderer, TemplateContext, TeraRenderer};

// Deep path resolution
pub use path::deep_get;
