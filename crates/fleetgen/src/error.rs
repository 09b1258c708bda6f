//! Error types for the generation engine.
//!
//! The taxonomy follows how failures are handled at runtime:
//!
//! - [`FleetgenError::DockerApi`] / [`FleetgenError::DockerConnection`] are
//!   transient upstream failures. Callers retry with a fixed backoff or skip
//!   the tick; they are never fatal.
//! - [`FleetgenError::Config`], [`FleetgenError::Template`] and
//!   [`FleetgenError::Io`] indicate configuration bugs (malformed template,
//!   unwritable destination) and terminate the process with a non-zero exit.
//! - Per-target action failures (one notify command, one signal delivery)
//!   carry no variant of their own: they are logged where they happen and
//!   never propagate past the action executor.

/// Domain error for the fleetgen engine.
#[derive(Debug, thiserror::Error)]
pub enum FleetgenError {
    /// Invalid configuration value.
    #[error("config error: {field}: {reason}")]
    Config {
        /// Offending field name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Config file could not be read.
    #[error("unable to read config file {path}: {source}")]
    ConfigIo {
        /// Config file path.
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed as TOML.
    #[error("unable to parse config file {path}: {reason}")]
    ConfigParse {
        /// Config file path.
        path: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// Docker API call failed.
    #[error("docker api error: {0}")]
    DockerApi(String),

    /// Docker daemon is unreachable.
    #[error("docker connection error: {0}")]
    DockerConnection(String),

    /// Template could not be parsed or rendered.
    #[error("template error: {0}")]
    Template(String),

    /// Filesystem failure while emitting a destination file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
