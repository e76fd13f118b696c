//! Error types emitted by the wikiflat CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use thiserror::Error;
use wikiflat_data::{PipelineError, StateError};

/// Errors emitted by the wikiflat CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        /// Flag name of the option.
        field: &'static str,
        /// Environment variable naming the option.
        env: &'static str,
    },
    /// A referenced directory does not exist.
    #[error("{field} directory {path:?} does not exist")]
    MissingDirectory {
        /// Flag name of the option.
        field: &'static str,
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// A referenced directory could not be inspected due to an IO error.
    #[error("failed to inspect {field} directory {path:?}: {source}")]
    InspectDirectory {
        /// Flag name of the option.
        field: &'static str,
        /// Offending path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A workspace directory could not be created.
    #[error("failed to create directory {path:?}: {source}")]
    CreateDirectory {
        /// Directory being created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A numeric option is out of range.
    #[error("{field} must be at least 1")]
    ZeroValue {
        /// Flag name of the option.
        field: &'static str,
    },
    /// Reading or writing chunk state failed.
    #[error(transparent)]
    State(#[from] StateError),
    /// The pipeline failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// Writing command output failed.
    #[error("failed to write command output: {0}")]
    WriteOutput(#[source] std::io::Error),
}
