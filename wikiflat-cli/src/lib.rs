//! Command-line interface for the wikiflat claims pipeline.
//!
//! `init` prepares a workspace and registers its source files, `status`
//! prints the recorded stage of every file and `process` runs chunks through
//! the pipeline. Every option can come from CLI flags, `WIKIFLAT_*`
//! environment variables or a configuration file.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};

mod error;
mod process;
mod workspace;

pub use error::CliError;

use process::{ProcessArgs, run_process};
use workspace::{InitArgs, StatusArgs, run_init, run_status};

pub(crate) const ARG_ROOT: &str = "root";
pub(crate) const ARG_SOURCE_DIR: &str = "source-dir";
pub(crate) const ARG_BATCH_SIZE: &str = "batch-size";
pub(crate) const ARG_PARTITION_DIR: &str = "partition-dir";
pub(crate) const ARG_AUDIT_DIR: &str = "audit-dir";
pub(crate) const ARG_PREFETCH_BUDGET_BYTES: &str = "prefetch-budget-bytes";
pub(crate) const ARG_PREFETCH_MAX_AHEAD: &str = "prefetch-max-ahead";
pub(crate) const ARG_CHUNK: &str = "chunk";

pub(crate) const ENV_INIT_ROOT: &str = "WIKIFLAT_CMDS_INIT_ROOT";
pub(crate) const ENV_STATUS_ROOT: &str = "WIKIFLAT_CMDS_STATUS_ROOT";
pub(crate) const ENV_PROCESS_ROOT: &str = "WIKIFLAT_CMDS_PROCESS_ROOT";

/// Run the wikiflat CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] when argument parsing, configuration or the selected
/// command fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Init(args) => run_init(args),
        Command::Status(args) => run_status(args),
        Command::Process(args) => run_process(args),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "wikiflat",
    about = "Flatten Wikidata dump chunks into columnar tables",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the workspace layout and register source files.
    Init(InitArgs),
    /// Print the recorded stage of every source file.
    Status(StatusArgs),
    /// Process and partition unfinished chunks.
    Process(ProcessArgs),
}

#[cfg(test)]
mod tests;
