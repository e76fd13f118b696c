//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use env_logger::Env;
use wikiflat_cli::CliError;

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    match wikiflat_cli::run() {
        Ok(()) => {}
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            log::error!("wikiflat: {err}");
            std::process::exit(1);
        }
    }
}
