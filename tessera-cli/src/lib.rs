//! Command-line interface for extracting closed areas from a spatial store.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};

mod error;
mod extract;

pub use error::CliError;

use extract::ExtractArgs;

pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_LATMIN: &str = "latmin";
pub(crate) const ARG_LATMAX: &str = "latmax";
pub(crate) const ARG_LONMIN: &str = "lonmin";
pub(crate) const ARG_LONMAX: &str = "lonmax";
pub(crate) const ARG_MARGIN: &str = "margin";
pub(crate) const ARG_SEED: &str = "seed";
pub(crate) const ARG_CLOSURE: &str = "closure";
pub(crate) const ARG_TIMEOUT_SECS: &str = "timeout-secs";
pub(crate) const ARG_OUTPUT: &str = "output";
pub(crate) const ENV_DATABASE: &str = "TESSERA_CMDS_EXTRACT_DATABASE";
pub(crate) const ENV_LATMIN: &str = "TESSERA_CMDS_EXTRACT_LATMIN";
pub(crate) const ENV_LATMAX: &str = "TESSERA_CMDS_EXTRACT_LATMAX";
pub(crate) const ENV_LONMIN: &str = "TESSERA_CMDS_EXTRACT_LONMIN";
pub(crate) const ENV_LONMAX: &str = "TESSERA_CMDS_EXTRACT_LONMAX";

/// Run the Tessera CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] when arguments or configuration are invalid, the
/// extraction fails or the result cannot be written.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Extract(args) => extract::run_extract(args),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "tessera",
    about = "Extract closed map areas from a spatial store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract every entity around an extent with everything it references.
    Extract(ExtractArgs),
}

#[cfg(test)]
mod tests;
