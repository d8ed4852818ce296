//! Error types emitted by the Tessera CLI.
//!
//! Keep this error type reasonably small, as CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use tessera_core::{ExtentError, ExtractError, ParseOptionError};
use thiserror::Error;

/// Errors emitted by the Tessera CLI.
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
        field: &'static str,
        env: &'static str,
    },
    /// A referenced input path does not exist.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        field: &'static str,
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        field: &'static str,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The extent bounds were rejected.
    #[error("invalid extent: {0}")]
    InvalidExtent(#[from] ExtentError),
    /// A seed mode or closure depth was not recognised.
    #[error(transparent)]
    InvalidOption(#[from] ParseOptionError),
    /// The margin was not a finite number.
    #[error("--{field} must be finite, got {value}")]
    InvalidMargin { field: &'static str, value: f64 },
    /// The extraction failed.
    #[error("extraction failed: {0}")]
    Extract(#[source] Box<ExtractError>),
    /// Serialising the extracted area failed.
    #[error("failed to serialise extracted area: {0}")]
    SerialiseArea(#[source] serde_json::Error),
    /// Creating the output file failed.
    #[error("failed to create output file {path:?}: {source}")]
    CreateOutput {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Writing the extracted area failed.
    #[error("failed to write extracted area: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<ExtractError> for CliError {
    fn from(err: ExtractError) -> Self {
        Self::Extract(Box::new(err))
    }
}
