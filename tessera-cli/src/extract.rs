//! Extract command implementation for the Tessera CLI.

use std::io::Write;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};
use tessera_core::{
    AreaData, ClosureDepth, ExtractOptions, Extraction, Extent, QueryContext, SeedMode,
    extract_with_connector,
};
use tessera_data::SqliteConnector;

use crate::{
    ARG_CLOSURE, ARG_DATABASE, ARG_LATMAX, ARG_LATMIN, ARG_LONMAX, ARG_LONMIN, ARG_MARGIN,
    ARG_OUTPUT, ARG_SEED, ARG_TIMEOUT_SECS, CliError, ENV_DATABASE, ENV_LATMAX, ENV_LATMIN,
    ENV_LONMAX, ENV_LONMIN,
};

/// CLI arguments for the `extract` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Extract every point, path and group intersecting a WGS84 \
                 extent from an SQLite spatial store, together with every \
                 entity they reference, and write the closed area as JSON. \
                 Values can come from CLI flags, configuration files, or \
                 environment variables.",
    about = "Extract a closed area around an extent"
)]
#[ortho_config(prefix = "TESSERA")]
pub(crate) struct ExtractArgs {
    /// Path to the SQLite spatial store.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Southern bound in degrees.
    #[arg(long = ARG_LATMIN, value_name = "deg", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) latmin: Option<f64>,
    /// Northern bound in degrees.
    #[arg(long = ARG_LATMAX, value_name = "deg", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) latmax: Option<f64>,
    /// Western bound in degrees.
    #[arg(long = ARG_LONMIN, value_name = "deg", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) lonmin: Option<f64>,
    /// Eastern bound in degrees.
    #[arg(long = ARG_LONMAX, value_name = "deg", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) lonmax: Option<f64>,
    /// Relative enlargement applied to the extent before seeding.
    #[arg(long = ARG_MARGIN, value_name = "factor", allow_negative_numbers = true)]
    #[serde(default)]
    pub(crate) margin: Option<f64>,
    /// How paths and groups are seeded: `geometry` or `references`.
    #[arg(long = ARG_SEED, value_name = "mode")]
    #[serde(default)]
    pub(crate) seed: Option<String>,
    /// How far reference discovery goes: `bounded` or `transitive`.
    #[arg(long = ARG_CLOSURE, value_name = "depth")]
    #[serde(default)]
    pub(crate) closure: Option<String>,
    /// Abort the extraction after this many seconds.
    #[arg(long = ARG_TIMEOUT_SECS, value_name = "secs")]
    #[serde(default)]
    pub(crate) timeout_secs: Option<u64>,
    /// Write the area to this file instead of stdout.
    #[arg(long = ARG_OUTPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
}

impl ExtractArgs {
    pub(crate) fn into_config(self) -> Result<ExtractConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ExtractConfig::try_from(merged)
    }
}

/// Resolved `extract` command configuration.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExtractConfig {
    /// Path to the SQLite spatial store.
    pub(crate) database: Utf8PathBuf,
    /// Requested extent.
    pub(crate) extent: Extent,
    /// Optional relative enlargement.
    pub(crate) margin: Option<f64>,
    /// Seed mode.
    pub(crate) seed_mode: SeedMode,
    /// Closure depth.
    pub(crate) depth: ClosureDepth,
    /// Time budget for the whole extraction.
    pub(crate) timeout: Option<Duration>,
    /// Output file, or `None` for stdout.
    pub(crate) output: Option<Utf8PathBuf>,
}

impl ExtractConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        let field = ARG_DATABASE;
        let path = &self.database;
        match tessera_fs::file_is_file(path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CliError::SourcePathNotFile {
                field,
                path: path.clone(),
            }),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Err(CliError::MissingSourceFile {
                    field,
                    path: path.clone(),
                })
            }
            Err(source) => Err(CliError::InspectSourcePath {
                field,
                path: path.clone(),
                source,
            }),
        }
    }

    /// Extraction options for this configuration.
    pub(crate) fn options(&self) -> ExtractOptions {
        let context = self
            .timeout
            .map_or_else(QueryContext::default, |timeout| {
                QueryContext::default().with_timeout(timeout)
            });
        let options = ExtractOptions::default()
            .with_seed_mode(self.seed_mode)
            .with_depth(self.depth)
            .with_context(context);
        match self.margin {
            Some(factor) => options.with_margin(factor),
            None => options,
        }
    }
}

impl TryFrom<ExtractArgs> for ExtractConfig {
    type Error = CliError;

    fn try_from(args: ExtractArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_DATABASE,
        })?;
        let latmin = require(args.latmin, ARG_LATMIN, ENV_LATMIN)?;
        let latmax = require(args.latmax, ARG_LATMAX, ENV_LATMAX)?;
        let lonmin = require(args.lonmin, ARG_LONMIN, ENV_LONMIN)?;
        let lonmax = require(args.lonmax, ARG_LONMAX, ENV_LONMAX)?;
        let extent = Extent::new(latmin, latmax, lonmin, lonmax)?;

        if let Some(value) = args.margin.filter(|m| !m.is_finite()) {
            return Err(CliError::InvalidMargin {
                field: ARG_MARGIN,
                value,
            });
        }
        let seed_mode = args
            .seed
            .as_deref()
            .map(str::parse::<SeedMode>)
            .transpose()?
            .unwrap_or_default();
        let depth = args
            .closure
            .as_deref()
            .map(str::parse::<ClosureDepth>)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            database,
            extent,
            margin: args.margin,
            seed_mode,
            depth,
            timeout: args.timeout_secs.map(Duration::from_secs),
            output: args.output,
        })
    }
}

fn require(value: Option<f64>, field: &'static str, env: &'static str) -> Result<f64, CliError> {
    value.ok_or(CliError::MissingArgument { field, env })
}

pub(crate) fn run_extract(args: ExtractArgs) -> Result<(), CliError> {
    let config = resolve_extract_config(args)?;
    let extraction = execute_extract(&config)?;
    match &config.output {
        Some(path) => write_area_to_file(path, &extraction.area),
        None => {
            let mut stdout = std::io::stdout().lock();
            write_area(&mut stdout, &extraction.area)
        }
    }
}

fn resolve_extract_config(args: ExtractArgs) -> Result<ExtractConfig, CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    Ok(config)
}

/// Run the extraction described by `config` against its database.
pub(crate) fn execute_extract(config: &ExtractConfig) -> Result<Extraction, CliError> {
    let connector = SqliteConnector::new(config.database.clone());
    let extraction = extract_with_connector(&connector, &config.extent, config.options())?;
    info!(
        "extracted {} entities from {} ({} dangling references)",
        extraction.area.counts().total(),
        config.database,
        extraction.report.dangling.len()
    );
    Ok(extraction)
}

pub(crate) fn write_area_to_file(path: &Utf8Path, area: &AreaData) -> Result<(), CliError> {
    let mut file =
        tessera_fs::create_utf8_file(path).map_err(|source| CliError::CreateOutput {
            path: path.to_path_buf(),
            source,
        })?;
    write_area(&mut file, area)
}

/// Write `area` as pretty JSON followed by a newline.
pub(crate) fn write_area(writer: &mut dyn Write, area: &AreaData) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(area).map_err(CliError::SerialiseArea)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    writer.flush().map_err(CliError::WriteOutput)
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ExtractConfig, CliError> {
    let merged = ExtractArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ExtractConfig::try_from(merged)
}
