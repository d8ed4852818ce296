//! Facade crate for the Tessera area extractor.
//!
//! This crate re-exports the core domain types and the extraction entry
//! points, and exposes the SQLite store behind the `store-sqlite` feature.

#![forbid(unsafe_code)]

pub use tessera_core::{
    AreaData, ClosureDepth, ExtractError, ExtractOptions, Extraction, Extent, ExtentError,
    Group, Path, Point, QueryContext, QueryError, Scene, SeedMode, SpatialStore, StoreConnector,
    Style, data_from_extent, data_from_extent_with, extract_with_connector, represent,
};

#[cfg(feature = "store-sqlite")]
pub use tessera_data::{SqliteConnector, SqliteStore, SqliteStoreError};
