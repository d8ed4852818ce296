//! SQLite adapter for the Tessera spatial store.
//!
//! Responsibilities:
//! - Create and validate the spatial store schema.
//! - Answer [`SpatialStore`](tessera_core::SpatialStore) queries from a
//!   read-only connection, honouring the query context in flight.
//!
//! Boundaries:
//! - Rows are returned raw; decoding and closure rules live in
//!   `tessera-core`.
//! - No process-wide connection state. Every extraction opens its own
//!   handle through [`SqliteConnector`].

pub mod schema;
mod sqlite;

#[doc(hidden)]
pub mod test_support;

pub use schema::{SCHEMA_VERSION, add_tag_columns, initialise_schema};
pub use sqlite::{SqliteConnector, SqliteStore, SqliteStoreError};
