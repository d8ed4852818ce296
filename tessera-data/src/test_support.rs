//! Writers that materialise in-memory fixtures as SQLite spatial stores.

use std::io;

use camino::Utf8Path;
use rusqlite::{Connection, Transaction, params};
use thiserror::Error;

use tessera_core::test_support::StoreFixture;
use tessera_core::{MercatorEnvelope, RawTags};

use crate::SqliteStoreError;
use crate::schema::{add_tag_columns, initialise_schema, quote_identifier};

/// Failure raised while writing a fixture database.
#[derive(Debug, Error)]
pub enum FixtureWriteError {
    /// Preparing the destination directory failed.
    #[error("failed to prepare fixture directory: {0}")]
    Io(#[from] io::Error),
    /// Creating the schema failed.
    #[error(transparent)]
    Schema(#[from] SqliteStoreError),
    /// Inserting rows failed.
    #[error("failed to insert fixture rows: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Encoding a JSON column failed.
    #[error("failed to encode fixture column: {0}")]
    Json(#[from] serde_json::Error),
}

/// Write `fixture` to a new spatial store database at `path`.
///
/// Path and group envelopes are the ones [`StoreFixture`] derives, so the
/// database answers geometry queries exactly like the in-memory store.
pub fn write_fixture(path: &Utf8Path, fixture: &StoreFixture) -> Result<(), FixtureWriteError> {
    tessera_fs::ensure_parent_dir(path)?;
    let mut connection = Connection::open(path)?;
    initialise_schema(&mut connection)?;

    let keys: Vec<&str> = fixture
        .points()
        .iter()
        .flat_map(|row| row.tags.columns.iter().map(|(key, _)| key.as_str()))
        .collect();
    add_tag_columns(&connection, keys)?;

    let transaction = connection.transaction()?;
    write_points(&transaction, fixture)?;
    for row in fixture.paths() {
        insert_enveloped(
            &transaction,
            "INSERT INTO ways (id, nodes, tags, geometry, min_x, min_y, max_x, max_y)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            row.id,
            serde_json::to_string(&row.point_ids)?,
            &row.tags,
            row.geometry.as_deref(),
            fixture.path_envelope(row),
        )?;
    }
    for row in fixture.groups() {
        insert_enveloped(
            &transaction,
            "INSERT INTO relations (id, members, tags, geometry, min_x, min_y, max_x, max_y)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            row.id,
            serde_json::to_string(&row.members)?,
            &row.tags,
            row.geometry.as_deref(),
            fixture.group_envelope(row),
        )?;
    }
    transaction.commit()?;
    Ok(())
}

fn write_points(transaction: &Transaction<'_>, fixture: &StoreFixture) -> rusqlite::Result<()> {
    for row in fixture.points() {
        transaction.execute(
            "INSERT INTO nodes (id, lat, lon) VALUES (?1, ?2, ?3)",
            params![row.id, row.lat_e7, row.lon_e7],
        )?;
        if row.tags.columns.is_empty() {
            continue;
        }
        let columns: Vec<String> = row
            .tags
            .columns
            .iter()
            .map(|(key, _)| quote_identifier(key))
            .collect();
        let placeholders: Vec<String> = (2..=row.tags.columns.len() + 1)
            .map(|n| format!("?{n}"))
            .collect();
        let sql = format!(
            "INSERT INTO node_tags (osm_id, {}) VALUES (?1, {})",
            columns.join(", "),
            placeholders.join(", ")
        );
        let values: Vec<rusqlite::types::Value> = std::iter::once(row.id.into())
            .chain(
                row.tags
                    .columns
                    .iter()
                    .map(|(_, value)| value.clone().map_or(rusqlite::types::Value::Null, Into::into)),
            )
            .collect();
        transaction.execute(&sql, rusqlite::params_from_iter(values))?;
    }
    Ok(())
}

fn insert_enveloped(
    transaction: &Transaction<'_>,
    sql: &str,
    id: i64,
    references: String,
    tags: &RawTags,
    geometry: Option<&[u8]>,
    envelope: MercatorEnvelope,
) -> Result<(), FixtureWriteError> {
    let tags = interleaved_json(tags)?;
    transaction.execute(
        sql,
        params![
            id,
            references,
            tags,
            geometry,
            envelope.min_x,
            envelope.min_y,
            envelope.max_x,
            envelope.max_y
        ],
    )?;
    Ok(())
}

/// Interleaved JSON for a `tags` column, or `None` when there are no tags.
fn interleaved_json(tags: &RawTags) -> serde_json::Result<Option<String>> {
    let flat: Vec<&str> = match &tags.interleaved {
        Some(values) => values.iter().map(String::as_str).collect(),
        None => tags
            .columns
            .iter()
            .filter_map(|(key, value)| value.as_deref().map(|v| [key.as_str(), v]))
            .flatten()
            .collect(),
    };
    if flat.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&flat).map(Some)
}
