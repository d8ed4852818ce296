//! Spatial store schema for SQLite databases.
#![forbid(unsafe_code)]

use rusqlite::{Connection, OptionalExtension, Transaction};

use crate::SqliteStoreError;

/// Schema version recorded in `tessera_schema_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Tables a spatial store database must contain.
pub const REQUIRED_TABLES: [&str; 4] = ["nodes", "node_tags", "ways", "relations"];

/// Create the spatial store tables and indexes inside `connection`.
///
/// Existing databases must already carry [`SCHEMA_VERSION`]; any other
/// version is rejected so migrations can be applied explicitly.
///
/// # Examples
/// ```
/// use rusqlite::Connection;
/// use tessera_data::initialise_schema;
///
/// let mut conn = Connection::open_in_memory().expect("create in-memory database");
/// initialise_schema(&mut conn).expect("create spatial schema");
///
/// let version: i64 = conn
///     .query_row("SELECT version FROM tessera_schema_version", [], |row| row.get(0))
///     .expect("read schema version");
/// assert_eq!(version, 1);
/// ```
pub fn initialise_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let transaction = connection
        .transaction()
        .map_err(|source| SqliteStoreError::Schema {
            step: "begin schema transaction",
            source,
        })?;

    create_tables(&transaction)?;
    create_indexes(&transaction)?;
    ensure_schema_version(&transaction)?;

    transaction
        .commit()
        .map_err(|source| SqliteStoreError::Schema {
            step: "commit schema transaction",
            source,
        })
}

/// Add one nullable `TEXT` column to `node_tags` per unseen tag key.
///
/// Keys are quoted, so any string is a valid column name. Keys that already
/// have a column are skipped.
pub fn add_tag_columns<'k, I>(connection: &Connection, keys: I) -> Result<(), SqliteStoreError>
where
    I: IntoIterator<Item = &'k str>,
{
    let mut existing = tag_columns(connection)?;
    for key in keys {
        if key == "osm_id" || existing.iter().any(|column| column == key) {
            continue;
        }
        connection
            .execute(
                &format!("ALTER TABLE node_tags ADD COLUMN {} TEXT", quote_identifier(key)),
                [],
            )
            .map_err(|source| SqliteStoreError::Schema {
                step: "add tag column",
                source,
            })?;
        existing.push(key.to_owned());
    }
    Ok(())
}

fn tag_columns(connection: &Connection) -> Result<Vec<String>, SqliteStoreError> {
    let to_schema_error = |source| SqliteStoreError::Schema {
        step: "list tag columns",
        source,
    };
    let mut statement = connection
        .prepare("SELECT name FROM pragma_table_info('node_tags')")
        .map_err(to_schema_error)?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(to_schema_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(to_schema_error)?;
    Ok(names)
}

/// Quote `name` as an SQLite identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Name of the first required table missing from `connection`.
pub(crate) fn missing_table(connection: &Connection) -> rusqlite::Result<Option<&'static str>> {
    for table in REQUIRED_TABLES {
        if !table_exists(connection, table)? {
            return Ok(Some(table));
        }
    }
    Ok(None)
}

/// Recorded schema version, or `None` for databases built without one.
pub(crate) fn recorded_version(connection: &Connection) -> rusqlite::Result<Option<i64>> {
    if !table_exists(connection, "tessera_schema_version")? {
        return Ok(None);
    }
    connection
        .query_row("SELECT version FROM tessera_schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
}

fn table_exists(connection: &Connection, table: &str) -> rusqlite::Result<bool> {
    connection
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
}

fn create_tables(transaction: &Transaction<'_>) -> Result<(), SqliteStoreError> {
    run_migration_step(
        transaction,
        "create nodes",
        "CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY,
            lat INTEGER NOT NULL,
            lon INTEGER NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create node_tags",
        "CREATE TABLE IF NOT EXISTS node_tags (
            osm_id INTEGER PRIMARY KEY
        )",
    )?;
    run_migration_step(
        transaction,
        "create ways",
        "CREATE TABLE IF NOT EXISTS ways (
            id INTEGER PRIMARY KEY,
            nodes TEXT NOT NULL CHECK (json_valid(nodes)),
            tags TEXT CHECK (tags IS NULL OR json_valid(tags)),
            geometry BLOB,
            min_x REAL NOT NULL,
            min_y REAL NOT NULL,
            max_x REAL NOT NULL,
            max_y REAL NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create relations",
        "CREATE TABLE IF NOT EXISTS relations (
            id INTEGER PRIMARY KEY,
            members TEXT NOT NULL CHECK (json_valid(members)),
            tags TEXT CHECK (tags IS NULL OR json_valid(tags)),
            geometry BLOB,
            min_x REAL NOT NULL,
            min_y REAL NOT NULL,
            max_x REAL NOT NULL,
            max_y REAL NOT NULL
        )",
    )
}

fn create_indexes(transaction: &Transaction<'_>) -> Result<(), SqliteStoreError> {
    run_migration_step(
        transaction,
        "index nodes",
        "CREATE INDEX IF NOT EXISTS idx_nodes_lat_lon ON nodes(lat, lon)",
    )?;
    run_migration_step(
        transaction,
        "index ways",
        "CREATE INDEX IF NOT EXISTS idx_ways_bbox ON ways(min_x, max_x, min_y, max_y)",
    )?;
    run_migration_step(
        transaction,
        "index relations",
        "CREATE INDEX IF NOT EXISTS idx_relations_bbox
            ON relations(min_x, max_x, min_y, max_y)",
    )
}

fn ensure_schema_version(transaction: &Transaction<'_>) -> Result<(), SqliteStoreError> {
    run_migration_step(
        transaction,
        "create schema version table",
        "CREATE TABLE IF NOT EXISTS tessera_schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing_version: Option<i64> = transaction
        .query_row(
            "SELECT version FROM tessera_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| SqliteStoreError::Schema {
            step: "read schema version",
            source,
        })?;

    match existing_version {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(SqliteStoreError::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        }),
        None => transaction
            .execute(
                "INSERT INTO tessera_schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )
            .map(|_| ())
            .map_err(|source| SqliteStoreError::Schema {
                step: "record schema version",
                source,
            }),
    }
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), SqliteStoreError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| SqliteStoreError::Schema { step, source })
}
