//! SQLite-backed [`SpatialStore`].
//!
//! Points live in `nodes` with their tags in the column-per-tag `node_tags`
//! table. Paths and groups live in `ways` and `relations`, whose ID arrays and
//! interleaved tags are JSON text and whose envelopes are stored as Web
//! Mercator bounds. ID batches are bound as one JSON array and expanded with
//! `json_each`, so a batch is always a single statement whatever its size.

use std::fmt;
use std::panic::AssertUnwindSafe;

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Params, Row, params_from_iter};
use serde::de::DeserializeOwned;
use thiserror::Error;

use tessera_core::{
    EntityId, ExtentE7, GroupRow, MercatorEnvelope, PathRow, PointRow, QueryContext, QueryError,
    RawTags, SpatialStore, StoreConnector,
};

use crate::schema::{SCHEMA_VERSION, missing_table, recorded_version};

/// Virtual machine steps between two cancellation checks.
const PROGRESS_STEPS: i32 = 1_000;

const POINT_COLUMNS: usize = 3;

const POINTS_IN_EXTENT: &str = "SELECT n.id, n.lat, n.lon, t.*
    FROM nodes AS n
    LEFT JOIN node_tags AS t ON t.osm_id = n.id
    WHERE n.lat BETWEEN ?1 AND ?2 AND n.lon BETWEEN ?3 AND ?4
    ORDER BY n.id";

const POINTS_BY_ID: &str = "SELECT n.id, n.lat, n.lon, t.*
    FROM nodes AS n
    LEFT JOIN node_tags AS t ON t.osm_id = n.id
    WHERE n.id IN (SELECT value FROM json_each(?1))
    ORDER BY n.id";

const PATHS_INTERSECTING: &str = "SELECT id, nodes, tags, geometry
    FROM ways
    WHERE min_x <= ?3 AND max_x >= ?1 AND min_y <= ?4 AND max_y >= ?2
    ORDER BY id";

const PATHS_BY_ID: &str = "SELECT id, nodes, tags, geometry
    FROM ways
    WHERE id IN (SELECT value FROM json_each(?1))
    ORDER BY id";

const PATHS_REFERENCING_POINTS: &str = "SELECT w.id, w.nodes, w.tags, w.geometry
    FROM ways AS w
    WHERE EXISTS (
        SELECT 1 FROM json_each(w.nodes) AS node
        WHERE node.value IN (SELECT value FROM json_each(?1))
    )
    ORDER BY w.id";

const GROUPS_INTERSECTING: &str = "SELECT id, members, tags, geometry
    FROM relations
    WHERE min_x <= ?3 AND max_x >= ?1 AND min_y <= ?4 AND max_y >= ?2
    ORDER BY id";

const GROUPS_REFERENCING_PATHS: &str = "SELECT r.id, r.members, r.tags, r.geometry
    FROM relations AS r
    WHERE EXISTS (
        SELECT 1 FROM json_each(r.members) AS member
        WHERE member.key % 2 = 0
          AND member.value IN (SELECT 'w' || value FROM json_each(?1))
    )
    ORDER BY r.id";

/// Error raised when opening or preparing a spatial store database.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite database at {path}: {source}")]
    OpenDatabase {
        /// Location of the SQLite database on disk.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A required table is absent.
    #[error("spatial store database has no `{table}` table")]
    MissingTable {
        /// Name of the missing table.
        table: &'static str,
    },
    /// A schema statement failed.
    #[error("failed to execute schema step '{step}'")]
    Schema {
        /// Short description of the failing step.
        step: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// The database records a different schema version.
    #[error(
        "expected spatial store schema version {expected} but found {found}; apply migrations before retrying"
    )]
    VersionMismatch {
        /// Version this build understands.
        expected: i64,
        /// Version recorded in the database.
        found: i64,
    },
}

/// Read-only spatial store backed by an SQLite database.
///
/// Each handle owns one connection. Handles are not shared between
/// extractions; use [`SqliteConnector`] to open one per run.
pub struct SqliteStore {
    connection: Connection,
    path: Option<Utf8PathBuf>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open the database at `path` read-only and check its layout.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::OpenDatabase`] when the file cannot be
    /// opened, [`SqliteStoreError::MissingTable`] when a required table is
    /// absent and [`SqliteStoreError::VersionMismatch`] when the database was
    /// written by an incompatible schema.
    pub fn open(path: &Utf8Path) -> Result<Self, SqliteStoreError> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| SqliteStoreError::OpenDatabase {
            path: path.to_path_buf(),
            source,
        })?;
        let mut store = Self::from_connection(connection)?;
        store.path = Some(path.to_path_buf());
        debug!("opened spatial store at {path}");
        Ok(store)
    }

    /// Wrap an existing connection after checking its layout.
    ///
    /// # Errors
    ///
    /// Same layout checks as [`open`](Self::open).
    pub fn from_connection(connection: Connection) -> Result<Self, SqliteStoreError> {
        if let Some(table) = missing_table(&connection).map_err(|source| {
            SqliteStoreError::Schema {
                step: "inspect tables",
                source,
            }
        })? {
            return Err(SqliteStoreError::MissingTable { table });
        }
        match recorded_version(&connection).map_err(|source| SqliteStoreError::Schema {
            step: "read schema version",
            source,
        })? {
            Some(found) if found != SCHEMA_VERSION => {
                return Err(SqliteStoreError::VersionMismatch {
                    expected: SCHEMA_VERSION,
                    found,
                });
            }
            _ => {}
        }
        Ok(Self {
            connection,
            path: None,
        })
    }

    /// Location of the database file, when opened from disk.
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    fn run<P, T, F>(
        &self,
        label: &str,
        sql: &str,
        params: P,
        ctx: &QueryContext,
        mut map: F,
    ) -> Result<Vec<T>, QueryError>
    where
        P: Params,
        F: FnMut(&Row<'_>, &[String]) -> Result<T, QueryError>,
    {
        ctx.check()?;
        let _guard = InterruptGuard::install(&self.connection, ctx);
        let mut statement = self
            .connection
            .prepare_cached(sql)
            .map_err(|err| interrupted_or_backend(ctx, err))?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let mut rows = statement
            .query(params)
            .map_err(|err| interrupted_or_backend(ctx, err))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|err| interrupted_or_backend(ctx, err))? {
            out.push(map(row, &columns)?);
        }
        debug!("{label} returned {} rows", out.len());
        Ok(out)
    }
}

impl SpatialStore for SqliteStore {
    fn points_in_extent(
        &self,
        extent: &ExtentE7,
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError> {
        let params = [extent.latmin, extent.latmax, extent.lonmin, extent.lonmax];
        self.run("points in extent", POINTS_IN_EXTENT, params, ctx, point_row)
    }

    fn paths_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        let params = params_from_iter(envelope.as_params());
        self.run("paths intersecting", PATHS_INTERSECTING, params, ctx, path_row)
    }

    fn groups_intersecting(
        &self,
        envelope: &MercatorEnvelope,
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError> {
        let params = params_from_iter(envelope.as_params());
        self.run("groups intersecting", GROUPS_INTERSECTING, params, ctx, group_row)
    }

    fn points_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PointRow>, QueryError> {
        let batch = id_batch(ids)?;
        self.run("points by id", POINTS_BY_ID, [batch], ctx, point_row)
    }

    fn paths_by_id(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        let batch = id_batch(ids)?;
        self.run("paths by id", PATHS_BY_ID, [batch], ctx, path_row)
    }

    fn paths_referencing_points(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<PathRow>, QueryError> {
        let batch = id_batch(ids)?;
        self.run(
            "paths referencing points",
            PATHS_REFERENCING_POINTS,
            [batch],
            ctx,
            path_row,
        )
    }

    fn groups_referencing_paths(
        &self,
        ids: &[EntityId],
        ctx: &QueryContext,
    ) -> Result<Vec<GroupRow>, QueryError> {
        let batch = id_batch(ids)?;
        self.run(
            "groups referencing paths",
            GROUPS_REFERENCING_PATHS,
            [batch],
            ctx,
            group_row,
        )
    }
}

/// Opens a fresh read-only [`SqliteStore`] for each extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConnector {
    path: Utf8PathBuf,
}

impl SqliteConnector {
    /// Connector for the database at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the database file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;
    type Error = SqliteStoreError;

    fn connect(&self) -> Result<Self::Store, Self::Error> {
        SqliteStore::open(&self.path)
    }
}

/// Interrupts statements on `connection` while the context is cancelled or
/// expired. The handler is removed on drop.
struct InterruptGuard<'c> {
    connection: &'c Connection,
}

impl<'c> InterruptGuard<'c> {
    fn install(connection: &'c Connection, ctx: &QueryContext) -> Self {
        if ctx.deadline().is_some() || ctx.cancellation().is_some() {
            let watched = AssertUnwindSafe(ctx.clone());
            connection.progress_handler(PROGRESS_STEPS, Some(move || watched.is_interrupted()));
        }
        Self { connection }
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.connection.progress_handler(0, None::<fn() -> bool>);
    }
}

fn interrupted_or_backend(ctx: &QueryContext, err: rusqlite::Error) -> QueryError {
    match ctx.check() {
        Err(interrupted) => interrupted,
        Ok(()) => QueryError::backend(err),
    }
}

/// Encode an ID batch as the JSON array bound to `json_each`.
pub(crate) fn id_batch(ids: &[EntityId]) -> Result<String, QueryError> {
    serde_json::to_string(ids).map_err(QueryError::backend)
}

fn point_row(row: &Row<'_>, columns: &[String]) -> Result<PointRow, QueryError> {
    let id = row.get(0).map_err(|err| QueryError::malformed("id", err))?;
    let lat_e7 = row.get(1).map_err(|err| QueryError::malformed("lat", err))?;
    let lon_e7 = row.get(2).map_err(|err| QueryError::malformed("lon", err))?;
    let mut tags = Vec::new();
    for (index, column) in columns.iter().enumerate().skip(POINT_COLUMNS) {
        if column == "osm_id" {
            continue;
        }
        tags.push((column.clone(), tag_value(row, index, column)?));
    }
    Ok(PointRow {
        id,
        lat_e7,
        lon_e7,
        tags: RawTags::from_columns(tags),
    })
}

fn tag_value(row: &Row<'_>, index: usize, column: &str) -> Result<Option<String>, QueryError> {
    match row.get_ref(index).map_err(QueryError::backend)? {
        ValueRef::Null => Ok(None),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(|text| Some(text.to_owned()))
            .map_err(|err| QueryError::malformed(column, err)),
        ValueRef::Integer(value) => Ok(Some(value.to_string())),
        ValueRef::Real(value) => Ok(Some(value.to_string())),
        ValueRef::Blob(_) => Err(QueryError::malformed(column, "tag value is a blob")),
    }
}

fn path_row(row: &Row<'_>, _columns: &[String]) -> Result<PathRow, QueryError> {
    Ok(PathRow {
        id: row.get(0).map_err(|err| QueryError::malformed("id", err))?,
        point_ids: json_column(row, 1, "nodes")?.unwrap_or_default(),
        tags: tags_column(row, 2)?,
        geometry: row
            .get(3)
            .map_err(|err| QueryError::malformed("geometry", err))?,
    })
}

fn group_row(row: &Row<'_>, _columns: &[String]) -> Result<GroupRow, QueryError> {
    Ok(GroupRow {
        id: row.get(0).map_err(|err| QueryError::malformed("id", err))?,
        members: json_column(row, 1, "members")?.unwrap_or_default(),
        tags: tags_column(row, 2)?,
        geometry: row
            .get(3)
            .map_err(|err| QueryError::malformed("geometry", err))?,
    })
}

fn tags_column(row: &Row<'_>, index: usize) -> Result<RawTags, QueryError> {
    Ok(json_column::<Vec<String>>(row, index, "tags")?
        .map(RawTags::from_interleaved)
        .unwrap_or_default())
}

fn json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    index: usize,
    column: &str,
) -> Result<Option<T>, QueryError> {
    let text: Option<String> = row
        .get(index)
        .map_err(|err| QueryError::malformed(column, err))?;
    text.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|err| QueryError::malformed(column, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{add_tag_columns, initialise_schema};
    use rstest::{fixture, rstest};
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    #[fixture]
    fn store() -> SqliteStore {
        let mut conn = Connection::open_in_memory().expect("create in-memory database");
        initialise_schema(&mut conn).expect("create schema");
        add_tag_columns(&conn, ["amenity", "name", "level"]).expect("add tag columns");
        conn.execute_batch(
            "INSERT INTO nodes (id, lat, lon) VALUES
                (1, 5000000, 5000000),
                (2, 6000000, 6000000),
                (3, 20000000, 20000000);
             INSERT INTO node_tags (osm_id, amenity, name, level) VALUES
                (1, 'cafe', NULL, 2);
             INSERT INTO ways (id, nodes, tags, geometry, min_x, min_y, max_x, max_y) VALUES
                (10, '[1,2,3]', '[\"highway\",\"footway\"]', x'0102', 0.0, 0.0, 1.0, 1.0),
                (11, '[3]', NULL, NULL, 5.0, 5.0, 6.0, 6.0);
             INSERT INTO relations (id, members, tags, geometry, min_x, min_y, max_x, max_y) VALUES
                (100, '[\"w10\",\"outer\",\"n1\",\"\",\"w11\",\"inner\"]', NULL, NULL, 0.0, 0.0, 1.0, 1.0),
                (101, '[\"n11\",\"w99\"]', NULL, NULL, 9.0, 9.0, 9.5, 9.5);",
        )
        .expect("insert rows");
        SqliteStore::from_connection(conn).expect("open store")
    }

    #[rstest]
    fn reads_column_per_tag_values(store: SqliteStore) {
        let rows = store
            .points_by_id(&[1, 2], &QueryContext::default())
            .expect("query points");
        let first = rows.first().expect("point 1");
        assert_eq!(
            first.tags.columns,
            vec![
                ("amenity".to_owned(), Some("cafe".to_owned())),
                ("name".to_owned(), None),
                ("level".to_owned(), Some("2".to_owned())),
            ]
        );
        let second = rows.get(1).expect("point 2");
        assert!(second.tags.columns.iter().all(|(_, value)| value.is_none()));
    }

    #[rstest]
    fn batches_bind_one_json_parameter() {
        assert_eq!(id_batch(&[3, 1, 2]).expect("encode batch"), "[3,1,2]");
    }

    #[rstest]
    fn paths_reference_points_through_json(store: SqliteStore) {
        let rows = store
            .paths_referencing_points(&[3], &QueryContext::default())
            .expect("query paths");
        let ids: Vec<_> = rows.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![10, 11]);
        let first = rows.first().expect("path 10");
        assert_eq!(first.point_ids, vec![1, 2, 3]);
        assert_eq!(
            first.tags.interleaved.as_deref(),
            Some(["highway".to_owned(), "footway".to_owned()].as_slice())
        );
        assert_eq!(first.geometry.as_deref(), Some([1_u8, 2].as_slice()));
    }

    #[rstest]
    fn group_membership_only_matches_descriptors(store: SqliteStore) {
        let ctx = QueryContext::default();
        let ids = |rows: Vec<GroupRow>| rows.into_iter().map(|row| row.id).collect::<Vec<_>>();
        assert_eq!(
            ids(store.groups_referencing_paths(&[11], &ctx).expect("query groups")),
            vec![100]
        );
        // `w99` sits in a role slot of group 101.
        assert!(
            store
                .groups_referencing_paths(&[99], &ctx)
                .expect("query groups")
                .is_empty()
        );
    }

    #[rstest]
    fn group_membership_matches_canonical_path_ids_like_the_memory_store(store: SqliteStore) {
        let members = ["w+11", "", "w011", "", "w11", ""].map(String::from).to_vec();
        store
            .connection
            .execute(
                "INSERT INTO relations (id, members, min_x, min_y, max_x, max_y)
                 VALUES (102, ?1, 0, 0, 0, 0), (103, ?2, 0, 0, 0, 0)",
                [r#"["w+11","","w011",""]"#, r#"["w11",""]"#],
            )
            .expect("insert relations");
        let ctx = QueryContext::default();
        let found: Vec<_> = store
            .groups_referencing_paths(&[11], &ctx)
            .expect("query groups")
            .into_iter()
            .map(|row| row.id)
            .collect();
        assert_eq!(found, vec![100, 103]);

        let row = GroupRow {
            id: 104,
            members,
            tags: RawTags::default(),
            geometry: None,
        };
        assert_eq!(row.path_member_ids().collect::<Vec<_>>(), vec![11]);
    }

    #[rstest]
    fn envelope_bounds_are_inclusive(store: SqliteStore) {
        let envelope = MercatorEnvelope {
            min_x: 1.0,
            min_y: 1.0,
            max_x: 2.0,
            max_y: 2.0,
        };
        let rows = store
            .paths_intersecting(&envelope, &QueryContext::default())
            .expect("query paths");
        assert_eq!(rows.iter().map(|row| row.id).collect::<Vec<_>>(), vec![10]);
    }

    #[rstest]
    fn extent_query_uses_e7_bounds(store: SqliteStore) {
        let extent = ExtentE7 {
            latmin: 0,
            latmax: 10_000_000,
            lonmin: 0,
            lonmax: 10_000_000,
        };
        let rows = store
            .points_in_extent(&extent, &QueryContext::default())
            .expect("query points");
        assert_eq!(rows.iter().map(|row| row.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[rstest]
    fn malformed_json_names_the_column() {
        let mut conn = Connection::open_in_memory().expect("create in-memory database");
        initialise_schema(&mut conn).expect("create schema");
        conn.execute(
            "INSERT INTO ways (id, nodes, tags, geometry, min_x, min_y, max_x, max_y)
             VALUES (1, '[\"a\"]', NULL, NULL, 0, 0, 0, 0)",
            [],
        )
        .expect("insert way");
        let store = SqliteStore::from_connection(conn).expect("open store");
        let err = store
            .paths_by_id(&[1], &QueryContext::default())
            .expect_err("string IDs should fail");
        assert!(matches!(err, QueryError::MalformedColumn { ref column, .. } if column == "nodes"));
    }

    const COUNT_TO: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < ?1)
         SELECT count(*) FROM c";

    fn count_to(
        connection: &Connection,
        ctx: &QueryContext,
        limit: i64,
    ) -> Result<i64, QueryError> {
        connection
            .query_row(COUNT_TO, [limit], |row| row.get(0))
            .map_err(|err| interrupted_or_backend(ctx, err))
    }

    #[rstest]
    fn cancellation_interrupts_a_running_statement(store: SqliteStore) {
        let token = CancellationToken::new();
        let ctx = QueryContext::default().with_cancellation(token.clone());
        {
            let _guard = InterruptGuard::install(&store.connection, &ctx);
            token.cancel();
            let err = count_to(&store.connection, &ctx, 100_000_000).expect_err("interrupted");
            assert!(matches!(err, QueryError::Cancelled), "unexpected error: {err:?}");
        }
        // The context is still cancelled, so only a removed handler lets this finish.
        let total = count_to(&store.connection, &ctx, 100_000).expect("handler removed on drop");
        assert_eq!(total, 100_000);
    }

    #[rstest]
    fn expired_deadline_interrupts_a_running_statement(store: SqliteStore) {
        let ctx = QueryContext::default().with_deadline(Instant::now());
        {
            let _guard = InterruptGuard::install(&store.connection, &ctx);
            let err = count_to(&store.connection, &ctx, 100_000_000).expect_err("interrupted");
            assert!(matches!(err, QueryError::DeadlineExceeded), "unexpected error: {err:?}");
        }
        let total = count_to(&store.connection, &ctx, 100_000).expect("handler removed on drop");
        assert_eq!(total, 100_000);
    }

    #[rstest]
    fn deadline_passing_mid_query_stops_the_statement(store: SqliteStore) {
        let ctx = QueryContext::default().with_timeout(Duration::from_millis(20));
        let err = store
            .run(
                "count",
                COUNT_TO,
                [i64::MAX],
                &ctx,
                |row, _| row.get::<_, i64>(0).map_err(|err| QueryError::malformed("count", err)),
            )
            .expect_err("deadline passes while counting");
        assert!(matches!(err, QueryError::DeadlineExceeded), "unexpected error: {err:?}");
        assert!(ctx.is_interrupted());
    }

    #[rstest]
    fn rejects_databases_without_tables() {
        let conn = Connection::open_in_memory().expect("create in-memory database");
        let err = SqliteStore::from_connection(conn).expect_err("empty database");
        assert!(matches!(err, SqliteStoreError::MissingTable { table: "nodes" }));
    }
}
