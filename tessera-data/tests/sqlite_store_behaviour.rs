//! Behavioural tests for the SQLite spatial store.

use std::cell::RefCell;

use camino::Utf8PathBuf;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use rusqlite::Connection;
use tempfile::TempDir;
use tessera_core::test_support::StoreFixture;
use tessera_core::{
    ExtractError, ExtractOptions, Extraction, Extent, QueryContext, QueryError,
    extract_with_connector,
};
use tessera_data::test_support::write_fixture;
use tessera_data::{SqliteConnector, SqliteStoreError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct StoreWorld {
    temp_dir: RefCell<Option<TempDir>>,
    database: RefCell<Option<Utf8PathBuf>>,
    options: RefCell<ExtractOptions>,
    outcome: RefCell<Option<Result<Extraction, ExtractError>>>,
}

impl StoreWorld {
    fn database_path(&self) -> Utf8PathBuf {
        let dir = TempDir::new().expect("create temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("spatial.db"))
            .expect("UTF-8 temp path");
        self.temp_dir.replace(Some(dir));
        self.database.replace(Some(path.clone()));
        path
    }

    fn install(&self, fixture: &StoreFixture) {
        let path = self.database_path();
        write_fixture(&path, fixture).expect("write fixture database");
    }

    fn with_extraction<T>(&self, check: impl FnOnce(&Extraction) -> T) -> T {
        let outcome = self.outcome.borrow();
        match outcome.as_ref().expect("extraction should have run") {
            Ok(extraction) => check(extraction),
            Err(err) => panic!("extraction failed: {err}"),
        }
    }

    fn with_error<T>(&self, check: impl FnOnce(&ExtractError) -> T) -> T {
        let outcome = self.outcome.borrow();
        match outcome.as_ref().expect("extraction should have run") {
            Ok(_) => panic!("extraction unexpectedly succeeded"),
            Err(err) => check(err),
        }
    }
}

#[fixture]
fn world() -> StoreWorld {
    StoreWorld::default()
}

fn unit_extent() -> Extent {
    Extent::new(0.0, 1.0, 0.0, 1.0).expect("valid extent")
}

#[given("a spatial store database with a path leaving the unit extent")]
fn given_straddling_path(world: &StoreWorld) {
    world.install(
        &StoreFixture::default()
            .point(1, 0.2, 0.2)
            .point(2, 0.8, 0.8)
            .point(3, 1.5, 1.5)
            .path(10, &[1, 2, 3]),
    );
}

#[given("a spatial store database with a group referencing outside members")]
fn given_group_with_outside_members(world: &StoreWorld) {
    world.install(
        &StoreFixture::default()
            .point(1, 0.5, 0.5)
            .point(2, 0.7, 0.7)
            .point(20, 4.0, 4.0)
            .point(21, 4.5, 4.5)
            .point(30, 5.0, 5.0)
            .path(10, &[1, 2])
            .path(11, &[20, 21])
            .group(100, &["w10", "outer", "w11", "outer", "n30", "admin_centre"]),
    );
}

#[given("a spatial store database with a tagged cafe")]
fn given_tagged_cafe(world: &StoreWorld) {
    world.install(
        &StoreFixture::default()
            .tagged_point(1, 0.5, 0.5, &[("amenity", "cafe"), ("name", "Kaffee")])
            .point(2, 0.6, 0.6),
    );
}

#[given("a path with no database")]
fn given_missing_database(world: &StoreWorld) {
    world.database_path();
}

#[given("an SQLite database without spatial tables")]
fn given_foreign_database(world: &StoreWorld) {
    let path = world.database_path();
    let conn = Connection::open(&path).expect("create database");
    conn.execute("CREATE TABLE unrelated (id INTEGER PRIMARY KEY)", [])
        .expect("create table");
}

#[given("a cancelled query context")]
fn given_cancelled_context(world: &StoreWorld) {
    let token = CancellationToken::new();
    token.cancel();
    let options = world.options.take();
    world
        .options
        .replace(options.with_context(QueryContext::default().with_cancellation(token)));
}

#[when("I extract the unit extent from the database")]
fn when_extract(world: &StoreWorld) {
    let path = world
        .database
        .borrow()
        .clone()
        .expect("database path should be set");
    let options = world.options.borrow().clone();
    let outcome = extract_with_connector(&SqliteConnector::new(path), &unit_extent(), options);
    world.outcome.replace(Some(outcome));
}

#[then("the extraction succeeds")]
fn then_succeeds(world: &StoreWorld) {
    world.with_extraction(|_| ());
}

#[then("every path point is present")]
fn then_path_points_present(world: &StoreWorld) {
    world.with_extraction(|extraction| {
        let ids: Vec<_> = extraction.area.points().keys().copied().collect();
        assert_eq!(ids, vec![1, 2, 3]);
    });
}

#[then("the outside path and its points are present")]
fn then_outside_members_present(world: &StoreWorld) {
    world.with_extraction(|extraction| {
        let area = &extraction.area;
        assert!(area.path(11).is_some());
        for id in [20, 21, 30] {
            assert!(area.point(id).is_some(), "point {id} should be present");
        }
    });
}

#[then("the area is closed")]
fn then_closed(world: &StoreWorld) {
    world.with_extraction(|extraction| {
        assert!(extraction.area.is_closed());
        assert!(extraction.report.dangling.is_empty());
    });
}

#[then("the cafe carries its amenity tag")]
fn then_cafe_tagged(world: &StoreWorld) {
    world.with_extraction(|extraction| {
        let cafe = extraction.area.point(1).expect("cafe present");
        assert_eq!(cafe.tags.get("amenity").map(String::as_str), Some("cafe"));
        assert_eq!(cafe.tags.get("name").map(String::as_str), Some("Kaffee"));
        let plain = extraction.area.point(2).expect("plain point present");
        assert!(plain.tags.is_empty());
    });
}

#[then("the extraction fails to connect")]
fn then_connect_failure(world: &StoreWorld) {
    world.with_error(|err| match err {
        ExtractError::Connect { source } => {
            let store_error = source
                .downcast_ref::<SqliteStoreError>()
                .expect("connect failure should come from the SQLite store");
            assert!(matches!(
                store_error,
                SqliteStoreError::OpenDatabase { .. } | SqliteStoreError::MissingTable { .. }
            ));
        }
        other => panic!("expected connect failure, got {other:?}"),
    });
}

#[then("the extraction is reported as cancelled")]
fn then_cancelled(world: &StoreWorld) {
    world.with_error(|err| {
        assert!(matches!(
            err,
            ExtractError::Query {
                source: QueryError::Cancelled,
                ..
            }
        ));
    });
}

#[scenario(path = "tests/features/sqlite_store.feature", index = 0)]
fn straddling_path_from_database(world: StoreWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sqlite_store.feature", index = 1)]
fn group_members_from_database(world: StoreWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sqlite_store.feature", index = 2)]
fn column_tags_from_database(world: StoreWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sqlite_store.feature", index = 3)]
fn missing_database(world: StoreWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sqlite_store.feature", index = 4)]
fn database_without_tables(world: StoreWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/sqlite_store.feature", index = 5)]
fn cancelled_extraction(world: StoreWorld) {
    let _ = world;
}
