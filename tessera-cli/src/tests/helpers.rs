//! Test helpers for building extract arguments and fixture databases.

use camino::Utf8PathBuf;
use tempfile::TempDir;
use tessera_core::test_support::StoreFixture;
use tessera_data::test_support::write_fixture;

use crate::extract::ExtractArgs;

pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root =
            Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        Self { _dir: dir, root }
    }

    pub(super) fn path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    /// Write a store with one path leaving the unit extent and return its
    /// path.
    pub(super) fn straddling_store(&self) -> Utf8PathBuf {
        let path = self.path("spatial.db");
        let fixture = StoreFixture::default()
            .point(1, 0.2, 0.2)
            .point(2, 0.8, 0.8)
            .point(3, 1.5, 1.5)
            .path(10, &[1, 2, 3]);
        write_fixture(&path, &fixture).expect("write fixture database");
        path
    }
}

/// Arguments selecting the unit extent of `database`.
pub(super) fn unit_extent_args(database: Utf8PathBuf) -> ExtractArgs {
    ExtractArgs {
        database: Some(database),
        latmin: Some(0.0),
        latmax: Some(1.0),
        lonmin: Some(0.0),
        lonmax: Some(1.0),
        ..ExtractArgs::default()
    }
}
