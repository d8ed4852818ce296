//! Capability-based filesystem helpers shared by the Tessera crates.
//!
//! Paths are UTF-8 (`camino`) and every access goes through a `cap-std`
//! directory handle opened with ambient authority at the nearest root.
#![forbid(unsafe_code)]

use std::io;
use std::path::Component;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};

/// Return whether `path` is a regular file.
///
/// A missing path, or one whose parent directory is missing, is reported as
/// an [`io::ErrorKind::NotFound`] error.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = parent_dir_and_name(path)?;
    dir.metadata(name.as_str()).map(|meta| meta.is_file())
}

/// Create every missing directory above `path`.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() {
        return Ok(());
    }
    let (root, relative) = split_at_root(parent)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    root.create_dir_all(&relative)
}

/// Create or truncate the file at `path`, creating parent directories first.
pub fn create_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    ensure_parent_dir(path)?;
    let (dir, name) = parent_dir_and_name(path)?;
    dir.create(name.as_str())
}

fn parent_dir_and_name(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_owned();
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, name))
}

/// Split `dir` into a handle on its root (`/`, a Windows prefix or `.`) and
/// the path below it.
fn split_at_root(dir: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_dir = dir.as_std_path();
    let root = match std_dir.components().next() {
        Some(Component::Prefix(prefix)) => {
            let prefix = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            Utf8PathBuf::from(prefix).join(std::path::MAIN_SEPARATOR_STR)
        }
        Some(Component::RootDir) => Utf8PathBuf::from(std::path::MAIN_SEPARATOR_STR),
        _ => Utf8PathBuf::from("."),
    };
    let relative = if root.as_str() == "." {
        dir.to_path_buf()
    } else {
        dir.strip_prefix(&root)
            .map_err(|_| io::Error::other("failed to strip root from path"))?
            .to_path_buf()
    };
    let handle = fs_utf8::Dir::open_ambient_dir(&root, ambient_authority())?;
    Ok((handle, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::io::Write;
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("create temp dir")
    }

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("UTF-8 temp path")
    }

    #[rstest]
    fn creates_nested_parents(temp_dir: TempDir) {
        let target = utf8(&temp_dir).join("a/b/c/out.json");
        ensure_parent_dir(&target).expect("create parents");
        assert!(target.parent().expect("parent").is_dir());
    }

    #[rstest]
    fn created_file_is_detected(temp_dir: TempDir) {
        let target = utf8(&temp_dir).join("nested/area.json");
        let mut file = create_utf8_file(&target).expect("create file");
        file.write_all(b"{}").expect("write file");
        assert!(file_is_file(&target).expect("inspect file"));
    }

    #[rstest]
    #[case("missing.db")]
    #[case("missing/dir/x.db")]
    fn missing_paths_are_not_found(temp_dir: TempDir, #[case] relative: &str) {
        let err = file_is_file(&utf8(&temp_dir).join(relative)).expect_err("missing path");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[rstest]
    fn directories_are_not_files(temp_dir: TempDir) {
        let root = utf8(&temp_dir);
        std::fs::create_dir(root.join("dir.db")).expect("create dir");
        assert!(!file_is_file(&root.join("dir.db")).expect("inspect dir"));
    }

    #[rstest]
    fn bare_file_name_has_no_parent_to_create() {
        ensure_parent_dir(Utf8Path::new("out.json")).expect("nothing to create");
    }
}
