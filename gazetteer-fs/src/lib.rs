//! Filesystem helpers for gazetteer databases and archive work directories.
//!
//! Paths arrive from configuration as UTF-8 strings. The helpers resolve
//! them against an ambient anchor (the filesystem root, a Windows prefix or
//! the current directory) and then operate through a `cap-std` directory
//! handle, so callers never touch `std::fs` with a raw path.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;
use std::path::Component;

/// Create `path` and any missing ancestors.
///
/// Existing directories are left untouched, so the call is safe to repeat on
/// every start-up.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    let (anchor, relative) = split_anchor(path)?;
    if relative.as_os_str().is_empty() {
        return Ok(());
    }
    anchor.create_dir_all(&relative)
}

/// Create the directory that will hold `path`, such as a database file.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if parent != Utf8Path::new("/") => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Return whether `path` names an existing regular file.
///
/// A missing parent directory or file yields `Ok(false)`; other I/O failures
/// are returned.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let Some(name) = path.file_name() else {
        return Ok(false);
    };
    let (anchor, relative) = split_anchor(parent)?;
    let dir = if relative.as_os_str().is_empty() {
        anchor
    } else {
        match anchor.open_dir(&relative) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        }
    };
    match dir.metadata(name) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Split a path into an ambient anchor directory and the remaining relative
/// components.
fn split_anchor(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();
    let (anchor, relative) = match std_path.components().next() {
        Some(Component::Prefix(prefix)) => {
            let prefix = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            let anchor = Utf8PathBuf::from(format!("{prefix}{}", std::path::MAIN_SEPARATOR));
            let relative = path
                .strip_prefix(&anchor)
                .or_else(|_| path.strip_prefix(prefix))
                .map_err(|_| io::Error::other("failed to strip drive prefix"))?
                .to_path_buf();
            (anchor, relative)
        }
        Some(Component::RootDir) => {
            let anchor = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = path
                .strip_prefix(&anchor)
                .map_err(|_| io::Error::other("failed to strip filesystem root"))?
                .to_path_buf();
            (anchor, relative)
        }
        _ => (Utf8PathBuf::from("."), path.to_path_buf()),
    };
    let dir = fs_utf8::Dir::open_ambient_dir(&anchor, ambient_authority())?;
    Ok((dir, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn scratch() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        (dir, root)
    }

    #[rstest]
    fn ensure_dir_creates_nested_directories(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let target = root.join("archives/tiger/2023");
        ensure_dir(&target).expect("create nested dirs");
        assert!(target.as_std_path().is_dir());
        ensure_dir(&target).expect("repeat is a no-op");
    }

    #[rstest]
    fn ensure_parent_dir_prepares_database_location(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let db = root.join("state/gazetteer.db");
        ensure_parent_dir(&db).expect("create parent");
        assert!(root.join("state").as_std_path().is_dir());
        assert!(!db.as_std_path().exists());
    }

    #[rstest]
    fn file_is_file_distinguishes_files_and_directories(scratch: (TempDir, Utf8PathBuf)) {
        let (_guard, root) = scratch;
        let file = root.join("seed.zip");
        std::fs::write(file.as_std_path(), b"PK").expect("write file");
        assert!(file_is_file(&file).expect("stat file"));
        assert!(!file_is_file(&root).expect("stat dir"));
        assert!(!file_is_file(&root.join("missing/seed.zip")).expect("stat missing"));
    }
}
