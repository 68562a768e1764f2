use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use log::debug;
use tempfile::TempDir;
use zip::ZipArchive;

use super::ShapefileError;

const MEMBERS: [&str; 3] = ["shp", "dbf", "shx"];

/// Shapefile members unpacked into a scratch directory.
///
/// The directory and its contents are removed on drop.
#[derive(Debug)]
pub struct ExtractedShapefile {
    dir: TempDir,
    shp: PathBuf,
}

impl ExtractedShapefile {
    /// Path of the `.shp` member; the `.dbf` and `.shx` siblings sit next to it.
    #[must_use]
    pub fn shp_path(&self) -> &Path {
        &self.shp
    }

    /// Scratch directory holding the members.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

/// Unpack the `.shp`, `.dbf` and `.shx` members of `archive` into a fresh
/// directory under `scratch` (or the system temp directory).
///
/// Member paths are flattened to their file names; entries that would escape
/// the directory are ignored.
pub fn extract_shapefile(
    archive: &Path,
    scratch: Option<&Utf8Path>,
) -> Result<ExtractedShapefile, ShapefileError> {
    let file = File::open(archive).map_err(|source| ShapefileError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = ZipArchive::new(file).map_err(|source| ShapefileError::Archive {
        path: archive.to_path_buf(),
        source,
    })?;
    let dir = match scratch {
        Some(parent) => {
            gazetteer_fs::ensure_dir(parent).map_err(|source| ShapefileError::Io {
                path: parent.as_std_path().to_path_buf(),
                source,
            })?;
            tempfile::Builder::new().prefix("tiger-").tempdir_in(parent)
        }
        None => tempfile::Builder::new().prefix("tiger-").tempdir(),
    }
    .map_err(|source| ShapefileError::Io {
        path: scratch.map_or_else(std::env::temp_dir, |dir| dir.as_std_path().to_path_buf()),
        source,
    })?;

    let mut shp = None;
    let mut found = [false; MEMBERS.len()];
    for index in 0..zip.len() {
        let mut member = zip.by_index(index).map_err(|source| ShapefileError::Archive {
            path: archive.to_path_buf(),
            source,
        })?;
        let Some(file_name) = member
            .enclosed_name()
            .and_then(|name| name.file_name().map(PathBuf::from))
        else {
            continue;
        };
        let extension = file_name
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let Some(slot) = extension
            .as_deref()
            .and_then(|ext| MEMBERS.iter().position(|wanted| *wanted == ext))
        else {
            continue;
        };
        let target = dir.path().join(&file_name);
        let mut out = File::create(&target).map_err(|source| ShapefileError::Io {
            path: target.clone(),
            source,
        })?;
        io::copy(&mut member, &mut out).map_err(|source| ShapefileError::Io {
            path: target.clone(),
            source,
        })?;
        if let Some(flag) = found.get_mut(slot) {
            *flag = true;
        }
        if slot == 0 {
            shp = Some(target);
        }
    }

    for (extension, present) in MEMBERS.iter().zip(found) {
        if !present {
            return Err(ShapefileError::MissingMember {
                path: archive.to_path_buf(),
                extension,
            });
        }
    }
    let shp = shp.ok_or_else(|| ShapefileError::MissingMember {
        path: archive.to_path_buf(),
        extension: "shp",
    })?;
    debug!("extracted {} into {}", archive.display(), dir.path().display());
    Ok(ExtractedShapefile { dir, shp })
}
