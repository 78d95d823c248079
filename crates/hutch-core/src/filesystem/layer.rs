//! Image layer archives.
//!
//! An image is a single tar archive under the images directory. It is
//! extracted once into a read-only layer directory, and `commit` packs a
//! container's merged root back into an archive of the same shape.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use hutch_common::error::{HutchError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extracts `archive_path` into `target` unless `target` already exists.
///
/// Returns `true` when the archive was extracted and `false` when an
/// existing layer was reused. A failed extraction removes the partially
/// written target so the next attempt starts clean.
///
/// # Errors
///
/// Returns an error if the archive is missing or cannot be unpacked.
pub fn ensure_layer(archive_path: &Path, target: &Path) -> Result<bool> {
    if target.exists() {
        tracing::debug!(layer = %target.display(), "image layer already extracted");
        return Ok(false);
    }
    if let Err(e) = extract_layer(archive_path, target) {
        let _ = std::fs::remove_dir_all(target);
        return Err(e);
    }
    Ok(true)
}

/// Extracts a tar archive to the target directory.
///
/// Plain and gzip-compressed archives are both accepted; compression is
/// detected from the file's magic bytes rather than its extension.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or unpacked.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<()> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting image layer"
    );

    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |e| HutchError::Io { path, source: e }
    };

    let mut file = File::open(archive_path).map_err(io_err(archive_path))?;
    let gzip = is_gzip(&mut file).map_err(io_err(archive_path))?;

    std::fs::create_dir_all(target).map_err(io_err(target))?;
    if gzip {
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        archive.unpack(target).map_err(io_err(target))?;
    } else {
        let mut archive = tar::Archive::new(file);
        archive.unpack(target).map_err(io_err(target))?;
    }

    tracing::info!(target = %target.display(), "image layer extracted");
    Ok(())
}

/// Packs the contents of `source` into a tar archive at `archive_path`.
///
/// Entries are stored relative to `source`, so extracting the result yields
/// the same tree. Symlinks are archived as links, not followed.
///
/// # Errors
///
/// Returns an error if the source cannot be read or the archive written.
pub fn pack_layer(source: &Path, archive_path: &Path) -> Result<()> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |e| HutchError::Io { path, source: e }
    };

    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let file = File::create(archive_path).map_err(io_err(archive_path))?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source).map_err(io_err(source))?;
    builder
        .into_inner()
        .and_then(|f| f.sync_all())
        .map_err(io_err(archive_path))?;

    tracing::info!(
        source = %source.display(),
        archive = %archive_path.display(),
        "layer packed"
    );
    Ok(())
}

/// Sniffs the gzip magic bytes and rewinds the file.
fn is_gzip(file: &mut File) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    let _ = file.seek(SeekFrom::Start(0))?;
    Ok(read == magic.len() && magic == GZIP_MAGIC)
}
