use std::io::Cursor;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};

/// Maximum total decompressed size accepted for one static archive (2 GB).
const MAX_DECOMPRESSED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// An extracted archive directory, removed when dropped.
///
/// Dropping happens on success, on error and when a sync future is
/// cancelled, so scratch space never outlives its cycle. A plain drop
/// removes the tree on the current thread; async callers use
/// [`ScratchDir::close`] and only fall back to the inline drop when
/// cancelled.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the directory on the blocking pool.
    pub async fn close(self) {
        if let Err(e) = tokio::task::spawn_blocking(move || drop(self)).await {
            warn!(error = %e, "Scratch directory cleanup task failed");
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(dir = %self.path.display(), "Removed scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.path.display(), error = %e, "Failed to remove scratch directory"),
        }
    }
}

/// Unpacks a zipped static feed into `<scratch_root>/<ingest_ms>`.
/// Blocking; call from `spawn_blocking`.
///
/// # Errors
///
/// [`IngestError::Archive`] if the bytes are not a readable zip,
/// [`IngestError::Filesystem`] if the scratch directory cannot be created.
pub fn extract_archive(bytes: &[u8], scratch_root: &Path, ingest_ms: i64) -> Result<ScratchDir> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    let mut total_uncompressed: u64 = 0;
    for i in 0..archive.len() {
        total_uncompressed += archive.by_index(i)?.size();
    }
    if total_uncompressed > MAX_DECOMPRESSED_SIZE {
        return Err(IngestError::Archive(zip::result::ZipError::InvalidArchive(
            "decompressed size exceeds limit".into(),
        )));
    }

    let path = scratch_root.join(ingest_ms.to_string());
    std::fs::create_dir_all(&path).map_err(|e| IngestError::filesystem(&path, e))?;
    let dir = ScratchDir { path };

    // A failed extraction drops `dir`, removing anything half-written.
    archive.extract(dir.path())?;

    info!(
        dir = %dir.path().display(),
        files = archive.len(),
        decompressed_kb = total_uncompressed / 1024,
        "Extracted static feed archive"
    );
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_of(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_into_timestamped_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let bytes = zip_of(&[("agency.txt", "agency_id\nA\n"), ("stops.txt", "stop_id\n1\n")]);

        let dir = extract_archive(&bytes, scratch.path(), 1_700_000_000_000).unwrap();

        assert_eq!(dir.path(), scratch.path().join("1700000000000"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("agency.txt")).unwrap(),
            "agency_id\nA\n"
        );
        assert!(dir.path().join("stops.txt").exists());
    }

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let bytes = zip_of(&[("agency.txt", "agency_id\nA\n")]);

        let dir = extract_archive(&bytes, scratch.path(), 5).unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.exists());

        drop(dir);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_close_removes_dir_off_the_runtime() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = extract_archive(&zip_of(&[("agency.txt", "agency_id\nA\n")]), scratch.path(), 7)
            .unwrap();
        let path = dir.path().to_path_buf();

        dir.close().await;
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_archive_is_archive_error() {
        let scratch = tempfile::tempdir().unwrap();
        let err = extract_archive(b"definitely not a zip", scratch.path(), 1).unwrap_err();
        assert!(matches!(err, IngestError::Archive(_)));
        assert!(!scratch.path().join("1").exists());
    }

    #[test]
    fn test_drop_after_external_removal_is_silent() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = extract_archive(&zip_of(&[("a.txt", "x")]), scratch.path(), 6).unwrap();
        std::fs::remove_dir_all(dir.path()).unwrap();
        drop(dir);
    }
}
