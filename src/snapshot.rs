//! Durable newline-delimited JSON snapshots of realtime events.
//!
//! A snapshot is written to `<path>.part`, flushed and fsynced, then renamed
//! onto its final path and the directory entry fsynced. Readers only ever list final paths, so they see
//! either a complete file or none at all.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::realtime::StreamKind;

const EXTENSION: &str = "ndjson";
const PART_SUFFIX: &str = ".part";

/// A committed snapshot file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    /// Ingestion time encoded in the file name, epoch milliseconds.
    pub ingest_ms: i64,
    pub path: PathBuf,
}

/// `<root>/<stream dir>/<ingest_ms>.ndjson`
pub fn snapshot_path(root: &Path, kind: StreamKind, ingest_ms: i64) -> PathBuf {
    root.join(kind.dir_name())
        .join(format!("{ingest_ms}.{EXTENSION}"))
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Writes `events` as one JSON object per line and commits the file with a rename.
///
/// Returns the number of lines written. On any failure the `.part` file is
/// removed and whatever was at `path` before is left untouched.
///
/// # Errors
///
/// [`IngestError::Filesystem`] if the directory, temporary file, write,
/// fsync or rename fails, or an event does not serialize.
pub fn write_snapshot<I, T>(path: &Path, events: I) -> Result<usize>
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| IngestError::filesystem(dir, e))?;
    }

    let part = part_path(path);
    let written = write_part(&part, events)
        .and_then(|n| fs::rename(&part, path).map(|()| n))
        .and_then(|n| sync_parent(path).map(|()| n))
        .map_err(|e| {
            if let Err(cleanup) = fs::remove_file(&part) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %part.display(), error = %cleanup, "Failed to remove partial snapshot");
                }
            }
            IngestError::filesystem(path, e)
        })?;

    debug!(path = %path.display(), lines = written, "Snapshot committed");
    Ok(written)
}

fn write_part<I, T>(part: &Path, events: I) -> io::Result<usize>
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    let file = File::create(part)?;
    let mut writer = BufWriter::new(file);

    let mut lines = 0;
    for event in events {
        serde_json::to_writer(&mut writer, &event)?;
        writer.write_all(b"\n")?;
        lines += 1;
    }

    let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()?;
    Ok(lines)
}

/// Fsyncs the directory holding `path` so a completed rename survives power loss.
fn sync_parent(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

/// Committed snapshots of `kind` taken at or after `since_ms`, oldest first.
///
/// In-progress `.part` files and names that are not a timestamp are
/// skipped. A stream that has never been written yields an empty list.
pub fn snapshots_since(root: &Path, kind: StreamKind, since_ms: i64) -> Result<Vec<SnapshotFile>> {
    let dir = root.join(kind.dir_name());
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(IngestError::filesystem(dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| IngestError::filesystem(&dir, e))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
            continue;
        }
        let Some(ingest_ms) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<i64>().ok())
        else {
            continue;
        };
        if ingest_ms >= since_ms {
            files.push(SnapshotFile { ingest_ms, path });
        }
    }

    files.sort_by_key(|f| f.ingest_ms);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serializer;

    #[derive(Serialize)]
    struct Row {
        id: u32,
        name: Option<&'static str>,
    }

    /// Serializes like a row until `fail` is set.
    struct Flaky {
        fail: bool,
    }

    impl Serialize for Flaky {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            if self.fail {
                return Err(serde::ser::Error::custom("disk went away"));
            }
            serializer.serialize_u32(1)
        }
    }

    #[test]
    fn test_snapshot_path_layout() {
        let path = snapshot_path(Path::new("data/gtfs_rt"), StreamKind::TripUpdates, 1_709_280_004_512);
        assert_eq!(
            path,
            PathBuf::from("data/gtfs_rt/trip_updates/1709280004512.ndjson")
        );
    }

    #[test]
    fn test_write_snapshot_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), StreamKind::VehiclePositions, 10);

        let rows = vec![
            Row { id: 1, name: Some("a") },
            Row { id: 2, name: None },
        ];
        let written = write_snapshot(&path, rows).unwrap();
        assert_eq!(written, 2);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, [r#"{"id":1,"name":"a"}"#, r#"{"id":2,"name":null}"#]);
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn test_sync_parent_of_committed_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), StreamKind::TripUpdates, 10);
        write_snapshot(&path, [Row { id: 1, name: None }]).unwrap();

        sync_parent(&path).unwrap();
        sync_parent(Path::new("10.ndjson")).unwrap();
        assert!(sync_parent(&dir.path().join("missing").join("10.ndjson")).is_err());
    }

    #[test]
    fn test_empty_snapshot_still_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), StreamKind::TripUpdates, 10);

        let written = write_snapshot(&path, Vec::<Row>::new()).unwrap();
        assert_eq!(written, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_interrupted_write_leaves_no_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), StreamKind::TripUpdates, 10);

        let events = [Flaky { fail: false }, Flaky { fail: true }];
        let err = write_snapshot(&path, events).unwrap_err();

        assert!(matches!(err, IngestError::Filesystem { .. }));
        assert!(!path.exists());
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn test_interrupted_write_keeps_prior_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), StreamKind::TripUpdates, 10);
        write_snapshot(&path, [Row { id: 1, name: None }]).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        assert!(write_snapshot(&path, [Flaky { fail: true }]).is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(!part_path(&path).exists());
    }

    #[test]
    fn test_snapshots_since_sorted_and_skips_partials() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for ts in [300, 100, 200] {
            let path = snapshot_path(root, StreamKind::VehiclePositions, ts);
            write_snapshot(&path, [Row { id: 1, name: None }]).unwrap();
        }
        let stream_dir = root.join("vehicle_positions");
        fs::write(stream_dir.join("400.ndjson.part"), "{").unwrap();
        fs::write(stream_dir.join("notes.ndjson"), "").unwrap();

        let found = snapshots_since(root, StreamKind::VehiclePositions, 150).unwrap();
        let stamps: Vec<i64> = found.iter().map(|f| f.ingest_ms).collect();
        assert_eq!(stamps, [200, 300]);
    }

    #[test]
    fn test_snapshots_since_missing_stream_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let found = snapshots_since(dir.path(), StreamKind::TripUpdates, 0).unwrap();
        assert!(found.is_empty());
    }
}
