use std::path::{Path, PathBuf};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{Instrument, error, info, info_span, warn};

use super::Syncer;
use crate::error::{IngestError, Result};
use crate::fetch::{extract_archive, fetch_bytes, static_feed_headers};
use crate::ledger::{FeedInfo, FeedVersion, Ledger};
use crate::loader::{LoadReport, load_table};
use crate::parser::parse_table_file;
use crate::schema::GtfsTable;

/// A table whose parse or load failed; the other tables are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableFailure {
    pub table: String,
    pub kind: &'static str,
    pub message: String,
}

/// Outcome of one static sync cycle.
#[derive(Debug, Clone, Serialize)]
pub struct StaticSyncReport {
    pub ingest_ms: i64,
    /// The version created by this cycle; `None` when the feed was unchanged.
    pub feed_version: Option<FeedVersion>,
    pub loaded: Vec<LoadReport>,
    pub failed: Vec<TableFailure>,
    /// Required GTFS files absent from the archive.
    pub missing: Vec<String>,
}

impl StaticSyncReport {
    fn unchanged(ingest_ms: i64) -> Self {
        Self {
            ingest_ms,
            feed_version: None,
            loaded: Vec::new(),
            failed: Vec::new(),
            missing: Vec::new(),
        }
    }

    pub fn is_new_version(&self) -> bool {
        self.feed_version.is_some()
    }

    /// Every attempted table loaded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn rows_inserted(&self) -> u64 {
        self.loaded.iter().map(|r| r.inserted).sum()
    }
}

impl Syncer {
    /// Runs one static cycle: fetch, extract, version check, then load every
    /// table present in the archive under the new version.
    ///
    /// The scratch directory is removed however the cycle ends, on the
    /// blocking pool unless the future is cancelled.
    ///
    /// # Errors
    ///
    /// Fetch, archive, `feed_info.txt` and ledger failures abort the cycle.
    /// Per-table failures do not; they are listed in the report.
    #[tracing::instrument(skip(self), fields(feed_source_id = self.config.feed_source_id))]
    pub async fn sync_static(&self) -> Result<StaticSyncReport> {
        let ingest_ms = Utc::now().timestamp_millis();
        info!(url = %self.config.static_feed_url, "Starting static sync");

        let bytes = fetch_bytes(
            self.client.as_ref(),
            &self.config.static_feed_url,
            &static_feed_headers(),
        )
        .await?;

        let scratch_root = self.config.scratch_dir.clone();
        let scratch =
            tokio::task::spawn_blocking(move || extract_archive(&bytes, &scratch_root, ingest_ms))
                .await??;

        let report = self.ingest_extracted(scratch.path(), ingest_ms).await;
        scratch.close().await;

        match &report {
            Ok(r) if r.is_new_version() => info!(
                tables = r.loaded.len(),
                failed = r.failed.len(),
                rows = r.rows_inserted(),
                "Static sync finished"
            ),
            Ok(_) => info!("Static feed unchanged"),
            Err(e) => error!(error = %e, kind = e.kind(), "Static sync failed"),
        }
        report
    }

    async fn ingest_extracted(&self, dir: &Path, ingest_ms: i64) -> Result<StaticSyncReport> {
        let info = read_feed_info(dir).await?;
        info!(
            start_date = %info.start_date,
            end_date = %info.end_date,
            version = info.version.as_deref(),
            "Read feed info"
        );

        let ledger = Ledger::new(self.pool.clone(), self.config.feed_source_id);
        let Some(candidate) = ledger.is_new_version(&info).await? else {
            return Ok(StaticSyncReport::unchanged(ingest_ms));
        };
        let version = ledger.create_version(&candidate).await?;

        let mut missing = Vec::new();
        let mut tasks = Vec::new();
        for table in GtfsTable::LOADABLE {
            if !dir.join(table.file_name()).is_file() {
                if table.is_required_file() {
                    warn!(file = table.file_name(), "Required GTFS file missing from archive");
                    missing.push(table.file_name().to_string());
                }
                continue;
            }

            let span = info_span!("load_table_file", file = table.file_name());
            let task = tokio::spawn(
                parse_and_load(
                    self.pool.clone(),
                    dir.to_path_buf(),
                    table,
                    version.feed_version_id,
                    self.config.batch_size,
                )
                .instrument(span),
            );
            tasks.push((table, task));
        }

        let (tables, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let results = join_all(handles).await;

        let mut loaded = Vec::new();
        let mut failed = Vec::new();
        for (table, result) in tables.into_iter().zip(results) {
            match result.map_err(IngestError::from).and_then(|r| r) {
                Ok(report) => loaded.push(report),
                Err(e) => {
                    error!(file = table.file_name(), error = %e, kind = e.kind(), "Table load failed");
                    failed.push(TableFailure {
                        table: table.table_name().to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(StaticSyncReport {
            ingest_ms,
            feed_version: Some(version),
            loaded,
            failed,
            missing,
        })
    }
}

async fn read_feed_info(dir: &Path) -> Result<FeedInfo> {
    let file = GtfsTable::FeedInfo.file_name();
    if !dir.join(file).is_file() {
        return Err(IngestError::schema(file, 0, "missing from archive"));
    }
    let dir = dir.to_path_buf();
    let table =
        tokio::task::spawn_blocking(move || parse_table_file(&dir, GtfsTable::FeedInfo)).await??;
    FeedInfo::from_table(table)
}

async fn parse_and_load(
    pool: SqlitePool,
    dir: PathBuf,
    table: GtfsTable,
    feed_version_id: i64,
    batch_size: usize,
) -> Result<LoadReport> {
    let parsed = tokio::task::spawn_blocking(move || parse_table_file(&dir, table)).await??;
    load_table(&pool, parsed, feed_version_id, batch_size).await
}
