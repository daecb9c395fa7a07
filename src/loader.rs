//! Bounded, idempotent batch writes of validated static tables.

use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::parser::ValidatedTable;
use crate::records::StaticRow;
use crate::schema::GtfsTable;

/// Outcome of loading one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub records: usize,
    pub batches: usize,
    /// Rows actually written; duplicates of rows already stored are skipped.
    pub inserted: u64,
}

/// SQLite's default limit on host parameters in one statement.
pub const MAX_BIND_PARAMS: usize = 32_766;

/// Number of writes needed for `records` rows at `batch_size` rows per write.
pub fn batch_count(records: usize, batch_size: usize) -> usize {
    records.div_ceil(batch_size.max(1))
}

/// Rows per `INSERT` for `table`: `batch_size`, capped so that
/// `rows * columns` stays within [`MAX_BIND_PARAMS`].
pub fn rows_per_statement(table: GtfsTable, batch_size: usize) -> usize {
    let columns = StaticRow::columns(table).len().max(1);
    batch_size.clamp(1, MAX_BIND_PARAMS / columns)
}

/// Writes every record of `table` under `feed_version_id`.
///
/// All records are coerced before the first write, so a coercion failure
/// writes nothing. Rows are then inserted in sequential chunks of at most
/// `batch_size` (fewer for tables too wide to bind that many rows at once,
/// see [`rows_per_statement`]), each a single `INSERT ... ON CONFLICT DO NOTHING`, which
/// makes re-running a load for the same version a no-op.
///
/// # Errors
///
/// [`IngestError::SchemaValidation`] if a value fails coercion,
/// [`IngestError::Storage`] if a chunk write fails. Chunks written before
/// the failing one stay in the store.
#[tracing::instrument(skip(pool, table), fields(table = %table.table(), records = table.len()))]
pub async fn load_table(
    pool: &SqlitePool,
    table: ValidatedTable,
    feed_version_id: i64,
    batch_size: usize,
) -> Result<LoadReport> {
    let gtfs_table = table.table();
    if gtfs_table == GtfsTable::FeedInfo {
        return Err(IngestError::schema(
            gtfs_table.file_name(),
            1,
            "feed_info.txt is recorded by the ledger, not loaded",
        ));
    }

    let rows = table
        .into_iter()
        .map(|record| StaticRow::from_record(&record))
        .collect::<Result<Vec<_>>>()?;

    let records = rows.len();
    let rows_per_chunk = rows_per_statement(gtfs_table, batch_size);
    if rows_per_chunk < batch_size {
        debug!(batch_size, rows_per_chunk, "Batch size capped by bind parameter limit");
    }
    let mut batches = 0;
    let mut inserted = 0;

    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<StaticRow> = rows.by_ref().take(rows_per_chunk).collect();
        let chunk_len = chunk.len();

        let mut qb = insert_statement(gtfs_table, chunk, feed_version_id);
        let result = qb.build().execute(pool).await?;

        batches += 1;
        inserted += result.rows_affected();
        debug!(batch = batches, rows = chunk_len, "Wrote batch");
    }

    info!(
        table = gtfs_table.table_name(),
        records, batches, inserted, "Loaded table"
    );

    Ok(LoadReport {
        table: gtfs_table.table_name().to_string(),
        records,
        batches,
        inserted,
    })
}

fn insert_statement(
    table: GtfsTable,
    chunk: Vec<StaticRow>,
    feed_version_id: i64,
) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        table.table_name(),
        StaticRow::columns(table).join(", ")
    ));
    qb.push_values(chunk, |mut b, row| row.push_binds(&mut b, feed_version_id));
    qb.push(" ON CONFLICT DO NOTHING");
    qb
}
