//! Store bootstrap and the read-side queries offered to the query API.

use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use crate::error::{IngestError, Result};
use crate::ledger::FeedVersion;
use crate::records::{Route, Stop};
use crate::schema::GtfsTable;

const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

/// Opens (creating if needed) the SQLite store at `database_url` and applies the schema.
#[tracing::instrument]
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::filesystem(parent, e))?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    apply_schema(&pool).await?;

    info!("Store ready");
    Ok(pool)
}

/// Creates any missing tables. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

/// The version of `feed_source_id` whose validity window contains `date`.
pub async fn active_version(
    pool: &SqlitePool,
    feed_source_id: i64,
    date: NaiveDate,
) -> Result<Option<FeedVersion>> {
    let version = sqlx::query_as::<_, FeedVersion>(
        r#"
        SELECT * FROM feed_versions
        WHERE feed_source_id = ? AND valid_from <= ? AND valid_to >= ?
        ORDER BY valid_from DESC
        LIMIT 1
        "#,
    )
    .bind(feed_source_id)
    .bind(date)
    .bind(date)
    .fetch_optional(pool)
    .await?;
    Ok(version)
}

/// All routes of the version active on `date`; empty if none is active.
pub async fn routes_for_date(
    pool: &SqlitePool,
    feed_source_id: i64,
    date: NaiveDate,
) -> Result<Vec<Route>> {
    let Some(version) = active_version(pool, feed_source_id, date).await? else {
        return Ok(Vec::new());
    };
    let routes = sqlx::query_as::<_, Route>(
        "SELECT * FROM routes WHERE feed_version_id = ? ORDER BY route_sort_order, route_id",
    )
    .bind(version.feed_version_id)
    .fetch_all(pool)
    .await?;
    Ok(routes)
}

/// All stops of the version active on `date`; empty if none is active.
pub async fn stops_for_date(
    pool: &SqlitePool,
    feed_source_id: i64,
    date: NaiveDate,
) -> Result<Vec<Stop>> {
    let Some(version) = active_version(pool, feed_source_id, date).await? else {
        return Ok(Vec::new());
    };
    let stops = sqlx::query_as::<_, Stop>(
        "SELECT * FROM stops WHERE feed_version_id = ? ORDER BY stop_id",
    )
    .bind(version.feed_version_id)
    .fetch_all(pool)
    .await?;
    Ok(stops)
}

/// Number of rows `table` holds for one feed version.
pub async fn count_rows(pool: &SqlitePool, table: GtfsTable, feed_version_id: i64) -> Result<i64> {
    // Table names come from a closed enum, never from input.
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE feed_version_id = ?",
        table.table_name()
    );
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(feed_version_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
