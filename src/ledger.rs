//! The feed version ledger.
//!
//! Owns the timeline of published static schedules for one feed source.
//! Validity windows `[valid_from, valid_to]` never overlap: a new version
//! truncates any earlier version still running on its first day.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::parser::{ValidatedTable, parse_gtfs_date};
use crate::schema::GtfsTable;

/// Publisher metadata from `feed_info.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedInfo {
    pub publisher_name: String,
    pub publisher_url: String,
    pub lang: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub version: Option<String>,
    pub default_lang: Option<String>,
    pub contact_email: Option<String>,
    pub contact_url: Option<String>,
}

impl FeedInfo {
    /// Takes the first row of a validated `feed_info.txt`.
    ///
    /// # Errors
    ///
    /// [`IngestError::SchemaValidation`] if the table is empty or its end
    /// date precedes its start date.
    pub fn from_table(table: ValidatedTable) -> Result<FeedInfo> {
        let file = GtfsTable::FeedInfo.file_name();
        let record = table
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::schema(file, 2, "feed_info.txt has no rows"))?;

        let text = |name: &str| record.get(name).unwrap_or_default().to_string();
        let date = |name: &str| {
            record
                .get(name)
                .and_then(parse_gtfs_date)
                .ok_or_else(|| IngestError::schema(file, record.line(), format!("invalid `{name}`")))
        };

        let info = FeedInfo {
            publisher_name: text("feed_publisher_name"),
            publisher_url: text("feed_publisher_url"),
            lang: text("feed_lang"),
            start_date: date("feed_start_date")?,
            end_date: date("feed_end_date")?,
            version: record.get("feed_version").map(str::to_string),
            default_lang: record.get("default_lang").map(str::to_string),
            contact_email: record.get("feed_contact_email").map(str::to_string),
            contact_url: record.get("feed_contact_url").map(str::to_string),
        };

        if info.end_date < info.start_date {
            return Err(IngestError::schema(
                file,
                record.line(),
                format!(
                    "feed_end_date {} precedes feed_start_date {}",
                    info.end_date, info.start_date
                ),
            ));
        }
        Ok(info)
    }
}

/// A persisted schedule version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FeedVersion {
    pub feed_version_id: i64,
    pub feed_source_id: i64,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub feed_version_label: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// A version detected as new but not yet written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedVersionCandidate {
    pub feed_source_id: i64,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub label: Option<String>,
}

pub struct Ledger {
    pool: SqlitePool,
    feed_source_id: i64,
}

impl Ledger {
    pub fn new(pool: SqlitePool, feed_source_id: i64) -> Self {
        Self {
            pool,
            feed_source_id,
        }
    }

    /// Returns a candidate unless a version of this feed source already
    /// starts on `info.start_date`.
    ///
    /// A start date strictly inside an existing window is a new version;
    /// [`Ledger::create_version`] truncates the older one.
    pub async fn is_new_version(&self, info: &FeedInfo) -> Result<Option<FeedVersionCandidate>> {
        let existing: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM feed_versions WHERE feed_source_id = ? AND valid_from = ?",
        )
        .bind(self.feed_source_id)
        .bind(info.start_date)
        .fetch_one(&self.pool)
        .await?;

        if existing > 0 {
            debug!(start_date = %info.start_date, "Feed version already recorded");
            return Ok(None);
        }

        Ok(Some(FeedVersionCandidate {
            feed_source_id: self.feed_source_id,
            valid_from: info.start_date,
            valid_to: info.end_date,
            label: info.version.clone(),
        }))
    }

    /// Records `candidate` in one transaction.
    ///
    /// Earlier-starting versions still valid on `valid_from` end the day
    /// before it; if a later-starting version already exists, the new window
    /// ends the day before that one. The transaction commits only after the
    /// insert, so dropping this future (timeout, crash, error) rolls back
    /// the truncation as well.
    ///
    /// # Errors
    ///
    /// [`IngestError::Storage`] on any statement failure, including losing a
    /// race to another writer inserting the same `valid_from`.
    #[tracing::instrument(skip(self), fields(feed_source_id = candidate.feed_source_id))]
    pub async fn create_version(&self, candidate: &FeedVersionCandidate) -> Result<FeedVersion> {
        let day_before = candidate.valid_from.pred_opt().ok_or_else(|| {
            IngestError::schema(
                GtfsTable::FeedInfo.file_name(),
                2,
                "feed_start_date out of range",
            )
        })?;

        let mut tx = self.pool.begin().await?;

        // Writing first takes SQLite's write lock, so a concurrent creator
        // either waits for us or is already visible here.
        let truncated = sqlx::query(
            r#"
            UPDATE feed_versions
            SET valid_to = ?
            WHERE feed_source_id = ? AND valid_from < ? AND valid_to >= ?
            "#,
        )
        .bind(day_before)
        .bind(candidate.feed_source_id)
        .bind(candidate.valid_from)
        .bind(candidate.valid_from)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let next_start: Option<NaiveDate> = sqlx::query_scalar(
            r#"
            SELECT valid_from FROM feed_versions
            WHERE feed_source_id = ? AND valid_from > ?
            ORDER BY valid_from
            LIMIT 1
            "#,
        )
        .bind(candidate.feed_source_id)
        .bind(candidate.valid_from)
        .fetch_optional(&mut *tx)
        .await?;

        let valid_to = match next_start.and_then(|d| d.pred_opt()) {
            Some(limit) if limit < candidate.valid_to => limit,
            _ => candidate.valid_to,
        };

        let version = sqlx::query_as::<_, FeedVersion>(
            r#"
            INSERT INTO feed_versions
                (feed_source_id, valid_from, valid_to, feed_version_label, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(candidate.feed_source_id)
        .bind(candidate.valid_from)
        .bind(valid_to)
        .bind(&candidate.label)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            feed_version_id = version.feed_version_id,
            valid_from = %version.valid_from,
            valid_to = %version.valid_to,
            truncated,
            "Created feed version"
        );
        Ok(version)
    }

    /// Every version of this feed source, oldest first.
    pub async fn versions(&self) -> Result<Vec<FeedVersion>> {
        let versions = sqlx::query_as::<_, FeedVersion>(
            "SELECT * FROM feed_versions WHERE feed_source_id = ? ORDER BY valid_from",
        )
        .bind(self.feed_source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_table;
    use crate::store::test_support::temp_pool;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn info(start: NaiveDate, end: NaiveDate) -> FeedInfo {
        FeedInfo {
            publisher_name: "ZTM Poznań".into(),
            publisher_url: "https://www.ztm.poznan.pl".into(),
            lang: "pl".into(),
            start_date: start,
            end_date: end,
            version: None,
            default_lang: None,
            contact_email: None,
            contact_url: None,
        }
    }

    #[tokio::test]
    async fn test_first_version_is_new() {
        let (_dir, pool) = temp_pool().await;
        let ledger = Ledger::new(pool, 1);

        let candidate = ledger
            .is_new_version(&info(date(2024, 1, 1), date(2024, 6, 1)))
            .await
            .unwrap()
            .expect("empty ledger accepts any version");
        let version = ledger.create_version(&candidate).await.unwrap();

        assert_eq!(version.valid_from, date(2024, 1, 1));
        assert_eq!(version.valid_to, date(2024, 6, 1));
        assert_eq!(version.feed_source_id, 1);
    }

    #[tokio::test]
    async fn test_same_start_date_is_not_new() {
        let (_dir, pool) = temp_pool().await;
        let ledger = Ledger::new(pool, 1);
        let feed = info(date(2024, 1, 1), date(2024, 6, 1));

        let candidate = ledger.is_new_version(&feed).await.unwrap().unwrap();
        ledger.create_version(&candidate).await.unwrap();

        assert!(ledger.is_new_version(&feed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overlapping_version_truncates_previous() {
        let (_dir, pool) = temp_pool().await;
        let ledger = Ledger::new(pool, 1);

        let v1 = ledger
            .is_new_version(&info(date(2024, 1, 1), date(2024, 6, 1)))
            .await
            .unwrap()
            .unwrap();
        ledger.create_version(&v1).await.unwrap();

        let v2 = ledger
            .is_new_version(&info(date(2024, 3, 1), date(2024, 9, 1)))
            .await
            .unwrap()
            .expect("start inside V1's window is still a new version");
        ledger.create_version(&v2).await.unwrap();

        let versions = ledger.versions().await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].valid_to, date(2024, 2, 29));
        assert_eq!(versions[1].valid_from, date(2024, 3, 1));
        assert_eq!(versions[1].valid_to, date(2024, 9, 1));
    }

    #[tokio::test]
    async fn test_older_version_is_clamped_before_newer() {
        let (_dir, pool) = temp_pool().await;
        let ledger = Ledger::new(pool, 1);

        let newer = ledger
            .is_new_version(&info(date(2024, 3, 1), date(2024, 9, 1)))
            .await
            .unwrap()
            .unwrap();
        ledger.create_version(&newer).await.unwrap();

        let older = ledger
            .is_new_version(&info(date(2024, 1, 1), date(2024, 6, 1)))
            .await
            .unwrap()
            .unwrap();
        let created = ledger.create_version(&older).await.unwrap();

        assert_eq!(created.valid_to, date(2024, 2, 29));
        let versions = ledger.versions().await.unwrap();
        assert_eq!(versions[1].valid_to, date(2024, 9, 1));
    }

    #[tokio::test]
    async fn test_losing_duplicate_insert_fails() {
        let (_dir, pool) = temp_pool().await;
        let ledger = Ledger::new(pool, 1);

        let v1 = ledger
            .is_new_version(&info(date(2024, 1, 1), date(2024, 6, 1)))
            .await
            .unwrap()
            .unwrap();
        // A racing writer that checked novelty before V1 was committed.
        let racer = v1.clone();
        ledger.create_version(&v1).await.unwrap();

        let err = ledger.create_version(&racer).await.unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));
        assert_eq!(ledger.versions().await.unwrap().len(), 1);
    }

    fn candidate(start: NaiveDate, end: NaiveDate) -> FeedVersionCandidate {
        FeedVersionCandidate {
            feed_source_id: 1,
            valid_from: start,
            valid_to: end,
            label: None,
        }
    }

    fn assert_disjoint(versions: &[FeedVersion]) {
        for pair in versions.windows(2) {
            assert!(
                pair[0].valid_to < pair[1].valid_from,
                "{:?} overlaps {:?}",
                (pair[0].valid_from, pair[0].valid_to),
                (pair[1].valid_from, pair[1].valid_to)
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_same_start_date_has_one_winner() {
        let (_dir, pool) = temp_pool().await;
        let a = Ledger::new(pool.clone(), 1);
        let b = Ledger::new(pool, 1);
        let version = candidate(date(2024, 1, 1), date(2024, 6, 1));
        let racer = version.clone();

        let (first, second) = tokio::join!(
            tokio::spawn(async move { a.create_version(&version).await }),
            tokio::spawn(async move { b.create_version(&racer).await }),
        );
        let results = [first.unwrap(), second.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(IngestError::Storage(_))))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_overlapping_versions_stay_disjoint() {
        let (_dir, pool) = temp_pool().await;
        let ledger = Ledger::new(pool.clone(), 1);
        ledger
            .create_version(&candidate(date(2024, 1, 1), date(2024, 6, 1)))
            .await
            .unwrap();

        let march = Ledger::new(pool.clone(), 1);
        let april = Ledger::new(pool, 1);
        let (first, second) = tokio::join!(
            tokio::spawn(async move {
                march
                    .create_version(&candidate(date(2024, 3, 1), date(2024, 9, 1)))
                    .await
            }),
            tokio::spawn(async move {
                april
                    .create_version(&candidate(date(2024, 4, 1), date(2024, 10, 1)))
                    .await
            }),
        );
        first.unwrap().unwrap();
        second.unwrap().unwrap();

        let versions = ledger.versions().await.unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].valid_to, date(2024, 2, 29));
        assert_eq!(versions[1].valid_to, date(2024, 3, 31));
        assert_eq!(versions[2].valid_to, date(2024, 10, 1));
        assert_disjoint(&versions);
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back_truncation() {
        let (_dir, pool) = temp_pool().await;
        let ledger = Ledger::new(pool, 1);

        let v1 = ledger
            .is_new_version(&info(date(2024, 1, 1), date(2024, 6, 1)))
            .await
            .unwrap()
            .unwrap();
        ledger.create_version(&v1).await.unwrap();

        // Truncates V1, then violates the window check on insert.
        let broken = FeedVersionCandidate {
            feed_source_id: 1,
            valid_from: date(2024, 3, 1),
            valid_to: date(2024, 2, 1),
            label: None,
        };
        let err = ledger.create_version(&broken).await.unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));

        let versions = ledger.versions().await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].valid_to, date(2024, 6, 1));
    }

    #[tokio::test]
    async fn test_sources_are_independent() {
        let (_dir, pool) = temp_pool().await;
        let a = Ledger::new(pool.clone(), 1);
        let b = Ledger::new(pool, 2);
        let feed = info(date(2024, 1, 1), date(2024, 6, 1));

        let candidate = a.is_new_version(&feed).await.unwrap().unwrap();
        a.create_version(&candidate).await.unwrap();

        assert!(b.is_new_version(&feed).await.unwrap().is_some());
    }

    #[test]
    fn test_feed_info_from_table() {
        let csv = "feed_publisher_name,feed_publisher_url,feed_lang,feed_start_date,feed_end_date,feed_version\n\
                   ZTM,https://www.ztm.poznan.pl,pl,20240301,20240901,2024.03\n";
        let table = parse_table(csv.as_bytes(), GtfsTable::FeedInfo).unwrap();
        let info = FeedInfo::from_table(table).unwrap();
        assert_eq!(info.start_date, date(2024, 3, 1));
        assert_eq!(info.end_date, date(2024, 9, 1));
        assert_eq!(info.version.as_deref(), Some("2024.03"));
        assert_eq!(info.contact_email, None);
    }

    #[test]
    fn test_feed_info_end_before_start_rejected() {
        let csv = "feed_publisher_name,feed_publisher_url,feed_lang,feed_start_date,feed_end_date\n\
                   ZTM,https://www.ztm.poznan.pl,pl,20240901,20240301\n";
        let table = parse_table(csv.as_bytes(), GtfsTable::FeedInfo).unwrap();
        assert!(FeedInfo::from_table(table).is_err());
    }

    #[test]
    fn test_empty_feed_info_rejected() {
        let csv = "feed_publisher_name,feed_publisher_url,feed_lang,feed_start_date,feed_end_date\n";
        let table = parse_table(csv.as_bytes(), GtfsTable::FeedInfo).unwrap();
        assert!(FeedInfo::from_table(table).is_err());
    }
}
