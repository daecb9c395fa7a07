use std::path::PathBuf;

use chrono::Utc;
use reqwest::header::HeaderMap;
use serde::Serialize;
use tracing::{debug, error, info};

use super::Syncer;
use crate::error::Result;
use crate::fetch::fetch_bytes;
use crate::realtime::{StreamKind, decode_trip_updates, decode_vehicle_positions};
use crate::snapshot::{snapshot_path, write_snapshot};

/// Outcome of one stream within a realtime cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamReport {
    pub stream: &'static str,
    /// Committed snapshot; `None` when the stream failed.
    pub snapshot: Option<PathBuf>,
    pub events: usize,
    pub error: Option<String>,
}

impl StreamReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeSyncReport {
    pub ingest_ms: i64,
    pub trip_updates: StreamReport,
    pub vehicle_positions: StreamReport,
}

impl Syncer {
    /// Fetches both realtime feeds concurrently and snapshots each one.
    ///
    /// The streams are independent: a fetch, decode or write failure in one
    /// is logged and recorded in its [`StreamReport`] while the other still
    /// commits. Both snapshots share the cycle's `ingest_ms`.
    #[tracing::instrument(skip(self))]
    pub async fn sync_realtime(&self) -> RealtimeSyncReport {
        let ingest_ms = Utc::now().timestamp_millis();

        let (trip_updates, vehicle_positions) = tokio::join!(
            self.sync_stream(StreamKind::TripUpdates, ingest_ms),
            self.sync_stream(StreamKind::VehiclePositions, ingest_ms),
        );

        info!(
            ingest_ms,
            trip_updates = trip_updates.events,
            vehicle_positions = vehicle_positions.events,
            "Realtime sync finished"
        );
        RealtimeSyncReport {
            ingest_ms,
            trip_updates,
            vehicle_positions,
        }
    }

    async fn sync_stream(&self, kind: StreamKind, ingest_ms: i64) -> StreamReport {
        match self.snapshot_stream(kind, ingest_ms).await {
            Ok((path, events)) => StreamReport {
                stream: kind.dir_name(),
                snapshot: Some(path),
                events,
                error: None,
            },
            Err(e) => {
                error!(stream = %kind, error = %e, kind = e.kind(), "Realtime stream failed");
                StreamReport {
                    stream: kind.dir_name(),
                    snapshot: None,
                    events: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn snapshot_stream(&self, kind: StreamKind, ingest_ms: i64) -> Result<(PathBuf, usize)> {
        let url = match kind {
            StreamKind::TripUpdates => &self.config.realtime_urls.trip_updates,
            StreamKind::VehiclePositions => &self.config.realtime_urls.vehicle_positions,
        };
        let bytes = fetch_bytes(self.client.as_ref(), url, &HeaderMap::new()).await?;
        debug!(stream = %kind, bytes = bytes.len(), "Fetched realtime feed");

        let path = snapshot_path(&self.config.storage_path, kind, ingest_ms);
        tokio::task::spawn_blocking(move || -> Result<(PathBuf, usize)> {
            // The whole buffer decodes before the snapshot file is opened.
            let events = match kind {
                StreamKind::TripUpdates => {
                    write_snapshot(&path, decode_trip_updates(&bytes, ingest_ms)?)?
                }
                StreamKind::VehiclePositions => {
                    write_snapshot(&path, decode_vehicle_positions(&bytes, ingest_ms)?)?
                }
            };
            Ok((path, events))
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_rt::trip_update::StopTimeUpdate;
    use crate::gtfs_rt::{FeedEntity, FeedHeader, FeedMessage, TripDescriptor, TripUpdate};
    use crate::snapshot::snapshots_since;
    use crate::sync::test_support::{MockClient, TRIP_UPDATES_URL, VEHICLE_POSITIONS_URL, syncer_with};
    use prost::Message;

    fn trip_updates(stops: u32) -> Vec<u8> {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                timestamp: Some(1_709_280_000),
                ..Default::default()
            },
            entity: vec![FeedEntity {
                id: "1".to_string(),
                trip_update: Some(TripUpdate {
                    trip: TripDescriptor {
                        trip_id: Some("3_1234^N".to_string()),
                        ..Default::default()
                    },
                    stop_time_update: (1..=stops)
                        .map(|seq| StopTimeUpdate {
                            stop_sequence: Some(seq),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }),
                ..Default::default()
            }],
        }
        .encode_to_vec()
    }

    #[tokio::test]
    async fn test_both_streams_snapshot_with_shared_timestamp() {
        let client = MockClient::new()
            .with(TRIP_UPDATES_URL, 200, trip_updates(3))
            .with(VEHICLE_POSITIONS_URL, 200, Vec::new());
        let (_dir, syncer) = syncer_with(client).await;

        let report = syncer.sync_realtime().await;

        assert!(report.trip_updates.is_ok());
        assert!(report.vehicle_positions.is_ok());
        assert_eq!(report.trip_updates.events, 3);
        assert_eq!(report.vehicle_positions.events, 0);

        let root = &syncer.config().storage_path;
        let tu = snapshots_since(root, StreamKind::TripUpdates, 0).unwrap();
        let vp = snapshots_since(root, StreamKind::VehiclePositions, 0).unwrap();
        assert_eq!(tu.len(), 1);
        assert_eq!(vp.len(), 1);
        assert_eq!(tu[0].ingest_ms, report.ingest_ms);
        assert_eq!(vp[0].ingest_ms, report.ingest_ms);
    }

    #[tokio::test]
    async fn test_failing_stream_does_not_block_other() {
        let client = MockClient::new()
            .with(TRIP_UPDATES_URL, 200, trip_updates(2))
            .with(VEHICLE_POSITIONS_URL, 503, Vec::new());
        let (_dir, syncer) = syncer_with(client).await;

        let report = syncer.sync_realtime().await;

        assert_eq!(report.trip_updates.events, 2);
        assert!(report.trip_updates.snapshot.is_some());
        assert!(!report.vehicle_positions.is_ok());
        assert!(report.vehicle_positions.snapshot.is_none());

        let root = &syncer.config().storage_path;
        assert!(
            snapshots_since(root, StreamKind::VehiclePositions, 0)
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_undecodable_feed_writes_nothing() {
        let client = MockClient::new()
            .with(TRIP_UPDATES_URL, 200, vec![0xFF, 0xFE, 0x00, 0x01])
            .with(VEHICLE_POSITIONS_URL, 200, Vec::new());
        let (_dir, syncer) = syncer_with(client).await;

        let report = syncer.sync_realtime().await;

        assert!(report.trip_updates.error.as_deref().unwrap().contains("decode"));
        let stream_dir = syncer.config().storage_path.join("trip_updates");
        let entries = std::fs::read_dir(stream_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(entries, 0);
    }
}
