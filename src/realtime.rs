//! Protobuf decoding of GTFS-realtime feeds into flat, serializable events.

use prost::Message;
use serde::Serialize;

use crate::error::Result;
use crate::gtfs_rt::trip_update::StopTimeUpdate;
use crate::gtfs_rt::{FeedMessage, TripDescriptor, TripUpdate, VehiclePosition};

/// The two realtime streams the pipeline snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    TripUpdates,
    VehiclePositions,
}

impl StreamKind {
    /// Directory under the storage root holding this stream's snapshots.
    pub fn dir_name(self) -> &'static str {
        match self {
            StreamKind::TripUpdates => "trip_updates",
            StreamKind::VehiclePositions => "vehicle_positions",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One stop-time update of one trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripUpdateEvent {
    /// Ingestion wall-clock time, epoch milliseconds.
    pub feed_ts: i64,
    /// Feed header timestamp, epoch seconds.
    pub header_ts: Option<u64>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub start_date: Option<String>,
    pub stop_id: Option<String>,
    pub stop_sequence: Option<u32>,
    pub arr_time: Option<i64>,
    pub dep_time: Option<i64>,
    /// Arrival delay in seconds, falling back to the departure delay.
    pub delay: Option<i32>,
    pub schedule_rel: Option<i32>,
    pub vehicle_id: Option<String>,
}

/// One vehicle's reported position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehiclePositionEvent {
    pub feed_ts: i64,
    pub header_ts: Option<u64>,
    pub veh_ts: Option<u64>,
    pub vehicle_id: Option<String>,
    pub vehicle_label: Option<String>,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub direction_id: Option<u32>,
    pub lat: Option<f32>,
    pub lon: Option<f32>,
    pub bearing: Option<f32>,
    pub speed: Option<f32>,
    pub odometer: Option<f64>,
    pub current_status: Option<i32>,
    pub current_stop_sequence: Option<u32>,
    pub stop_id: Option<String>,
    pub congestion_level: Option<i32>,
    pub occupancy_status: Option<i32>,
    pub occupancy_percentage: Option<u32>,
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`crate::IngestError::Decode`] if the bytes are not a valid `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// Decodes a trip-updates feed and flattens it to one event per stop-time update.
///
/// Entities without a trip update, or whose trip update has no stop-time
/// updates, yield nothing. The buffer is decoded eagerly; events are built
/// as the iterator is consumed.
pub fn decode_trip_updates(
    bytes: &[u8],
    feed_ts: i64,
) -> Result<impl Iterator<Item = TripUpdateEvent> + use<>> {
    let feed = parse_feed(bytes)?;
    let header_ts = feed.header.timestamp;

    Ok(feed
        .entity
        .into_iter()
        .filter_map(|e| e.trip_update)
        .flat_map(move |tu| trip_update_events(tu, feed_ts, header_ts)))
}

fn trip_update_events(
    tu: TripUpdate,
    feed_ts: i64,
    header_ts: Option<u64>,
) -> impl Iterator<Item = TripUpdateEvent> {
    let TripDescriptor {
        trip_id,
        route_id,
        start_date,
        schedule_relationship,
        ..
    } = tu.trip;
    let vehicle_id = tu.vehicle.and_then(|v| v.id);

    tu.stop_time_update
        .into_iter()
        .map(move |stu: StopTimeUpdate| {
            let arrival = stu.arrival.as_ref();
            let departure = stu.departure.as_ref();
            let delay = arrival
                .and_then(|a| a.delay)
                .or_else(|| departure.and_then(|d| d.delay));
            TripUpdateEvent {
                feed_ts,
                header_ts,
                trip_id: trip_id.clone(),
                route_id: route_id.clone(),
                start_date: start_date.clone(),
                stop_id: stu.stop_id,
                stop_sequence: stu.stop_sequence,
                arr_time: arrival.and_then(|a| a.time),
                dep_time: departure.and_then(|d| d.time),
                delay,
                schedule_rel: schedule_relationship,
                vehicle_id: vehicle_id.clone(),
            }
        })
}

/// Decodes a vehicle-positions feed into one event per vehicle entity.
pub fn decode_vehicle_positions(
    bytes: &[u8],
    feed_ts: i64,
) -> Result<impl Iterator<Item = VehiclePositionEvent> + use<>> {
    let feed = parse_feed(bytes)?;
    let header_ts = feed.header.timestamp;

    Ok(feed
        .entity
        .into_iter()
        .filter_map(|e| e.vehicle)
        .map(move |v| vehicle_event(v, feed_ts, header_ts)))
}

fn vehicle_event(v: VehiclePosition, feed_ts: i64, header_ts: Option<u64>) -> VehiclePositionEvent {
    let (vehicle_id, vehicle_label) = v
        .vehicle
        .map(|d| (d.id, d.label))
        .unwrap_or_default();
    let (trip_id, route_id, direction_id) = v
        .trip
        .map(|t| (t.trip_id, t.route_id, t.direction_id))
        .unwrap_or_default();
    let pos = v.position;

    VehiclePositionEvent {
        feed_ts,
        header_ts,
        veh_ts: v.timestamp,
        vehicle_id,
        vehicle_label,
        trip_id,
        route_id,
        direction_id,
        lat: pos.as_ref().map(|p| p.latitude),
        lon: pos.as_ref().map(|p| p.longitude),
        bearing: pos.as_ref().and_then(|p| p.bearing),
        speed: pos.as_ref().and_then(|p| p.speed),
        odometer: pos.as_ref().and_then(|p| p.odometer),
        current_status: v.current_status,
        current_stop_sequence: v.current_stop_sequence,
        stop_id: v.stop_id,
        congestion_level: v.congestion_level,
        occupancy_status: v.occupancy_status,
        occupancy_percentage: v.occupancy_percentage,
    }
}
