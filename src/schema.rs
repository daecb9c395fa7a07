//! Field schemas for the GTFS static tables the pipeline ingests.
//!
//! Each table has a fixed, ordered list of [`FieldSpec`]s. The parser checks
//! rows against it; the loader reads validated values back by field name.

use std::fmt;

/// Primitive type a text field must be coercible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    /// GTFS service date, `YYYYMMDD`.
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub kind: FieldKind,
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        required: true,
        kind,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        required: false,
        kind,
    }
}

use FieldKind::{Date, Float, Integer, Text};

/// A GTFS static table known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GtfsTable {
    FeedInfo,
    Agency,
    Routes,
    Stops,
    Trips,
    StopTimes,
    Shapes,
    Calendar,
    CalendarDates,
}

impl GtfsTable {
    /// Every table loaded into the store, i.e. all but `feed_info.txt`.
    pub const LOADABLE: [GtfsTable; 8] = [
        GtfsTable::Agency,
        GtfsTable::Routes,
        GtfsTable::Stops,
        GtfsTable::Trips,
        GtfsTable::StopTimes,
        GtfsTable::Shapes,
        GtfsTable::Calendar,
        GtfsTable::CalendarDates,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            GtfsTable::FeedInfo => "feed_info.txt",
            GtfsTable::Agency => "agency.txt",
            GtfsTable::Routes => "routes.txt",
            GtfsTable::Stops => "stops.txt",
            GtfsTable::Trips => "trips.txt",
            GtfsTable::StopTimes => "stop_times.txt",
            GtfsTable::Shapes => "shapes.txt",
            GtfsTable::Calendar => "calendar.txt",
            GtfsTable::CalendarDates => "calendar_dates.txt",
        }
    }

    /// Name of the store table the records land in.
    pub fn table_name(self) -> &'static str {
        match self {
            GtfsTable::FeedInfo => "feed_versions",
            GtfsTable::Agency => "agencies",
            GtfsTable::Routes => "routes",
            GtfsTable::Stops => "stops",
            GtfsTable::Trips => "trips",
            GtfsTable::StopTimes => "stop_times",
            GtfsTable::Shapes => "shapes",
            GtfsTable::Calendar => "calendars",
            GtfsTable::CalendarDates => "calendar_dates",
        }
    }

    /// Whether a GTFS feed without this file is malformed.
    pub fn is_required_file(self) -> bool {
        matches!(
            self,
            GtfsTable::Agency
                | GtfsTable::Routes
                | GtfsTable::Stops
                | GtfsTable::Trips
                | GtfsTable::StopTimes
        )
    }

    pub fn from_file_name(name: &str) -> Option<GtfsTable> {
        [GtfsTable::FeedInfo]
            .into_iter()
            .chain(GtfsTable::LOADABLE)
            .find(|t| t.file_name() == name)
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            GtfsTable::FeedInfo => FEED_INFO,
            GtfsTable::Agency => AGENCY,
            GtfsTable::Routes => ROUTES,
            GtfsTable::Stops => STOPS,
            GtfsTable::Trips => TRIPS,
            GtfsTable::StopTimes => STOP_TIMES,
            GtfsTable::Shapes => SHAPES,
            GtfsTable::Calendar => CALENDAR,
            GtfsTable::CalendarDates => CALENDAR_DATES,
        }
    }

    /// Position of `name` in this table's field list.
    pub fn field_index(self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }
}

impl fmt::Display for GtfsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

static FEED_INFO: &[FieldSpec] = &[
    req("feed_publisher_name", Text),
    req("feed_publisher_url", Text),
    req("feed_lang", Text),
    req("feed_start_date", Date),
    req("feed_end_date", Date),
    opt("default_lang", Text),
    opt("feed_version", Text),
    opt("feed_contact_email", Text),
    opt("feed_contact_url", Text),
];

static AGENCY: &[FieldSpec] = &[
    req("agency_id", Text),
    req("agency_name", Text),
    req("agency_url", Text),
    req("agency_timezone", Text),
    opt("agency_lang", Text),
    opt("agency_phone", Text),
    opt("agency_fare_url", Text),
    opt("agency_email", Text),
    opt("cemv_support", Integer),
];

static ROUTES: &[FieldSpec] = &[
    req("route_id", Text),
    opt("agency_id", Text),
    opt("route_short_name", Text),
    opt("route_long_name", Text),
    opt("route_desc", Text),
    req("route_type", Integer),
    opt("route_url", Text),
    opt("route_color", Text),
    opt("route_text_color", Text),
    opt("route_sort_order", Integer),
];

static STOPS: &[FieldSpec] = &[
    req("stop_id", Text),
    opt("stop_code", Text),
    opt("stop_name", Text),
    opt("stop_desc", Text),
    opt("stop_lat", Float),
    opt("stop_lon", Float),
    opt("zone_id", Text),
    opt("location_type", Integer),
    opt("parent_station", Text),
    opt("wheelchair_boarding", Integer),
    opt("platform_code", Text),
];

static TRIPS: &[FieldSpec] = &[
    req("route_id", Text),
    req("service_id", Text),
    req("trip_id", Text),
    opt("trip_headsign", Text),
    opt("trip_short_name", Text),
    opt("direction_id", Integer),
    opt("block_id", Text),
    opt("shape_id", Text),
    opt("wheelchair_accessible", Integer),
    opt("bikes_allowed", Integer),
    // Vehicle duty/roster label published by some agencies.
    opt("brigade", Text),
];

static STOP_TIMES: &[FieldSpec] = &[
    req("trip_id", Text),
    opt("arrival_time", Text),
    opt("departure_time", Text),
    req("stop_id", Text),
    req("stop_sequence", Integer),
    opt("stop_headsign", Text),
    opt("pickup_type", Integer),
    opt("drop_off_type", Integer),
    opt("shape_dist_traveled", Float),
    opt("timepoint", Integer),
];

static SHAPES: &[FieldSpec] = &[
    req("shape_id", Text),
    req("shape_pt_lat", Float),
    req("shape_pt_lon", Float),
    req("shape_pt_sequence", Integer),
    opt("shape_dist_traveled", Float),
];

static CALENDAR: &[FieldSpec] = &[
    req("service_id", Text),
    req("monday", Integer),
    req("tuesday", Integer),
    req("wednesday", Integer),
    req("thursday", Integer),
    req("friday", Integer),
    req("saturday", Integer),
    req("sunday", Integer),
    req("start_date", Date),
    req("end_date", Date),
];

static CALENDAR_DATES: &[FieldSpec] = &[
    req("service_id", Text),
    req("date", Date),
    req("exception_type", Integer),
];
