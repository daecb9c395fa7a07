//! Typed storage rows for the static tables.
//!
//! [`StaticRow::from_record`] is the single place where validated text is
//! coerced into integers, floats and dates. Absent optional values become
//! `None` and are written as SQL `NULL`.

use chrono::NaiveDate;
use sqlx::Sqlite;
use sqlx::query_builder::Separated;

use crate::error::{IngestError, Result};
use crate::parser::{Record, parse_gtfs_date};
use crate::schema::GtfsTable;

#[derive(Debug, Clone, PartialEq)]
pub struct Agency {
    pub agency_id: String,
    pub agency_name: String,
    pub agency_url: String,
    pub agency_timezone: String,
    pub agency_lang: Option<String>,
    pub agency_phone: Option<String>,
    pub agency_fare_url: Option<String>,
    pub agency_email: Option<String>,
    pub cemv_support: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Route {
    pub route_id: String,
    pub agency_id: Option<String>,
    pub route_short_name: Option<String>,
    pub route_long_name: Option<String>,
    pub route_desc: Option<String>,
    pub route_type: i64,
    pub route_url: Option<String>,
    pub route_color: Option<String>,
    pub route_text_color: Option<String>,
    pub route_sort_order: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Stop {
    pub stop_id: String,
    pub stop_code: Option<String>,
    pub stop_name: Option<String>,
    pub stop_desc: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub zone_id: Option<String>,
    pub location_type: Option<i64>,
    pub parent_station: Option<String>,
    pub wheelchair_boarding: Option<i64>,
    pub platform_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
    pub trip_headsign: Option<String>,
    pub trip_short_name: Option<String>,
    pub direction_id: Option<i64>,
    pub block_id: Option<String>,
    pub shape_id: Option<String>,
    pub wheelchair_accessible: Option<i64>,
    pub bikes_allowed: Option<i64>,
    pub brigade: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_sequence: i64,
    /// Kept as `HH:MM:SS`; hours may exceed 23 for trips past midnight.
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub stop_id: String,
    pub stop_headsign: Option<String>,
    pub pickup_type: Option<i64>,
    pub drop_off_type: Option<i64>,
    pub shape_dist_traveled: Option<f64>,
    pub timepoint: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub shape_id: String,
    pub shape_pt_sequence: i64,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_dist_traveled: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Calendar {
    pub service_id: String,
    /// Monday through Sunday, `1` when the service runs that weekday.
    pub days: [i64; 7],
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDate {
    pub service_id: String,
    pub date: NaiveDate,
    /// 1 = service added, 2 = service removed
    pub exception_type: i64,
}

/// A storage row for one of the loadable tables.
#[derive(Debug, Clone, PartialEq)]
pub enum StaticRow {
    Agency(Agency),
    Route(Route),
    Stop(Stop),
    Trip(Trip),
    StopTime(StopTime),
    Shape(Shape),
    Calendar(Calendar),
    CalendarDate(CalendarDate),
}

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Field accessors that coerce validated text, reporting the source line on failure.
struct Fields<'a>(&'a Record);

impl Fields<'_> {
    fn error(&self, name: &str, message: &str) -> IngestError {
        IngestError::schema(
            self.0.table().file_name(),
            self.0.line(),
            format!("field `{name}`: {message}"),
        )
    }

    fn text(&self, name: &str) -> Result<String> {
        self.0
            .get(name)
            .map(str::to_string)
            .ok_or_else(|| self.error(name, "missing required value"))
    }

    fn opt_text(&self, name: &str) -> Option<String> {
        self.0.get(name).map(str::to_string)
    }

    fn opt_int(&self, name: &str) -> Result<Option<i64>> {
        self.0
            .get(name)
            .map(|v| v.parse().map_err(|_| self.error(name, "not an integer")))
            .transpose()
    }

    fn int(&self, name: &str) -> Result<i64> {
        self.opt_int(name)?
            .ok_or_else(|| self.error(name, "missing required value"))
    }

    fn opt_float(&self, name: &str) -> Result<Option<f64>> {
        self.0
            .get(name)
            .map(|v| v.parse().map_err(|_| self.error(name, "not a number")))
            .transpose()
    }

    fn float(&self, name: &str) -> Result<f64> {
        self.opt_float(name)?
            .ok_or_else(|| self.error(name, "missing required value"))
    }

    fn date(&self, name: &str) -> Result<NaiveDate> {
        let raw = self.text(name)?;
        parse_gtfs_date(&raw).ok_or_else(|| self.error(name, "not a YYYYMMDD date"))
    }
}

impl StaticRow {
    /// Coerces a validated record into its table's storage row.
    ///
    /// # Errors
    ///
    /// [`IngestError::SchemaValidation`] if a value does not coerce, or if the
    /// record belongs to `feed_info.txt`, which has no storage row.
    pub fn from_record(record: &Record) -> Result<StaticRow> {
        let f = Fields(record);
        let row = match record.table() {
            GtfsTable::Agency => StaticRow::Agency(Agency {
                agency_id: f.text("agency_id")?,
                agency_name: f.text("agency_name")?,
                agency_url: f.text("agency_url")?,
                agency_timezone: f.text("agency_timezone")?,
                agency_lang: f.opt_text("agency_lang"),
                agency_phone: f.opt_text("agency_phone"),
                agency_fare_url: f.opt_text("agency_fare_url"),
                agency_email: f.opt_text("agency_email"),
                cemv_support: f.opt_int("cemv_support")?,
            }),
            GtfsTable::Routes => StaticRow::Route(Route {
                route_id: f.text("route_id")?,
                agency_id: f.opt_text("agency_id"),
                route_short_name: f.opt_text("route_short_name"),
                route_long_name: f.opt_text("route_long_name"),
                route_desc: f.opt_text("route_desc"),
                route_type: f.int("route_type")?,
                route_url: f.opt_text("route_url"),
                route_color: f.opt_text("route_color"),
                route_text_color: f.opt_text("route_text_color"),
                route_sort_order: f.opt_int("route_sort_order")?,
            }),
            GtfsTable::Stops => StaticRow::Stop(Stop {
                stop_id: f.text("stop_id")?,
                stop_code: f.opt_text("stop_code"),
                stop_name: f.opt_text("stop_name"),
                stop_desc: f.opt_text("stop_desc"),
                stop_lat: f.opt_float("stop_lat")?,
                stop_lon: f.opt_float("stop_lon")?,
                zone_id: f.opt_text("zone_id"),
                location_type: f.opt_int("location_type")?,
                parent_station: f.opt_text("parent_station"),
                wheelchair_boarding: f.opt_int("wheelchair_boarding")?,
                platform_code: f.opt_text("platform_code"),
            }),
            GtfsTable::Trips => StaticRow::Trip(Trip {
                trip_id: f.text("trip_id")?,
                route_id: f.text("route_id")?,
                service_id: f.text("service_id")?,
                trip_headsign: f.opt_text("trip_headsign"),
                trip_short_name: f.opt_text("trip_short_name"),
                direction_id: f.opt_int("direction_id")?,
                block_id: f.opt_text("block_id"),
                shape_id: f.opt_text("shape_id"),
                wheelchair_accessible: f.opt_int("wheelchair_accessible")?,
                bikes_allowed: f.opt_int("bikes_allowed")?,
                brigade: f.opt_text("brigade"),
            }),
            GtfsTable::StopTimes => StaticRow::StopTime(StopTime {
                trip_id: f.text("trip_id")?,
                stop_sequence: f.int("stop_sequence")?,
                arrival_time: f.opt_text("arrival_time"),
                departure_time: f.opt_text("departure_time"),
                stop_id: f.text("stop_id")?,
                stop_headsign: f.opt_text("stop_headsign"),
                pickup_type: f.opt_int("pickup_type")?,
                drop_off_type: f.opt_int("drop_off_type")?,
                shape_dist_traveled: f.opt_float("shape_dist_traveled")?,
                timepoint: f.opt_int("timepoint")?,
            }),
            GtfsTable::Shapes => StaticRow::Shape(Shape {
                shape_id: f.text("shape_id")?,
                shape_pt_sequence: f.int("shape_pt_sequence")?,
                shape_pt_lat: f.float("shape_pt_lat")?,
                shape_pt_lon: f.float("shape_pt_lon")?,
                shape_dist_traveled: f.opt_float("shape_dist_traveled")?,
            }),
            GtfsTable::Calendar => {
                let mut days = [0; 7];
                for (day, name) in days.iter_mut().zip(WEEKDAYS) {
                    *day = f.int(name)?;
                }
                StaticRow::Calendar(Calendar {
                    service_id: f.text("service_id")?,
                    days,
                    start_date: f.date("start_date")?,
                    end_date: f.date("end_date")?,
                })
            }
            GtfsTable::CalendarDates => StaticRow::CalendarDate(CalendarDate {
                service_id: f.text("service_id")?,
                date: f.date("date")?,
                exception_type: f.int("exception_type")?,
            }),
            GtfsTable::FeedInfo => {
                return Err(f.error("feed_info", "feed_info.txt has no storage row"));
            }
        };
        Ok(row)
    }

    /// Store columns for `table`, in bind order; `feed_version_id` is always last.
    pub fn columns(table: GtfsTable) -> &'static [&'static str] {
        match table {
            GtfsTable::Agency => &[
                "agency_id",
                "agency_name",
                "agency_url",
                "agency_timezone",
                "agency_lang",
                "agency_phone",
                "agency_fare_url",
                "agency_email",
                "cemv_support",
                "feed_version_id",
            ],
            GtfsTable::Routes => &[
                "route_id",
                "agency_id",
                "route_short_name",
                "route_long_name",
                "route_desc",
                "route_type",
                "route_url",
                "route_color",
                "route_text_color",
                "route_sort_order",
                "feed_version_id",
            ],
            GtfsTable::Stops => &[
                "stop_id",
                "stop_code",
                "stop_name",
                "stop_desc",
                "stop_lat",
                "stop_lon",
                "zone_id",
                "location_type",
                "parent_station",
                "wheelchair_boarding",
                "platform_code",
                "feed_version_id",
            ],
            GtfsTable::Trips => &[
                "trip_id",
                "route_id",
                "service_id",
                "trip_headsign",
                "trip_short_name",
                "direction_id",
                "block_id",
                "shape_id",
                "wheelchair_accessible",
                "bikes_allowed",
                "brigade",
                "feed_version_id",
            ],
            GtfsTable::StopTimes => &[
                "trip_id",
                "stop_sequence",
                "arrival_time",
                "departure_time",
                "stop_id",
                "stop_headsign",
                "pickup_type",
                "drop_off_type",
                "shape_dist_traveled",
                "timepoint",
                "feed_version_id",
            ],
            GtfsTable::Shapes => &[
                "shape_id",
                "shape_pt_sequence",
                "shape_pt_lat",
                "shape_pt_lon",
                "shape_dist_traveled",
                "feed_version_id",
            ],
            GtfsTable::Calendar => &[
                "service_id",
                "monday",
                "tuesday",
                "wednesday",
                "thursday",
                "friday",
                "saturday",
                "sunday",
                "start_date",
                "end_date",
                "feed_version_id",
            ],
            GtfsTable::CalendarDates => &["service_id", "date", "exception_type", "feed_version_id"],
            GtfsTable::FeedInfo => &[],
        }
    }

    /// Pushes this row's values, in [`StaticRow::columns`] order, into a
    /// `VALUES` tuple.
    pub(crate) fn push_binds(self, b: &mut Separated<'_, '_, Sqlite, &'static str>, feed_version_id: i64) {
        match self {
            StaticRow::Agency(a) => {
                b.push_bind(a.agency_id)
                    .push_bind(a.agency_name)
                    .push_bind(a.agency_url)
                    .push_bind(a.agency_timezone)
                    .push_bind(a.agency_lang)
                    .push_bind(a.agency_phone)
                    .push_bind(a.agency_fare_url)
                    .push_bind(a.agency_email)
                    .push_bind(a.cemv_support);
            }
            StaticRow::Route(r) => {
                b.push_bind(r.route_id)
                    .push_bind(r.agency_id)
                    .push_bind(r.route_short_name)
                    .push_bind(r.route_long_name)
                    .push_bind(r.route_desc)
                    .push_bind(r.route_type)
                    .push_bind(r.route_url)
                    .push_bind(r.route_color)
                    .push_bind(r.route_text_color)
                    .push_bind(r.route_sort_order);
            }
            StaticRow::Stop(s) => {
                b.push_bind(s.stop_id)
                    .push_bind(s.stop_code)
                    .push_bind(s.stop_name)
                    .push_bind(s.stop_desc)
                    .push_bind(s.stop_lat)
                    .push_bind(s.stop_lon)
                    .push_bind(s.zone_id)
                    .push_bind(s.location_type)
                    .push_bind(s.parent_station)
                    .push_bind(s.wheelchair_boarding)
                    .push_bind(s.platform_code);
            }
            StaticRow::Trip(t) => {
                b.push_bind(t.trip_id)
                    .push_bind(t.route_id)
                    .push_bind(t.service_id)
                    .push_bind(t.trip_headsign)
                    .push_bind(t.trip_short_name)
                    .push_bind(t.direction_id)
                    .push_bind(t.block_id)
                    .push_bind(t.shape_id)
                    .push_bind(t.wheelchair_accessible)
                    .push_bind(t.bikes_allowed)
                    .push_bind(t.brigade);
            }
            StaticRow::StopTime(st) => {
                b.push_bind(st.trip_id)
                    .push_bind(st.stop_sequence)
                    .push_bind(st.arrival_time)
                    .push_bind(st.departure_time)
                    .push_bind(st.stop_id)
                    .push_bind(st.stop_headsign)
                    .push_bind(st.pickup_type)
                    .push_bind(st.drop_off_type)
                    .push_bind(st.shape_dist_traveled)
                    .push_bind(st.timepoint);
            }
            StaticRow::Shape(s) => {
                b.push_bind(s.shape_id)
                    .push_bind(s.shape_pt_sequence)
                    .push_bind(s.shape_pt_lat)
                    .push_bind(s.shape_pt_lon)
                    .push_bind(s.shape_dist_traveled);
            }
            StaticRow::Calendar(c) => {
                b.push_bind(c.service_id);
                for day in c.days {
                    b.push_bind(day);
                }
                b.push_bind(c.start_date).push_bind(c.end_date);
            }
            StaticRow::CalendarDate(cd) => {
                b.push_bind(cd.service_id)
                    .push_bind(cd.date)
                    .push_bind(cd.exception_type);
            }
        }
        b.push_bind(feed_version_id);
    }
}
