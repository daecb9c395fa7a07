//! Ingestion of GTFS static schedules and GTFS-realtime feeds.
//!
//! Static archives are validated table by table and loaded into SQLite under
//! a dated feed version; realtime feeds are flattened into newline-delimited
//! JSON snapshots. [`sync::Scheduler`] drives both on their own intervals.

pub mod config;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod loader;
pub mod parser;
pub mod realtime;
pub mod records;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use config::IngestConfig;
pub use error::{IngestError, Result};

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
