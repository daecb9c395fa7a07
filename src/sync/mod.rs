//! Orchestration of the static and realtime ingestion cycles.
//!
//! A [`Syncer`] bundles everything one cycle needs: the store, the HTTP
//! transport and the configuration. It is cheap to clone and is shared by
//! the scheduler's loops.

mod realtime_feed;
mod scheduler;
mod static_feed;

pub use realtime_feed::{RealtimeSyncReport, StreamReport};
pub use scheduler::{Scheduler, SyncTrigger, sync_static_with_timeout};
pub use static_feed::{StaticSyncReport, TableFailure};

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::IngestConfig;
use crate::fetch::HttpClient;

#[derive(Clone)]
pub struct Syncer {
    pool: SqlitePool,
    client: Arc<dyn HttpClient>,
    config: Arc<IngestConfig>,
}

impl Syncer {
    pub fn new(pool: SqlitePool, client: Arc<dyn HttpClient>, config: IngestConfig) -> Self {
        Self {
            pool,
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
