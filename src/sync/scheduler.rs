use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use super::{StaticSyncReport, Syncer};
use crate::error::{IngestError, Result};

/// Handle for requesting an out-of-schedule static sync.
///
/// Requests arriving while one is already pending collapse into it.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<()>,
}

impl SyncTrigger {
    /// Queues a static sync. Returns `false` once the scheduler has stopped.
    pub fn fire(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Runs a static sync, giving up after `limit`.
///
/// On timeout the sync future is dropped: an open ledger transaction rolls
/// back and the scratch directory is removed.
pub async fn sync_static_with_timeout(syncer: &Syncer, limit: Duration) -> Result<StaticSyncReport> {
    match tokio::time::timeout(limit, syncer.sync_static()).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_secs = limit.as_secs(), "Static sync timed out");
            Err(IngestError::Timeout(limit))
        }
    }
}

/// Drives both sync cycles forever.
///
/// Realtime runs every `realtime_interval_seconds`; a cycle that overruns
/// its slot causes the missed ticks to be skipped, never queued. Static
/// runs once at startup, every `static_interval_seconds` after that, and
/// whenever a [`SyncTrigger`] fires.
pub struct Scheduler {
    syncer: Syncer,
    triggers: mpsc::Receiver<()>,
}

impl Scheduler {
    pub fn new(syncer: Syncer) -> (Self, SyncTrigger) {
        let (tx, triggers) = mpsc::channel(1);
        (Self { syncer, triggers }, SyncTrigger { tx })
    }

    pub async fn run(self) {
        let Scheduler { syncer, triggers } = self;
        info!(
            realtime_interval_secs = syncer.config().realtime_interval_seconds,
            static_interval_secs = syncer.config().static_interval_seconds,
            "Starting scheduler"
        );

        let realtime = tokio::spawn(realtime_loop(syncer.clone()));
        let static_feed = tokio::spawn(static_loop(syncer, triggers));

        let (realtime, static_feed) = tokio::join!(realtime, static_feed);
        for result in [realtime, static_feed] {
            if let Err(e) = result {
                error!(error = %e, "Sync loop terminated");
            }
        }
    }
}

async fn realtime_loop(syncer: Syncer) {
    let mut ticks = interval(syncer.config().realtime_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticks.tick().await;
        syncer.sync_realtime().await;
    }
}

async fn static_loop(syncer: Syncer, mut triggers: mpsc::Receiver<()>) {
    let mut ticks = interval(syncer.config().static_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let limit = syncer.config().static_sync_timeout();

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                // Failures are logged inside the cycle; the next tick retries.
                let _ = syncer.sync_static().await;
            }
            Some(()) = triggers.recv() => {
                info!("Static sync requested");
                let _ = sync_static_with_timeout(&syncer, limit).await;
            }
        }
    }
}
