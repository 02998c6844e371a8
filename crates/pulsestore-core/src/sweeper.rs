//! Sweeper: background expiry and WAL upkeep
//!
//! Runs on its own thread and, once per `sweep_cadence`:
//!
//! 1. Purges slots whose TTL has passed (memory and indexes)
//! 2. Compacts the WAL when the dead-record ratio crosses the trigger
//!
//! Reads never depend on the sweeper; expired values are already invisible.
//! The sweeper only reclaims memory and disk.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::engine::Shared;
use crate::error::{EngineError, EngineResult};

/// Counters shared by the engine and the sweeper thread.
#[derive(Debug, Default)]
pub struct SweepStats {
    purged: AtomicU64,
    cycles: AtomicU64,
    compactions: AtomicU64,
}

impl SweepStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries removed by expiry since open.
    pub fn purged(&self) -> u64 {
        self.purged.load(Ordering::Relaxed)
    }

    /// Completed sweep cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    pub(crate) fn record_purged(&self, count: u64) {
        self.purged.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to the running sweeper thread.
/// Dropping it stops the thread.
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal shutdown and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn start_sweeper(shared: Arc<Shared>) -> EngineResult<SweeperHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let cadence = shared.config.sweep_cadence;

    let thread = thread::Builder::new()
        .name("pulsestore-sweeper".to_string())
        .spawn(move || sweep_loop(&shared, cadence, &flag))
        .map_err(|e| EngineError::Io {
            path: None,
            kind: e.kind(),
            message: format!("Failed to spawn sweeper thread: {}", e),
        })?;

    debug!(cadence_ms = cadence.as_millis() as u64, "sweeper started");
    Ok(SweeperHandle { shutdown, thread: Some(thread) })
}

fn sweep_loop(shared: &Shared, cadence: Duration, shutdown: &AtomicBool) {
    let step = cadence.min(Duration::from_millis(50));
    loop {
        let wake_time = Instant::now() + cadence;
        while Instant::now() < wake_time {
            if shutdown.load(Ordering::Acquire) || shared.is_closed() {
                debug!("sweeper stopped");
                return;
            }
            thread::sleep(step);
        }
        sweep_once(shared);
    }
}

/// One cycle: purge, then compact if worthwhile.
pub(crate) fn sweep_once(shared: &Shared) {
    shared.purge_expired();
    if let Err(e) = shared.compact(false) {
        error!(error = %e, "background compaction failed");
    }
    shared.stats.record_cycle();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulate() {
        let stats = SweepStats::new();
        assert_eq!(stats.purged(), 0);
        stats.record_purged(3);
        stats.record_purged(2);
        stats.record_cycle();
        stats.record_compaction();
        assert_eq!(stats.purged(), 5);
        assert_eq!(stats.cycles(), 1);
        assert_eq!(stats.compactions(), 1);
    }
}
