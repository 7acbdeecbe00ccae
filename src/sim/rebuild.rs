//! Rebuild Simulation
//!
//! Rebuilds one failed column of a mirrored array onto a spare disk, using
//! the real queues, reconstruction map and event channel over simulated
//! disks.
//!
//! ```text
//!            rebuild read (low)                 rebuild write (low)
//!  source ────────────────────▶ ReadDone ──▶ control ───────────────▶ spare
//!  queue   ◀── locking read ──┐               loop  ◀── WriteDone ───  queue
//!          ◀── unlocking op ──┤                 │
//!                             │                 ▼
//!                      foreground thread   ReconstructionMap
//!                      (promotes units it needs)
//! ```
//!
//! The source is the surviving copy, column `failed_column + 1`. Units are
//! rebuilt in order with up to `parallel_units` in flight. A user thread
//! issues locked reads against the source meanwhile and promotes the
//! rebuild of any unit it touches that is not yet done.

use bytes::BytesMut;
use crossbeam::channel;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

use super::device::{DeviceStats, SimDiskConfig, SimulatedDisk};
use crate::config::{duration_str, QueueConfig, ReconConfig};
use crate::error::{Error, IoStatus, Result};
use crate::queue::{DisciplineKind, DiskQueue, DiskRequest, LockFlag, Priority, QueueStats};
use crate::recon::{
    ReconEvent, ReconEventChannel, ReconEventKind, ReconMapStatus, ReconstructionMap, YieldPacer,
};

// =============================================================================
// Configuration
// =============================================================================

/// Rebuild simulation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimConfig {
    /// Columns in the array, not counting the spare
    pub columns: usize,

    /// Sectors per disk
    pub sectors: u64,

    /// Bytes per sector
    pub sector_size: usize,

    /// Service time of every simulated request
    #[serde(with = "duration_str")]
    pub latency: Duration,

    /// Column being rebuilt
    pub failed_column: usize,

    /// Fail the surviving copy as well
    pub fail_source: bool,

    /// Reconstruction units rebuilt concurrently
    pub parallel_units: usize,

    /// Locked user reads issued against the source during the rebuild
    pub foreground_requests: usize,

    /// Seed of the source disk's contents
    pub seed: u64,

    /// Give up after this long
    #[serde(with = "duration_str")]
    pub max_duration: Duration,

    pub queue: QueueConfig,
    pub recon: ReconConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            columns: 4,
            sectors: 4096,
            sector_size: 512,
            latency: Duration::ZERO,
            failed_column: 0,
            fail_source: false,
            parallel_units: 4,
            foreground_requests: 32,
            seed: 0x5EED,
            max_duration: Duration::from_secs(60),
            queue: QueueConfig::default(),
            recon: ReconConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<()> {
        if self.columns < 2 {
            return Err(Error::InvalidConfig(
                "a mirrored array needs at least 2 columns".to_string(),
            ));
        }
        if self.failed_column >= self.columns {
            return Err(Error::InvalidConfig(format!(
                "failedColumn {} out of range for {} columns",
                self.failed_column, self.columns
            )));
        }
        if self.parallel_units == 0 {
            return Err(Error::InvalidConfig(
                "parallelUnits must be at least 1".to_string(),
            ));
        }
        self.queue.validate()?;
        self.recon.validate()
    }

    /// Column holding the surviving copy
    pub fn source_column(&self) -> usize {
        (self.failed_column + 1) % self.columns
    }

    fn disk_config(&self) -> SimDiskConfig {
        SimDiskConfig {
            sectors: self.sectors,
            sector_size: self.sector_size,
            latency: self.latency,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Outcome of a completed rebuild
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub failed_column: usize,
    pub source_column: usize,
    pub spare_column: usize,
    pub discipline: DisciplineKind,
    pub units_rebuilt: u64,
    pub elapsed_ms: u64,
    pub events: u64,
    pub event_timeouts: u64,
    pub yields: u64,
    pub foreground: ForegroundStats,
    pub map: ReconMapStatus,
    pub queues: Vec<QueueStats>,
    pub devices: Vec<DeviceStats>,
}

/// User traffic issued during the rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundStats {
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// User reads that promoted a pending rebuild
    pub promotions: u64,
}

// =============================================================================
// Simulation
// =============================================================================

/// One rebuild run over freshly created disks and queues
pub struct RebuildSimulation {
    config: SimConfig,
    /// One per column, then the spare
    disks: Vec<Arc<SimulatedDisk>>,
    queues: Vec<Arc<DiskQueue>>,
    map: Arc<ReconstructionMap>,
    events: Arc<ReconEventChannel>,
    /// Read data waiting to be written to the spare, by unit
    staged: Arc<DashMap<u64, BytesMut>>,
    /// Failure of a rebuild step, by unit
    failures: Arc<DashMap<u64, Error>>,
}

/// Progress of the control loop
#[derive(Debug, Default)]
struct LoopStats {
    units_rebuilt: u64,
    events: u64,
    timeouts: u64,
    yields: u64,
}

impl RebuildSimulation {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;

        let disk_config = config.disk_config();
        let mut disks = Vec::with_capacity(config.columns + 1);
        let mut queues = Vec::with_capacity(config.columns + 1);
        for column in 0..=config.columns {
            let disk = Arc::new(SimulatedDisk::spawn(column, disk_config.clone())?);
            let queue = Arc::new(DiskQueue::new(column, &config.queue, disk.clone()));
            disk.attach(&queue);
            disks.push(disk);
            queues.push(queue);
        }

        disks[config.failed_column].fail();
        let source = config.source_column();
        disks[source].fill_pattern(config.seed);
        if config.fail_source {
            disks[source].fail();
        }

        let map = Arc::new(ReconstructionMap::from_config(&config.recon, config.sectors)?);

        info!(
            columns = config.columns,
            failed_column = config.failed_column,
            source_column = source,
            discipline = %config.queue.discipline,
            units = map.total_ru_count() - map.spare_ru_count(),
            "Rebuild simulation ready"
        );

        Ok(Self {
            config,
            disks,
            queues,
            map,
            events: Arc::new(ReconEventChannel::new()),
            staged: Arc::new(DashMap::new()),
            failures: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn map(&self) -> &Arc<ReconstructionMap> {
        &self.map
    }

    pub fn queue(&self, column: usize) -> Option<&Arc<DiskQueue>> {
        self.queues.get(column)
    }

    pub fn disk(&self, column: usize) -> Option<&Arc<SimulatedDisk>> {
        self.disks.get(column)
    }

    fn spare_column(&self) -> usize {
        self.config.columns
    }

    /// Rebuild every non-spare unit, then check the spare against the
    /// source.
    #[instrument(skip(self), fields(failed_column = self.config.failed_column))]
    pub fn run(self) -> Result<RebuildReport> {
        let started = Instant::now();

        let foreground = {
            let queue = Arc::clone(&self.queues[self.config.source_column()]);
            let map = Arc::clone(&self.map);
            let count = self.config.foreground_requests;
            let wait = self.config.max_duration;
            thread::Builder::new()
                .name("foreground".to_string())
                .spawn(move || run_foreground(&queue, &map, count, wait))?
        };

        let outcome = self.control_loop(started);

        let foreground = foreground.join().unwrap_or_else(|_| {
            warn!("Foreground thread panicked");
            ForegroundStats::default()
        });

        self.events.close();
        let stray = self.events.drain();
        if !stray.is_empty() {
            debug!(count = stray.len(), "Discarded events after rebuild");
        }

        let stats = outcome?;
        self.verify()?;

        let report = RebuildReport {
            failed_column: self.config.failed_column,
            source_column: self.config.source_column(),
            spare_column: self.spare_column(),
            discipline: self.config.queue.discipline,
            units_rebuilt: stats.units_rebuilt,
            elapsed_ms: started.elapsed().as_millis() as u64,
            events: stats.events,
            event_timeouts: stats.timeouts,
            yields: stats.yields,
            foreground,
            map: self.map.status(),
            queues: self.queues.iter().map(|q| q.stats()).collect(),
            devices: self.disks.iter().map(|d| d.stats()).collect(),
        };

        info!(
            units_rebuilt = report.units_rebuilt,
            elapsed_ms = report.elapsed_ms,
            "Rebuild complete"
        );
        Ok(report)
    }

    fn control_loop(&self, started: Instant) -> Result<LoopStats> {
        let units = self.map.total_ru_count() - self.map.spare_ru_count();
        let mut pacer = YieldPacer::from_config(&self.config.recon);
        let mut stats = LoopStats::default();
        let mut next_unit = 0;

        while next_unit < units && next_unit < self.config.parallel_units as u64 {
            self.issue_read(next_unit);
            next_unit += 1;
        }

        while !self.map.is_complete() {
            if started.elapsed() > self.config.max_duration {
                return Err(Error::ReconstructionFailed {
                    ru: next_unit,
                    reason: format!(
                        "timed out with {} units left",
                        self.map.units_remaining()
                    ),
                });
            }

            let event = match self
                .events
                .take_next_paced(self.config.recon.event_timeout, &mut pacer)?
            {
                Some(event) => event,
                None => {
                    stats.timeouts += 1;
                    debug!(units_left = self.map.units_remaining(), "No reconstruction event");
                    continue;
                }
            };
            stats.events += 1;

            let ru = event.payload;
            match event.kind {
                ReconEventKind::ReadDone => {
                    let buffer = self
                        .staged
                        .remove(&ru)
                        .map(|(_, buffer)| buffer)
                        .ok_or_else(|| Error::ReconstructionFailed {
                            ru,
                            reason: "read completed without data".to_string(),
                        })?;
                    self.issue_write(ru, buffer);
                }
                ReconEventKind::WriteDone => {
                    let range = self.map.unit_range(ru);
                    self.map.mark_reconstructed(range.start, range.stop);
                    stats.units_rebuilt += 1;

                    if next_unit < units {
                        self.issue_read(next_unit);
                        next_unit += 1;
                    }
                }
                ReconEventKind::StepFailed => {
                    let reason = self
                        .failures
                        .remove(&ru)
                        .map(|(_, e)| e.to_string())
                        .unwrap_or_else(|| "unknown failure".to_string());
                    warn!(ru, %reason, "Rebuild step failed");
                    return Err(Error::ReconstructionFailed { ru, reason });
                }
                other => trace!(ru, kind = ?other, "Ignoring event"),
            }

            pacer.checkpoint();
        }

        stats.yields = pacer.yields();
        Ok(stats)
    }

    fn issue_read(&self, ru: u64) {
        let range = self.map.unit_range(ru);
        let source = self.config.source_column();
        trace!(ru, column = source, "Issuing rebuild read");

        let req = DiskRequest::read(range.start, range.len())
            .with_buffer(BytesMut::with_capacity(
                range.len() as usize * self.config.sector_size,
            ))
            .for_stripe(ru, ru)
            .on_complete(self.completion(source, ReconEventKind::ReadDone, true));
        self.queues[source].enqueue(req, Priority::Low);
    }

    fn issue_write(&self, ru: u64, buffer: BytesMut) {
        let range = self.map.unit_range(ru);
        let spare = self.spare_column();
        trace!(ru, column = spare, "Issuing rebuild write");

        let req = DiskRequest::write(range.start, range.len())
            .with_buffer(buffer)
            .for_stripe(ru, ru)
            .on_complete(self.completion(spare, ReconEventKind::WriteDone, false));
        self.queues[spare].enqueue(req, Priority::Low);
    }

    /// Completion that posts `kind` for the request's unit, or `StepFailed`.
    fn completion(
        &self,
        column: usize,
        kind: ReconEventKind,
        keep_buffer: bool,
    ) -> impl FnOnce(DiskRequest, IoStatus) + Send + 'static {
        let events = Arc::clone(&self.events);
        let staged = Arc::clone(&self.staged);
        let failures = Arc::clone(&self.failures);

        move |mut req: DiskRequest, status: IoStatus| {
            let ru = req.reconstruction_unit;
            let kind = match status {
                Ok(()) => {
                    if keep_buffer {
                        if let Some(buffer) = req.buffer.take() {
                            staged.insert(ru, buffer);
                        }
                    }
                    kind
                }
                Err(e) => {
                    failures.insert(ru, e);
                    ReconEventKind::StepFailed
                }
            };
            if events.post(ReconEvent::new(column, kind, ru)).is_err() {
                trace!(ru, "Event channel closed; dropping completion");
            }
        }
    }

    /// Compare every rebuilt unit on the spare against the source.
    fn verify(&self) -> Result<()> {
        let source = &self.disks[self.config.source_column()];
        let spare = &self.disks[self.spare_column()];
        let units = self.map.total_ru_count() - self.map.spare_ru_count();

        for ru in 0..units {
            let range = self.map.unit_range(ru);
            let expected = source.read_sectors(range.start, range.len())?;
            let actual = spare.read_sectors(range.start, range.len())?;
            if expected != actual {
                return Err(Error::ReconstructionFailed {
                    ru,
                    reason: "spare contents differ from source".to_string(),
                });
            }
        }
        debug!(units, "Spare contents verified");
        Ok(())
    }
}

impl std::fmt::Debug for RebuildSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildSimulation")
            .field("config", &self.config)
            .field("map", &self.map)
            .field("events", &self.events)
            .finish()
    }
}

// =============================================================================
// Foreground Traffic
// =============================================================================

/// Issue `count` locked reads, each followed by an unlocking no-op.
fn run_foreground(
    queue: &DiskQueue,
    map: &ReconstructionMap,
    count: usize,
    wait: Duration,
) -> ForegroundStats {
    let mut stats = ForegroundStats::default();
    let sectors = map.sectors_in_disk();

    for i in 0..count as u64 {
        let sector = i.wrapping_mul(7919) % sectors;
        let ru = map.unit_of(sector);
        if !map.is_fully_reconstructed(sector) && queue.promote(ru, ru) {
            stats.promotions += 1;
        }

        let read = DiskRequest::read(sector, 1)
            .with_lock(LockFlag::Locking)
            .with_tag(i);
        match submit_and_wait(queue, read, wait) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                // A failed locking request already released the queue
                debug!(sector, error = %e, "Foreground read failed");
                stats.failed += 1;
                continue;
            }
            None => {
                warn!(sector, "Foreground read timed out");
                stats.timed_out += 1;
                break;
            }
        }

        let unlock = DiskRequest::noop(sector)
            .with_lock(LockFlag::Unlocking)
            .with_tag(i);
        match submit_and_wait(queue, unlock, wait) {
            Some(Ok(())) => stats.completed += 1,
            Some(Err(_)) => stats.failed += 1,
            None => {
                warn!(sector, "Foreground unlock timed out");
                stats.timed_out += 1;
                break;
            }
        }
    }

    debug!(?stats, "Foreground traffic finished");
    stats
}

fn submit_and_wait(queue: &DiskQueue, req: DiskRequest, wait: Duration) -> Option<IoStatus> {
    let (tx, rx) = channel::bounded(1);
    queue.enqueue(
        req.on_complete(move |_, status| {
            let _ = tx.send(status);
        }),
        Priority::Normal,
    );
    rx.recv_timeout(wait).ok()
}

// =============================================================================
// Tests
// =============================================================================
