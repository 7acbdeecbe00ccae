//! Simulated Devices
//!
//! Two [`DeviceDispatch`] implementations:
//!
//! - [`SimulatedDisk`]: an in-memory disk served by its own worker thread.
//!   Requests are handed over a channel, served in arrival order, and
//!   returned to the owning [`DiskQueue`] from the worker.
//! - [`ManualDevice`]: holds every dispatched request until the caller
//!   takes it, for driving a queue step by step.

use bytes::BytesMut;
use crossbeam::channel::{self, Receiver, Sender};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, IoStatus, Result};
use crate::queue::{DeviceDispatch, DiskQueue, DiskRequest, IoKind};

// =============================================================================
// Disk Configuration
// =============================================================================

/// Shape and timing of one simulated disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDiskConfig {
    /// Capacity in sectors
    pub sectors: u64,

    /// Bytes per sector
    pub sector_size: usize,

    /// Service time added to every request
    pub latency: Duration,
}

impl Default for SimDiskConfig {
    fn default() -> Self {
        Self {
            sectors: 4096,
            sector_size: 512,
            latency: Duration::ZERO,
        }
    }
}

impl SimDiskConfig {
    fn byte_range(&self, offset: u64, count: u64) -> Option<std::ops::Range<usize>> {
        let end = offset.checked_add(count)?;
        if end > self.sectors {
            return None;
        }
        let start = usize::try_from(offset).ok()?.checked_mul(self.sector_size)?;
        let end = usize::try_from(end).ok()?.checked_mul(self.sector_size)?;
        Some(start..end)
    }
}

// =============================================================================
// Device Stats
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    noops: AtomicU64,
    errors: AtomicU64,
    sectors_read: AtomicU64,
    sectors_written: AtomicU64,
    head_travel: AtomicU64,
}

/// Work served by one simulated disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub reads: u64,
    pub writes: u64,
    pub noops: u64,
    pub errors: u64,
    pub sectors_read: u64,
    pub sectors_written: u64,
    /// Total sectors the head moved between requests
    pub head_travel: u64,
}

impl Counters {
    fn snapshot(&self) -> DeviceStats {
        DeviceStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            noops: self.noops.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            sectors_read: self.sectors_read.load(Ordering::Relaxed),
            sectors_written: self.sectors_written.load(Ordering::Relaxed),
            head_travel: self.head_travel.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Simulated Disk
// =============================================================================

enum Command {
    Io(DiskRequest),
    Stop,
}

/// State shared between a [`SimulatedDisk`] and its worker
struct Shared {
    column: usize,
    config: SimDiskConfig,
    data: RwLock<Vec<u8>>,
    failed: AtomicBool,
    queue: OnceCell<Weak<DiskQueue>>,
    counters: Counters,
}

impl Shared {
    fn queue(&self) -> Option<Arc<DiskQueue>> {
        self.queue.get().and_then(Weak::upgrade)
    }

    /// Return `req` to its queue, or straight to its owner if the queue is
    /// gone.
    fn finish(&self, req: DiskRequest, status: IoStatus) {
        if status.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
        match self.queue() {
            Some(queue) => queue.on_completion(req, status),
            None => {
                warn!(column = self.column, "No queue attached; completing directly");
                req.complete(status);
            }
        }
    }

    fn serve(&self, req: &mut DiskRequest, head: &mut u64) -> IoStatus {
        if self.failed.load(Ordering::Acquire) {
            return Err(Error::device(self.column, "disk failed"));
        }

        if req.kind != IoKind::NoOp {
            let travel = req.sector_offset.abs_diff(*head);
            self.counters.head_travel.fetch_add(travel, Ordering::Relaxed);
            *head = req.sector_offset;
        }

        if !self.config.latency.is_zero() {
            thread::sleep(self.config.latency);
        }

        match req.kind {
            IoKind::NoOp => {
                self.counters.noops.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            IoKind::Read => {
                let range = self.range_of(req)?;
                let data = self.data.read();
                let buffer = req.buffer.get_or_insert_with(BytesMut::new);
                buffer.clear();
                buffer.extend_from_slice(&data[range]);

                self.counters.reads.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .sectors_read
                    .fetch_add(req.sector_count, Ordering::Relaxed);
                Ok(())
            }
            IoKind::Write => {
                let range = self.range_of(req)?;
                let buffer = req
                    .buffer
                    .as_ref()
                    .ok_or_else(|| Error::device(self.column, "write without a buffer"))?;
                if buffer.len() < range.len() {
                    return Err(Error::device(
                        self.column,
                        format!("write buffer holds {} of {} bytes", buffer.len(), range.len()),
                    ));
                }
                let len = range.len();
                self.data.write()[range].copy_from_slice(&buffer[..len]);

                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .sectors_written
                    .fetch_add(req.sector_count, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    fn range_of(&self, req: &DiskRequest) -> Result<std::ops::Range<usize>> {
        self.config
            .byte_range(req.sector_offset, req.sector_count)
            .ok_or_else(|| {
                Error::device(
                    self.column,
                    format!(
                        "sectors {}+{} beyond disk of {}",
                        req.sector_offset, req.sector_count, self.config.sectors
                    ),
                )
            })
    }
}

/// In-memory disk with one worker thread
pub struct SimulatedDisk {
    shared: Arc<Shared>,
    tx: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedDisk {
    /// Allocate a zeroed disk and start its worker.
    pub fn spawn(column: usize, config: SimDiskConfig) -> Result<Self> {
        let bytes = usize::try_from(config.sectors)
            .ok()
            .and_then(|s| s.checked_mul(config.sector_size))
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "{} sectors of {} bytes do not fit in memory",
                    config.sectors, config.sector_size
                ))
            })?;
        if bytes == 0 {
            return Err(Error::InvalidConfig("simulated disk has no capacity".to_string()));
        }

        let shared = Arc::new(Shared {
            column,
            config,
            data: RwLock::new(vec![0; bytes]),
            failed: AtomicBool::new(false),
            queue: OnceCell::new(),
            counters: Counters::default(),
        });

        let (tx, rx) = channel::unbounded();
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("sim-disk-{}", column))
            .spawn(move || worker_loop(worker_shared, rx))?;

        debug!(column, bytes, "Simulated disk started");

        Ok(Self {
            shared,
            tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Route completions to `queue`. Only the first call takes effect.
    pub fn attach(&self, queue: &Arc<DiskQueue>) {
        if self.shared.queue.set(Arc::downgrade(queue)).is_err() {
            warn!(column = self.shared.column, "Simulated disk already attached");
        }
    }

    pub fn column(&self) -> usize {
        self.shared.column
    }

    pub fn config(&self) -> &SimDiskConfig {
        &self.shared.config
    }

    /// Fail every request from now on.
    pub fn fail(&self) {
        info!(column = self.shared.column, "Simulated disk failed");
        self.shared.failed.store(true, Ordering::Release);
    }

    /// Serve requests normally again.
    pub fn repair(&self) {
        info!(column = self.shared.column, "Simulated disk repaired");
        self.shared.failed.store(false, Ordering::Release);
    }

    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Fill the disk with a byte pattern derived from `seed` and the offset.
    pub fn fill_pattern(&self, seed: u64) {
        let mut data = self.shared.data.write();
        for (i, byte) in data.iter_mut().enumerate() {
            let x = (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ seed;
            *byte = (x >> 32) as u8;
        }
    }

    /// Copy sectors out of the disk, bypassing the queue.
    pub fn read_sectors(&self, offset: u64, count: u64) -> Result<Vec<u8>> {
        let range = self
            .shared
            .config
            .byte_range(offset, count)
            .ok_or_else(|| Error::device(self.shared.column, "read beyond disk"))?;
        Ok(self.shared.data.read()[range].to_vec())
    }

    pub fn stats(&self) -> DeviceStats {
        self.shared.counters.snapshot()
    }

    /// Stop the worker once it has served everything already dispatched.
    ///
    /// Does not wait when called from the worker itself.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let _ = self.tx.send(Command::Stop);

        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(column = self.shared.column, "Simulated disk worker panicked");
        }
    }
}

impl DeviceDispatch for SimulatedDisk {
    fn dispatch(&self, column: usize, req: DiskRequest) {
        trace!(column, sector = req.sector_offset, kind = %req.kind, "Device accepted request");
        if let Err(channel::SendError(Command::Io(req))) = self.tx.send(Command::Io(req)) {
            self.shared.finish(req, Err(Error::DeviceOffline { column }));
        }
    }
}

impl Drop for SimulatedDisk {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SimulatedDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDisk")
            .field("column", &self.shared.column)
            .field("config", &self.shared.config)
            .field("failed", &self.is_failed())
            .field("stats", &self.stats())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<Command>) {
    let mut head = 0u64;

    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Io(mut req) => {
                let status = shared.serve(&mut req, &mut head);
                shared.finish(req, status);
            }
            Command::Stop => break,
        }
    }

    // Anything dispatched after the stop request never reaches the disk
    let column = shared.column;
    while let Ok(cmd) = rx.try_recv() {
        if let Command::Io(req) = cmd {
            shared.finish(req, Err(Error::DeviceOffline { column }));
        }
    }
    debug!(column, "Simulated disk stopped");
}

// =============================================================================
// Manual Device
// =============================================================================

/// Device that completes nothing on its own.
///
/// Dispatched requests are parked until [`take`](ManualDevice::take)n; the
/// caller then passes them to [`DiskQueue::on_completion`].
#[derive(Debug, Default)]
pub struct ManualDevice {
    in_flight: Mutex<Vec<DiskRequest>>,
    order: Mutex<Vec<u64>>,
}

impl ManualDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove the in-flight request with `tag`.
    pub fn take(&self, tag: u64) -> Option<DiskRequest> {
        let mut in_flight = self.in_flight.lock();
        let pos = in_flight.iter().position(|r| r.tag == tag)?;
        Some(in_flight.remove(pos))
    }

    /// Remove the oldest in-flight request.
    pub fn take_next(&self) -> Option<DiskRequest> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.is_empty() {
            None
        } else {
            Some(in_flight.remove(0))
        }
    }

    /// Tags in dispatch order
    pub fn dispatch_order(&self) -> Vec<u64> {
        self.order.lock().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

impl DeviceDispatch for ManualDevice {
    fn dispatch(&self, _column: usize, req: DiskRequest) {
        self.order.lock().push(req.tag);
        self.in_flight.lock().push(req);
    }
}

// =============================================================================
// Tests
// =============================================================================
