//! Disk Queue
//!
//! Per-component scheduler. Waiting requests are ordered by the queue's
//! discipline; the queue decides when each one may go to the device layer,
//! bounds the number in flight, and enforces the locking protocol:
//!
//! - A Locking request is only dispatched onto an idle, unlocked queue and
//!   locks it. Nothing but Unlocking requests is dispatched while locked.
//! - An Unlocking request is dispatched the moment it is submitted; the
//!   queue unlocks when it completes.
//! - A Locking request that reaches the head of the discipline while other
//!   requests are in flight is parked as the pending lock and gets first
//!   claim on the queue once it drains.
//!
//! The queue mutex is never held across a call into the device layer.

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};

use super::discipline::{self, QueueingDiscipline};
use super::request::{DiskRequest, LockFlag, Priority};
use crate::config::QueueConfig;
use crate::error::IoStatus;

// =============================================================================
// Device Layer
// =============================================================================

/// Device layer a [`DiskQueue`] dispatches to.
///
/// `dispatch` may block. The implementation must eventually hand every
/// request back through [`DiskQueue::on_completion`] on the queue that
/// dispatched it.
pub trait DeviceDispatch: Send + Sync {
    fn dispatch(&self, column: usize, req: DiskRequest);
}

// =============================================================================
// Stats
// =============================================================================

/// Point-in-time view of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub column: usize,
    pub discipline: &'static str,
    pub max_outstanding: usize,
    pub outstanding: usize,
    pub waiting: usize,
    pub locked: bool,
    pub pending_lock: bool,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub promoted: u64,
}

// =============================================================================
// Queue State
// =============================================================================

struct QueueState {
    discipline: Box<dyn QueueingDiscipline>,
    /// Requests currently with the device layer
    outstanding: usize,
    locked: bool,
    /// Locking request waiting for the queue to drain
    pending_lock: Option<DiskRequest>,
    /// Priority of the most recent dispatch
    current_priority: Priority,
    dispatched: u64,
    completed: u64,
    failed: u64,
    promoted: u64,
}

impl QueueState {
    fn waiting(&self) -> usize {
        self.discipline.len() + usize::from(self.pending_lock.is_some())
    }

    /// Nothing in flight, nothing waiting, not locked
    fn is_idle(&self) -> bool {
        self.outstanding == 0 && self.waiting() == 0 && !self.locked
    }

    fn is_full(&self, max_outstanding: usize) -> bool {
        self.outstanding >= max_outstanding
    }

    fn may_dispatch(&self, priority: Priority, max_outstanding: usize) -> bool {
        !self.locked
            && !self.is_full(max_outstanding)
            && (self.outstanding == 0 || priority >= self.current_priority)
    }
}

// =============================================================================
// DiskQueue
// =============================================================================

/// Scheduler for one component disk
pub struct DiskQueue {
    column: usize,
    max_outstanding: usize,
    state: Mutex<QueueState>,
    device: Arc<dyn DeviceDispatch>,
}

impl DiskQueue {
    /// Create a queue for `column` dispatching into `device`.
    ///
    /// A `max_outstanding` of zero is treated as one.
    pub fn new(column: usize, config: &QueueConfig, device: Arc<dyn DeviceDispatch>) -> Self {
        let max_outstanding = config.max_outstanding.max(1);
        debug!(
            column,
            discipline = %config.discipline,
            max_outstanding,
            "Creating disk queue"
        );

        Self {
            column,
            max_outstanding,
            state: Mutex::new(QueueState {
                discipline: discipline::create(config.discipline, config.capacity),
                outstanding: 0,
                locked: false,
                pending_lock: None,
                current_priority: Priority::Normal,
                dispatched: 0,
                completed: 0,
                failed: 0,
                promoted: 0,
            }),
            device,
        }
    }

    /// Submit a request.
    ///
    /// Never fails: a request that cannot be dispatched right away waits in
    /// the discipline.
    #[instrument(
        level = "trace",
        skip(self, req),
        fields(column = self.column, sector = req.sector_offset, lock = ?req.lock_flag)
    )]
    pub fn enqueue(&self, mut req: DiskRequest, priority: Priority) {
        req.priority = priority;
        let mut state = self.state.lock();

        match req.lock_flag {
            LockFlag::Locking => {
                if state.is_idle() {
                    state.locked = true;
                    debug!(column = self.column, "Queue locked");
                    self.dispatch(&mut state, req);
                } else {
                    state.discipline.enqueue(req, priority);
                }
            }
            LockFlag::Unlocking => {
                if !state.locked {
                    warn!(
                        column = self.column,
                        "Unlocking request submitted to an unlocked queue"
                    );
                }
                self.dispatch(&mut state, req);
            }
            LockFlag::None => {
                if state.may_dispatch(priority, self.max_outstanding) {
                    self.dispatch(&mut state, req);
                } else {
                    state.discipline.enqueue(req, priority);
                }
            }
        }
    }

    /// Called by the device layer when `req` finishes.
    ///
    /// Updates lock state, starts as much waiting work as the queue allows,
    /// then hands `req` and `status` to the request's completion callback.
    #[instrument(
        level = "trace",
        skip(self, req, status),
        fields(column = self.column, sector = req.sector_offset, ok = status.is_ok())
    )]
    pub fn on_completion(&self, req: DiskRequest, status: IoStatus) {
        {
            let mut state = self.state.lock();

            if req.is_unlocking() || (req.is_locking() && status.is_err()) {
                state.locked = false;
                debug!(
                    column = self.column,
                    failed_lock = req.is_locking(),
                    "Queue unlocked"
                );
            }

            match state.outstanding.checked_sub(1) {
                Some(n) => state.outstanding = n,
                None => warn!(column = self.column, "Completion with nothing outstanding"),
            }
            state.completed += 1;
            if status.is_err() {
                state.failed += 1;
            }

            self.start_waiting(&mut state);
        }

        if let Err(e) = &status {
            warn!(
                column = self.column,
                sector = req.sector_offset,
                kind = %req.kind,
                error = %e,
                "Request failed"
            );
        }

        if !req.complete(status) {
            trace!(column = self.column, "Completed request had no callback");
        }
    }

    /// Move waiting requests of the given stripe and reconstruction unit
    /// ahead of routine traffic.
    pub fn promote(&self, parity_stripe_id: u64, reconstruction_unit: u64) -> bool {
        let mut state = self.state.lock();
        let promoted = state
            .discipline
            .promote(parity_stripe_id, reconstruction_unit);
        if promoted {
            state.promoted += 1;
            debug!(
                column = self.column,
                parity_stripe_id, reconstruction_unit, "Promoted waiting requests"
            );
        }
        promoted
    }

    /// Dispatch waiting requests until the queue is full, locked, or has
    /// nothing eligible.
    fn start_waiting(&self, state: &mut MutexGuard<'_, QueueState>) {
        while !state.is_full(self.max_outstanding) && !state.locked {
            if let Some(req) = state.pending_lock.take() {
                if state.outstanding == 0 {
                    state.locked = true;
                    debug!(column = self.column, "Pending lock acquired");
                    self.dispatch(state, req);
                } else {
                    state.pending_lock = Some(req);
                }
                // Either locked now or still draining
                break;
            }

            let (lock_flag, priority) = match state.discipline.peek() {
                Some(next) => (next.lock_flag, next.priority),
                None => break,
            };

            // Leave an ineligible request where it is so its place holds
            if lock_flag == LockFlag::None && !state.may_dispatch(priority, self.max_outstanding)
            {
                break;
            }

            let Some(req) = state.discipline.dequeue() else {
                break;
            };

            match lock_flag {
                LockFlag::Locking => {
                    if state.outstanding == 0 {
                        state.locked = true;
                        debug!(column = self.column, "Queue locked");
                        self.dispatch(state, req);
                    } else {
                        trace!(column = self.column, "Locking request parked until drained");
                        state.pending_lock = Some(req);
                    }
                    break;
                }
                LockFlag::Unlocking => {
                    warn!(column = self.column, "Unlocking request found waiting");
                    self.dispatch(state, req);
                }
                LockFlag::None => self.dispatch(state, req),
            }
        }
    }

    /// Account for `req` and hand it to the device with the queue unlocked.
    fn dispatch(&self, state: &mut MutexGuard<'_, QueueState>, req: DiskRequest) {
        state.outstanding += 1;
        state.dispatched += 1;
        state.current_priority = req.priority;
        trace!(
            column = self.column,
            sector = req.sector_offset,
            count = req.sector_count,
            kind = %req.kind,
            outstanding = state.outstanding,
            "Dispatching"
        );

        MutexGuard::unlocked(state, || self.device.dispatch(self.column, req));
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Requests not yet dispatched, including a pending lock
    pub fn waiting(&self) -> usize {
        self.state.lock().waiting()
    }

    pub fn has_pending_lock(&self) -> bool {
        self.state.lock().pending_lock.is_some()
    }

    /// Nothing in flight, nothing waiting, not locked
    pub fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            column: self.column,
            discipline: state.discipline.name(),
            max_outstanding: self.max_outstanding,
            outstanding: state.outstanding,
            waiting: state.waiting(),
            locked: state.locked,
            pending_lock: state.pending_lock.is_some(),
            dispatched: state.dispatched,
            completed: state.completed,
            failed: state.failed,
            promoted: state.promoted,
        }
    }
}

impl std::fmt::Debug for DiskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskQueue")
            .field("column", &self.column)
            .field("max_outstanding", &self.max_outstanding)
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
