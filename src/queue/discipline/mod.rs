//! Queueing Disciplines
//!
//! A discipline decides which waiting request a [`DiskQueue`] dispatches
//! next. The queue owns exactly one discipline instance and only talks to
//! it through [`QueueingDiscipline`].
//!
//! | Kind    | Order                                             | Promote |
//! |---------|---------------------------------------------------|---------|
//! | `fifo`  | arrival                                           | no      |
//! | `sstf`  | closest to the last dequeued sector               | yes     |
//! | `scan`  | elevator, reverses at either end                  | yes     |
//! | `cscan` | upward sweep, wraps to the lowest sector          | yes     |
//!
//! [`DiskQueue`]: super::DiskQueue

mod fifo;
mod seek;

pub use fifo::Fifo;
pub use seek::{CScan, Scan, Sstf};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::request::{DiskRequest, Priority};
use crate::error::Error;

/// Ordering strategy for the requests waiting in one disk queue
pub trait QueueingDiscipline: Send {
    /// Add a request at the given priority.
    fn enqueue(&mut self, req: DiskRequest, priority: Priority);

    /// Remove and return the next request to dispatch.
    fn dequeue(&mut self) -> Option<DiskRequest>;

    /// The request `dequeue` would return, without removing it.
    fn peek(&self) -> Option<&DiskRequest>;

    /// Move requests of the given stripe and reconstruction unit ahead of
    /// routine traffic. Returns whether anything moved.
    fn promote(&mut self, parity_stripe_id: u64, reconstruction_unit: u64) -> bool;

    /// Number of waiting requests
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name for logs and stats
    fn name(&self) -> &'static str;
}

/// Available disciplines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisciplineKind {
    #[default]
    Fifo,
    Sstf,
    Scan,
    Cscan,
}

impl DisciplineKind {
    pub const ALL: [DisciplineKind; 4] = [
        DisciplineKind::Fifo,
        DisciplineKind::Sstf,
        DisciplineKind::Scan,
        DisciplineKind::Cscan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DisciplineKind::Fifo => "fifo",
            DisciplineKind::Sstf => "sstf",
            DisciplineKind::Scan => "scan",
            DisciplineKind::Cscan => "cscan",
        }
    }
}

impl fmt::Display for DisciplineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisciplineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(DisciplineKind::Fifo),
            "sstf" => Ok(DisciplineKind::Sstf),
            "scan" => Ok(DisciplineKind::Scan),
            "cscan" | "c-scan" => Ok(DisciplineKind::Cscan),
            other => Err(Error::UnknownDiscipline(other.to_string())),
        }
    }
}

/// Build a discipline primed for `capacity` waiting requests.
pub fn create(kind: DisciplineKind, capacity: usize) -> Box<dyn QueueingDiscipline> {
    match kind {
        DisciplineKind::Fifo => Box::new(Fifo::with_capacity(capacity)),
        DisciplineKind::Sstf => Box::new(Sstf::with_capacity(capacity)),
        DisciplineKind::Scan => Box::new(Scan::with_capacity(capacity)),
        DisciplineKind::Cscan => Box::new(CScan::with_capacity(capacity)),
    }
}
