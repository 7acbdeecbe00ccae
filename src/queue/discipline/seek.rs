//! Seek-Optimizing Disciplines
//!
//! SSTF, SCAN and C-SCAN share one backing store: requests live in a
//! [`SlotPool`] and each lane keeps a sorted `(sector_offset, arrival)`
//! index into it. The disciplines differ only in how they pick the next
//! key from the front lane given the current head position.
//!
//! Lanes are drained strictly in rank order:
//!
//! ```text
//! promoted ──▶ normal ──▶ low
//! ```
//!
//! `promote` moves matching requests out of `normal`/`low` into `promoted`
//! keeping their arrival stamps, so their order among themselves is
//! unchanged.

use std::collections::BTreeMap;

use super::QueueingDiscipline;
use crate::queue::pool::{SlotId, SlotPool};
use crate::queue::request::{DiskRequest, Priority};

/// `(sector_offset, arrival sequence)`
type Key = (u64, u64);

/// Sorted index of one lane
type LaneIndex = BTreeMap<Key, SlotId>;

const PROMOTED: usize = 0;
const NORMAL: usize = 1;
const LOW: usize = 2;

// =============================================================================
// Lanes
// =============================================================================

#[derive(Debug)]
struct Lanes {
    pool: SlotPool<DiskRequest>,
    index: [LaneIndex; 3],
    next_seq: u64,
}

impl Lanes {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: SlotPool::with_capacity(capacity),
            index: Default::default(),
            next_seq: 0,
        }
    }

    fn insert(&mut self, lane: usize, req: DiskRequest) {
        let key = (req.sector_offset, self.next_seq);
        self.next_seq += 1;
        let slot = self.pool.insert(req);
        self.index[lane].insert(key, slot);
    }

    /// Highest-ranked non-empty lane
    fn front(&self) -> Option<usize> {
        self.index.iter().position(|lane| !lane.is_empty())
    }

    fn get(&self, lane: usize, key: &Key) -> Option<&DiskRequest> {
        let slot = *self.index[lane].get(key)?;
        self.pool.get(slot)
    }

    fn take(&mut self, lane: usize, key: &Key) -> Option<DiskRequest> {
        let slot = self.index[lane].remove(key)?;
        self.pool.remove(slot)
    }

    fn promote(&mut self, parity_stripe_id: u64, reconstruction_unit: u64) -> bool {
        let mut moved = false;
        for lane in [NORMAL, LOW] {
            let matching: Vec<Key> = self.index[lane]
                .iter()
                .filter(|&(_, &slot)| {
                    self.pool
                        .get(slot)
                        .is_some_and(|r| r.matches_unit(parity_stripe_id, reconstruction_unit))
                })
                .map(|(&key, _)| key)
                .collect();

            for key in matching {
                if let Some(slot) = self.index[lane].remove(&key) {
                    self.index[PROMOTED].insert(key, slot);
                    moved = true;
                }
            }
        }
        moved
    }

    fn len(&self) -> usize {
        self.pool.len()
    }
}

/// Oldest entry at exactly `offset`
fn first_at(lane: &LaneIndex, offset: u64) -> Option<Key> {
    lane.range((offset, 0)..=(offset, u64::MAX))
        .next()
        .map(|(&k, _)| k)
}

/// Oldest entry at the lowest offset `>= head`
fn at_or_above(lane: &LaneIndex, head: u64) -> Option<Key> {
    lane.range((head, 0)..).next().map(|(&k, _)| k)
}

/// Oldest entry at the highest offset `<= head`
fn at_or_below(lane: &LaneIndex, head: u64) -> Option<Key> {
    let (&(offset, _), _) = lane.range(..=(head, u64::MAX)).next_back()?;
    first_at(lane, offset)
}

// =============================================================================
// Sweeps
// =============================================================================

/// Head-movement policy of a seek discipline
pub trait Sweep: Copy + Send + std::fmt::Debug {
    const NAME: &'static str;

    fn start() -> Self;

    /// Pick the next key of `lane` for a head at `head`, along with the
    /// sweep state to adopt once that key is served.
    fn pick(self, lane: &LaneIndex, head: u64) -> Option<(Key, Self)>;
}

/// Shortest seek first
#[derive(Debug, Clone, Copy)]
pub struct Nearest;

impl Sweep for Nearest {
    const NAME: &'static str = "sstf";

    fn start() -> Self {
        Nearest
    }

    fn pick(self, lane: &LaneIndex, head: u64) -> Option<(Key, Self)> {
        let below = at_or_below(lane, head);
        let above = head
            .checked_add(1)
            .and_then(|from| at_or_above(lane, from));

        let key = match (below, above) {
            (Some(b), Some(a)) => {
                let down = head - b.0;
                let up = a.0 - head;
                // Equal distance goes to whichever arrived first
                if down < up || (down == up && b.1 < a.1) {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        Some((key, self))
    }
}

/// Elevator that reverses at either end
#[derive(Debug, Clone, Copy)]
pub struct Elevator {
    ascending: bool,
}

impl Sweep for Elevator {
    const NAME: &'static str = "scan";

    fn start() -> Self {
        Elevator { ascending: true }
    }

    fn pick(self, lane: &LaneIndex, head: u64) -> Option<(Key, Self)> {
        let (ahead, behind) = if self.ascending {
            (at_or_above(lane, head), at_or_below(lane, head))
        } else {
            (at_or_below(lane, head), at_or_above(lane, head))
        };

        match (ahead, behind) {
            (Some(key), _) => Some((key, self)),
            (None, Some(key)) => Some((
                key,
                Elevator {
                    ascending: !self.ascending,
                },
            )),
            (None, None) => None,
        }
    }
}

/// Upward-only elevator that wraps to the lowest offset
#[derive(Debug, Clone, Copy)]
pub struct CircularElevator;

impl Sweep for CircularElevator {
    const NAME: &'static str = "cscan";

    fn start() -> Self {
        CircularElevator
    }

    fn pick(self, lane: &LaneIndex, head: u64) -> Option<(Key, Self)> {
        at_or_above(lane, head)
            .or_else(|| lane.keys().next().copied())
            .map(|key| (key, self))
    }
}

// =============================================================================
// SeekQueue
// =============================================================================

/// Seek-optimizing discipline parameterized by its sweep
#[derive(Debug)]
pub struct SeekQueue<S: Sweep> {
    lanes: Lanes,
    /// Offset of the last dequeued request
    head: u64,
    sweep: S,
}

/// Shortest-seek-first
pub type Sstf = SeekQueue<Nearest>;

/// SCAN (elevator)
pub type Scan = SeekQueue<Elevator>;

/// Circular SCAN
pub type CScan = SeekQueue<CircularElevator>;

impl<S: Sweep> SeekQueue<S> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lanes: Lanes::with_capacity(capacity),
            head: 0,
            sweep: S::start(),
        }
    }

    /// Offset of the last dequeued request
    pub fn head(&self) -> u64 {
        self.head
    }

    fn next(&self) -> Option<(usize, Key, S)> {
        let lane = self.lanes.front()?;
        let (key, sweep) = self.sweep.pick(&self.lanes.index[lane], self.head)?;
        Some((lane, key, sweep))
    }
}

impl<S: Sweep> QueueingDiscipline for SeekQueue<S> {
    fn enqueue(&mut self, req: DiskRequest, priority: Priority) {
        let lane = match priority {
            Priority::Normal => NORMAL,
            Priority::Low => LOW,
        };
        self.lanes.insert(lane, req);
    }

    fn dequeue(&mut self) -> Option<DiskRequest> {
        let (lane, key, sweep) = self.next()?;
        let req = self.lanes.take(lane, &key)?;
        self.head = req.sector_offset;
        self.sweep = sweep;
        Some(req)
    }

    fn peek(&self) -> Option<&DiskRequest> {
        let (lane, key, _) = self.next()?;
        self.lanes.get(lane, &key)
    }

    fn promote(&mut self, parity_stripe_id: u64, reconstruction_unit: u64) -> bool {
        self.lanes.promote(parity_stripe_id, reconstruction_unit)
    }

    fn len(&self) -> usize {
        self.lanes.len()
    }

    fn name(&self) -> &'static str {
        S::NAME
    }
}

// =============================================================================
// Tests
// =============================================================================
