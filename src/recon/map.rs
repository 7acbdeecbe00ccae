//! Reconstruction Map
//!
//! Tracks, per reconstruction unit (RU) of a failed disk, which sectors have
//! been rebuilt. Each unit is `Empty`, `Partial` with a sorted list of
//! disjoint, non-adjacent sector ranges, or `Full`.
//!
//! Writers serialize on one mutex per map. The Empty/Partial/Full tag of
//! every unit is also published through an atomic so that
//! [`ReconstructionMap::is_fully_reconstructed`] is a single lock-free load.
//! A unit's tag only becomes `Full` after its interval list has been
//! coalesced into the whole unit.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tracing::{debug, info, warn};

use crate::config::ReconConfig;
use crate::error::{Error, Result};

const TAG_EMPTY: u8 = 0;
const TAG_PARTIAL: u8 = 1;
const TAG_FULL: u8 = 2;

/// Inclusive sector range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectorRange {
    pub start: u64,
    pub stop: u64,
}

impl SectorRange {
    pub fn new(start: u64, stop: u64) -> Self {
        Self { start, stop }
    }

    pub fn len(&self) -> u64 {
        self.stop - self.start + 1
    }

    pub fn contains(&self, other: &SectorRange) -> bool {
        self.start <= other.start && other.stop <= self.stop
    }
}

/// Reconstruction state of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "ranges", rename_all = "lowercase")]
pub enum RuState {
    Empty,
    Full,
    Partial(Vec<SectorRange>),
}

/// Summary of reconstruction progress
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconMapStatus {
    pub sectors_per_ru: u64,
    pub sectors_in_disk: u64,
    pub total_ru_count: u64,
    pub spare_ru_count: u64,
    pub units_left: u64,
    pub partial_units: u64,
    /// 0.0 ..= 1.0
    pub fraction_complete: f64,
}

// =============================================================================
// ReconstructionMap
// =============================================================================

/// Per-failed-disk record of reconstructed sectors
pub struct ReconstructionMap {
    sectors_per_ru: u64,
    sectors_in_disk: u64,
    total_ru_count: u64,
    spare_ru_count: u64,
    units_left: AtomicU64,
    /// Published Empty/Partial/Full tag per unit
    tags: Vec<AtomicU8>,
    /// Writer critical section
    units: Mutex<Vec<RuState>>,
}

impl ReconstructionMap {
    /// Create an empty map for a disk of `sectors_in_disk` sectors.
    ///
    /// The last unit is short when the disk size is not a multiple of
    /// `sectors_per_ru`. `spare_ru_count` units are reserved for distributed
    /// sparing and never counted as left to reconstruct.
    pub fn new(sectors_per_ru: u64, sectors_in_disk: u64, spare_ru_count: u64) -> Result<Self> {
        if sectors_per_ru == 0 {
            return Err(Error::InvalidConfig(
                "sectors per reconstruction unit must be non-zero".to_string(),
            ));
        }
        if sectors_in_disk == 0 {
            return Err(Error::InvalidConfig("disk has no sectors".to_string()));
        }

        let total_ru_count = sectors_in_disk.div_ceil(sectors_per_ru);
        if spare_ru_count > total_ru_count {
            return Err(Error::InvalidConfig(format!(
                "{} spare units exceed {} total units",
                spare_ru_count, total_ru_count
            )));
        }

        let count = usize::try_from(total_ru_count).map_err(|_| {
            Error::InvalidConfig(format!("{} units do not fit in memory", total_ru_count))
        })?;

        debug!(
            sectors_per_ru,
            sectors_in_disk, total_ru_count, spare_ru_count, "Creating reconstruction map"
        );

        Ok(Self {
            sectors_per_ru,
            sectors_in_disk,
            total_ru_count,
            spare_ru_count,
            units_left: AtomicU64::new(total_ru_count - spare_ru_count),
            tags: (0..count).map(|_| AtomicU8::new(TAG_EMPTY)).collect(),
            units: Mutex::new(vec![RuState::Empty; count]),
        })
    }

    pub fn from_config(config: &ReconConfig, sectors_in_disk: u64) -> Result<Self> {
        Self::new(config.sectors_per_ru, sectors_in_disk, config.spare_ru_count)
    }

    /// Record sectors `start..=stop` as reconstructed.
    ///
    /// # Panics
    ///
    /// If `start > stop` or `stop` lies beyond the disk. Either is a caller
    /// bug.
    pub fn mark_reconstructed(&self, start: u64, stop: u64) {
        assert!(
            start <= stop && stop < self.sectors_in_disk,
            "reconstructed range [{}, {}] outside disk of {} sectors",
            start,
            stop,
            self.sectors_in_disk
        );

        let mut units = self.units.lock();
        let mut first = start;
        loop {
            let ru = first / self.sectors_per_ru;
            let whole = self.unit_range(ru);
            let last = stop.min(whole.stop);

            self.update_unit(&mut units, ru, whole, SectorRange::new(first, last));

            if last == stop {
                break;
            }
            first = last + 1;
        }
    }

    /// Insert `range` into unit `ru` and coalesce. Returns whether the unit
    /// became full.
    fn update_unit(
        &self,
        units: &mut [RuState],
        ru: u64,
        whole: SectorRange,
        range: SectorRange,
    ) -> bool {
        let idx = ru as usize;
        let entry = &mut units[idx];

        let full = match *entry {
            RuState::Full => return false,
            RuState::Empty => {
                let covered = range.contains(&whole);
                *entry = RuState::Partial(vec![range]);
                covered
            }
            RuState::Partial(ref mut ranges) => {
                let pos = ranges.partition_point(|r| r.start < range.start);
                ranges.insert(pos, range);
                coalesce(ranges);
                ranges.len() == 1 && ranges[0].contains(&whole)
            }
        };

        if !full {
            self.tags[idx].store(TAG_PARTIAL, Ordering::Release);
            return false;
        }

        *entry = RuState::Full;
        self.tags[idx].store(TAG_FULL, Ordering::Release);

        // Writers are serialized, so a plain load/store cannot race
        let left = self.units_left.load(Ordering::Acquire);
        if left == 0 {
            warn!(ru, "Unit completed with no units left; spare unit reconstructed?");
        } else {
            self.units_left.store(left - 1, Ordering::Release);
            debug!(ru, units_left = left - 1, "Reconstruction unit complete");
            if left == 1 {
                info!(
                    total_ru_count = self.total_ru_count,
                    "All reconstruction units complete"
                );
            }
        }
        true
    }

    /// Whether the unit holding `sector` is fully reconstructed.
    pub fn is_fully_reconstructed(&self, sector: u64) -> bool {
        let ru = sector / self.sectors_per_ru;
        self.tags
            .get(ru as usize)
            .is_some_and(|tag| tag.load(Ordering::Acquire) == TAG_FULL)
    }

    /// Whether every sector of `start..=stop` has been reconstructed.
    pub fn is_range_reconstructed(&self, start: u64, stop: u64) -> bool {
        if start > stop || stop >= self.sectors_in_disk {
            return false;
        }

        let first_ru = start / self.sectors_per_ru;
        let last_ru = stop / self.sectors_per_ru;
        if (first_ru..=last_ru).all(|ru| self.is_fully_reconstructed(ru * self.sectors_per_ru)) {
            return true;
        }

        let units = self.units.lock();
        (first_ru..=last_ru).all(|ru| {
            let whole = self.unit_range(ru);
            let want = SectorRange::new(start.max(whole.start), stop.min(whole.stop));
            match &units[ru as usize] {
                RuState::Full => true,
                RuState::Empty => false,
                RuState::Partial(ranges) => ranges.iter().any(|r| r.contains(&want)),
            }
        })
    }

    /// Units not yet fully reconstructed, excluding spare units
    pub fn units_remaining(&self) -> u64 {
        self.units_left.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.units_remaining() == 0
    }

    /// Snapshot of one unit.
    pub fn ru_state(&self, ru: u64) -> Option<RuState> {
        self.units.lock().get(ru as usize).cloned()
    }

    /// Sector range covered by unit `ru`
    pub fn unit_range(&self, ru: u64) -> SectorRange {
        let start = ru * self.sectors_per_ru;
        let stop = (start + self.sectors_per_ru).min(self.sectors_in_disk) - 1;
        SectorRange::new(start, stop)
    }

    /// Unit holding `sector`
    pub fn unit_of(&self, sector: u64) -> u64 {
        sector / self.sectors_per_ru
    }

    pub fn sectors_per_ru(&self) -> u64 {
        self.sectors_per_ru
    }

    pub fn sectors_in_disk(&self) -> u64 {
        self.sectors_in_disk
    }

    pub fn total_ru_count(&self) -> u64 {
        self.total_ru_count
    }

    pub fn spare_ru_count(&self) -> u64 {
        self.spare_ru_count
    }

    pub fn status(&self) -> ReconMapStatus {
        let units_left = self.units_remaining();
        let to_rebuild = self.total_ru_count - self.spare_ru_count;
        let partial_units = self
            .tags
            .iter()
            .filter(|t| t.load(Ordering::Acquire) == TAG_PARTIAL)
            .count() as u64;

        ReconMapStatus {
            sectors_per_ru: self.sectors_per_ru,
            sectors_in_disk: self.sectors_in_disk,
            total_ru_count: self.total_ru_count,
            spare_ru_count: self.spare_ru_count,
            units_left,
            partial_units,
            fraction_complete: if to_rebuild == 0 {
                1.0
            } else {
                (to_rebuild - units_left.min(to_rebuild)) as f64 / to_rebuild as f64
            },
        }
    }
}

/// Merge touching or overlapping ranges of a list sorted by start.
fn coalesce(ranges: &mut Vec<SectorRange>) {
    ranges.dedup_by(|next, prev| {
        if prev.stop.saturating_add(1) >= next.start {
            prev.stop = prev.stop.max(next.stop);
            true
        } else {
            false
        }
    });
}

/// One glyph per unit: `.` empty, `p` partial, `F` full; 64 per line.
impl fmt::Display for ReconstructionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "reconstruction map: {} of {} units left",
            self.units_remaining(),
            self.total_ru_count - self.spare_ru_count
        )?;
        for (i, tag) in self.tags.iter().enumerate() {
            if i > 0 && i % 64 == 0 {
                writeln!(f)?;
            }
            let glyph = match tag.load(Ordering::Acquire) {
                TAG_FULL => 'F',
                TAG_PARTIAL => 'p',
                _ => '.',
            };
            write!(f, "{}", glyph)?;
        }
        writeln!(f)
    }
}

impl fmt::Debug for ReconstructionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconstructionMap")
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::thread;

    fn ranges(state: Option<RuState>) -> Vec<(u64, u64)> {
        match state {
            Some(RuState::Partial(r)) => r.iter().map(|r| (r.start, r.stop)).collect(),
            other => panic!("expected partial unit, got {:?}", other),
        }
    }

    #[test]
    fn test_new_counts_units() {
        let map = ReconstructionMap::new(100, 1000, 2).unwrap();
        assert_eq!(map.total_ru_count(), 10);
        assert_eq!(map.units_remaining(), 8);

        let map = ReconstructionMap::new(100, 1050, 0).unwrap();
        assert_eq!(map.total_ru_count(), 11);
        assert_eq!(map.unit_range(10), SectorRange::new(1000, 1049));
    }

    #[test]
    fn test_new_rejects_bad_geometry() {
        assert_matches!(ReconstructionMap::new(0, 100, 0), Err(Error::InvalidConfig(_)));
        assert_matches!(ReconstructionMap::new(10, 0, 0), Err(Error::InvalidConfig(_)));
        assert_matches!(ReconstructionMap::new(10, 100, 11), Err(Error::InvalidConfig(_)));
    }

    #[test]
    fn test_two_halves_fill_unit() {
        let map = ReconstructionMap::new(100, 1000, 0).unwrap();
        map.mark_reconstructed(0, 39);
        assert!(!map.is_fully_reconstructed(0));
        assert_eq!(map.units_remaining(), 10);

        map.mark_reconstructed(40, 99);
        assert!(map.is_fully_reconstructed(0));
        assert!(map.is_fully_reconstructed(99));
        assert!(!map.is_fully_reconstructed(100));
        assert_eq!(map.units_remaining(), 9);
        assert_matches!(map.ru_state(0), Some(RuState::Full));
    }

    #[test]
    fn test_gap_fill_coalesces() {
        let map = ReconstructionMap::new(100, 1000, 0).unwrap();
        map.mark_reconstructed(10, 20);
        map.mark_reconstructed(25, 30);
        assert_eq!(ranges(map.ru_state(0)), vec![(10, 20), (25, 30)]);

        map.mark_reconstructed(21, 24);
        assert_eq!(ranges(map.ru_state(0)), vec![(10, 30)]);
    }

    #[test]
    fn test_overlap_and_out_of_order_inserts() {
        let map = ReconstructionMap::new(100, 100, 0).unwrap();
        map.mark_reconstructed(60, 70);
        map.mark_reconstructed(5, 8);
        map.mark_reconstructed(30, 40);
        map.mark_reconstructed(35, 65);
        assert_eq!(ranges(map.ru_state(0)), vec![(5, 8), (30, 70)]);

        map.mark_reconstructed(9, 9);
        map.mark_reconstructed(28, 28);
        assert_eq!(ranges(map.ru_state(0)), vec![(5, 9), (28, 28), (30, 70)]);
    }

    #[test]
    fn test_range_spanning_units() {
        let map = ReconstructionMap::new(100, 1000, 0).unwrap();
        map.mark_reconstructed(50, 349);

        assert_eq!(ranges(map.ru_state(0)), vec![(50, 99)]);
        assert_matches!(map.ru_state(1), Some(RuState::Full));
        assert_matches!(map.ru_state(2), Some(RuState::Full));
        assert_eq!(ranges(map.ru_state(3)), vec![(300, 349)]);
        assert_eq!(map.units_remaining(), 8);
    }

    #[test]
    fn test_full_unit_counted_once() {
        let map = ReconstructionMap::new(10, 100, 0).unwrap();
        map.mark_reconstructed(0, 9);
        map.mark_reconstructed(0, 9);
        map.mark_reconstructed(3, 4);
        assert_eq!(map.units_remaining(), 9);
    }

    #[test]
    fn test_short_last_unit() {
        let map = ReconstructionMap::new(100, 150, 0).unwrap();
        map.mark_reconstructed(100, 149);
        assert!(map.is_fully_reconstructed(149));
        assert_eq!(map.units_remaining(), 1);
    }

    #[test]
    #[should_panic(expected = "outside disk")]
    fn test_out_of_range_panics() {
        let map = ReconstructionMap::new(100, 1000, 0).unwrap();
        map.mark_reconstructed(990, 1000);
    }

    #[test]
    #[should_panic(expected = "outside disk")]
    fn test_inverted_range_panics() {
        let map = ReconstructionMap::new(100, 1000, 0).unwrap();
        map.mark_reconstructed(20, 10);
    }

    #[test]
    fn test_is_range_reconstructed() {
        let map = ReconstructionMap::new(100, 1000, 0).unwrap();
        map.mark_reconstructed(0, 99);
        map.mark_reconstructed(100, 160);

        assert!(map.is_range_reconstructed(0, 99));
        assert!(map.is_range_reconstructed(50, 150));
        assert!(!map.is_range_reconstructed(50, 161));
        assert!(!map.is_range_reconstructed(500, 510));
        assert!(!map.is_range_reconstructed(10, 5));
        assert!(!map.is_range_reconstructed(990, 1000));
    }

    #[test]
    fn test_status_and_display() {
        let map = ReconstructionMap::new(10, 40, 0).unwrap();
        map.mark_reconstructed(0, 9);
        map.mark_reconstructed(12, 14);

        let status = map.status();
        assert_eq!(status.units_left, 3);
        assert_eq!(status.partial_units, 1);
        assert!((status.fraction_complete - 0.25).abs() < f64::EPSILON);

        let rendered = map.to_string();
        assert!(rendered.contains("3 of 4 units left"));
        assert!(rendered.ends_with("Fp..\n"));
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let map = Arc::new(ReconstructionMap::new(64, 64 * 32, 0).unwrap());

        let writers: Vec<_> = (0..4u64)
            .map(|w| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    // Each writer fills every fourth sector of every unit
                    for sector in (w..64 * 32).step_by(4) {
                        map.mark_reconstructed(sector, sector);
                    }
                })
            })
            .collect();

        let reader = {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let mut last = u64::MAX;
                while !map.is_complete() {
                    let left = map.units_remaining();
                    assert!(left <= last, "units_remaining went up");
                    last = left;
                    let _ = map.is_fully_reconstructed(left * 7 % (64 * 32));
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(map.units_remaining(), 0);
        assert!((0..32).all(|ru| map.ru_state(ru) == Some(RuState::Full)));
    }
}
