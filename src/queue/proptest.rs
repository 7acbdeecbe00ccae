//! Property-Based Tests for Queueing Disciplines
//!
//! # Test Properties
//!
//! 1. **Conservation**: every enqueued request comes out exactly once
//! 2. **Peek Agreement**: `peek` always shows what `dequeue` returns
//! 3. **FIFO Order**: fifo serves in arrival order
//! 4. **Shortest Seek**: sstf always serves a nearest request
//! 5. **Sweep Direction**: c-scan only moves up between wraps
//! 6. **Elevator**: scan reverses at most once while draining
//! 7. **Promotion**: promoted requests leave before everything else

#![cfg(test)]

use proptest::prelude::*;

use super::discipline::{self, DisciplineKind, QueueingDiscipline, Scan};
use super::request::{DiskRequest, Priority};

// =============================================================================
// Property Strategies
// =============================================================================

fn kind_strategy() -> impl Strategy<Value = DisciplineKind> {
    prop::sample::select(DisciplineKind::ALL.to_vec())
}

/// `(sector_offset, low priority?)` per request
fn workload_strategy() -> impl Strategy<Value = Vec<(u64, bool)>> {
    prop::collection::vec((0u64..1000, any::<bool>()), 0..64)
}

fn fill(kind: DisciplineKind, workload: &[(u64, bool)]) -> Box<dyn QueueingDiscipline> {
    let mut q = discipline::create(kind, 8);
    for (tag, &(offset, low)) in workload.iter().enumerate() {
        let priority = if low { Priority::Low } else { Priority::Normal };
        q.enqueue(
            DiskRequest::read(offset, 1)
                .with_tag(tag as u64)
                .for_stripe(offset / 100, 0),
            priority,
        );
    }
    q
}

fn drain(q: &mut dyn QueueingDiscipline) -> Vec<DiskRequest> {
    std::iter::from_fn(|| q.dequeue()).collect()
}

// =============================================================================
// Discipline Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: Nothing is lost or duplicated.
    #[test]
    fn prop_conservation(kind in kind_strategy(), workload in workload_strategy()) {
        let mut q = fill(kind, &workload);
        prop_assert_eq!(q.len(), workload.len());

        let mut tags: Vec<u64> = drain(q.as_mut()).iter().map(|r| r.tag).collect();
        tags.sort_unstable();
        prop_assert_eq!(tags, (0..workload.len() as u64).collect::<Vec<_>>());
        prop_assert!(q.is_empty());
    }

    /// Property: Peek shows exactly the next dequeued request.
    #[test]
    fn prop_peek_matches_dequeue(kind in kind_strategy(), workload in workload_strategy()) {
        let mut q = fill(kind, &workload);
        loop {
            let peeked = q.peek().map(|r| r.tag);
            let taken = q.dequeue().map(|r| r.tag);
            prop_assert_eq!(peeked, taken);
            if taken.is_none() {
                break;
            }
        }
    }

    /// Property: FIFO ignores offsets and priorities.
    #[test]
    fn prop_fifo_keeps_arrival_order(workload in workload_strategy()) {
        let mut q = fill(DisciplineKind::Fifo, &workload);
        let tags: Vec<u64> = drain(q.as_mut()).iter().map(|r| r.tag).collect();
        prop_assert_eq!(tags, (0..workload.len() as u64).collect::<Vec<_>>());
    }

    /// Property: Every SSTF pick is at minimal distance from the head.
    #[test]
    fn prop_sstf_picks_nearest(offsets in prop::collection::vec(0u64..1000, 1..64)) {
        let workload: Vec<(u64, bool)> = offsets.iter().map(|&o| (o, false)).collect();
        let mut q = fill(DisciplineKind::Sstf, &workload);

        let mut remaining = offsets.clone();
        let mut head = 0u64;
        while let Some(req) = q.dequeue() {
            let best = remaining.iter().map(|&o| o.abs_diff(head)).min().unwrap();
            prop_assert_eq!(req.sector_offset.abs_diff(head), best);

            let pos = remaining.iter().position(|&o| o == req.sector_offset).unwrap();
            remaining.swap_remove(pos);
            head = req.sector_offset;
        }
        prop_assert!(remaining.is_empty());
    }

    /// Property: C-SCAN serves an ascending run, wraps once, then ascends
    /// again.
    #[test]
    fn prop_cscan_wraps_once(offsets in prop::collection::vec(0u64..1000, 1..64)) {
        let workload: Vec<(u64, bool)> = offsets.iter().map(|&o| (o, false)).collect();
        let mut q = fill(DisciplineKind::Cscan, &workload);

        let served: Vec<u64> = drain(q.as_mut()).iter().map(|r| r.sector_offset).collect();
        let wraps = served.windows(2).filter(|w| w[1] < w[0]).count();
        prop_assert!(wraps <= 1, "served {:?}", served);
    }

    /// Property: Once arrivals stop, SCAN sweeps on in its current
    /// direction and turns around at most once.
    #[test]
    fn prop_scan_reverses_once(
        first in prop::collection::vec(0u64..1000, 1..32),
        late in prop::collection::vec(0u64..1000, 0..32),
        served_early in 0usize..32,
    ) {
        let mut q = Scan::with_capacity(8);
        for (tag, &offset) in first.iter().enumerate() {
            q.enqueue(DiskRequest::read(offset, 1).with_tag(tag as u64), Priority::Normal);
        }
        for _ in 0..served_early.min(first.len()) {
            let req = q.dequeue().unwrap();
            prop_assert_eq!(q.head(), req.sector_offset);
        }
        for (tag, &offset) in late.iter().enumerate() {
            let tag = (first.len() + tag) as u64;
            q.enqueue(DiskRequest::read(offset, 1).with_tag(tag), Priority::Normal);
        }

        let mut path = vec![q.head()];
        while let Some(req) = q.dequeue() {
            prop_assert_eq!(q.head(), req.sector_offset);
            path.push(req.sector_offset);
        }

        let steps: Vec<bool> = path
            .windows(2)
            .filter(|w| w[0] != w[1])
            .map(|w| w[1] > w[0])
            .collect();
        let reversals = steps.windows(2).filter(|s| s[0] != s[1]).count();
        prop_assert!(reversals <= 1, "path {:?}", path);
        prop_assert_eq!(path.len(), first.len() + late.len() + 1 - served_early.min(first.len()));
    }

    /// Property: Promoted requests precede all others.
    #[test]
    fn prop_promoted_first(
        kind in prop::sample::select(vec![
            DisciplineKind::Sstf,
            DisciplineKind::Scan,
            DisciplineKind::Cscan,
        ]),
        workload in workload_strategy(),
        stripe in 0u64..10,
    ) {
        let mut q = fill(kind, &workload);
        let moved = q.promote(stripe, 0);
        let expected = workload.iter().filter(|&&(o, _)| o / 100 == stripe).count();
        prop_assert_eq!(moved, expected > 0);

        let served = drain(q.as_mut());
        prop_assert!(served[..expected]
            .iter()
            .all(|r| r.parity_stripe_id == stripe));
        prop_assert!(served[expected..]
            .iter()
            .all(|r| r.parity_stripe_id != stripe));
    }

    /// Property: Seek disciplines drain the normal lane before the low lane.
    #[test]
    fn prop_low_priority_last(
        kind in prop::sample::select(vec![
            DisciplineKind::Sstf,
            DisciplineKind::Scan,
            DisciplineKind::Cscan,
        ]),
        workload in workload_strategy(),
    ) {
        let mut q = fill(kind, &workload);
        let normal = workload.iter().filter(|&&(_, low)| !low).count();

        let served = drain(q.as_mut());
        for req in &served[..normal] {
            prop_assert!(!workload[req.tag as usize].1);
        }
        for req in &served[normal..] {
            prop_assert!(workload[req.tag as usize].1);
        }
    }
}
