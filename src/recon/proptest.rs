//! Property-Based Tests for the Reconstruction Map
//!
//! # Test Properties
//!
//! 1. **Idempotence**: marking the same ranges twice changes nothing
//! 2. **Split/Merge**: `[a, b]` then `[b+1, c]` equals `[a, c]`
//! 3. **Order Independence**: the final state ignores marking order
//! 4. **Monotonicity**: units left never increases
//! 5. **Coverage**: marking every sector completes the map

#![cfg(test)]

use proptest::prelude::*;

use super::map::{ReconstructionMap, RuState, SectorRange};

// =============================================================================
// Property Strategies
// =============================================================================

/// `(sectors_per_ru, sectors_in_disk)`, including a short last unit
fn geometry_strategy() -> impl Strategy<Value = (u64, u64)> {
    (1u64..=16, 1u64..=200)
}

/// Ranges that lie inside a disk of `sectors` sectors
fn ranges_strategy(sectors: u64) -> impl Strategy<Value = Vec<(u64, u64)>> {
    prop::collection::vec(
        (0..sectors, 0..sectors).prop_map(|(a, b)| (a.min(b), a.max(b))),
        0..24,
    )
}

fn geometry_with_ranges() -> impl Strategy<Value = (u64, u64, Vec<(u64, u64)>)> {
    geometry_strategy().prop_flat_map(|(spr, sectors)| {
        (Just(spr), Just(sectors), ranges_strategy(sectors))
    })
}

fn snapshot(map: &ReconstructionMap) -> Vec<RuState> {
    (0..map.total_ru_count())
        .map(|ru| map.ru_state(ru).unwrap_or(RuState::Empty))
        .collect()
}

/// Partial states are kept sorted and never hold touching ranges.
fn assert_canonical(states: &[RuState]) -> Result<(), TestCaseError> {
    for state in states {
        if let RuState::Partial(ranges) = state {
            prop_assert!(!ranges.is_empty());
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].stop + 1 < pair[1].start, "uncoalesced {:?}", ranges);
            }
        }
    }
    Ok(())
}

// =============================================================================
// Map Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: Re-marking already recorded ranges is a no-op.
    #[test]
    fn prop_marking_is_idempotent((spr, sectors, ranges) in geometry_with_ranges()) {
        let map = ReconstructionMap::new(spr, sectors, 0)?;
        for &(a, b) in &ranges {
            map.mark_reconstructed(a, b);
        }
        let once = snapshot(&map);
        let left = map.units_remaining();

        for &(a, b) in &ranges {
            map.mark_reconstructed(a, b);
        }
        prop_assert_eq!(snapshot(&map), once);
        prop_assert_eq!(map.units_remaining(), left);
    }

    /// Property: Two adjacent ranges are indistinguishable from their union.
    #[test]
    fn prop_split_equals_merged(
        (spr, sectors) in geometry_strategy(),
        cuts in (any::<u64>(), any::<u64>(), any::<u64>()),
    ) {
        let mut bounds = [cuts.0 % sectors, cuts.1 % sectors, cuts.2 % sectors];
        bounds.sort_unstable();
        let [a, b, c] = bounds;
        prop_assume!(b < c);

        let split = ReconstructionMap::new(spr, sectors, 0)?;
        split.mark_reconstructed(a, b);
        split.mark_reconstructed(b + 1, c);

        let merged = ReconstructionMap::new(spr, sectors, 0)?;
        merged.mark_reconstructed(a, c);

        prop_assert_eq!(snapshot(&split), snapshot(&merged));
        prop_assert_eq!(split.units_remaining(), merged.units_remaining());
    }

    /// Property: Marking order does not affect the result.
    #[test]
    fn prop_order_independent((spr, sectors, ranges) in geometry_with_ranges()) {
        let forward = ReconstructionMap::new(spr, sectors, 0)?;
        for &(a, b) in &ranges {
            forward.mark_reconstructed(a, b);
        }

        let backward = ReconstructionMap::new(spr, sectors, 0)?;
        for &(a, b) in ranges.iter().rev() {
            backward.mark_reconstructed(a, b);
        }

        let states = snapshot(&forward);
        assert_canonical(&states)?;
        prop_assert_eq!(states, snapshot(&backward));
    }

    /// Property: Units left never grows, and every marked range reads back.
    #[test]
    fn prop_progress_is_monotonic((spr, sectors, ranges) in geometry_with_ranges()) {
        let map = ReconstructionMap::new(spr, sectors, 0)?;
        let mut left = map.units_remaining();

        for &(a, b) in &ranges {
            map.mark_reconstructed(a, b);
            let now = map.units_remaining();
            prop_assert!(now <= left);
            left = now;

            prop_assert!(map.is_range_reconstructed(a, b));
        }
    }

    /// Property: Covering every sector, in any chunking, completes the map.
    #[test]
    fn prop_full_coverage_completes(
        (spr, sectors) in geometry_strategy(),
        chunk in 1u64..=32,
    ) {
        let map = ReconstructionMap::new(spr, sectors, 0)?;
        let mut start = 0;
        while start < sectors {
            let stop = (start + chunk - 1).min(sectors - 1);
            map.mark_reconstructed(start, stop);
            start = stop + 1;
        }

        prop_assert!(map.is_complete());
        for ru in 0..map.total_ru_count() {
            prop_assert_eq!(map.ru_state(ru), Some(RuState::Full));
            prop_assert!(map.is_fully_reconstructed(ru * spr));
        }
    }

    /// Property: A unit is full exactly when its whole range has been marked.
    #[test]
    fn prop_full_means_covered((spr, sectors, ranges) in geometry_with_ranges()) {
        let map = ReconstructionMap::new(spr, sectors, 0)?;
        let mut covered = vec![false; sectors as usize];
        for &(a, b) in &ranges {
            map.mark_reconstructed(a, b);
            for s in a..=b {
                covered[s as usize] = true;
            }
        }

        for ru in 0..map.total_ru_count() {
            let SectorRange { start, stop } = map.unit_range(ru);
            let all = (start..=stop).all(|s| covered[s as usize]);
            prop_assert_eq!(map.is_fully_reconstructed(start), all);
        }
    }
}
