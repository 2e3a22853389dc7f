//! Globally unique record ids.
//!
//! Each process owns one residue class: with `machine_count = n` and
//! `machine_id = m`, every id it hands out is `≡ m (mod n)`. Processes that
//! share a store with distinct machine ids therefore never collide.
//! Handles that share a machine id stay apart through
//! [`IdGenerator::advance_past`], called with the store's highest id at the
//! start of every session.

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicI64,
    stride: i64,
}

impl IdGenerator {
    /// Start above `floor` (usually the store's highest id).
    ///
    /// `machine_count` is clamped to at least 1 and `machine_id` reduced
    /// modulo it. The first id is the smallest id above both `floor` and 0
    /// in this generator's residue class.
    #[must_use]
    pub fn new(machine_id: u32, machine_count: u32, floor: i64) -> Self {
        let stride = i64::from(machine_count.max(1));
        let residue = i64::from(machine_id) % stride;
        Self {
            next: AtomicI64::new(first_above(floor, residue, stride)),
            stride,
        }
    }

    /// Never hand out an id at or below `floor` from now on.
    ///
    /// Ids already above `floor` are kept; the generator only moves forward.
    pub fn advance_past(&self, floor: i64) {
        let residue = self.peek().rem_euclid(self.stride);
        self.next
            .fetch_max(first_above(floor, residue, self.stride), Ordering::Relaxed);
    }

    /// Next unused id.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(self.stride, Ordering::Relaxed)
    }

    /// The id the next call to [`Self::next_id`] returns.
    #[must_use]
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::Relaxed)
    }
}

/// Smallest id above both `floor` and 0 that is `≡ residue (mod stride)`.
const fn first_above(floor: i64, residue: i64, stride: i64) -> i64 {
    let base = if floor > 0 { floor + 1 } else { 1 };
    base + (residue - base).rem_euclid(stride)
}

#[cfg(test)]
mod tests {
    use super::IdGenerator;
    use proptest::prelude::*;

    #[test]
    fn single_machine_counts_up_from_floor() {
        let ids = IdGenerator::new(0, 1, 41);
        assert_eq!(ids.next_id(), 42);
        assert_eq!(ids.next_id(), 43);
        assert_eq!(ids.peek(), 44);
    }

    #[test]
    fn empty_store_starts_at_one() {
        assert_eq!(IdGenerator::new(0, 1, 0).next_id(), 1);
        assert_eq!(IdGenerator::new(0, 4, 0).next_id(), 4);
        assert_eq!(IdGenerator::new(1, 4, 0).next_id(), 1);
    }

    #[test]
    fn advance_past_skips_ids_taken_elsewhere() {
        let ids = IdGenerator::new(1, 4, 0);
        assert_eq!(ids.next_id(), 1);
        ids.advance_past(10);
        assert_eq!(ids.next_id(), 13);
        // A lower floor never moves the generator back.
        ids.advance_past(2);
        assert_eq!(ids.next_id(), 17);
    }

    proptest! {
        #[test]
        fn ids_stay_in_residue_class(machine_count in 1_u32..16, machine_id in 0_u32..16, floor in 0_i64..10_000) {
            let ids = IdGenerator::new(machine_id, machine_count, floor);
            let residue = i64::from(machine_id % machine_count);
            let mut previous = floor;
            for _ in 0..8 {
                let id = ids.next_id();
                prop_assert!(id > previous);
                prop_assert_eq!(id.rem_euclid(i64::from(machine_count)), residue);
                previous = id;
            }
        }

        #[test]
        fn advancing_keeps_residue_class(machine_count in 1_u32..16, machine_id in 0_u32..16, floor in 0_i64..10_000) {
            let ids = IdGenerator::new(machine_id, machine_count, 0);
            ids.advance_past(floor);
            let id = ids.next_id();
            prop_assert!(id > floor);
            prop_assert!(id - floor <= i64::from(machine_count));
            prop_assert_eq!(id.rem_euclid(i64::from(machine_count)), i64::from(machine_id % machine_count));
        }
    }
}
