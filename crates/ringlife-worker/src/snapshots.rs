//! Per-turn band history of one round.
//!
//! Slot `t` holds the band as it stood after `t` turns of the round: the
//! interior rows this worker computed and the two halo rows its neighbours
//! delivered. Slots are created lazily by whichever arrives first, so a
//! halo for a turn the engine has not reached yet simply waits in its slot.

use std::collections::BTreeMap;

use ringlife_types::{Band, Edge, Row};

/// Why a slot could not be turned into a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// The slot was collected or never created.
    #[error("turn {0} is not retained")]
    NotRetained(u64),

    /// The engine's own rows for the turn are missing.
    #[error("interior rows for turn {0} are missing")]
    MissingInterior(u64),

    /// A neighbour's halo row for the turn has not been stored.
    #[error("{} halo for turn {} is missing", .1.as_str(), .0)]
    MissingHalo(u64, Edge),
}

#[derive(Debug, Clone, Default)]
struct TurnSnapshot {
    top: Option<Row>,
    interior: Option<Vec<Row>>,
    bottom: Option<Row>,
}

/// Retained slots of one round, plus bookkeeping for the pipeline bound.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    slots: BTreeMap<u64, TurnSnapshot>,
    acknowledged: u64,
    peak_unacknowledged: usize,
}

impl SnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the round's starting band as slot 0.
    pub fn seed(&mut self, band: Band) {
        self.slots.insert(
            0,
            TurnSnapshot {
                top: Some(band.top),
                interior: Some(band.interior),
                bottom: Some(band.bottom),
            },
        );
    }

    /// Store a neighbour's halo row for `turn`.
    ///
    /// Returns `false` when the turn was already collected; the row is
    /// dropped in that case.
    pub fn set_halo(&mut self, turn: u64, edge: Edge, row: Row) -> bool {
        if turn < self.acknowledged {
            return false;
        }
        let slot = self.slots.entry(turn).or_default();
        match edge {
            Edge::Top => slot.top = Some(row),
            Edge::Bottom => slot.bottom = Some(row),
        }
        true
    }

    /// Store the interior this engine computed for `turn`.
    pub fn store_interior(&mut self, turn: u64, interior: Vec<Row>) {
        self.slots.entry(turn).or_default().interior = Some(interior);
        self.peak_unacknowledged = self.peak_unacknowledged.max(self.unacknowledged());
    }

    /// Assemble the full band for `turn`, halos included.
    pub fn band_at(&self, turn: u64) -> Result<Band, SlotError> {
        let slot = self.slots.get(&turn).ok_or(SlotError::NotRetained(turn))?;
        let interior = slot
            .interior
            .clone()
            .ok_or(SlotError::MissingInterior(turn))?;
        let top = slot
            .top
            .clone()
            .ok_or(SlotError::MissingHalo(turn, Edge::Top))?;
        let bottom = slot
            .bottom
            .clone()
            .ok_or(SlotError::MissingHalo(turn, Edge::Bottom))?;
        Ok(Band {
            top,
            interior,
            bottom,
        })
    }

    /// Interior rows for `turn`, if computed and still retained.
    pub fn interior_at(&self, turn: u64) -> Option<&[Row]> {
        self.slots.get(&turn)?.interior.as_deref()
    }

    /// Record the round minimum and discard every slot below it.
    ///
    /// Nobody can ask for a turn every band has already passed. The
    /// minimum never moves backwards; a smaller value is ignored.
    pub fn acknowledge(&mut self, min_completed: u64) {
        if min_completed <= self.acknowledged {
            return;
        }
        self.acknowledged = min_completed;
        self.slots = self.slots.split_off(&min_completed);
    }

    /// Computed slots the rest of the ring has not caught up with.
    pub fn unacknowledged(&self) -> usize {
        self.slots
            .range(self.acknowledged.saturating_add(1)..)
            .filter(|(_, slot)| slot.interior.is_some())
            .count()
    }

    /// The largest [`unacknowledged`](Self::unacknowledged) count seen.
    pub const fn peak_unacknowledged(&self) -> usize {
        self.peak_unacknowledged
    }

    /// Slots currently held, including halo-only slots.
    pub fn retained(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn band() -> Band {
        Band {
            top: vec![1, 1],
            interior: vec![vec![2, 2], vec![3, 3]],
            bottom: vec![4, 4],
        }
    }

    #[test]
    fn seeded_slot_is_a_complete_band() {
        let mut store = SnapshotStore::new();
        store.seed(band());
        assert_eq!(store.band_at(0).unwrap(), band());
    }

    #[test]
    fn halo_may_arrive_before_interior() {
        let mut store = SnapshotStore::new();
        assert!(store.set_halo(1, Edge::Top, vec![9, 9]));
        assert_eq!(store.band_at(1), Err(SlotError::MissingInterior(1)));

        store.store_interior(1, vec![vec![0, 0]]);
        assert_eq!(store.band_at(1), Err(SlotError::MissingHalo(1, Edge::Bottom)));

        store.set_halo(1, Edge::Bottom, vec![8, 8]);
        let band = store.band_at(1).unwrap();
        assert_eq!(band.top, vec![9, 9]);
        assert_eq!(band.bottom, vec![8, 8]);
    }

    #[test]
    fn acknowledge_discards_older_slots() {
        let mut store = SnapshotStore::new();
        store.seed(band());
        for turn in 1..=4 {
            store.store_interior(turn, vec![vec![0, 0]]);
        }
        store.acknowledge(3);
        assert_eq!(store.retained(), 2);
        assert!(store.interior_at(2).is_none());
        assert!(store.interior_at(3).is_some());
        assert_eq!(store.band_at(0), Err(SlotError::NotRetained(0)));

        store.acknowledge(1);
        assert_eq!(store.retained(), 2);
        assert!(!store.set_halo(2, Edge::Top, vec![0, 0]));
    }

    #[test]
    fn peak_counts_only_unacknowledged_interiors() {
        let mut store = SnapshotStore::new();
        store.seed(band());
        store.set_halo(5, Edge::Top, vec![0, 0]);
        store.store_interior(1, vec![vec![0, 0]]);
        store.store_interior(2, vec![vec![0, 0]]);
        assert_eq!(store.unacknowledged(), 2);
        store.acknowledge(2);
        store.store_interior(3, vec![vec![0, 0]]);
        assert_eq!(store.unacknowledged(), 1);
        assert_eq!(store.peak_unacknowledged(), 2);
    }
}
