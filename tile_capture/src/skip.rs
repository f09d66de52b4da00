//! Skip policy for cells that rarely carry traffic.
//!
//! Each listed cell has a threshold `t`: it is captured once every `t`
//! attempts and skipped otherwise. An initial phase lets neighbouring cells
//! spread their captures over different cycles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::GridCell;

/// One entry of the skip table as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkipRule {
    pub x: u32,
    pub y: u32,
    /// Capture every `threshold`-th attempt. 0 and 1 never skip.
    pub threshold: u32,
    /// Starting counter value.
    #[serde(default)]
    pub phase: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    threshold: u32,
    counter: u32,
}

/// Per-cell attempt counters. Owned by whoever drives the capture loop.
#[derive(Debug, Clone, Default)]
pub struct SkipPolicy {
    slots: HashMap<GridCell, Slot>,
}

impl SkipPolicy {
    /// Policy that never skips anything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from a threshold table, every counter starting at zero.
    pub fn new(thresholds: impl IntoIterator<Item = (GridCell, u32)>) -> Self {
        Self::with_phase(thresholds.into_iter().map(|(cell, t)| (cell, t, 0)))
    }

    /// Build from `(cell, threshold, initial counter)` triples.
    pub fn with_phase(entries: impl IntoIterator<Item = (GridCell, u32, u32)>) -> Self {
        let slots = entries
            .into_iter()
            .map(|(cell, threshold, phase)| {
                (
                    cell,
                    Slot {
                        threshold,
                        counter: phase,
                    },
                )
            })
            .collect();
        Self { slots }
    }

    pub fn from_rules(rules: &[SkipRule]) -> Self {
        Self::with_phase(
            rules
                .iter()
                .map(|r| (GridCell::new(r.x, r.y), r.threshold, r.phase)),
        )
    }

    /// Count one attempt for `cell`; returns `true` when it should be skipped.
    pub fn record_attempt(&mut self, cell: GridCell) -> bool {
        let Some(slot) = self.slots.get_mut(&cell) else {
            return false;
        };
        if slot.threshold <= 1 {
            return false;
        }
        slot.counter += 1;
        if slot.counter >= slot.threshold {
            slot.counter = 0;
            false
        } else {
            true
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
