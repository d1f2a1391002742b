//! Cross-bar column width synchronization.
//!
//! Bars render independently, but decorators that share a sync group key
//! must come out the same width so columns line up across bars. The
//! registry keeps two generations of per-group maxima: widths observed
//! while composing the current frame, and the maxima resolved from the
//! previous frame. Emission pads against the previous generation, so a
//! frame needs a single pass at the cost of one tick of alignment lag.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct SyncRegistry {
    resolved: HashMap<u32, usize>,
    gathering: HashMap<u32, usize>,
}

impl SyncRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start a new tick: what was gathered becomes the resolved widths.
    pub(crate) fn rotate(&mut self) {
        self.resolved = std::mem::take(&mut self.gathering);
    }

    /// Record the natural width a group member produced this tick.
    pub(crate) fn observe(&mut self, key: u32, width: usize) {
        let max = self.gathering.entry(key).or_insert(0);
        if width > *max {
            *max = width;
        }
    }

    /// The width a group member must pad to. Zero for a group that was
    /// silent last tick, which makes a single-member group pad against
    /// itself.
    pub(crate) fn resolved(&self, key: u32) -> usize {
        self.resolved.get(&key).copied().unwrap_or(0)
    }
}
