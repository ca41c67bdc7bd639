//! Minimum solid angle across all object queries.
//!
//! Peer servers only send this server results at least as fine as the
//! minimum object query angle, so every decrease must be pushed to them.
//! Increases may be pushed lazily.

use crate::types::{EntityId, SolidAngle};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdChange {
    Lowered,
    Raised,
    Unchanged,
}

#[derive(Debug)]
pub struct AngleThreshold {
    angles: HashMap<EntityId, SolidAngle>,
    min: SolidAngle,
}

impl AngleThreshold {
    pub fn new() -> Self {
        Self {
            angles: HashMap::new(),
            min: SolidAngle::MAX,
        }
    }

    /// Current minimum; [`SolidAngle::MAX`] when there are no object queries.
    pub fn min(&self) -> SolidAngle {
        self.min
    }

    pub fn set(&mut self, id: EntityId, angle: SolidAngle) -> ThresholdChange {
        let old = self.angles.insert(id, angle);
        if angle < self.min {
            self.min = angle;
            return ThresholdChange::Lowered;
        }
        match old {
            Some(old) if old == self.min && angle > old => self.rescan(),
            _ => ThresholdChange::Unchanged,
        }
    }

    pub fn remove(&mut self, id: EntityId) -> ThresholdChange {
        match self.angles.remove(&id) {
            Some(old) if old == self.min => self.rescan(),
            _ => ThresholdChange::Unchanged,
        }
    }

    fn rescan(&mut self) -> ThresholdChange {
        let min = self.angles.values().copied().min().unwrap_or(SolidAngle::MAX);
        if min > self.min {
            self.min = min;
            ThresholdChange::Raised
        } else {
            ThresholdChange::Unchanged
        }
    }
}

impl Default for AngleThreshold {
    fn default() -> Self {
        Self::new()
    }
}
