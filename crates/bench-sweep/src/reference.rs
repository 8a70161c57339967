//! Reference level auto-raise
//!
//! When a measured peak comes within `margin_db` of the analyzer's reference
//! level the worker raises the reference to the next `step_db` boundary above
//! `peak + margin`. The reference is never lowered during a sweep.

use serde::{Deserialize, Serialize};

/// Margin and granularity of the reference level policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLevelPolicy {
    /// Headroom to keep between the peak and the reference level
    pub margin_db: f64,
    /// Boundary the new reference level is rounded up to (5 or 10 dB)
    pub step_db: f64,
}

impl Default for ReferenceLevelPolicy {
    fn default() -> Self {
        Self {
            margin_db: 10.0,
            step_db: 10.0,
        }
    }
}

impl ReferenceLevelPolicy {
    /// New reference level for a measured peak, or `None` to keep the current one
    pub fn next_reference_level(&self, current_dbm: f64, measured_dbm: f64) -> Option<f64> {
        if !measured_dbm.is_finite() || !current_dbm.is_finite() {
            return None;
        }
        if measured_dbm <= current_dbm - self.margin_db {
            return None;
        }

        let step = if self.step_db > 0.0 { self.step_db } else { 10.0 };
        let raised = ((measured_dbm + self.margin_db) / step).ceil() * step;
        (raised > current_dbm).then_some(raised)
    }
}
