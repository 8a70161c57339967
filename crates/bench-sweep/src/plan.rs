//! Sweep plans
//!
//! A plan is the ordered list of set-points to visit (analyzer center
//! frequency, and generator frequency when generators are attached) plus the
//! acquisition parameters that stay fixed for the whole sweep.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SweepError;

/// Largest number of set-points a plan may hold
pub const MAX_POINTS: usize = 100_000;

fn too_many_points(points: impl std::fmt::Display) -> SweepError {
    SweepError::Configuration(format!(
        "sweep of {} points exceeds the limit of {}",
        points, MAX_POINTS
    ))
}

/// Ordered set-points plus fixed acquisition parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    /// Set-points in MHz, visited in order
    pub setpoints_mhz: Vec<f64>,
    /// Analyzer span in MHz
    pub span_mhz: f64,
    /// Analyzer resolution bandwidth in MHz
    pub rbw_mhz: f64,
    /// Settle time after applying each set-point
    #[serde(default)]
    pub dwell_ms: u64,
    /// Generator output power, left untouched when absent
    #[serde(default)]
    pub source_power_dbm: Option<f64>,
}

impl SweepPlan {
    /// Plan over an explicit set-point list
    pub fn new(setpoints_mhz: Vec<f64>, span_mhz: f64, rbw_mhz: f64) -> Self {
        Self {
            setpoints_mhz,
            span_mhz,
            rbw_mhz,
            dwell_ms: 0,
            source_power_dbm: None,
        }
    }

    /// `points` evenly spaced set-points from `start` to `stop` inclusive
    pub fn linear(
        start_mhz: f64,
        stop_mhz: f64,
        points: usize,
        span_mhz: f64,
        rbw_mhz: f64,
    ) -> Result<Self, SweepError> {
        if points == 0 {
            return Err(SweepError::Configuration(
                "a linear sweep needs at least one point".to_string(),
            ));
        }
        if points > MAX_POINTS {
            return Err(too_many_points(points));
        }

        let setpoints = if points == 1 {
            vec![start_mhz]
        } else {
            let step = (stop_mhz - start_mhz) / (points - 1) as f64;
            (0..points)
                .map(|i| {
                    if i == points - 1 {
                        stop_mhz
                    } else {
                        start_mhz + step * i as f64
                    }
                })
                .collect()
        };

        let plan = Self::new(setpoints, span_mhz, rbw_mhz);
        plan.validate()?;
        Ok(plan)
    }

    /// Set-points from `start` towards `stop` (exclusive) in steps of `step`
    pub fn stepped(
        start_mhz: f64,
        stop_mhz: f64,
        step_mhz: f64,
        span_mhz: f64,
        rbw_mhz: f64,
    ) -> Result<Self, SweepError> {
        if !step_mhz.is_finite() || step_mhz <= 0.0 {
            return Err(SweepError::Configuration(format!(
                "step must be positive, got {} MHz",
                step_mhz
            )));
        }
        if !start_mhz.is_finite() || !stop_mhz.is_finite() {
            return Err(SweepError::Configuration(
                "start and stop must be finite".to_string(),
            ));
        }

        let count = ((stop_mhz - start_mhz) / step_mhz).ceil().max(0.0);
        if count > MAX_POINTS as f64 {
            return Err(too_many_points(count));
        }
        let count = count as usize;
        let setpoints = (0..count)
            .map(|i| start_mhz + step_mhz * i as f64)
            .filter(|f| *f < stop_mhz)
            .collect();

        let plan = Self::new(setpoints, span_mhz, rbw_mhz);
        plan.validate()?;
        Ok(plan)
    }

    /// Settle time after applying each set-point
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell_ms = dwell.as_millis() as u64;
        self
    }

    /// Generator output power applied before the first step
    pub fn with_source_power(mut self, dbm: f64) -> Self {
        self.source_power_dbm = Some(dbm);
        self
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn setpoints(&self) -> &[f64] {
        &self.setpoints_mhz
    }

    pub fn len(&self) -> usize {
        self.setpoints_mhz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setpoints_mhz.is_empty()
    }

    /// Reject plans that cannot be run
    pub fn validate(&self) -> Result<(), SweepError> {
        if self.setpoints_mhz.is_empty() {
            return Err(SweepError::Configuration(
                "sweep plan has no set-points".to_string(),
            ));
        }
        if self.setpoints_mhz.len() > MAX_POINTS {
            return Err(too_many_points(self.setpoints_mhz.len()));
        }
        if let Some((i, value)) = self
            .setpoints_mhz
            .iter()
            .enumerate()
            .find(|(_, f)| !f.is_finite())
        {
            return Err(SweepError::Configuration(format!(
                "set-point {} is not a number: {}",
                i, value
            )));
        }
        if !(self.span_mhz.is_finite() && self.span_mhz > 0.0) {
            return Err(SweepError::Configuration(format!(
                "span must be positive, got {} MHz",
                self.span_mhz
            )));
        }
        if !(self.rbw_mhz.is_finite() && self.rbw_mhz > 0.0) {
            return Err(SweepError::Configuration(format!(
                "resolution bandwidth must be positive, got {} MHz",
                self.rbw_mhz
            )));
        }
        if let Some(power) = self.source_power_dbm {
            if !power.is_finite() {
                return Err(SweepError::Configuration(
                    "source power is not a number".to_string(),
                ));
            }
        }
        Ok(())
    }
}
