//! Sweep run state

use serde::{Deserialize, Serialize};

/// Lifecycle of a sweep worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SweepState {
    /// Not started yet
    #[default]
    Idle,
    /// Talking to the instruments
    Running,
    /// Every set-point was visited
    Completed,
    /// Cancellation was observed between set-points
    Cancelled,
    /// Unrecoverable communication error
    Failed,
}

impl SweepState {
    /// Returns true for `Completed`, `Cancelled` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SweepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Owned copy of the result buffer handed to the sink
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SweepResults {
    /// Set-points in MHz, in plan order
    pub setpoints: Vec<f64>,
    /// Measured values (marker amplitude in dBm)
    pub values: Vec<f64>,
}

impl SweepResults {
    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    /// `(set-point, value)` pairs
    pub fn pairs(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.setpoints.iter().copied().zip(self.values.iter().copied())
    }

    /// Pair with the highest measured value
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.pairs()
            .fold(None, |best: Option<(f64, f64)>, (f, v)| match best {
                Some((_, bv)) if bv >= v => best,
                _ => Some((f, v)),
            })
    }
}

/// One execution of a sweep plan
///
/// Mutated only by the worker. The set-point and value sequences always have
/// the same length.
#[derive(Debug)]
pub struct SweepRun {
    total: usize,
    results: SweepResults,
    progress: u8,
    emitted: usize,
}

impl SweepRun {
    /// Empty run over a plan of `total` points
    pub fn new(total: usize) -> Self {
        Self {
            total,
            results: SweepResults {
                setpoints: Vec::with_capacity(total),
                values: Vec::with_capacity(total),
            },
            progress: 0,
            emitted: 0,
        }
    }

    /// Append a measurement and return the new progress percentage
    pub fn push(&mut self, setpoint: f64, value: f64) -> u8 {
        self.results.setpoints.push(setpoint);
        self.results.values.push(value);

        let done = self.results.len().min(self.total);
        let percent = if self.total == 0 {
            100
        } else {
            (100 * done / self.total) as u8
        };
        // Never goes backwards
        self.progress = self.progress.max(percent);
        self.progress
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Progress 0..=100, rounded down
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Owned copy of the buffer, recording how many points were handed out
    pub fn snapshot(&mut self) -> SweepResults {
        self.emitted = self.results.len();
        self.results.clone()
    }

    /// Returns true if points were added since the last snapshot
    pub fn has_unemitted(&self) -> bool {
        self.results.len() > self.emitted
    }

    /// Consume the run, keeping the buffer
    pub fn into_results(self) -> SweepResults {
        self.results
    }
}
