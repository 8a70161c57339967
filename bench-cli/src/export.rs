//! JSON export of a finished sweep

use std::fs::File;
use std::path::Path;

use bench_sweep::{InstrumentError, SweepOutcome, SweepPlan, SweepResults, SweepState};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ExportedSweep<'a> {
    state: SweepState,
    error: Option<String>,
    plan: &'a SweepPlan,
    results: &'a SweepResults,
    device_errors: &'a [InstrumentError],
    restore_attempted: usize,
    restore_failed: usize,
}

/// Write plan, results and diagnostics as pretty JSON
pub fn write_json(path: &Path, plan: &SweepPlan, outcome: &SweepOutcome) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let exported = ExportedSweep {
        state: outcome.state,
        error: outcome.error.as_ref().map(|e| e.to_string()),
        plan,
        results: &outcome.results,
        device_errors: &outcome.device_errors,
        restore_attempted: outcome.restore.attempted,
        restore_failed: outcome.restore.failed,
    };
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &exported)?;
    Ok(())
}
