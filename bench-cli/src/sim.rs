//! Virtual bench used by `--simulate`

use bench_sim::{
    spawn_virtual_instrument, VirtualAnalyzer, VirtualGenerator, VirtualInstrumentHandle,
};
use bench_sweep::{InstrumentSession, SessionConfig, SweepPlan};

/// Peak of the simulated response above the noise floor
const RESONANCE_DB: f64 = 30.0;
const NOISE_FLOOR_DBM: f64 = -70.0;

/// Analyzer that sees a resonance in the middle of the plan
pub fn analyzer(
    plan: &SweepPlan,
    config: SessionConfig,
) -> (InstrumentSession, VirtualInstrumentHandle) {
    let setpoints = plan.setpoints();
    let first = setpoints.first().copied().unwrap_or(0.0);
    let last = setpoints.last().copied().unwrap_or(first);
    let center = (first + last) / 2.0;
    let width = ((last - first).abs() / 10.0).max(plan.span_mhz);

    let analyzer = VirtualAnalyzer::new("SIM-SA").with_level(move |mhz| {
        let x = (mhz - center) / width;
        NOISE_FLOOR_DBM + RESONANCE_DB / (1.0 + x * x)
    });
    let (stream, handle) = spawn_virtual_instrument(analyzer);
    (
        InstrumentSession::from_stream("SIM::ANALYZER", stream, config),
        handle,
    )
}

pub fn generator(config: SessionConfig) -> (InstrumentSession, VirtualInstrumentHandle) {
    let (stream, handle) = spawn_virtual_instrument(VirtualGenerator::new("SIM-SG"));
    (
        InstrumentSession::from_stream("SIM::GENERATOR", stream, config),
        handle,
    )
}
