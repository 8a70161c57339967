//! benchsweep command-line front end
//!
//! Loads the saved settings document, applies command-line overrides, opens
//! the analyzer (and optional generator) sessions, then runs one sweep on a
//! background task. Ctrl-C cancels between set-points. Results can be
//! exported as JSON, and the merged settings are saved for the next run.

mod export;
mod sim;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use bench_scpi::ResourceAddress;
use bench_sim::VirtualInstrumentHandle;
use bench_sweep::settings::{
    KEY_ANALYZER, KEY_DWELL, KEY_GENERATOR, KEY_POINTS, KEY_POWER, KEY_RBW, KEY_SPAN, KEY_START,
    KEY_STOP, KEY_TIMEOUT,
};
use bench_sweep::{
    event_channel, CompletionWait, InstrumentSession, ReferenceLevelPolicy, SessionConfig,
    Settings, SweepEvent, SweepPlan, SweepState, SweepWorker, WorkerConfig,
};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// benchsweep: step a spectrum analyzer (and signal generator) through a
/// frequency plan, cancellable with Ctrl-C.
#[derive(Debug, Clone, Parser)]
#[command(name = "benchsweep", version, long_about = None)]
struct Cli {
    /// Settings document to load and update (default: ~/.config/benchsweep/last.yaml)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Analyzer resource address (VISA string, host, host:port or serial port)
    #[arg(long)]
    analyzer: Option<String>,

    /// Signal generator resource address
    #[arg(long)]
    generator: Option<String>,

    /// Sweep without a signal generator
    #[arg(long = "no-generator", default_value_t = false)]
    no_generator: bool,

    /// First set-point in MHz
    #[arg(long)]
    start: Option<f64>,

    /// Last set-point in MHz
    #[arg(long)]
    stop: Option<f64>,

    /// Number of set-points
    #[arg(long)]
    points: Option<u64>,

    /// Analyzer span in MHz
    #[arg(long)]
    span: Option<f64>,

    /// Analyzer resolution bandwidth in MHz
    #[arg(long)]
    rbw: Option<f64>,

    /// Generator output power in dBm
    #[arg(long)]
    power: Option<f64>,

    /// Settle time after each set-point in milliseconds
    #[arg(long = "dwell-ms")]
    dwell_ms: Option<u64>,

    /// Instrument reply timeout in milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Emit a result batch every K set-points
    #[arg(long = "result-every", default_value_t = 20)]
    result_every: usize,

    /// Wait for sweeps with *OPC? instead of polling the status register
    #[arg(long, default_value_t = false)]
    opc: bool,

    /// Raise the analyzer reference level when peaks come close to it
    #[arg(long = "auto-ref", default_value_t = false)]
    auto_ref: bool,

    /// Run against virtual instruments instead of real hardware
    #[arg(long, default_value_t = false)]
    simulate: bool,

    /// Write the results as pretty JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Do not save the merged settings after the run
    #[arg(long = "no-save", default_value_t = false)]
    no_save: bool,
}

impl Cli {
    /// Copy every flag that was given over the settings document
    fn apply(&self, settings: &mut Settings) {
        if let Some(address) = &self.analyzer {
            settings.set(KEY_ANALYZER, address.as_str());
        }
        if let Some(address) = &self.generator {
            settings.set(KEY_GENERATOR, address.as_str());
        }
        let numbers = [
            (KEY_START, self.start),
            (KEY_STOP, self.stop),
            (KEY_SPAN, self.span),
            (KEY_RBW, self.rbw),
            (KEY_POWER, self.power),
        ];
        for (key, value) in numbers {
            if let Some(value) = value {
                settings.set(key, value);
            }
        }
        let counts = [
            (KEY_POINTS, self.points),
            (KEY_DWELL, self.dwell_ms),
            (KEY_TIMEOUT, self.timeout_ms),
        ];
        for (key, value) in counts {
            if let Some(value) = value {
                settings.set(key, value);
            }
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            result_every: self.result_every.max(1),
            completion: if self.opc {
                CompletionWait::OperationComplete
            } else {
                CompletionWait::StatusPoll
            },
            reference_policy: self.auto_ref.then(ReferenceLevelPolicy::default),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout only carries sweep output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "benchsweep=info,bench_sweep=info,bench_scpi=info,bench_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(SweepState::Completed) | Ok(SweepState::Cancelled) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("benchsweep: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let defaults = Settings::bench_defaults();
    let Some(path) = path else {
        return Ok(defaults);
    };
    if !path.exists() {
        info!("No saved settings at {}, using defaults", path.display());
        return Ok(defaults);
    }
    Settings::load_over(defaults, path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

async fn open_session(
    role: &str,
    address: &str,
    config: SessionConfig,
) -> Result<InstrumentSession> {
    let resource = ResourceAddress::parse(address)
        .with_context(|| format!("invalid {} address {:?}", role, address))?;
    info!("Connecting to {} at {}", role, resource);
    InstrumentSession::open(address, config)
        .await
        .with_context(|| format!("failed to open {} at {}", role, address))
}

async fn identify(role: &str, session: &mut InstrumentSession) {
    match session.identify().await {
        Ok(identity) => println!("{:<9}: {}", role, identity.summary()),
        Err(e) => warn!("{} at {} did not identify: {}", role, session.address(), e),
    }
    if session.is_out_of_step() {
        if let Err(e) = session.resync().await {
            warn!("{} at {} could not resync: {}", role, session.address(), e);
        }
    }
}

fn print_event(event: &SweepEvent) {
    match event {
        SweepEvent::Started { points } => println!("sweep started: {} points", points),
        SweepEvent::Progress { percent } => println!("progress  : {:>3}%", percent),
        SweepEvent::Results { results, is_final } => {
            if let Some((mhz, dbm)) = results.pairs().last() {
                println!(
                    "results   : {} points, last {:.3} MHz = {:.2} dBm{}",
                    results.len(),
                    mhz,
                    dbm,
                    if *is_final { " (final)" } else { "" }
                );
            }
        }
        SweepEvent::ReferenceLevelChanged { from_dbm, to_dbm } => {
            println!("reference : {} dBm -> {} dBm", from_dbm, to_dbm)
        }
        SweepEvent::DeviceError(e) => eprintln!("device error: {}", e),
        SweepEvent::Finished { state, error } => match error {
            Some(error) => println!("sweep {}: {}", state, error),
            None => println!("sweep {}", state),
        },
    }
}

async fn run(cli: Cli) -> Result<SweepState> {
    let settings_path = match &cli.settings {
        Some(path) => Some(path.clone()),
        None => match Settings::default_path() {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Settings will not be persisted: {}", e);
                None
            }
        },
    };

    let mut settings = load_settings(settings_path.as_ref())?;
    cli.apply(&mut settings);

    // Reject bad parameters before touching any instrument
    let plan: SweepPlan = settings.sweep_plan().context("invalid sweep parameters")?;

    let session_config = SessionConfig {
        timeout: settings.timeout().unwrap_or(Duration::from_millis(5000)),
        ..Default::default()
    };

    let mut sims: Vec<VirtualInstrumentHandle> = Vec::new();
    let mut analyzer = if cli.simulate {
        let (session, handle) = sim::analyzer(&plan, session_config.clone());
        sims.push(handle);
        session
    } else {
        let address = settings
            .get_str(KEY_ANALYZER)
            .context("no analyzer address configured")?
            .to_string();
        open_session("analyzer", &address, session_config.clone()).await?
    };
    identify("analyzer", &mut analyzer).await;

    let generator = if cli.no_generator {
        None
    } else if cli.simulate {
        let (session, handle) = sim::generator(session_config.clone());
        sims.push(handle);
        Some(session)
    } else {
        match settings.get_str(KEY_GENERATOR) {
            Some(address) => {
                let address = address.to_string();
                Some(open_session("generator", &address, session_config.clone()).await?)
            }
            None => None,
        }
    };

    let mut worker = SweepWorker::new(plan.clone(), analyzer).with_config(cli.worker_config());
    if let Some(mut generator) = generator {
        identify("generator", &mut generator).await;
        worker = worker.with_generator(generator);
    }

    let (tx, mut rx) = event_channel();
    let handle = worker.spawn(tx);

    let cancel = handle.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, cancelling after the current set-point");
            cancel.cancel();
        }
    });

    while let Some(event) = rx.recv().await {
        print_event(&event);
    }

    let mut outcome = handle.join().await.context("sweep task panicked")?;
    ctrl_c.abort();
    outcome.close_sessions().await;

    if !outcome.restore.is_clean() {
        eprintln!(
            "warning: {} of {} settings could not be restored",
            outcome.restore.failed, outcome.restore.attempted
        );
    }
    if let Some(peak) = outcome.results.peak() {
        println!("peak      : {:.3} MHz = {:.2} dBm", peak.0, peak.1);
    }

    if let Some(path) = &cli.output {
        export::write_json(path, &plan, &outcome)
            .with_context(|| format!("failed to write results to {}", path.display()))?;
        println!("wrote results to {}", path.display());
    }

    if !cli.no_save {
        if let Some(path) = &settings_path {
            if let Err(e) = settings.save(path) {
                warn!("Could not save settings to {}: {}", path.display(), e);
            }
        }
    }

    for handle in sims {
        if let Err(e) = handle.shutdown().await {
            warn!("Virtual instrument did not shut down cleanly: {}", e);
        }
    }

    Ok(outcome.state)
}
