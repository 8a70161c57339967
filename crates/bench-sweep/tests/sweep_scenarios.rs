//! Integration tests for the sweep controller
//!
//! These tests run the worker end to end against virtual instruments served
//! over in-memory duplex streams:
//! - Complete, cancelled and failed runs
//! - Settings capture and exactly-once restore
//! - Device error reporting and escalation
//! - Completion strategies, reference level policy and generators
//! - Settings documents on disk

use std::time::Duration;

use bench_sim::{spawn_virtual_instrument, CommandLog, VirtualAnalyzer, VirtualGenerator};
use bench_sweep::{
    event_channel, CancellationToken, CompletionWait, InstrumentSession, ReferenceLevelPolicy,
    SessionConfig, SessionError, SweepError, SweepEvent, SweepOutcome, SweepPlan, SweepState,
    SweepWorker, WorkerConfig,
};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Session config with a short reply timeout
    pub fn session_config() -> SessionConfig {
        SessionConfig::with_timeout(Duration::from_millis(500))
    }

    /// Serve the analyzer and return a session talking to it plus its log
    pub fn analyzer_session(analyzer: VirtualAnalyzer) -> (InstrumentSession, CommandLog) {
        let (stream, handle) = spawn_virtual_instrument(analyzer);
        let log = handle.log().clone();
        let session = InstrumentSession::from_stream("sim-sa", stream, session_config());
        (session, log)
    }

    /// Serve the generator and return a session talking to it plus its log
    pub fn generator_session(generator: VirtualGenerator) -> (InstrumentSession, CommandLog) {
        let (stream, handle) = spawn_virtual_instrument(generator);
        let log = handle.log().clone();
        let session = InstrumentSession::from_stream("sim-sg", stream, session_config());
        (session, log)
    }

    pub fn plan(setpoints: &[f64]) -> SweepPlan {
        SweepPlan::new(setpoints.to_vec(), 1.0, 0.1)
    }

    /// Run the worker on the current task and collect every event
    pub async fn run(worker: SweepWorker) -> (SweepOutcome, Vec<SweepEvent>) {
        run_with_cancel(worker, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        worker: SweepWorker,
        cancel: CancellationToken,
    ) -> (SweepOutcome, Vec<SweepEvent>) {
        let (tx, mut rx) = event_channel();
        let outcome = worker.run(tx, cancel).await;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    pub fn result_batches(events: &[SweepEvent]) -> Vec<(usize, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                SweepEvent::Results { results, is_final } => Some((results.len(), *is_final)),
                _ => None,
            })
            .collect()
    }

    pub fn progress(events: &[SweepEvent]) -> Vec<u8> {
        events.iter().filter_map(SweepEvent::progress).collect()
    }

    pub fn device_error_count(events: &[SweepEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SweepEvent::DeviceError(_)))
            .count()
    }

    pub fn finished_state(events: &[SweepEvent]) -> Option<SweepState> {
        events.iter().find_map(|e| match e {
            SweepEvent::Finished { state, .. } => Some(*state),
            _ => None,
        })
    }

    /// Received lines without the error queue checks
    pub fn commands(log: &CommandLog) -> Vec<String> {
        log.lines()
            .into_iter()
            .filter(|l| l != "SYST:ERR?")
            .collect()
    }
}

// ============================================================================
// Complete Runs
// ============================================================================

mod completed_tests {
    use super::*;

    #[tokio::test]
    async fn three_point_sweep_completes() {
        let analyzer = VirtualAnalyzer::new("SA1").with_constant_level(-40.0);
        let (session, log) = helpers::analyzer_session(analyzer);
        let config = WorkerConfig {
            result_every: 1,
            ..Default::default()
        };
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0, 300.0]), session)
            .with_config(config);

        let (outcome, events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Completed);
        assert!(outcome.error.is_none());
        assert_eq!(
            outcome.results.pairs().collect::<Vec<_>>(),
            vec![(100.0, -40.0), (200.0, -40.0), (300.0, -40.0)]
        );

        assert!(matches!(events.first(), Some(SweepEvent::Started { points: 3 })));
        assert!(matches!(
            events.last(),
            Some(SweepEvent::Finished {
                state: SweepState::Completed,
                error: None
            })
        ));
        assert_eq!(
            helpers::result_batches(&events),
            vec![(1, false), (2, false), (3, true)]
        );
        assert_eq!(helpers::progress(&events), vec![33, 66, 100]);

        assert_eq!(log.count_header("INIT:IMM"), 3);
        assert!(log.contains("SENS:FREQ:CENT 300 MHz"));
        assert_eq!(outcome.restore.attempted, 6);
        assert!(outcome.restore.is_clean());
    }

    #[tokio::test]
    async fn results_follow_center_frequency() {
        let analyzer = VirtualAnalyzer::new("SA1").with_level(|mhz| -100.0 + mhz / 10.0);
        let (session, _log) = helpers::analyzer_session(analyzer);
        let worker = SweepWorker::new(helpers::plan(&[100.0, 500.0, 250.0]), session);

        let (outcome, _events) = helpers::run(worker).await;

        assert_eq!(outcome.results.values, vec![-90.0, -50.0, -75.0]);
        assert_eq!(outcome.results.peak(), Some((500.0, -50.0)));
    }

    #[tokio::test]
    async fn result_batches_every_k_steps_and_on_last() {
        let (session, _log) = helpers::analyzer_session(VirtualAnalyzer::new("SA1"));
        let config = WorkerConfig {
            result_every: 3,
            ..Default::default()
        };
        let setpoints: Vec<f64> = (1..=7).map(|i| i as f64 * 10.0).collect();
        let worker = SweepWorker::new(helpers::plan(&setpoints), session).with_config(config);

        let (outcome, events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Completed);
        // Steps 0, 3 and 6; the last one is final
        assert_eq!(
            helpers::result_batches(&events),
            vec![(1, false), (4, false), (7, true)]
        );
    }

    #[tokio::test]
    async fn sweep_setup_and_restore_order() {
        let analyzer = VirtualAnalyzer::new("SA1").with_constant_level(-40.0);
        let (session, log) = helpers::analyzer_session(analyzer);
        let worker = SweepWorker::new(helpers::plan(&[100.0]), session);

        let (outcome, _events) = helpers::run(worker).await;
        assert_eq!(outcome.state, SweepState::Completed);

        let commands = helpers::commands(&log);
        assert_eq!(
            &commands[..6],
            &[
                "INIT:CONT?",
                "SENS:DET?",
                ":TRAC1:TYPE?",
                "SENS:FREQ:CENT?",
                "SENS:FREQ:SPAN?",
                "SENS:BAND:RES?",
            ]
        );
        assert!(log.contains("INIT:CONT OFF"));
        assert!(log.contains(":TRAC1:TYPE WRIT"));
        assert!(log.contains("SENS:DET AVER"));
        assert!(log.contains(":STAT:OPER:ENAB 16"));

        // Reverse capture order, continuous sweep last
        assert_eq!(
            &commands[commands.len() - 6..],
            &[
                "SENS:BAND:RES 3000000",
                "SENS:FREQ:SPAN 10000000",
                "SENS:FREQ:CENT 1000000000",
                ":TRAC1:TYPE MAXH",
                "SENS:DET POS",
                "INIT:CONT 1",
            ]
        );
    }

    #[tokio::test]
    async fn spawned_worker_reports_through_handle() {
        let (session, log) = helpers::analyzer_session(VirtualAnalyzer::new("SA1"));
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0]), session);

        let (tx, mut rx) = event_channel();
        let handle = worker.spawn(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(handle.state(), SweepState::Completed);
        assert_eq!(*handle.state_receiver().borrow(), SweepState::Completed);

        let mut outcome = handle.join().await.unwrap();
        assert_eq!(outcome.state, SweepState::Completed);
        assert_eq!(helpers::finished_state(&events), Some(SweepState::Completed));

        outcome.close_sessions().await;
        assert!(!outcome.analyzer().is_open());
        assert_eq!(log.count_header("CALC:MARK:Y?"), 2);
    }
}

// ============================================================================
// Cancellation
// ============================================================================

mod cancel_tests {
    use super::*;

    #[tokio::test]
    async fn cancel_during_second_step_stops_before_third() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut marker_reads = 0;
        let analyzer = VirtualAnalyzer::new("SA1").on_command(move |line: &str| {
            if line == "CALC:MARK:Y?" {
                marker_reads += 1;
                if marker_reads == 2 {
                    token.cancel();
                }
            }
        });
        let (session, log) = helpers::analyzer_session(analyzer);
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0, 300.0]), session);

        let (outcome, events) = helpers::run_with_cancel(worker, cancel).await;

        assert_eq!(outcome.state, SweepState::Cancelled);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.results.len(), 2);

        // No set-point writes after cancellation was observed
        assert!(!log.contains("SENS:FREQ:CENT 300 MHz"));
        assert_eq!(log.count_header("INIT:IMM"), 2);

        // Restore still ran exactly once
        assert_eq!(log.count_prefix("INIT:CONT 1"), 1);
        assert_eq!(outcome.restore.attempted, 6);

        let batches = helpers::result_batches(&events);
        assert_eq!(batches.last(), Some(&(2, true)));
        assert_eq!(helpers::finished_state(&events), Some(SweepState::Cancelled));
    }

    #[tokio::test]
    async fn cancel_before_start_runs_no_steps() {
        let (session, log) = helpers::analyzer_session(VirtualAnalyzer::new("SA1"));
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0]), session);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (outcome, events) = helpers::run_with_cancel(worker, cancel).await;

        assert_eq!(outcome.state, SweepState::Cancelled);
        assert!(outcome.results.is_empty());
        assert_eq!(log.count_header("INIT:IMM"), 0);
        assert!(helpers::result_batches(&events).is_empty());
        assert!(helpers::progress(&events).is_empty());
        assert_eq!(log.count_prefix("INIT:CONT 1"), 1);
    }

    #[tokio::test]
    async fn handle_cancel_is_observed() {
        let analyzer = VirtualAnalyzer::new("SA1");
        let (session, _log) = helpers::analyzer_session(analyzer);
        let setpoints: Vec<f64> = (1..=50).map(|i| i as f64).collect();
        let plan = helpers::plan(&setpoints).with_dwell(Duration::from_millis(20));
        let worker = SweepWorker::new(plan, session);

        let (tx, mut rx) = event_channel();
        let handle = worker.spawn(tx);
        while let Some(event) = rx.recv().await {
            if event.progress().is_some() {
                handle.cancel();
                break;
            }
        }

        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome.state, SweepState::Cancelled);
        assert!(outcome.results.len() < 50);
    }
}

// ============================================================================
// Failures
// ============================================================================

mod failure_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reply_timeout_fails_and_restores_once() {
        let analyzer = VirtualAnalyzer::new("SA1").stall_marker_read(2);
        let (session, log) = helpers::analyzer_session(analyzer);
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0, 300.0]), session);

        let (outcome, events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Failed);
        assert!(outcome.error.as_ref().is_some_and(SweepError::is_timeout));
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.restore.attempted, 6);
        assert!(outcome.restore.is_clean());
        assert_eq!(log.count_prefix("INIT:CONT 1"), 1);

        assert!(matches!(
            events.last(),
            Some(SweepEvent::Finished {
                state: SweepState::Failed,
                error: Some(_)
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_does_not_shift_restore_or_later_queries() {
        let analyzer = VirtualAnalyzer::new("SA1").delay_reply_on(
            "CALC:MARK:Y?",
            2,
            Duration::from_millis(800),
        );
        let (session, log) = helpers::analyzer_session(analyzer);
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0, 300.0]), session);

        let (outcome, _events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Failed);
        assert!(outcome.error.as_ref().is_some_and(SweepError::is_timeout));
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.restore.attempted, 6);
        assert!(outcome.restore.is_clean());
        assert!(outcome.device_errors.is_empty());

        let (mut analyzer, _generators) = outcome.into_sessions();
        assert!(analyzer.is_out_of_step());
        assert!(matches!(
            analyzer.ask("INIT:CONT?").await,
            Err(SessionError::OutOfStep(_))
        ));

        assert!(analyzer.resync().await.unwrap() > 0);
        assert_eq!(analyzer.ask("INIT:CONT?").await.unwrap(), "1");
        assert_eq!(log.count_prefix("INIT:CONT 1"), 1);
    }

    #[tokio::test]
    async fn lost_connection_keeps_failed_state_when_restore_fails() {
        let analyzer = VirtualAnalyzer::new("SA1").hang_up_on("CALC:MARK:Y?", 2);
        let (session, _log) = helpers::analyzer_session(analyzer);
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0, 300.0]), session);

        let (outcome, events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Failed);
        assert!(matches!(outcome.error, Some(SweepError::Session(_))));
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.restore.attempted, 6);
        assert_eq!(outcome.restore.failed, outcome.restore.attempted);
        assert_eq!(helpers::finished_state(&events), Some(SweepState::Failed));
    }

    #[tokio::test]
    async fn invalid_plan_is_rejected_without_io() {
        let (session, log) = helpers::analyzer_session(VirtualAnalyzer::new("SA1"));
        let worker = SweepWorker::new(helpers::plan(&[]), session);

        let (outcome, events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Failed);
        assert!(matches!(outcome.error, Some(SweepError::Configuration(_))));
        assert_eq!(outcome.restore.attempted, 0);
        assert!(log.is_empty());
        assert!(!events.iter().any(|e| matches!(e, SweepEvent::Started { .. })));
        assert_eq!(helpers::finished_state(&events), Some(SweepState::Failed));
    }

    #[tokio::test]
    async fn invalid_span_is_rejected() {
        let (session, log) = helpers::analyzer_session(VirtualAnalyzer::new("SA1"));
        let plan = SweepPlan::new(vec![100.0], 0.0, 0.1);
        let (outcome, _events) = helpers::run(SweepWorker::new(plan, session)).await;

        assert!(matches!(outcome.error, Some(SweepError::Configuration(_))));
        assert!(log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_that_never_completes_times_out() {
        let analyzer = VirtualAnalyzer::new("SA1").never_complete();
        let (session, log) = helpers::analyzer_session(analyzer);
        let config = WorkerConfig {
            acquisition_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0]), session).with_config(config);

        let (outcome, _events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Failed);
        assert!(matches!(
            outcome.error,
            Some(SweepError::AcquisitionTimeout {
                setpoint_mhz,
                waited_ms: 1000
            }) if setpoint_mhz == 100.0
        ));
        assert!(log.count_header(":STAT:OPER:EVEN?") > 1);
        assert!(outcome.results.is_empty());
    }
}

// ============================================================================
// Device Errors
// ============================================================================

mod device_error_tests {
    use super::*;

    #[tokio::test]
    async fn single_error_per_step_is_reported_not_escalated() {
        let analyzer =
            VirtualAnalyzer::new("SA1").inject_error("CALC:MARK:MAX", -221, "Settings conflict");
        let (session, _log) = helpers::analyzer_session(analyzer);
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0, 300.0]), session);

        let (outcome, events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Completed);
        assert_eq!(outcome.device_errors.len(), 3);
        assert!(outcome.device_errors.iter().all(|e| e.code == -221));
        assert_eq!(outcome.device_errors[0].command, "CALC:MARK:MAX");
        assert_eq!(helpers::device_error_count(&events), 3);
    }

    #[tokio::test]
    async fn repeated_error_within_step_fails_run() {
        let analyzer = VirtualAnalyzer::new("SA1")
            .inject_error("SENS:FREQ:CENT", -222, "Data out of range")
            .inject_error("CALC:MARK:MAX", -222, "Data out of range");
        let (session, _log) = helpers::analyzer_session(analyzer);
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0]), session);

        let (outcome, events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Failed);
        match &outcome.error {
            Some(SweepError::Instrument(e)) => {
                assert_eq!(e.code, -222);
                assert_eq!(e.address, "sim-sa");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(outcome.results.is_empty());
        assert!(helpers::device_error_count(&events) >= 2);
    }

    #[tokio::test]
    async fn repeated_error_tolerated_when_escalation_disabled() {
        let analyzer = VirtualAnalyzer::new("SA1")
            .inject_error("SENS:FREQ:CENT", -222, "Data out of range")
            .inject_error("CALC:MARK:MAX", -222, "Data out of range");
        let (session, _log) = helpers::analyzer_session(analyzer);
        let config = WorkerConfig {
            escalate_repeated_errors: false,
            ..Default::default()
        };
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0]), session).with_config(config);

        let (outcome, _events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Completed);
        assert_eq!(outcome.results.len(), 2);
        assert!(!outcome.device_errors.is_empty());
    }
}

// ============================================================================
// Completion, Reference Level and Generators
// ============================================================================

mod instrument_tests {
    use super::*;

    #[tokio::test]
    async fn operation_complete_mode_skips_status_register() {
        let (session, log) = helpers::analyzer_session(VirtualAnalyzer::new("SA1"));
        let config = WorkerConfig {
            completion: CompletionWait::OperationComplete,
            ..Default::default()
        };
        let worker =
            SweepWorker::new(helpers::plan(&[100.0, 200.0, 300.0]), session).with_config(config);

        let (outcome, _events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Completed);
        assert_eq!(log.count_header("*OPC?"), 3);
        assert_eq!(log.count_header(":STAT:OPER:EVEN?"), 0);
        assert!(!log.contains(":STAT:OPER:ENAB 16"));
    }

    #[tokio::test(start_paused = true)]
    async fn operation_complete_mode_times_out() {
        let analyzer = VirtualAnalyzer::new("SA1").never_complete();
        let (session, _log) = helpers::analyzer_session(analyzer);
        let config = WorkerConfig {
            completion: CompletionWait::OperationComplete,
            acquisition_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let worker = SweepWorker::new(helpers::plan(&[100.0]), session).with_config(config);

        let (outcome, _events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Failed);
        assert!(matches!(
            outcome.error,
            Some(SweepError::AcquisitionTimeout { waited_ms: 2000, .. })
        ));
    }

    #[tokio::test]
    async fn status_poll_waits_for_slow_sweeps() {
        let analyzer = VirtualAnalyzer::new("SA1").with_sweep_polls(3);
        let (session, log) = helpers::analyzer_session(analyzer);
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0]), session).with_config(config);

        let (outcome, _events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Completed);
        assert_eq!(log.count_header(":STAT:OPER:EVEN?"), 6);
        assert_eq!(log.count_header("*CLS"), 2);
    }

    #[tokio::test]
    async fn reference_level_raised_once_near_peak() {
        let analyzer = VirtualAnalyzer::new("SA1").with_constant_level(-5.0);
        let (session, log) = helpers::analyzer_session(analyzer);
        let config = WorkerConfig {
            reference_policy: Some(ReferenceLevelPolicy::default()),
            ..Default::default()
        };
        let worker = SweepWorker::new(helpers::plan(&[100.0, 200.0]), session).with_config(config);

        let (outcome, events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Completed);
        let changes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SweepEvent::ReferenceLevelChanged { from_dbm, to_dbm } => {
                    Some((*from_dbm, *to_dbm))
                }
                _ => None,
            })
            .collect();
        assert_eq!(changes, vec![(0.0, 10.0)]);
        assert!(log.contains("DISP:WIND:TRAC:Y:RLEV 10"));
    }

    #[tokio::test]
    async fn generator_follows_setpoints_and_is_restored() {
        let (analyzer, analyzer_log) = helpers::analyzer_session(VirtualAnalyzer::new("SA1"));
        let (generator, generator_log) = helpers::generator_session(VirtualGenerator::new("SG1"));
        let plan = helpers::plan(&[100.0, 200.0]).with_source_power(-10.0);
        let worker = SweepWorker::new(plan, analyzer).with_generator(generator);

        let (outcome, _events) = helpers::run(worker).await;

        assert_eq!(outcome.state, SweepState::Completed);
        assert_eq!(outcome.generators().len(), 1);
        // Four generator settings plus six analyzer settings
        assert_eq!(outcome.restore.attempted, 10);

        assert!(generator_log.contains("POW:LEV -10 dBm"));
        assert!(generator_log.contains("OUTP:MOD:STAT OFF"));
        assert!(generator_log.contains("OUTP ON"));
        assert!(generator_log.contains("FREQ 100 MHz"));
        assert!(generator_log.contains("FREQ 200 MHz"));
        assert!(analyzer_log.contains("SENS:FREQ:CENT 200 MHz"));

        let commands = helpers::commands(&generator_log);
        assert_eq!(
            &commands[commands.len() - 4..],
            &[
                "FREQ 1000000000",
                "POW:LEV -20",
                "OUTP 0",
                "OUTP:MOD:STAT 1",
            ]
        );
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use bench_sweep::Settings;
    use proptest::prelude::*;

    /// Scalar document values: numbers, flags and plain words
    fn scalar() -> impl Strategy<Value = serde_yaml::Value> {
        prop_oneof![
            (-1.0e6f64..1.0e6).prop_map(serde_yaml::Value::from),
            any::<i64>().prop_map(serde_yaml::Value::from),
            any::<bool>().prop_map(serde_yaml::Value::from),
            "[a-zA-Z][a-zA-Z0-9_.:]{0,15}".prop_map(serde_yaml::Value::from),
        ]
    }

    fn sweep_events(points: usize, result_every: usize) -> (SweepOutcome, Vec<SweepEvent>) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let (session, _log) = helpers::analyzer_session(VirtualAnalyzer::new("SA1"));
            let setpoints: Vec<f64> = (0..points).map(|i| 100.0 + i as f64).collect();
            let config = WorkerConfig {
                result_every,
                ..Default::default()
            };
            let worker = SweepWorker::new(helpers::plan(&setpoints), session).with_config(config);
            helpers::run(worker).await
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn progress_is_monotonic_and_ends_at_100(points in 1usize..40, k in 1usize..8) {
            let (outcome, events) = sweep_events(points, k);

            prop_assert_eq!(outcome.state, SweepState::Completed);
            prop_assert_eq!(outcome.results.len(), points);

            let progress = helpers::progress(&events);
            prop_assert!(progress.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(progress.last().copied(), Some(100));

            let batches = helpers::result_batches(&events);
            let expected = (0..points).filter(|i| i % k == 0 || i + 1 == points).count();
            prop_assert_eq!(batches.len(), expected);
            prop_assert!(batches.windows(2).all(|w| w[0].0 < w[1].0));
            prop_assert_eq!(batches.last().copied(), Some((points, true)));
        }

        #[test]
        fn settings_survive_disk_round_trip(
            entries in proptest::collection::btree_map("k_[a-z]{1,8}", scalar(), 0..12),
            points in 1u64..1000,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("nested").join("last.yaml");

            let mut settings = Settings::bench_defaults();
            settings.set("Npoints", points);
            for (key, value) in &entries {
                settings.set(key.clone(), value.clone());
            }
            settings.save(&path).unwrap();

            let loaded = Settings::load(&path).unwrap();
            prop_assert_eq!(&loaded, &settings);
            prop_assert_eq!(loaded.get_u64("Npoints"), Some(points));
        }
    }
}
