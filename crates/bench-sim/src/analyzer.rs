//! Virtual spectrum analyzer
//!
//! Understands the analyzer subset of the command set: center frequency,
//! span, RBW, trace mode, detector, continuous sweep, reference level,
//! single sweeps with the operation event register, `*OPC?`, and the peak
//! marker. The measured level is a function of the center frequency.

use std::time::Duration;

use bench_scpi::{parse_number, ParsedCommand, Setting, SWEEP_COMPLETE_MASK};

use crate::core::{format_number, FaultAction, Handled, InstrumentCore, ValueKind};
use crate::log::CommandLog;
use crate::VirtualInstrument;

/// Level returned when no level function is configured
pub const DEFAULT_LEVEL_DBM: f64 = -40.0;

/// Simulated spectrum analyzer
pub struct VirtualAnalyzer {
    core: InstrumentCore,
    /// Peak level in dBm for a center frequency in MHz
    level: Box<dyn Fn(f64) -> f64 + Send>,
    /// Status polls needed after `INIT:IMM` before the sweep bit is set
    sweep_polls: u32,
    never_complete: bool,
    sweep_pending: bool,
    polls_left: u32,
    event_register: u16,
    event_enable: u16,
    sweeps: usize,
    marker_dbm: Option<f64>,
}

impl VirtualAnalyzer {
    /// Create a new virtual analyzer
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let identity = format!("Bench Instruments,VSA-3000,{},1.0", id);
        let mut core = InstrumentCore::new(id, identity);

        core.register(
            Setting::ResolutionBandwidth.header(),
            ValueKind::Frequency,
            "3000000",
        );
        core.register(Setting::Span.header(), ValueKind::Frequency, "10000000");
        core.register(
            Setting::CenterFrequency.header(),
            ValueKind::Frequency,
            "1000000000",
        );
        core.register(Setting::TraceMode.header(), ValueKind::TraceMode, "MAXH");
        core.register(Setting::Detector.header(), ValueKind::Detector, "POS");
        core.register(Setting::ContinuousSweep.header(), ValueKind::Bool, "1");
        core.register(Setting::ReferenceLevel.header(), ValueKind::Number, "0");

        Self {
            core,
            level: Box::new(|_| DEFAULT_LEVEL_DBM),
            sweep_polls: 1,
            never_complete: false,
            sweep_pending: false,
            polls_left: 0,
            event_register: 0,
            event_enable: 0,
            sweeps: 0,
            marker_dbm: None,
        }
    }

    /// Measured level as a function of center frequency (MHz)
    pub fn with_level<F>(mut self, level: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + 'static,
    {
        self.level = Box::new(level);
        self
    }

    /// Same level at every frequency
    pub fn with_constant_level(self, dbm: f64) -> Self {
        self.with_level(move |_| dbm)
    }

    /// Number of status polls before a triggered sweep reports completion
    pub fn with_sweep_polls(mut self, polls: u32) -> Self {
        self.sweep_polls = polls.max(1);
        self
    }

    /// Preset a setting, as if it had been configured on the front panel
    pub fn with_setting(mut self, setting: Setting, raw: &str) -> Self {
        self.core.set_value(setting.header(), raw);
        self
    }

    /// Triggered sweeps never finish: status polls stay clear, `*OPC?` never answers
    pub fn never_complete(mut self) -> Self {
        self.never_complete = true;
        self
    }

    /// The n-th marker amplitude read (1-based) gets no reply
    pub fn stall_marker_read(self, nth: usize) -> Self {
        self.stall_on("CALC:MARK:Y?", nth)
    }

    /// The n-th occurrence of `command` gets no reply
    pub fn stall_on(mut self, command: &str, nth: usize) -> Self {
        self.core.add_fault(command, nth, FaultAction::Stall);
        self
    }

    /// Answer the n-th occurrence of `command` only after `delay`
    pub fn delay_reply_on(mut self, command: &str, nth: usize, delay: Duration) -> Self {
        self.core.add_fault(command, nth, FaultAction::Delay(delay));
        self
    }

    /// Drop the connection on the n-th occurrence of `command`
    pub fn hang_up_on(mut self, command: &str, nth: usize) -> Self {
        self.core.add_fault(command, nth, FaultAction::HangUp);
        self
    }

    /// Queue a device error every time `command` is received
    pub fn inject_error(mut self, command: &str, code: i32, message: &str) -> Self {
        self.core.inject_error(command, code, message);
        self
    }

    /// Call `hook` with every received line
    pub fn on_command<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.core.set_hook(Box::new(hook));
        self
    }

    /// Number of sweeps triggered so far
    pub fn sweeps(&self) -> usize {
        self.sweeps
    }

    /// Entries waiting in the error queue
    pub fn pending_errors(&self) -> usize {
        self.core.pending_errors()
    }

    /// Current raw value of a setting
    pub fn setting(&self, setting: Setting) -> Option<&str> {
        self.core.value(setting.header())
    }

    fn center_mhz(&self) -> f64 {
        self.core
            .value(Setting::CenterFrequency.header())
            .and_then(|raw| parse_number(raw).ok())
            .map(|hz| hz / 1e6)
            .unwrap_or(0.0)
    }

    fn complete_sweep(&mut self) {
        self.sweep_pending = false;
        self.event_register |= SWEEP_COMPLETE_MASK;
    }

    fn handle_specific(&mut self, cmd: &ParsedCommand) -> Handled {
        match (cmd.header.as_str(), cmd.query) {
            ("INIT:IMM", false) | ("INIT", false) => {
                self.sweeps += 1;
                self.sweep_pending = true;
                self.polls_left = self.sweep_polls;
                self.event_register &= !SWEEP_COMPLETE_MASK;
                Handled::Silent
            }
            ("*CLS", false) => {
                self.event_register = 0;
                // Error queue is cleared by the shared handling
                Handled::NotMine
            }
            ("*OPC", true) => {
                if self.sweep_pending && self.never_complete {
                    return Handled::Silent;
                }
                if self.sweep_pending {
                    self.complete_sweep();
                }
                Handled::Reply("1".to_string())
            }
            ("STAT:OPER:ENAB", true) => Handled::Reply(self.event_enable.to_string()),
            ("STAT:OPER:ENAB", false) => {
                match parse_number(&cmd.argument) {
                    Ok(mask) if (0.0..=f64::from(u16::MAX)).contains(&mask) => {
                        self.event_enable = mask as u16;
                    }
                    _ => self.core.push_error(-224, "Illegal parameter value"),
                }
                Handled::Silent
            }
            ("STAT:OPER:EVEN", true) => {
                if self.sweep_pending && !self.never_complete {
                    self.polls_left = self.polls_left.saturating_sub(1);
                    if self.polls_left == 0 {
                        self.complete_sweep();
                    }
                }
                // Reading the event register clears it
                let value = std::mem::take(&mut self.event_register);
                Handled::Reply(value.to_string())
            }
            ("CALC:MARK:MAX", false) => {
                self.marker_dbm = Some((self.level)(self.center_mhz()));
                Handled::Silent
            }
            ("CALC:MARK:Y", true) => {
                let value = match self.marker_dbm {
                    Some(value) => value,
                    None => (self.level)(self.center_mhz()),
                };
                Handled::Reply(format_number(value))
            }
            _ => Handled::NotMine,
        }
    }
}

impl VirtualInstrument for VirtualAnalyzer {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        let cmd = self.core.accept(line)?;
        let reply = match self.handle_specific(&cmd) {
            Handled::Reply(reply) => Some(reply),
            Handled::Silent => None,
            Handled::NotMine => self.core.handle(&cmd),
        };
        self.core.finish(&cmd);
        reply
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn take_reply_delay(&mut self) -> Option<Duration> {
        self.core.take_reply_delay()
    }

    fn log(&self) -> CommandLog {
        self.core.log()
    }
}
