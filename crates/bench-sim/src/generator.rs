//! Virtual signal generator

use std::time::Duration;

use bench_scpi::Setting;

use crate::core::{FaultAction, Handled, InstrumentCore, ValueKind};
use crate::log::CommandLog;
use crate::VirtualInstrument;

/// Simulated CW signal generator
///
/// Tracks source frequency, power, RF output and modulation state. All
/// commands go through the shared setting handling, so unknown headers raise
/// `-113` in the error queue like a real instrument.
pub struct VirtualGenerator {
    core: InstrumentCore,
}

impl VirtualGenerator {
    /// Create a new virtual generator
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let identity = format!("Bench Instruments,VSG-6000,{},1.0", id);
        let mut core = InstrumentCore::new(id, identity);

        core.register(
            Setting::SourceFrequency.header(),
            ValueKind::Frequency,
            "1000000000",
        );
        core.register(Setting::SourcePower.header(), ValueKind::Number, "-20");
        core.register(Setting::Output.header(), ValueKind::Bool, "0");
        core.register(Setting::Modulation.header(), ValueKind::Bool, "1");

        Self { core }
    }

    /// Preset a setting, as if it had been configured on the front panel
    pub fn with_setting(mut self, setting: Setting, raw: &str) -> Self {
        self.core.set_value(setting.header(), raw);
        self
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

    /// Entries waiting in the error queue
    pub fn pending_errors(&self) -> usize {
        self.core.pending_errors()
    }

    /// Current raw value of a setting
    pub fn setting(&self, setting: Setting) -> Option<&str> {
        self.core.value(setting.header())
    }

    /// Returns true while the RF output is on
    pub fn output_on(&self) -> bool {
        self.setting(Setting::Output) == Some("1")
    }
}

impl VirtualInstrument for VirtualGenerator {
    fn id(&self) -> &str {
        &self.core.id
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        self.core.process(line, |_, _| Handled::NotMine)
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
