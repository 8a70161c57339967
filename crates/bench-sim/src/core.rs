//! State and behaviour shared by all virtual instruments
//!
//! Settings are kept as the raw text the instrument would report back,
//! normalized the way real instruments do (frequencies in Hz, booleans as
//! `0`/`1`, mnemonics in short form), so values read with a query can be
//! written back verbatim.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use bench_scpi::{
    parse_bool, parse_frequency_hz, parse_number, Detector, ErrorEntry, ParsedCommand, TraceMode,
};
use tracing::debug;

use crate::log::CommandLog;

/// Callback invoked with every received line before it is processed
pub type CommandHook = Box<dyn FnMut(&str) + Send>;

/// How a setting's argument is interpreted and normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueKind {
    Frequency,
    Number,
    Bool,
    TraceMode,
    Detector,
}

impl ValueKind {
    fn normalize(&self, argument: &str) -> Option<String> {
        match self {
            Self::Frequency => parse_frequency_hz(argument).ok().map(format_number),
            Self::Number => parse_number(argument).ok().map(format_number),
            Self::Bool => parse_bool(argument)
                .ok()
                .map(|on| if on { "1" } else { "0" }.to_string()),
            Self::TraceMode => TraceMode::from_mnemonic(argument)
                .ok()
                .map(|m| m.mnemonic().to_string()),
            Self::Detector => Detector::from_mnemonic(argument)
                .ok()
                .map(|d| d.mnemonic().to_string()),
        }
    }
}

pub(crate) fn format_number(value: f64) -> String {
    format!("{}", value)
}

#[derive(Debug, Clone)]
struct StoredSetting {
    kind: ValueKind,
    value: String,
    default: String,
}

/// Misbehaviour triggered by the n-th occurrence of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultAction {
    /// Swallow the command without replying
    Stall,
    /// Swallow the command and drop the connection
    HangUp,
    /// Process normally but hold the reply back
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct FaultRule {
    header: String,
    query: bool,
    nth: usize,
    seen: usize,
    action: FaultAction,
}

#[derive(Debug, Clone)]
struct InjectedError {
    header: String,
    code: i32,
    message: String,
}

/// Result of instrument specific command handling
pub(crate) enum Handled {
    /// Reply with a line
    Reply(String),
    /// Handled, no reply
    Silent,
    /// Leave it to the shared handling
    NotMine,
}

pub(crate) struct InstrumentCore {
    pub(crate) id: String,
    identity: String,
    settings: BTreeMap<String, StoredSetting>,
    errors: VecDeque<ErrorEntry>,
    injected: Vec<InjectedError>,
    faults: Vec<FaultRule>,
    log: CommandLog,
    hook: Option<CommandHook>,
    hung_up: bool,
    reply_delay: Option<Duration>,
}

impl InstrumentCore {
    pub(crate) fn new(id: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            identity: identity.into(),
            settings: BTreeMap::new(),
            errors: VecDeque::new(),
            injected: Vec::new(),
            faults: Vec::new(),
            log: CommandLog::new(),
            hook: None,
            hung_up: false,
            reply_delay: None,
        }
    }

    pub(crate) fn register(&mut self, header: &str, kind: ValueKind, default: &str) {
        self.settings.insert(
            ParsedCommand::canonical_header(header),
            StoredSetting {
                kind,
                value: default.to_string(),
                default: default.to_string(),
            },
        );
    }

    /// Current raw value of a registered setting
    pub(crate) fn value(&self, header: &str) -> Option<&str> {
        self.settings
            .get(&ParsedCommand::canonical_header(header))
            .map(|s| s.value.as_str())
    }

    pub(crate) fn set_value(&mut self, header: &str, raw: &str) -> bool {
        let Some(setting) = self
            .settings
            .get_mut(&ParsedCommand::canonical_header(header))
        else {
            return false;
        };
        match setting.kind.normalize(raw) {
            Some(value) => {
                setting.value = value;
                true
            }
            None => false,
        }
    }

    pub(crate) fn log(&self) -> CommandLog {
        self.log.clone()
    }

    pub(crate) fn set_hook(&mut self, hook: CommandHook) {
        self.hook = Some(hook);
    }

    pub(crate) fn add_fault(&mut self, command: &str, nth: usize, action: FaultAction) {
        if let Some(parsed) = ParsedCommand::parse(command) {
            self.faults.push(FaultRule {
                header: parsed.header,
                query: parsed.query,
                nth: nth.max(1),
                seen: 0,
                action,
            });
        }
    }

    pub(crate) fn inject_error(&mut self, command: &str, code: i32, message: &str) {
        self.injected.push(InjectedError {
            header: ParsedCommand::canonical_header(command),
            code,
            message: message.to_string(),
        });
    }

    pub(crate) fn push_error(&mut self, code: i32, message: &str) {
        self.errors.push_back(ErrorEntry {
            code,
            message: message.to_string(),
        });
    }

    pub(crate) fn pending_errors(&self) -> usize {
        self.errors.len()
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.hung_up
    }

    pub(crate) fn take_reply_delay(&mut self) -> Option<Duration> {
        self.reply_delay.take()
    }

    /// Record a line and decide whether it gets processed at all
    pub(crate) fn accept(&mut self, line: &str) -> Option<ParsedCommand> {
        if self.hung_up {
            return None;
        }
        self.log.record(line);
        if let Some(hook) = self.hook.as_mut() {
            hook(line);
        }
        let cmd = ParsedCommand::parse(line)?;

        let mut triggered = None;
        for rule in &mut self.faults {
            if rule.header == cmd.header && rule.query == cmd.query {
                rule.seen += 1;
                if rule.seen == rule.nth {
                    triggered = Some(rule.action);
                }
            }
        }

        match triggered {
            Some(FaultAction::Stall) => {
                debug!("{} stalls on {}", self.id, line);
                None
            }
            Some(FaultAction::HangUp) => {
                debug!("{} hangs up on {}", self.id, line);
                self.hung_up = true;
                None
            }
            Some(FaultAction::Delay(delay)) => {
                debug!("{} holds the reply to {} for {:?}", self.id, line, delay);
                self.reply_delay = Some(delay);
                Some(cmd)
            }
            None => Some(cmd),
        }
    }

    /// Common commands, the error queue and registered settings
    pub(crate) fn handle(&mut self, cmd: &ParsedCommand) -> Option<String> {
        match (cmd.header.as_str(), cmd.query) {
            ("*IDN", true) => return Some(self.identity.clone()),
            ("*OPC", true) => return Some("1".to_string()),
            ("*OPC", false) => return None,
            ("*CLS", false) => {
                self.errors.clear();
                return None;
            }
            ("*RST", false) => {
                for setting in self.settings.values_mut() {
                    setting.value = setting.default.clone();
                }
                return None;
            }
            ("SYST:ERR", true) | ("SYST:ERR:NEXT", true) => {
                let entry = self.errors.pop_front().unwrap_or(ErrorEntry {
                    code: 0,
                    message: "No error".to_string(),
                });
                return Some(entry.to_string());
            }
            _ => {}
        }

        if let Some(setting) = self.settings.get_mut(&cmd.header) {
            if cmd.query {
                return Some(setting.value.clone());
            }
            let error = if cmd.argument.is_empty() {
                Some((-109, "Missing parameter"))
            } else {
                match setting.kind.normalize(&cmd.argument) {
                    Some(value) => {
                        setting.value = value;
                        None
                    }
                    None => Some((-224, "Illegal parameter value")),
                }
            };
            if let Some((code, message)) = error {
                self.push_error(code, message);
            }
            return None;
        }

        debug!("{} does not understand {}", self.id, cmd.header);
        self.push_error(-113, "Undefined header");
        None
    }

    /// Queue injected errors for a processed command
    pub(crate) fn finish(&mut self, cmd: &ParsedCommand) {
        let matching: Vec<(i32, String)> = self
            .injected
            .iter()
            .filter(|e| e.header == cmd.header)
            .map(|e| (e.code, e.message.clone()))
            .collect();
        for (code, message) in matching {
            self.push_error(code, &message);
        }
    }

    /// Full processing path for instruments with extra commands
    pub(crate) fn process<F>(&mut self, line: &str, specific: F) -> Option<String>
    where
        F: FnOnce(&mut Self, &ParsedCommand) -> Handled,
    {
        let cmd = self.accept(line)?;
        let reply = match specific(self, &cmd) {
            Handled::Reply(reply) => Some(reply),
            Handled::Silent => None,
            Handled::NotMine => self.handle(&cmd),
        };
        self.finish(&cmd);
        reply
    }
}
