//! Shared record of received command lines

use std::sync::{Arc, Mutex, MutexGuard};

use bench_scpi::ParsedCommand;

/// Every command line a virtual instrument received, in order
///
/// Cloning shares the same record, so a test can keep a copy while the
/// instrument itself moves into its task.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<String>> {
        // A panicking test thread must not hide the record from the others
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a received line
    pub fn record(&self, line: &str) {
        self.guard().push(line.to_string());
    }

    /// Copy of all lines received so far
    pub fn lines(&self) -> Vec<String> {
        self.guard().clone()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Returns true if exactly this line was received
    pub fn contains(&self, line: &str) -> bool {
        self.guard().iter().any(|l| l == line)
    }

    /// Number of lines starting with `prefix`
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.guard().iter().filter(|l| l.starts_with(prefix)).count()
    }

    /// Number of commands with the same canonical header as `header`
    ///
    /// `header` may carry a trailing `?` to count only queries.
    pub fn count_header(&self, header: &str) -> usize {
        let Some(wanted) = ParsedCommand::parse(header) else {
            return 0;
        };
        self.guard()
            .iter()
            .filter_map(|l| ParsedCommand::parse(l))
            .filter(|c| c.header == wanted.header && c.query == wanted.query)
            .count()
    }

    /// Lines received after the first `n`
    pub fn lines_after(&self, n: usize) -> Vec<String> {
        self.guard().iter().skip(n).cloned().collect()
    }
}
