//! Capture and restore of instrument settings around a sweep

use bench_scpi::{InstrumentRequest, Setting};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::InstrumentSession;

/// Analyzer settings captured before a sweep, in capture order
pub const ANALYZER_SETTINGS: [Setting; 6] = [
    Setting::ContinuousSweep,
    Setting::Detector,
    Setting::TraceMode,
    Setting::CenterFrequency,
    Setting::Span,
    Setting::ResolutionBandwidth,
];

/// Generator settings captured before a sweep, in capture order
pub const GENERATOR_SETTINGS: [Setting; 4] = [
    Setting::Modulation,
    Setting::Output,
    Setting::SourcePower,
    Setting::SourceFrequency,
];

/// Raw values of a set of settings as the instrument reported them
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsSnapshot {
    values: Vec<(Setting, String)>,
}

/// Outcome of a best-effort restore
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestoreReport {
    /// Restore writes attempted
    pub attempted: usize,
    /// Restore writes that failed
    pub failed: usize,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    /// Add another report's counts to this one
    pub fn absorb(&mut self, other: RestoreReport) {
        self.attempted += other.attempted;
        self.failed += other.failed;
    }
}

impl SettingsSnapshot {
    /// Query each setting in order and keep the raw replies
    pub async fn capture(
        session: &mut InstrumentSession,
        settings: &[Setting],
    ) -> Result<Self, SessionError> {
        let mut values = Vec::with_capacity(settings.len());
        for setting in settings {
            let raw = session
                .ask_request(&InstrumentRequest::Get(*setting))
                .await?;
            debug!("{}: captured {} = {}", session.address(), setting, raw.trim());
            values.push((*setting, raw.trim().to_string()));
        }
        Ok(Self { values })
    }

    /// Write every captured value back in reverse capture order
    ///
    /// Failures are logged and counted, never returned.
    pub async fn restore(&self, session: &mut InstrumentSession) -> RestoreReport {
        let mut report = RestoreReport::default();

        for (setting, raw) in self.values.iter().rev() {
            report.attempted += 1;
            let request = InstrumentRequest::Restore {
                setting: *setting,
                raw: raw.clone(),
            };
            if let Err(e) = session.send_request(&request).await {
                report.failed += 1;
                warn!(
                    "{}: failed to restore {} to {}: {}",
                    session.address(),
                    setting,
                    raw,
                    e
                );
            }
        }

        report
    }

    pub fn get(&self, setting: Setting) -> Option<&str> {
        self.values
            .iter()
            .find(|(s, _)| *s == setting)
            .map(|(_, raw)| raw.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_capture_then_restore_in_reverse() {
        let (client, server) = tokio::io::duplex(4096);
        let (lines_tx, mut lines_rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = lines_tx.send(line.clone());
                let reply = match line.as_str() {
                    "SYST:ERR?" => "0,\"No error\"",
                    "INIT:CONT?" => "1",
                    "SENS:DET?" => "POS",
                    _ => continue,
                };
                let _ = write_half.write_all(format!("{}\n", reply).as_bytes()).await;
            }
        });

        let mut session = InstrumentSession::from_stream("sim", client, SessionConfig::default());
        let snapshot =
            SettingsSnapshot::capture(&mut session, &[Setting::ContinuousSweep, Setting::Detector])
                .await
                .unwrap();
        assert_eq!(snapshot.get(Setting::Detector), Some("POS"));
        assert_eq!(snapshot.len(), 2);

        let report = snapshot.restore(&mut session).await;
        assert_eq!(report, RestoreReport { attempted: 2, failed: 0 });
        session.close().await;

        let mut seen = Vec::new();
        while let Some(line) = lines_rx.recv().await {
            seen.push(line);
        }
        let writes: Vec<_> = seen.iter().filter(|l| !l.ends_with('?')).collect();
        assert_eq!(writes, ["SENS:DET POS", "INIT:CONT 1"]);
    }

    #[tokio::test]
    async fn test_restore_on_closed_session_counts_failures() {
        let (client, _server) = tokio::io::duplex(64);
        let mut session = InstrumentSession::from_stream("sim", client, SessionConfig::default());
        session.close().await;

        let snapshot = SettingsSnapshot {
            values: vec![
                (Setting::Span, "1000000".to_string()),
                (Setting::CenterFrequency, "100000000".to_string()),
            ],
        };
        let report = snapshot.restore(&mut session).await;
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 2);
        assert!(!report.is_clean());
    }
}
