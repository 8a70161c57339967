//! Virtual instrument actor task
//!
//! A pure async task that owns a virtual instrument and serves it over an
//! async byte stream. The task uses a select! loop to:
//! - Read command lines from the stream and write replies back
//! - Handle shutdown commands from a channel
//!
//! Pair it with `tokio::io::duplex()` to get a stream an
//! `InstrumentSession` can talk to.

use std::io;

use bench_scpi::{encode_line, LineCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::log::CommandLog;
use crate::VirtualInstrument;

/// Buffer size of the duplex pipe created by [`spawn_virtual_instrument`]
const DUPLEX_BUFFER: usize = 16 * 1024;

/// Commands that can be sent to a virtual instrument task
#[derive(Debug, Clone)]
pub enum VirtualInstrumentCommand {
    /// Stop serving and drop the stream
    Shutdown,
}

/// Run the virtual instrument task until the stream closes, the instrument
/// hangs up or a shutdown is requested
pub async fn run_virtual_instrument_task<S, I>(
    mut stream: S,
    mut instrument: I,
    mut cmd_rx: mpsc::Receiver<VirtualInstrumentCommand>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: VirtualInstrument,
{
    let mut codec = LineCodec::new();
    let mut buf = [0u8; 1024];
    let mut commands_open = true;

    info!("Starting virtual instrument task for {}", instrument.id());

    'serve: loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual instrument stream closed for {}", instrument.id());
                        break;
                    }
                    Ok(n) => {
                        codec.push_bytes(&buf[..n]);
                        while let Some(line) = codec.next_line() {
                            let line = match line {
                                Ok(line) => line,
                                Err(e) => {
                                    warn!(
                                        "Virtual instrument {} dropped input: {}",
                                        instrument.id(),
                                        e
                                    );
                                    continue;
                                }
                            };
                            if line.trim().is_empty() {
                                continue;
                            }

                            let reply = instrument.process_line(&line);
                            if !instrument.is_connected() {
                                info!("Virtual instrument {} hung up", instrument.id());
                                break 'serve;
                            }
                            let delay = instrument.take_reply_delay();
                            if let Some(reply) = reply {
                                if let Some(delay) = delay {
                                    tokio::time::sleep(delay).await;
                                }
                                debug!(
                                    "Virtual instrument {}: {} -> {}",
                                    instrument.id(),
                                    line,
                                    reply
                                );
                                stream.write_all(&encode_line(&reply)).await?;
                                stream.flush().await?;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Virtual instrument {} stream error: {}", instrument.id(), e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv(), if commands_open => {
                match cmd {
                    Some(VirtualInstrumentCommand::Shutdown) => {
                        info!("Shutdown requested for virtual instrument {}", instrument.id());
                        break;
                    }
                    None => {
                        // Keep serving until the stream closes
                        commands_open = false;
                    }
                }
            }
        }
    }

    info!("Virtual instrument task ended for {}", instrument.id());
    Ok(())
}

/// Running virtual instrument
#[derive(Debug)]
pub struct VirtualInstrumentHandle {
    id: String,
    cmd_tx: mpsc::Sender<VirtualInstrumentCommand>,
    task: JoinHandle<io::Result<()>>,
    log: CommandLog,
}

impl VirtualInstrumentHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record of every line the instrument received
    pub fn log(&self) -> &CommandLog {
        &self.log
    }

    /// Ask the task to stop without waiting for it
    pub fn request_shutdown(&self) {
        let _ = self.cmd_tx.try_send(VirtualInstrumentCommand::Shutdown);
    }

    /// Stop the task and wait for it to end
    pub async fn shutdown(self) -> io::Result<()> {
        let _ = self.cmd_tx.send(VirtualInstrumentCommand::Shutdown).await;
        self.join().await
    }

    /// Wait for the task to end on its own
    pub async fn join(self) -> io::Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

/// Spawn a virtual instrument task and return the client end of its stream
pub fn spawn_virtual_instrument<I>(instrument: I) -> (DuplexStream, VirtualInstrumentHandle)
where
    I: VirtualInstrument + 'static,
{
    let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let id = instrument.id().to_string();
    let log = instrument.log();

    let task = tokio::spawn(run_virtual_instrument_task(server, instrument, cmd_rx));

    (
        client,
        VirtualInstrumentHandle {
            id,
            cmd_tx,
            task,
            log,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VirtualAnalyzer, VirtualGenerator};
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_task_answers_queries() {
        let (client, handle) = spawn_virtual_instrument(VirtualAnalyzer::new("SA1"));
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut replies = BufReader::new(read_half).lines();

        write_half.write_all(b"SENS:FREQ:CENT 100 MHz\n").await.unwrap();
        write_half.write_all(b"SENS:FREQ:CENT?\n").await.unwrap();
        assert_eq!(replies.next_line().await.unwrap().as_deref(), Some("100000000"));

        write_half.write_all(b"*IDN?\r\n").await.unwrap();
        let idn = replies.next_line().await.unwrap().unwrap();
        assert!(idn.contains("VSA-3000"));

        assert_eq!(handle.log().len(), 3);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_reply_arrives_late() {
        let analyzer = VirtualAnalyzer::new("SA1").delay_reply_on(
            "*IDN?",
            1,
            std::time::Duration::from_secs(2),
        );
        let (client, handle) = spawn_virtual_instrument(analyzer);
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut replies = BufReader::new(read_half).lines();

        let start = tokio::time::Instant::now();
        write_half.write_all(b"*IDN?\n").await.unwrap();
        assert!(replies.next_line().await.unwrap().is_some());
        assert!(start.elapsed() >= std::time::Duration::from_secs(2));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_task_ends_when_stream_closes() {
        let (client, handle) = spawn_virtual_instrument(VirtualGenerator::new("SG1"));
        drop(client);
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_hang_up_closes_stream() {
        let analyzer = VirtualAnalyzer::new("SA1").hang_up_on("*IDN?", 1);
        let (client, handle) = spawn_virtual_instrument(analyzer);
        let (read_half, mut write_half) = tokio::io::split(client);
        let mut replies = BufReader::new(read_half).lines();

        write_half.write_all(b"*IDN?\n").await.unwrap();
        assert_eq!(replies.next_line().await.unwrap(), None);
        handle.join().await.unwrap();
    }
}
