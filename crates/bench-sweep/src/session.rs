//! Instrument sessions
//!
//! An `InstrumentSession` is a request/response text channel to one
//! instrument. It is generic over the transport: TCP sockets and serial
//! ports are opened from a resource address, anything else implementing
//! `AsyncRead + AsyncWrite` (such as a `DuplexStream` connected to a virtual
//! instrument) can be wrapped with [`InstrumentSession::from_io`].
//!
//! Writes are followed by an error queue check (`SYST:ERR?`). A non-zero
//! entry is logged and queued as an [`InstrumentError`] for the caller to
//! collect; it never fails the write itself.
//!
//! A query that times out leaves its reply in flight. Until [`resync`]
//! drains it, the session refuses further queries and skips error queue
//! checks, so no reply is ever paired with the wrong command.
//!
//! [`resync`]: InstrumentSession::resync

use std::io;
use std::time::Duration;

use bench_scpi::{
    encode_line, parse_number, ErrorEntry, Identity, InstrumentRequest, LineCodec,
    ResourceAddress,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

use crate::error::{InstrumentError, SessionError};

/// Byte stream an instrument session talks over
pub trait InstrumentIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> InstrumentIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Reply timeout for queries, also bounds connecting and writing
    pub timeout: Duration,
    /// Query the error queue after every write
    pub check_errors: bool,
    /// Baud rate for serial resources
    pub baud_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            check_errors: true,
            baud_rate: 9600,
        }
    }
}

impl SessionConfig {
    /// Default configuration with a different reply timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Text command channel to one instrument
pub struct InstrumentSession {
    address: String,
    io: Option<Box<dyn InstrumentIo>>,
    codec: LineCodec,
    config: SessionConfig,
    buffer: Vec<u8>,
    device_errors: Vec<InstrumentError>,
    out_of_step: bool,
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("address", &self.address)
            .field("open", &self.is_open())
            .field("out_of_step", &self.out_of_step)
            .field("config", &self.config)
            .finish()
    }
}

impl InstrumentSession {
    /// Open a session to the instrument at `address`
    pub async fn open(address: &str, config: SessionConfig) -> Result<Self, SessionError> {
        let resource = ResourceAddress::parse(address)?;

        let io: Box<dyn InstrumentIo> = match &resource {
            ResourceAddress::Tcpip { host, port } => {
                let connect = TcpStream::connect((host.as_str(), *port));
                let stream = match tokio::time::timeout(config.timeout, connect).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(source)) => {
                        return Err(SessionError::Connection {
                            address: address.to_string(),
                            source,
                        })
                    }
                    Err(_) => {
                        return Err(SessionError::Connection {
                            address: address.to_string(),
                            source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                        })
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not disable Nagle on {}: {}", address, e);
                }
                Box::new(stream)
            }
            ResourceAddress::Serial { port } => {
                let stream = tokio_serial::new(port, config.baud_rate)
                    .timeout(config.timeout)
                    .open_native_async()
                    .map_err(|e| SessionError::Connection {
                        address: address.to_string(),
                        source: io::Error::from(e),
                    })?;
                Box::new(stream)
            }
        };

        info!("Opened session to {} ({})", address, resource);
        Ok(Self::from_io(address, io, config))
    }

    /// Wrap an already connected byte stream
    pub fn from_io(
        address: impl Into<String>,
        io: Box<dyn InstrumentIo>,
        config: SessionConfig,
    ) -> Self {
        Self {
            address: address.into(),
            io: Some(io),
            codec: LineCodec::new(),
            config,
            buffer: vec![0u8; 1024],
            device_errors: Vec::new(),
            out_of_step: false,
        }
    }

    /// Wrap a concrete stream type
    pub fn from_stream<T>(address: impl Into<String>, stream: T, config: SessionConfig) -> Self
    where
        T: InstrumentIo + 'static,
    {
        Self::from_io(address, Box::new(stream), config)
    }

    /// Connection address this session was opened with
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns true until [`close`](Self::close) is called
    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Returns true after a query timed out and before [`resync`](Self::resync)
    pub fn is_out_of_step(&self) -> bool {
        self.out_of_step
    }

    /// Write a command, then check the error queue
    ///
    /// The check is skipped while the session is out of step.
    pub async fn send(&mut self, command: &str) -> Result<(), SessionError> {
        self.write_line(command).await?;
        if !self.config.check_errors {
            return Ok(());
        }
        if self.out_of_step {
            debug!("{}: skipping error check for {}", self.address, command);
            return Ok(());
        }
        self.check_error_queue(command).await
    }

    /// Write a command and wait for exactly one reply line
    pub async fn ask(&mut self, command: &str) -> Result<String, SessionError> {
        self.ask_with_timeout(command, self.config.timeout).await
    }

    /// Like [`ask`](Self::ask) with a one-off reply timeout
    pub async fn ask_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        if self.out_of_step {
            return Err(SessionError::OutOfStep(self.address.clone()));
        }
        self.write_line(command).await?;
        self.read_line(command, timeout).await
    }

    /// Query a numeric value
    pub async fn ask_number(&mut self, command: &str) -> Result<f64, SessionError> {
        let reply = self.ask(command).await?;
        parse_number(&reply).map_err(|source| SessionError::InvalidResponse {
            command: command.to_string(),
            source,
        })
    }

    /// Send a normalized request that has no reply
    pub async fn send_request(&mut self, request: &InstrumentRequest) -> Result<(), SessionError> {
        self.send(&request.encode()).await
    }

    /// Send a normalized query and return the reply line
    pub async fn ask_request(
        &mut self,
        request: &InstrumentRequest,
    ) -> Result<String, SessionError> {
        self.ask(&request.encode()).await
    }

    /// Query `*IDN?`
    pub async fn identify(&mut self) -> Result<Identity, SessionError> {
        let command = InstrumentRequest::Identify.encode();
        let reply = self.ask(&command).await?;
        Identity::parse(&reply).map_err(|source| SessionError::InvalidResponse { command, source })
    }

    /// Discard late replies until the instrument stays quiet for one timeout
    ///
    /// Clears the out-of-step flag. Returns the number of bytes discarded.
    pub async fn resync(&mut self) -> Result<usize, SessionError> {
        let quiet = self.config.timeout;
        self.codec.clear();
        let mut discarded = 0;

        loop {
            let Some(io) = self.io.as_mut() else {
                return Err(self.closed());
            };
            match tokio::time::timeout(quiet, io.read(&mut self.buffer)).await {
                Ok(Ok(0)) => {
                    return Err(SessionError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "instrument closed the connection",
                    )))
                }
                Ok(Ok(n)) => {
                    trace!("{}: discarding {} late bytes", self.address, n);
                    discarded += n;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => break,
            }
        }

        if self.out_of_step {
            info!("{}: back in step, {} bytes discarded", self.address, discarded);
        }
        self.out_of_step = false;
        Ok(discarded)
    }

    /// Drain device errors collected by [`send`](Self::send)
    pub fn take_device_errors(&mut self) -> Vec<InstrumentError> {
        std::mem::take(&mut self.device_errors)
    }

    /// Close the session
    ///
    /// Safe to call any number of times. The handle is released even if the
    /// shutdown handshake fails.
    pub async fn close(&mut self) {
        let Some(mut io) = self.io.take() else {
            return;
        };
        self.codec.clear();

        if let Err(e) = io.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.address, e);
        }
        drop(io);
        info!("Closed session to {}", self.address);
    }

    fn closed(&self) -> SessionError {
        SessionError::Closed(self.address.clone())
    }

    async fn write_line(&mut self, command: &str) -> Result<(), SessionError> {
        let timeout = self.config.timeout;
        let address = &self.address;
        let io = self
            .io
            .as_mut()
            .ok_or_else(|| SessionError::Closed(address.clone()))?;

        debug!("{} <- {}", address, command);
        let bytes = encode_line(command);
        let write = async {
            io.write_all(&bytes).await?;
            io.flush().await?;
            Ok::<(), io::Error>(())
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::Timeout {
                address: address.clone(),
                command: command.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn read_line(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.codec.next_line() {
                Some(Ok(line)) => {
                    debug!("{} -> {}", self.address, line);
                    return Ok(line);
                }
                Some(Err(source)) => {
                    warn!("{}: discarding reply to {}: {}", self.address, command, source);
                    return Err(SessionError::InvalidResponse {
                        command: command.to_string(),
                        source,
                    });
                }
                None => {}
            }

            let Some(io) = self.io.as_mut() else {
                return Err(self.closed());
            };

            match tokio::time::timeout_at(deadline, io.read(&mut self.buffer)).await {
                Ok(Ok(0)) => {
                    return Err(SessionError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "instrument closed the connection",
                    )))
                }
                Ok(Ok(n)) => {
                    trace!("{}: read {} bytes", self.address, n);
                    self.codec.push_bytes(&self.buffer[..n]);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    // Partial reply belongs to the abandoned query
                    self.codec.clear();
                    self.out_of_step = true;
                    warn!(
                        "{}: no reply to {} within {}ms",
                        self.address,
                        command,
                        timeout.as_millis()
                    );
                    return Err(SessionError::Timeout {
                        address: self.address.clone(),
                        command: command.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }
    }

    async fn check_error_queue(&mut self, command: &str) -> Result<(), SessionError> {
        let query = InstrumentRequest::NextError.encode();
        let reply = self.ask(&query).await?;
        let entry = ErrorEntry::parse(&reply).map_err(|source| SessionError::InvalidResponse {
            command: query,
            source,
        })?;

        if entry.is_error() {
            warn!(
                "{}: {} raised error {} \"{}\"",
                self.address, command, entry.code, entry.message
            );
            self.device_errors.push(InstrumentError {
                address: self.address.clone(),
                command: command.to_string(),
                code: entry.code,
                message: entry.message,
            });
        }
        Ok(())
    }
}
