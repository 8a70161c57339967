//! Instrument resource addresses
//!
//! Instruments are usually named with VISA resource strings. Only the two
//! transports the controller can open natively are understood:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `TCPIP[n]::<host>::INSTR` | LAN instrument, raw SCPI socket |
//! | `TCPIP[n]::<host>::inst0::INSTR` | same, VXI-11 device name ignored |
//! | `TCPIP[n]::<host>::<port>::SOCKET` | raw socket on an explicit port |
//! | `ASRL<port>::INSTR` | serial instrument (`ASRL3` means `COM3`) |
//! | `<host>` / `<host>:<port>` | plain LAN address |
//! | `/dev/ttyUSB0`, `COM3` | serial device path |

use std::fmt;

use crate::error::ParseError;

/// Conventional port of the raw SCPI socket service
pub const SCPI_RAW_PORT: u16 = 5025;

/// Where an instrument can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceAddress {
    /// Raw SCPI over TCP
    Tcpip { host: String, port: u16 },
    /// Serial port
    Serial { port: String },
}

fn invalid(text: &str) -> ParseError {
    ParseError::InvalidAddress(text.to_string())
}

fn is_serial_path(text: &str) -> bool {
    let upper = text.to_ascii_uppercase();
    text.starts_with("/dev/")
        || (upper.starts_with("COM")
            && upper.len() > 3
            && upper[3..].chars().all(|c| c.is_ascii_digit()))
}

fn parse_port(text: &str, original: &str) -> Result<u16, ParseError> {
    text.parse::<u16>()
        .ok()
        .filter(|&port| port != 0)
        .ok_or_else(|| invalid(original))
}

impl ResourceAddress {
    /// Parse a VISA resource string or a plain host / device path
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ParseError::Empty);
        }

        if trimmed.contains("::") {
            return Self::parse_visa(trimmed);
        }

        if is_serial_path(trimmed) {
            return Ok(Self::Serial {
                port: trimmed.to_string(),
            });
        }

        match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.contains(':') => Ok(Self::Tcpip {
                host: host.to_string(),
                port: parse_port(port, trimmed)?,
            }),
            Some(_) => Err(invalid(trimmed)),
            None => Ok(Self::Tcpip {
                host: trimmed.to_string(),
                port: SCPI_RAW_PORT,
            }),
        }
    }

    fn parse_visa(text: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = text.split("::").map(str::trim).collect();
        let interface = parts[0].to_ascii_uppercase();
        let resource_class = parts
            .last()
            .map(|class| class.to_ascii_uppercase())
            .unwrap_or_default();

        let board_ok = |prefix: &str| {
            interface
                .strip_prefix(prefix)
                .is_some_and(|board| board.chars().all(|c| c.is_ascii_digit()))
        };

        if board_ok("TCPIP") || interface == "HOST" {
            let host = parts.get(1).filter(|h| !h.is_empty()).ok_or_else(|| invalid(text))?;
            let port = match (parts.len(), resource_class.as_str()) {
                (3, "INSTR") => SCPI_RAW_PORT,
                // VXI-11 device name: the same instruments expose the raw socket
                (4, "INSTR") => SCPI_RAW_PORT,
                (4, "SOCKET") => parse_port(parts[2], text)?,
                _ => return Err(invalid(text)),
            };
            return Ok(Self::Tcpip {
                host: host.to_string(),
                port,
            });
        }

        if let Some(board) = interface.strip_prefix("ASRL") {
            if parts.len() != 2 || resource_class != "INSTR" || board.is_empty() {
                return Err(invalid(text));
            }
            let port = if board.chars().all(|c| c.is_ascii_digit()) {
                if cfg!(windows) {
                    format!("COM{}", board)
                } else {
                    format!("/dev/ttyS{}", board.parse::<u32>().unwrap_or(1).saturating_sub(1))
                }
            } else {
                // ASRL/dev/ttyUSB0::INSTR
                parts[0][4..].to_string()
            };
            return Ok(Self::Serial { port });
        }

        Err(invalid(text))
    }

    /// Returns true for network addresses
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Tcpip { .. })
    }
}

impl std::str::FromStr for ResourceAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcpip { host, port } if *port == SCPI_RAW_PORT => {
                write!(f, "TCPIP0::{}::INSTR", host)
            }
            Self::Tcpip { host, port } => write!(f, "TCPIP0::{}::{}::SOCKET", host, port),
            Self::Serial { port } => f.write_str(port),
        }
    }
}
