//! Normalized instrument requests
//!
//! This module provides the `InstrumentRequest` enum which is the common
//! representation of everything the sweep controller asks an analyzer or a
//! signal generator to do, together with the SCPI text each request encodes
//! to.

use std::fmt;

use crate::error::ParseError;

/// Operation event register bit signalling a finished sweep
pub const SWEEP_COMPLETE_MASK: u16 = 16;

/// Analyzer trace modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TraceMode {
    /// Clear/write: every sweep replaces the trace
    ClearWrite,
    /// Trace averaging
    Average,
    /// Maximum hold
    MaxHold,
    /// Minimum hold
    MinHold,
    /// Frozen trace
    View,
    /// Trace hidden
    Blank,
}

impl TraceMode {
    /// Short-form SCPI mnemonic
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::ClearWrite => "WRIT",
            Self::Average => "AVER",
            Self::MaxHold => "MAXH",
            Self::MinHold => "MINH",
            Self::View => "VIEW",
            Self::Blank => "BLAN",
        }
    }

    /// Parse a short or long form mnemonic (`WRIT`, `WRITe`, `MAXHold`, ...)
    pub fn from_mnemonic(text: &str) -> Result<Self, ParseError> {
        let upper = text.trim().to_ascii_uppercase();
        let mode = match upper.as_str() {
            "WRIT" | "WRITE" | "CLEARWRITE" => Self::ClearWrite,
            "AVER" | "AVERAGE" => Self::Average,
            "MAXH" | "MAXHOLD" => Self::MaxHold,
            "MINH" | "MINHOLD" => Self::MinHold,
            "VIEW" => Self::View,
            "BLAN" | "BLANK" => Self::Blank,
            _ => return Err(ParseError::UnknownMnemonic(text.trim().to_string())),
        };
        Ok(mode)
    }
}

/// Analyzer detector types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Detector {
    /// Average (RMS) detector
    Average,
    /// Normal detector (positive peak on even bins, negative on odd)
    Normal,
    /// Sample detector
    Sample,
    /// Positive peak
    Positive,
    /// Negative peak
    Negative,
    /// Quasi-peak
    QuasiPeak,
    /// EMI average
    EmiAverage,
    /// RMS average
    RmsAverage,
}

impl Detector {
    /// Short-form SCPI mnemonic
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Average => "AVER",
            Self::Normal => "NORM",
            Self::Sample => "SAMP",
            Self::Positive => "POS",
            Self::Negative => "NEG",
            Self::QuasiPeak => "QPE",
            Self::EmiAverage => "EAV",
            Self::RmsAverage => "RAV",
        }
    }

    /// Parse a short or long form mnemonic (`AVER`, `AVERage`, `POSitive`, ...)
    pub fn from_mnemonic(text: &str) -> Result<Self, ParseError> {
        let upper = text.trim().to_ascii_uppercase();
        let detector = match upper.as_str() {
            "AVER" | "AVERAGE" | "RMS" => Self::Average,
            "NORM" | "NORMAL" => Self::Normal,
            "SAMP" | "SAMPLE" => Self::Sample,
            "POS" | "POSITIVE" => Self::Positive,
            "NEG" | "NEGATIVE" => Self::Negative,
            "QPE" | "QPEAK" | "QPEAKAVERAGE" => Self::QuasiPeak,
            "EAV" | "EAVERAGE" => Self::EmiAverage,
            "RAV" | "RAVERAGE" => Self::RmsAverage,
            _ => return Err(ParseError::UnknownMnemonic(text.trim().to_string())),
        };
        Ok(detector)
    }
}

/// Instrument settings that can be read back and restored verbatim
///
/// Restoring writes the raw reply text back after the header, so values
/// round-trip in the instrument's own units and formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Setting {
    /// Analyzer resolution bandwidth
    ResolutionBandwidth,
    /// Analyzer frequency span
    Span,
    /// Analyzer center frequency
    CenterFrequency,
    /// Analyzer trace mode
    TraceMode,
    /// Analyzer detector
    Detector,
    /// Analyzer continuous (free running) sweep
    ContinuousSweep,
    /// Analyzer display reference level
    ReferenceLevel,
    /// Generator CW frequency
    SourceFrequency,
    /// Generator output power level
    SourcePower,
    /// Generator RF output state
    Output,
    /// Generator modulation state
    Modulation,
}

impl Setting {
    /// Command header for this setting
    pub fn header(&self) -> &'static str {
        match self {
            Self::ResolutionBandwidth => "SENS:BAND:RES",
            Self::Span => "SENS:FREQ:SPAN",
            Self::CenterFrequency => "SENS:FREQ:CENT",
            Self::TraceMode => ":TRAC1:TYPE",
            Self::Detector => "SENS:DET",
            Self::ContinuousSweep => "INIT:CONT",
            Self::ReferenceLevel => "DISP:WIND:TRAC:Y:RLEV",
            Self::SourceFrequency => "FREQ",
            Self::SourcePower => "POW:LEV",
            Self::Output => "OUTP",
            Self::Modulation => "OUTP:MOD:STAT",
        }
    }

    /// Query text for reading the current value
    pub fn query(&self) -> String {
        format!("{}?", self.header())
    }

    /// Command text writing back a previously queried raw value
    pub fn restore(&self, raw: &str) -> String {
        format!("{} {}", self.header(), raw.trim())
    }

    /// Human-readable name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResolutionBandwidth => "resolution bandwidth",
            Self::Span => "span",
            Self::CenterFrequency => "center frequency",
            Self::TraceMode => "trace mode",
            Self::Detector => "detector",
            Self::ContinuousSweep => "continuous sweep",
            Self::ReferenceLevel => "reference level",
            Self::SourceFrequency => "source frequency",
            Self::SourcePower => "source power",
            Self::Output => "RF output",
            Self::Modulation => "modulation",
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized request that the sweep controller sends to an instrument
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstrumentRequest {
    /// Identification query (`*IDN?`)
    Identify,

    /// Reset to defaults (`*RST`)
    Reset,

    /// Clear status registers and the error queue (`*CLS`)
    ClearStatus,

    /// Pop the next entry from the error queue (`SYST:ERR?`)
    NextError,

    /// Block until pending operations finish, replies `1` (`*OPC?`)
    OperationComplete,

    /// Read the current value of a setting
    Get(Setting),

    /// Write back a raw value previously read with [`InstrumentRequest::Get`]
    Restore {
        /// Setting to restore
        setting: Setting,
        /// Raw reply text captured earlier
        raw: String,
    },

    /// Set the analyzer center frequency
    SetCenterFrequency { mhz: f64 },

    /// Set the analyzer span
    SetSpan { mhz: f64 },

    /// Set the analyzer resolution bandwidth
    SetResolutionBandwidth { mhz: f64 },

    /// Set the analyzer trace mode
    SetTraceMode { mode: TraceMode },

    /// Set the analyzer detector
    SetDetector { detector: Detector },

    /// Enable or disable continuous sweeping
    SetContinuousSweep { enabled: bool },

    /// Set the display reference level
    SetReferenceLevel { dbm: f64 },

    /// Start a single sweep
    InitiateSweep,

    /// Enable bits in the operation status enable register
    EnableOperationEvents { mask: u16 },

    /// Read (and clear) the operation event register
    OperationEvents,

    /// Move the marker to the trace maximum
    MarkerToPeak,

    /// Read the marker amplitude
    MarkerAmplitude,

    /// Set the generator CW frequency
    SetSourceFrequency { mhz: f64 },

    /// Set the generator output power
    SetSourcePower { dbm: f64 },

    /// Switch the generator RF output
    SetOutput { on: bool },

    /// Switch the generator modulation
    SetModulation { on: bool },
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

impl InstrumentRequest {
    /// Encode this request to its SCPI command text (without terminator)
    pub fn encode(&self) -> String {
        match self {
            Self::Identify => "*IDN?".to_string(),
            Self::Reset => "*RST".to_string(),
            Self::ClearStatus => "*CLS".to_string(),
            Self::NextError => "SYST:ERR?".to_string(),
            Self::OperationComplete => "*OPC?".to_string(),
            Self::Get(setting) => setting.query(),
            Self::Restore { setting, raw } => setting.restore(raw),
            Self::SetCenterFrequency { mhz } => {
                format!("{} {} MHz", Setting::CenterFrequency.header(), mhz)
            }
            Self::SetSpan { mhz } => format!("{} {} MHz", Setting::Span.header(), mhz),
            Self::SetResolutionBandwidth { mhz } => {
                format!("{} {} MHz", Setting::ResolutionBandwidth.header(), mhz)
            }
            Self::SetTraceMode { mode } => {
                format!("{} {}", Setting::TraceMode.header(), mode.mnemonic())
            }
            Self::SetDetector { detector } => {
                format!("{} {}", Setting::Detector.header(), detector.mnemonic())
            }
            Self::SetContinuousSweep { enabled } => {
                format!("{} {}", Setting::ContinuousSweep.header(), on_off(*enabled))
            }
            Self::SetReferenceLevel { dbm } => {
                format!("{} {}", Setting::ReferenceLevel.header(), dbm)
            }
            Self::InitiateSweep => "INIT:IMM".to_string(),
            Self::EnableOperationEvents { mask } => format!(":STAT:OPER:ENAB {}", mask),
            Self::OperationEvents => ":STAT:OPER:EVEN?".to_string(),
            Self::MarkerToPeak => "CALC:MARK:MAX".to_string(),
            Self::MarkerAmplitude => "CALC:MARK:Y?".to_string(),
            Self::SetSourceFrequency { mhz } => {
                format!("{} {} MHz", Setting::SourceFrequency.header(), mhz)
            }
            Self::SetSourcePower { dbm } => {
                format!("{} {} dBm", Setting::SourcePower.header(), dbm)
            }
            Self::SetOutput { on } => format!("{} {}", Setting::Output.header(), on_off(*on)),
            Self::SetModulation { on } => {
                format!("{} {}", Setting::Modulation.header(), on_off(*on))
            }
        }
    }

    /// Returns true if the instrument answers this request with a reply line
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Self::Identify
                | Self::NextError
                | Self::OperationComplete
                | Self::Get(_)
                | Self::OperationEvents
                | Self::MarkerAmplitude
        )
    }
}

impl fmt::Display for InstrumentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
