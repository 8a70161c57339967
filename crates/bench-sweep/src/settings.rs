//! Saved settings
//!
//! A flat YAML document of named parameters (instrument addresses, sweep
//! bounds, power, bandwidth, last used values). The document is read and
//! written wholesale. Keys the controller does not know about are kept as
//! they are and written back unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, info};

use crate::error::{SettingsError, SweepError};
use crate::plan::SweepPlan;

/// Analyzer address
pub const KEY_ANALYZER: &str = "IP_SA";
/// Signal generator address
pub const KEY_GENERATOR: &str = "IP_SG";
/// First set-point in MHz
pub const KEY_START: &str = "Fstart";
/// Last set-point in MHz
pub const KEY_STOP: &str = "Fstop";
/// Number of set-points
pub const KEY_POINTS: &str = "Npoints";
/// Analyzer span in MHz
pub const KEY_SPAN: &str = "Span";
/// Analyzer resolution bandwidth in MHz
pub const KEY_RBW: &str = "RBW";
/// Generator output power in dBm
pub const KEY_POWER: &str = "Pout";
/// Dwell per set-point in milliseconds
pub const KEY_DWELL: &str = "Dwell_ms";
/// Session reply timeout in milliseconds
pub const KEY_TIMEOUT: &str = "Timeout_ms";

/// Flat mapping of named parameters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, Value>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in defaults for a bench sweep
    pub fn bench_defaults() -> Self {
        let mut settings = Self::new();
        settings.set(KEY_ANALYZER, "TCPIP0::192.168.1.20::INSTR");
        settings.set(KEY_GENERATOR, "TCPIP0::192.168.1.21::INSTR");
        settings.set(KEY_START, 100.0);
        settings.set(KEY_STOP, 1000.0);
        settings.set(KEY_POINTS, 10u64);
        settings.set(KEY_SPAN, 1.0);
        settings.set(KEY_RBW, 0.1);
        settings.set(KEY_POWER, -10.0);
        settings.set(KEY_DWELL, 0u64);
        settings.set(KEY_TIMEOUT, 5000u64);
        settings
    }

    /// Get the XDG config directory for benchsweep
    /// Uses $XDG_CONFIG_HOME/benchsweep, falls back to ~/.config/benchsweep
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("benchsweep"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("benchsweep"))
    }

    /// Location of the last-used settings document
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        Self::config_dir()
            .map(|p| p.join("last.yaml"))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Read a whole document
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml(&text)?;
        debug!("Loaded {} settings from {}", settings.len(), path.display());
        Ok(settings)
    }

    /// Defaults overridden by every key present in the document at `path`
    pub fn load_over(defaults: Self, path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let mut settings = defaults;
        settings.merge(Self::load(path)?);
        Ok(settings)
    }

    /// Parse a YAML document; an empty document is an empty mapping
    pub fn from_yaml(text: &str) -> Result<Self, SettingsError> {
        let value: Value = serde_yaml::from_str(text)?;
        match value {
            Value::Null => Ok(Self::new()),
            Value::Mapping(_) => Ok(serde_yaml::from_value(value)?),
            _ => Err(SettingsError::NotAMapping),
        }
    }

    pub fn to_yaml(&self) -> Result<String, SettingsError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the whole document, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_yaml()?)?;
        info!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Copy every key of `other` over this mapping
    pub fn merge(&mut self, other: Settings) {
        self.values.extend(other.values);
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Numeric value; integers are widened
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require_f64(&self, key: &str) -> Result<f64, SweepError> {
        self.get_f64(key)
            .ok_or_else(|| SweepError::Configuration(format!("missing or non-numeric {}", key)))
    }

    /// Linear sweep plan from `Fstart`, `Fstop`, `Npoints`, `Span`, `RBW`
    /// and the optional `Dwell_ms` / `Pout`
    pub fn sweep_plan(&self) -> Result<SweepPlan, SweepError> {
        let start = self.require_f64(KEY_START)?;
        let stop = self.require_f64(KEY_STOP)?;
        let points = self.get_u64(KEY_POINTS).ok_or_else(|| {
            SweepError::Configuration(format!("missing or invalid {}", KEY_POINTS))
        })?;
        let span = self.require_f64(KEY_SPAN)?;
        let rbw = self.require_f64(KEY_RBW)?;

        let points = usize::try_from(points).map_err(|_| {
            SweepError::Configuration(format!("{} of {} is out of range", KEY_POINTS, points))
        })?;
        let mut plan = SweepPlan::linear(start, stop, points, span, rbw)?;
        if let Some(dwell) = self.get_u64(KEY_DWELL) {
            plan = plan.with_dwell(Duration::from_millis(dwell));
        }
        if let Some(power) = self.get_f64(KEY_POWER) {
            plan = plan.with_source_power(power);
        }
        Ok(plan)
    }

    /// Session reply timeout, if configured
    pub fn timeout(&self) -> Option<Duration> {
        self.get_u64(KEY_TIMEOUT).map(Duration::from_millis)
    }
}
