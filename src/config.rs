use std::{fs, path::Path, path::PathBuf, time::Duration};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::GpioError;
use crate::gpio::LogicalPin;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1;
const DEFAULT_BROADCAST_CAPACITY: usize = 64;
const DEFAULT_EVENT_HISTORY_CAPACITY: usize = 32;
const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
const DEFAULT_GPIOCHIP: &str = "/dev/gpiochip0";

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    Libgpiod,
    Sysfs,
    WiringPi,
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NumberingScheme {
    #[default]
    Logical,
    Board,
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DriveMode {
    Input,
    Output,
    Alt1,
    Alt2,
}

impl DriveMode {
    pub fn is_pollable(&self) -> bool {
        matches!(self, DriveMode::Input | DriveMode::Output)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionFilter {
    OnOnly,
    OffOnly,
    #[default]
    Any,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AvailablePins {
    #[serde(default)]
    pub output_pins: Vec<LogicalPin>,
    #[serde(default)]
    pub input_pins: Vec<LogicalPin>,
}

impl AvailablePins {
    pub fn contains(&self, pin: LogicalPin) -> bool {
        self.output_pins.contains(&pin) || self.input_pins.contains(&pin)
    }

    pub fn is_output(&self, pin: LogicalPin) -> bool {
        self.output_pins.contains(&pin)
    }

    pub fn all(&self) -> FxHashSet<LogicalPin> {
        self.output_pins
            .iter()
            .chain(self.input_pins.iter())
            .copied()
            .collect()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpioConfig {
    pub driver: DriverKind,
    #[serde(default)]
    pub numbering_scheme: NumberingScheme,
    pub pins: AvailablePins,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_graceful_shutdown")]
    pub graceful_shutdown: bool,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_event_history_capacity")]
    pub event_history_capacity: usize,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    #[serde(default = "default_gpiochip")]
    pub gpiochip: PathBuf,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_graceful_shutdown() -> bool {
    true
}

fn default_broadcast_capacity() -> usize {
    DEFAULT_BROADCAST_CAPACITY
}

fn default_event_history_capacity() -> usize {
    DEFAULT_EVENT_HISTORY_CAPACITY
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_ROOT)
}

fn default_gpiochip() -> PathBuf {
    PathBuf::from(DEFAULT_GPIOCHIP)
}

impl GpioConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, GpioError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GpioError> {
        if let Some(pin) = self
            .pins
            .input_pins
            .iter()
            .find(|pin| self.pins.output_pins.contains(pin))
        {
            return Err(GpioError::Config(format!(
                "pin {pin} is listed as both input and output"
            )));
        }
        if self.broadcast_capacity == 0 {
            return Err(GpioError::Config(
                "broadcast_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
