use thiserror::Error;

use crate::config::{DriveMode, DriverKind, TransitionFilter};
use crate::gpio::LogicalPin;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("{driver:?} driver failed to initialize: {reason}")]
    DriverInitializationFailed { driver: DriverKind, reason: String },
    #[error("GPIO driver is not initialized")]
    DriverNotInitialized,
    #[error("Invalid pin: {0}")]
    InvalidPin(LogicalPin),
    #[error("Drive mode {0:?} cannot be polled")]
    UnsupportedDriveMode(DriveMode),
    #[error("Pin {0} is already being watched")]
    AlreadyWatching(LogicalPin),
    #[error("Pin {0} is not being watched")]
    NotWatching(LogicalPin),
    #[error("Pin {pin} already has a {filter:?} listener")]
    DuplicateListener {
        pin: LogicalPin,
        filter: TransitionFilter,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO backend error: {0}")]
    Backend(String),
}

impl GpioError {
    pub(crate) fn init_failed(driver: DriverKind, reason: impl Into<String>) -> Self {
        GpioError::DriverInitializationFailed {
            driver,
            reason: reason.into(),
        }
    }
}
