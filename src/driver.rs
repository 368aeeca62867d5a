use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::board;
use crate::config::{AvailablePins, DriveMode, DriverKind, NumberingScheme};
use crate::error::GpioError;
use crate::gpio::{GpioBackend, LogicalPin, PinState, PinStatus};

pub type DriverHandle = Arc<Driver>;

pub struct Driver {
    backend: Arc<dyn GpioBackend>,
    available: FxHashSet<LogicalPin>,
    output_pins: Vec<LogicalPin>,
    scheme: NumberingScheme,
    modes: RwLock<FxHashMap<LogicalPin, DriveMode>>,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("kind", &self.kind())
            .field("scheme", &self.scheme)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl Driver {
    pub fn initialize(
        backend: Arc<dyn GpioBackend>,
        pins: &AvailablePins,
        scheme: NumberingScheme,
    ) -> Result<DriverHandle, GpioError> {
        let kind = backend.kind();

        if !backend.is_initialized() {
            backend.init(scheme).map_err(|e| match e {
                GpioError::DriverInitializationFailed { .. } => e,
                other => GpioError::init_failed(kind, other.to_string()),
            })?;
            info!("{kind:?} driver initialized with {scheme:?} numbering");
        }

        Ok(Arc::new(Self {
            backend,
            available: pins.all(),
            output_pins: pins.output_pins.clone(),
            scheme,
            modes: RwLock::new(FxHashMap::default()),
        }))
    }

    pub fn kind(&self) -> DriverKind {
        self.backend.kind()
    }

    pub fn numbering_scheme(&self) -> NumberingScheme {
        self.scheme
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_initialized()
    }

    fn ensure_ready(&self) -> Result<(), GpioError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(GpioError::DriverNotInitialized)
        }
    }

    // configured, on the header, and addressable by the backend
    pub fn is_valid_pin(&self, pin: LogicalPin) -> bool {
        self.available.contains(&pin) && board::is_board_pin(pin) && self.backend.supports_pin(pin)
    }

    pub fn physical_pin(&self, pin: LogicalPin) -> Option<u8> {
        board::to_physical(pin)
    }

    pub fn mode(&self, pin: LogicalPin) -> Option<DriveMode> {
        self.modes.read().get(&pin).copied()
    }

    pub fn set_mode(&self, pin: LogicalPin, mode: DriveMode) -> bool {
        if self.ensure_ready().is_err() {
            return false;
        }
        if !self.is_valid_pin(pin) {
            warn!("The specified pin {pin} is invalid.");
            return false;
        }

        match self.backend.set_mode(pin, mode) {
            Ok(()) => {
                self.modes.write().insert(pin, mode);
                true
            }
            Err(e) => {
                error!("Failed to set pin {pin} to {mode:?}: {e}");
                false
            }
        }
    }

    pub fn read_digital(&self, pin: LogicalPin) -> Result<bool, GpioError> {
        self.ensure_ready()?;
        if !self.is_valid_pin(pin) {
            return Err(GpioError::InvalidPin(pin));
        }

        self.backend.read_value(pin)
    }

    pub fn read_state(&self, pin: LogicalPin) -> Result<PinState, GpioError> {
        self.read_digital(pin).map(PinState::from_digital)
    }

    pub fn write_digital(&self, pin: LogicalPin, state: PinState) -> bool {
        if self.ensure_ready().is_err() {
            return false;
        }
        if !self.is_valid_pin(pin) {
            warn!("The specified pin {pin} is invalid.");
            return false;
        }

        match self.backend.write_value(pin, state.to_digital()) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to write {state:?} to pin {pin}: {e}");
                false
            }
        }
    }

    pub fn pin_status(&self, pin: LogicalPin) -> Option<PinStatus> {
        let state = self.read_state(pin).ok()?;

        Some(PinStatus {
            pin,
            physical: self.physical_pin(pin),
            mode: self.mode(pin),
            state,
        })
    }

    pub fn shutdown(&self, graceful: bool) {
        if !self.is_ready() {
            return;
        }

        if graceful {
            for &pin in &self.output_pins {
                if self.mode(pin) != Some(DriveMode::Output) {
                    continue;
                }
                if let Ok(PinState::On) = self.read_state(pin)
                    && self.write_digital(pin, PinState::Off)
                {
                    info!("Closed pin {pin} as part of shutdown process.");
                }
            }
        }

        self.backend.release();
        self.modes.write().clear();
        info!("{:?} driver shut down", self.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockGpioBackend;

    fn pins() -> AvailablePins {
        AvailablePins {
            output_pins: vec![17, 27],
            input_pins: vec![4],
        }
    }

    fn driver_with(mock: Arc<MockGpioBackend>) -> DriverHandle {
        Driver::initialize(mock, &pins(), NumberingScheme::Logical).unwrap()
    }

    #[test]
    fn validity_needs_config_board_and_backend() {
        let mock = Arc::new(MockGpioBackend::with_supported_pins([4, 17]));
        let driver = driver_with(mock);

        assert!(driver.is_valid_pin(17));
        assert!(driver.is_valid_pin(4));
        // configured, but the backend cannot address it
        assert!(!driver.is_valid_pin(27));
        // not configured
        assert!(!driver.is_valid_pin(22));
        assert!(!driver.is_valid_pin(99));
    }

    #[test]
    fn writes_are_active_low() {
        let mock = Arc::new(MockGpioBackend::default());
        let driver = driver_with(mock.clone());

        assert!(driver.set_mode(17, DriveMode::Output));
        assert!(driver.write_digital(17, PinState::On));
        assert_eq!(mock.value(17), Some(false));
        assert_eq!(driver.read_state(17).unwrap(), PinState::On);

        assert!(driver.write_digital(17, PinState::Off));
        assert_eq!(mock.value(17), Some(true));
    }

    #[test]
    fn every_read_reaches_the_backend() {
        let mock = Arc::new(MockGpioBackend::default());
        let driver = driver_with(mock.clone());
        driver.set_mode(4, DriveMode::Input);

        for _ in 0..5 {
            driver.read_digital(4).unwrap();
        }
        assert_eq!(mock.reads(4), 5);
    }

    #[test]
    fn write_failures_are_reported_as_false() {
        let mock = Arc::new(MockGpioBackend::default());
        let driver = driver_with(mock.clone());
        driver.set_mode(17, DriveMode::Output);

        mock.fail_writes(true);
        assert!(!driver.write_digital(17, PinState::On));
        mock.fail_writes(false);
        assert!(driver.write_digital(17, PinState::On));
    }

    #[test]
    fn invalid_pins_are_not_touched() {
        let mock = Arc::new(MockGpioBackend::default());
        let driver = driver_with(mock.clone());

        assert!(!driver.set_mode(99, DriveMode::Output));
        assert!(!driver.write_digital(99, PinState::On));
        assert!(matches!(
            driver.read_digital(99),
            Err(GpioError::InvalidPin(99))
        ));
        assert_eq!(mock.reads(99), 0);
    }

    #[test]
    fn status_reports_mode_and_header_position() {
        let mock = Arc::new(MockGpioBackend::default());
        let driver = driver_with(mock);
        driver.set_mode(17, DriveMode::Output);
        driver.write_digital(17, PinState::On);

        let status = driver.pin_status(17).unwrap();
        assert_eq!(status.physical, Some(11));
        assert_eq!(status.mode, Some(DriveMode::Output));
        assert_eq!(status.state, PinState::On);
    }

    #[test]
    fn graceful_shutdown_turns_relays_off() {
        let mock = Arc::new(MockGpioBackend::default());
        let driver = driver_with(mock.clone());
        driver.set_mode(17, DriveMode::Output);
        driver.write_digital(17, PinState::On);

        driver.shutdown(true);

        assert_eq!(mock.writes(17), vec![false, true]);
        assert!(!driver.is_ready());
        assert!(matches!(
            driver.read_digital(17),
            Err(GpioError::DriverNotInitialized)
        ));
    }

    #[test]
    fn second_initialize_does_not_restart_backend() {
        let mock = Arc::new(MockGpioBackend::default());
        driver_with(mock.clone());
        driver_with(mock.clone());
        assert_eq!(mock.init_count(), 1);
    }

    #[test]
    fn debug_names_the_backend() {
        let driver = driver_with(Arc::new(MockGpioBackend::default()));
        let text = format!("{driver:?}");

        assert!(text.contains("Mock"));
        assert!(text.contains("ready: true"));
    }
}
