use std::sync::Arc;

use log::{error, warn};
use parking_lot::Mutex;

use crate::backend;
use crate::config::{DriverKind, GpioConfig, NumberingScheme};
use crate::driver::{Driver, DriverHandle};
use crate::error::GpioError;
use crate::gpio::{GpioBackend, LogicalPin};

pub fn is_supported_platform() -> bool {
    cfg!(target_os = "linux") && cfg!(any(target_arch = "arm", target_arch = "aarch64"))
}

pub struct PinController {
    config: Arc<GpioConfig>,
    driver: Mutex<Option<DriverHandle>>,
}

impl PinController {
    pub fn new(config: Arc<GpioConfig>) -> Self {
        Self {
            config,
            driver: Mutex::new(None),
        }
    }

    // later calls return the existing handle until it is shut down
    pub fn init(&self, kind: DriverKind, scheme: NumberingScheme) -> Result<DriverHandle, GpioError> {
        let mut slot = self.driver.lock();
        if let Some(driver) = Self::live(&slot) {
            return Ok(driver);
        }

        if kind != DriverKind::Mock && !is_supported_platform() {
            warn!("Running OS platform is unsupported.");
            return Err(GpioError::init_failed(kind, "unsupported platform"));
        }

        let backend = backend::create(kind, &self.config)?;
        let driver = Self::initialize(backend, &self.config, scheme)?;
        *slot = Some(driver.clone());
        Ok(driver)
    }

    pub fn init_with_backend(
        &self,
        backend: Arc<dyn GpioBackend>,
        scheme: NumberingScheme,
    ) -> Result<DriverHandle, GpioError> {
        let mut slot = self.driver.lock();
        if let Some(driver) = Self::live(&slot) {
            return Ok(driver);
        }

        let driver = Self::initialize(backend, &self.config, scheme)?;
        *slot = Some(driver.clone());
        Ok(driver)
    }

    fn live(slot: &Option<DriverHandle>) -> Option<DriverHandle> {
        slot.as_ref().filter(|driver| driver.is_ready()).cloned()
    }

    fn initialize(
        backend: Arc<dyn GpioBackend>,
        config: &GpioConfig,
        scheme: NumberingScheme,
    ) -> Result<DriverHandle, GpioError> {
        let kind = backend.kind();
        Driver::initialize(backend, &config.pins, scheme).inspect_err(|e| {
            error!("{kind:?} failed to initialize properly: {e}");
        })
    }

    pub fn driver(&self) -> Result<DriverHandle, GpioError> {
        self.driver
            .lock()
            .as_ref()
            .filter(|driver| driver.is_ready())
            .cloned()
            .ok_or(GpioError::DriverNotInitialized)
    }

    pub fn is_allowed_to_execute(&self) -> bool {
        self.driver().is_ok()
    }

    pub fn is_valid_pin(&self, pin: LogicalPin) -> bool {
        self.driver()
            .map(|driver| driver.is_valid_pin(pin))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockGpioBackend;

    fn config() -> Arc<GpioConfig> {
        Arc::new(
            GpioConfig::from_json(
                r#"{ "driver": "mock", "pins": { "output_pins": [17], "input_pins": [4] } }"#,
            )
            .unwrap(),
        )
    }

    #[test]
    fn gate_is_closed_before_init() {
        let controller = PinController::new(config());

        assert!(!controller.is_allowed_to_execute());
        assert!(!controller.is_valid_pin(17));
        assert!(matches!(
            controller.driver(),
            Err(GpioError::DriverNotInitialized)
        ));
    }

    #[test]
    fn init_is_idempotent() {
        let controller = PinController::new(config());
        let mock = Arc::new(MockGpioBackend::default());

        let first = controller
            .init_with_backend(mock.clone(), NumberingScheme::Logical)
            .unwrap();
        let second = controller
            .init_with_backend(mock.clone(), NumberingScheme::Logical)
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mock.init_count(), 1);
        assert!(controller.is_allowed_to_execute());
        assert!(controller.is_valid_pin(17));
        assert!(!controller.is_valid_pin(99));
    }

    #[test]
    fn factory_init_keeps_the_first_handle() {
        let controller = PinController::new(config());

        let first = controller
            .init(DriverKind::Mock, NumberingScheme::Logical)
            .unwrap();
        let second = controller
            .init(DriverKind::Mock, NumberingScheme::Board)
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.numbering_scheme(), NumberingScheme::Logical);
        assert_eq!(second.kind(), DriverKind::Mock);
    }

    #[test]
    fn failed_init_leaves_gate_closed() {
        let controller = PinController::new(config());
        let missing = Arc::new(crate::backend::SysfsBackend::new("/nonexistent/gpio"));

        let err = controller
            .init_with_backend(missing, NumberingScheme::Logical)
            .unwrap_err();

        assert!(matches!(err, GpioError::DriverInitializationFailed { .. }));
        assert!(!controller.is_allowed_to_execute());
    }

    #[test]
    fn hardware_backends_need_a_supported_platform() {
        let controller = PinController::new(config());
        let result = controller.init(DriverKind::Sysfs, NumberingScheme::Logical);

        if !is_supported_platform() {
            assert!(matches!(
                result,
                Err(GpioError::DriverInitializationFailed {
                    driver: DriverKind::Sysfs,
                    ..
                })
            ));
        }
    }

    #[test]
    fn released_driver_closes_the_gate() {
        let controller = PinController::new(config());
        let driver = controller
            .init_with_backend(Arc::new(MockGpioBackend::default()), NumberingScheme::Logical)
            .unwrap();

        driver.shutdown(false);

        assert!(!controller.is_allowed_to_execute());
    }

    #[test]
    fn init_after_shutdown_builds_a_fresh_driver() {
        let controller = PinController::new(config());
        let mock = Arc::new(MockGpioBackend::default());
        let first = controller
            .init_with_backend(mock.clone(), NumberingScheme::Logical)
            .unwrap();
        first.shutdown(false);

        let second = controller
            .init_with_backend(mock.clone(), NumberingScheme::Logical)
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_ready());
        assert!(controller.is_allowed_to_execute());
        assert_eq!(mock.init_count(), 2);

        second.shutdown(false);
        let third = controller
            .init(DriverKind::Mock, NumberingScheme::Logical)
            .unwrap();
        assert!(third.is_ready());
        assert!(controller.is_allowed_to_execute());
    }
}
