#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;
pub mod sysfs;
#[cfg(feature = "hardware-gpio")]
pub mod wiringpi;

use std::sync::Arc;

use crate::config::{DriverKind, GpioConfig};
use crate::error::GpioError;
use crate::gpio::GpioBackend;

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use mock::MockGpioBackend;
pub use sysfs::SysfsBackend;
#[cfg(feature = "hardware-gpio")]
pub use wiringpi::WiringPiBackend;

// nothing touches hardware until init
pub fn create(kind: DriverKind, config: &GpioConfig) -> Result<Arc<dyn GpioBackend>, GpioError> {
    let backend: Arc<dyn GpioBackend> = match kind {
        #[cfg(feature = "hardware-gpio")]
        DriverKind::Libgpiod => Arc::new(LibgpiodBackend::new(&config.gpiochip)),
        #[cfg(feature = "hardware-gpio")]
        DriverKind::WiringPi => Arc::new(WiringPiBackend::new()),
        #[cfg(not(feature = "hardware-gpio"))]
        DriverKind::Libgpiod | DriverKind::WiringPi => {
            return Err(GpioError::init_failed(
                kind,
                "built without the hardware-gpio feature",
            ));
        }
        DriverKind::Sysfs => Arc::new(SysfsBackend::new(&config.sysfs_root)),
        DriverKind::Mock => Arc::new(MockGpioBackend::default()),
    };

    Ok(backend)
}
