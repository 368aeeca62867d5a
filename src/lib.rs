mod backend;
pub mod board;
mod config;
mod controller;
mod driver;
mod error;
mod generator;
mod gpio;
mod manager;
pub mod morse;
pub mod relay;

pub use config::{AvailablePins, DriveMode, DriverKind, GpioConfig, NumberingScheme, TransitionFilter};
pub use controller::{PinController, is_supported_platform};
pub use driver::{Driver, DriverHandle};
pub use error::GpioError;
pub use generator::{EventConfig, EventGenerator, GeneratorState};
pub use gpio::{
    EventCallbackHandler, EventHandler, GpioBackend, LogicalPin, PinCallback, PinEvent, PinState,
    PinStatus, SampledValue,
};
pub use manager::{GpioCore, WatchHandle};

#[cfg(feature = "hardware-gpio")]
pub use backend::{LibgpiodBackend, WiringPiBackend};
pub use backend::{MockGpioBackend, SysfsBackend, create as create_backend};
