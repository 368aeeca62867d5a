use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{FairMutex, RwLock, RwLockUpgradableReadGuard};
use rppal::gpio::{Gpio, IoPin, Level, Mode};
use rustc_hash::FxHashMap;

use crate::board;
use crate::config::{DriveMode, DriverKind, NumberingScheme};
use crate::error::GpioError;
use crate::gpio::{GpioBackend, LogicalPin};

// Native BCM register access, the same pin multiplexing wiringPi offers,
// without going through the `gpio` utility.
pub struct WiringPiBackend {
    gpio: RwLock<Option<Gpio>>,
    scheme: RwLock<NumberingScheme>,
    initialized: AtomicBool,
    pins: RwLock<FxHashMap<LogicalPin, FairMutex<IoPin>>>, // keyed by BCM pin
}

impl Default for WiringPiBackend {
    fn default() -> Self {
        Self {
            gpio: RwLock::new(None),
            scheme: RwLock::new(NumberingScheme::Logical),
            initialized: AtomicBool::new(false),
            pins: RwLock::new(FxHashMap::default()),
        }
    }
}

fn pin_mode(mode: DriveMode) -> Mode {
    match mode {
        DriveMode::Input => Mode::Input,
        DriveMode::Output => Mode::Output,
        DriveMode::Alt1 => Mode::Alt1,
        DriveMode::Alt2 => Mode::Alt2,
    }
}

fn level(value: bool) -> Level {
    if value { Level::High } else { Level::Low }
}

fn apply_mode(io: &mut IoPin, mode: Mode) {
    if io.mode() == mode {
        return;
    }
    if mode == Mode::Output {
        // latch high first so an active-low relay stays released
        io.set_high();
    }
    io.set_mode(mode);
}

impl WiringPiBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn numbering_scheme(&self) -> NumberingScheme {
        *self.scheme.read()
    }

    fn with_pin<T>(
        &self,
        pin: LogicalPin,
        f: impl FnOnce(&mut IoPin) -> T,
    ) -> Result<T, GpioError> {
        let pins = self.pins.read();
        let io = pins
            .get(&pin)
            .ok_or_else(|| GpioError::Backend("pin not configured, set mode first".into()))?;
        Ok(f(&mut io.lock()))
    }
}

impl GpioBackend for WiringPiBackend {
    fn kind(&self) -> DriverKind {
        DriverKind::WiringPi
    }

    fn init(&self, scheme: NumberingScheme) -> Result<(), GpioError> {
        if self.is_initialized() {
            return Ok(());
        }

        let gpio = Gpio::new().map_err(|e| {
            GpioError::init_failed(DriverKind::WiringPi, format!("gpio peripheral: {e}"))
        })?;

        *self.gpio.write() = Some(gpio);
        *self.scheme.write() = scheme;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    // rppal addresses BCM numbers whatever the configured scheme
    fn supports_pin(&self, pin: LogicalPin) -> bool {
        board::is_board_pin(pin)
    }

    fn set_mode(&self, pin: LogicalPin, mode: DriveMode) -> Result<(), GpioError> {
        let target = pin_mode(mode);
        let pins = self.pins.upgradable_read();

        if let Some(io) = pins.get(&pin) {
            apply_mode(&mut io.lock(), target);
            return Ok(());
        }

        let gpio = self
            .gpio
            .read()
            .clone()
            .ok_or(GpioError::DriverNotInitialized)?;
        let mut io = gpio
            .get(pin)
            .map_err(|e| GpioError::Backend(format!("acquire pin {pin}: {e}")))?
            .into_io(Mode::Input);
        apply_mode(&mut io, target);

        let mut pins = RwLockUpgradableReadGuard::upgrade(pins);
        pins.insert(pin, FairMutex::new(io));
        Ok(())
    }

    fn read_value(&self, pin: LogicalPin) -> Result<bool, GpioError> {
        self.with_pin(pin, |io| io.read() == Level::High)
    }

    fn write_value(&self, pin: LogicalPin, value: bool) -> Result<(), GpioError> {
        self.with_pin(pin, |io| io.write(level(value)))
    }

    fn release(&self) {
        // IoPin restores the previous function when dropped
        self.pins.write().clear();
        *self.gpio.write() = None;
        self.initialized.store(false, Ordering::SeqCst);
    }
}
