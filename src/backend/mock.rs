use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::board;
use crate::config::{DriveMode, DriverKind, NumberingScheme};
use crate::error::GpioError;
use crate::gpio::{GpioBackend, LogicalPin};

// lines idle high (relay off) until driven
#[derive(Default)]
pub struct MockGpioBackend {
    initialized: AtomicBool,
    init_count: AtomicUsize,
    scheme: RwLock<Option<NumberingScheme>>,
    supported: Option<FxHashSet<LogicalPin>>,
    pins: RwLock<FxHashMap<LogicalPin, MockPinState>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

struct MockPinState {
    mode: DriveMode,
    value: bool,
    scripted: VecDeque<bool>,
    reads: usize,
    writes: Vec<bool>,
}

impl MockPinState {
    fn new(mode: DriveMode) -> Self {
        Self {
            mode,
            value: true,
            scripted: VecDeque::new(),
            reads: 0,
            writes: Vec::new(),
        }
    }
}

impl MockGpioBackend {
    pub fn with_supported_pins(pins: impl IntoIterator<Item = LogicalPin>) -> Self {
        Self {
            supported: Some(pins.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn drive_external(&self, pin: LogicalPin, value: bool) {
        let mut pins = self.pins.write();
        let entry = pins
            .entry(pin)
            .or_insert_with(|| MockPinState::new(DriveMode::Input));
        entry.scripted.clear();
        entry.value = value;
    }

    // the last scripted value sticks
    pub fn script_reads(&self, pin: LogicalPin, values: impl IntoIterator<Item = bool>) {
        let mut pins = self.pins.write();
        let entry = pins
            .entry(pin)
            .or_insert_with(|| MockPinState::new(DriveMode::Input));
        entry.scripted.extend(values);
    }

    pub fn value(&self, pin: LogicalPin) -> Option<bool> {
        self.pins.read().get(&pin).map(|p| p.value)
    }

    pub fn mode(&self, pin: LogicalPin) -> Option<DriveMode> {
        self.pins.read().get(&pin).map(|p| p.mode)
    }

    pub fn reads(&self, pin: LogicalPin) -> usize {
        self.pins.read().get(&pin).map(|p| p.reads).unwrap_or(0)
    }

    pub fn writes(&self, pin: LogicalPin) -> Vec<bool> {
        self.pins
            .read()
            .get(&pin)
            .map(|p| p.writes.clone())
            .unwrap_or_default()
    }

    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    pub fn numbering_scheme(&self) -> Option<NumberingScheme> {
        *self.scheme.read()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl GpioBackend for MockGpioBackend {
    fn kind(&self) -> DriverKind {
        DriverKind::Mock
    }

    fn init(&self, scheme: NumberingScheme) -> Result<(), GpioError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.init_count.fetch_add(1, Ordering::SeqCst);
        *self.scheme.write() = Some(scheme);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn supports_pin(&self, pin: LogicalPin) -> bool {
        match &self.supported {
            Some(pins) => pins.contains(&pin),
            None => board::is_board_pin(pin),
        }
    }

    fn set_mode(&self, pin: LogicalPin, mode: DriveMode) -> Result<(), GpioError> {
        let mut pins = self.pins.write();
        pins.entry(pin)
            .and_modify(|p| p.mode = mode)
            .or_insert_with(|| MockPinState::new(mode));
        Ok(())
    }

    fn read_value(&self, pin: LogicalPin) -> Result<bool, GpioError> {
        let mut pins = self.pins.write();
        let pin = pins
            .get_mut(&pin)
            .ok_or_else(|| GpioError::Backend("pin not configured, set mode first".into()))?;

        pin.reads += 1;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GpioError::Backend("simulated read failure".into()));
        }
        if let Some(next) = pin.scripted.pop_front() {
            pin.value = next;
        }
        Ok(pin.value)
    }

    fn write_value(&self, pin: LogicalPin, value: bool) -> Result<(), GpioError> {
        let mut pins = self.pins.write();
        let pin = pins
            .get_mut(&pin)
            .ok_or_else(|| GpioError::Backend("pin not configured, set mode first".into()))?;

        if pin.mode != DriveMode::Output {
            return Err(GpioError::Backend(
                "pin must be in output mode to set value".into(),
            ));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GpioError::Backend("simulated write failure".into()));
        }

        pin.value = value;
        pin.writes.push(value);
        Ok(())
    }

    fn release(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }
}
