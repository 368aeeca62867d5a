use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::board;
use crate::config::{DriveMode, DriverKind, NumberingScheme};
use crate::error::GpioError;
use crate::gpio::{GpioBackend, LogicalPin};

// always addressed by BCM number
pub struct SysfsBackend {
    root: PathBuf,
    initialized: AtomicBool,
    exported: Mutex<FxHashSet<LogicalPin>>,
}

impl SysfsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            initialized: AtomicBool::new(false),
            exported: Mutex::new(FxHashSet::default()),
        }
    }

    fn pin_dir(&self, pin: LogicalPin) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn ensure_exported(&self, pin: LogicalPin) -> Result<PathBuf, GpioError> {
        let dir = self.pin_dir(pin);
        let mut exported = self.exported.lock();
        if exported.contains(&pin) {
            return Ok(dir);
        }

        if !dir.is_dir() {
            fs::write(self.root.join("export"), pin.to_string())
                .map_err(|e| GpioError::Backend(format!("export gpio{pin}: {e}")))?;
            if !dir.is_dir() {
                return Err(GpioError::Backend(format!(
                    "gpio{pin} did not appear after export"
                )));
            }
            debug!("exported gpio{pin}");
        }

        exported.insert(pin);
        Ok(dir)
    }
}

impl GpioBackend for SysfsBackend {
    fn kind(&self) -> DriverKind {
        DriverKind::Sysfs
    }

    fn init(&self, _scheme: NumberingScheme) -> Result<(), GpioError> {
        if self.is_initialized() {
            return Ok(());
        }
        if !self.root.is_dir() {
            return Err(GpioError::init_failed(
                DriverKind::Sysfs,
                format!("{} is not accessible", self.root.display()),
            ));
        }

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn supports_pin(&self, pin: LogicalPin) -> bool {
        board::is_board_pin(pin)
    }

    fn set_mode(&self, pin: LogicalPin, mode: DriveMode) -> Result<(), GpioError> {
        let direction = match mode {
            DriveMode::Input => "in",
            // "high" switches to output without pulling an active-low relay on
            DriveMode::Output => "high",
            DriveMode::Alt1 | DriveMode::Alt2 => {
                return Err(GpioError::Backend(
                    "sysfs cannot select alternate pin functions".into(),
                ));
            }
        };

        let dir = self.ensure_exported(pin)?;
        fs::write(dir.join("direction"), direction)
            .map_err(|e| GpioError::Backend(format!("set direction of gpio{pin}: {e}")))
    }

    fn read_value(&self, pin: LogicalPin) -> Result<bool, GpioError> {
        let dir = self.ensure_exported(pin)?;
        let raw = fs::read_to_string(dir.join("value"))
            .map_err(|e| GpioError::Backend(format!("read gpio{pin}: {e}")))?;

        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(GpioError::Backend(format!(
                "unexpected value {other:?} for gpio{pin}"
            ))),
        }
    }

    fn write_value(&self, pin: LogicalPin, value: bool) -> Result<(), GpioError> {
        let dir = self.ensure_exported(pin)?;
        fs::write(dir.join("value"), if value { "1" } else { "0" })
            .map_err(|e| GpioError::Backend(format!("write gpio{pin}: {e}")))
    }

    fn release(&self) {
        let mut exported = self.exported.lock();
        for pin in exported.drain() {
            if let Err(e) = fs::write(self.root.join("unexport"), pin.to_string()) {
                warn!("unexport gpio{pin}: {e}");
            }
        }
        self.initialized.store(false, Ordering::SeqCst);
    }
}
