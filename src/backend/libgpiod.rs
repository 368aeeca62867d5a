use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use crate::config::{DriveMode, DriverKind, NumberingScheme};
use crate::error::GpioError;
use crate::gpio::{GpioBackend, LogicalPin};

// line offsets equal BCM numbers on the Pi
pub struct LibgpiodBackend {
    chip_path: PathBuf,
    num_lines: AtomicUsize,
    initialized: AtomicBool,
    lines: RwLock<FxHashMap<LogicalPin, FairMutex<LineHandle>>>, // keyed by pin
}

struct LineHandle {
    offset: u32,
    request: request::Request,
}

impl LineHandle {
    fn new(chip: &Path, offset: u32, mode: DriveMode) -> Result<Self, GpioError> {
        let chip = Self::open_chip(chip)?;
        let line_cfg = Self::make_line_config(offset, mode)?;
        let request = Self::request_lines(&chip, &line_cfg)?;
        Ok(Self { offset, request })
    }

    fn open_chip(path: &Path) -> Result<Chip, GpioError> {
        Chip::open(&path)
            .map_err(|e| GpioError::Backend(format!("open chip {}: {e}", path.display())))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, GpioError> {
        let mut req_cfg = request::Config::new()
            .map_err(|e| GpioError::Backend(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| GpioError::Backend(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| GpioError::Backend(format!("request lines: {e}")))
    }

    fn make_line_settings(mode: DriveMode) -> Result<line::Settings, GpioError> {
        let mut settings = line::Settings::new()
            .map_err(|e| GpioError::Backend(format!("libgpiod settings: {e}")))?;

        let direction = match mode {
            DriveMode::Input => line::Direction::Input,
            DriveMode::Output => line::Direction::Output,
            DriveMode::Alt1 | DriveMode::Alt2 => {
                return Err(GpioError::Backend(
                    "libgpiod cannot select alternate pin functions".into(),
                ));
            }
        };
        settings
            .set_direction(direction)
            .map_err(|e| GpioError::Backend(format!("set direction: {e}")))?;

        if mode == DriveMode::Output {
            // relays are active-low, start them released
            settings
                .set_output_value(line::Value::Active)
                .map_err(|e| GpioError::Backend(format!("set output value: {e}")))?;
        }
        Ok(settings)
    }

    fn make_line_config(offset: u32, mode: DriveMode) -> Result<line::Config, GpioError> {
        let settings = Self::make_line_settings(mode)?;

        let mut cfg = line::Config::new()
            .map_err(|e| GpioError::Backend(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| GpioError::Backend(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }

    fn reconfigure(&mut self, mode: DriveMode) -> Result<(), GpioError> {
        let line_cfg = Self::make_line_config(self.offset, mode)?;
        self.request
            .reconfigure_lines(&line_cfg)
            .map_err(|e| GpioError::Backend(format!("reconfigure lines: {e}")))?;
        Ok(())
    }
}

impl LibgpiodBackend {
    pub fn new<P: AsRef<Path>>(chip_path: P) -> Self {
        Self {
            chip_path: chip_path.as_ref().to_path_buf(),
            num_lines: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            lines: RwLock::new(FxHashMap::default()),
        }
    }

    fn with_line<T>(
        &self,
        pin: LogicalPin,
        f: impl FnOnce(&LineHandle) -> Result<T, GpioError>,
    ) -> Result<T, GpioError> {
        let lines = self.lines.read();
        let handle = lines
            .get(&pin)
            .ok_or_else(|| GpioError::Backend("pin not configured, set mode first".into()))?;
        f(&handle.lock())
    }
}

impl GpioBackend for LibgpiodBackend {
    fn kind(&self) -> DriverKind {
        DriverKind::Libgpiod
    }

    fn init(&self, _scheme: NumberingScheme) -> Result<(), GpioError> {
        if self.is_initialized() {
            return Ok(());
        }

        let chip = LineHandle::open_chip(&self.chip_path)
            .map_err(|e| GpioError::init_failed(DriverKind::Libgpiod, e.to_string()))?;
        let info = chip
            .info()
            .map_err(|e| GpioError::init_failed(DriverKind::Libgpiod, format!("chip info: {e}")))?;

        self.num_lines.store(info.num_lines(), Ordering::SeqCst);
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn supports_pin(&self, pin: LogicalPin) -> bool {
        (pin as usize) < self.num_lines.load(Ordering::SeqCst)
    }

    fn set_mode(&self, pin: LogicalPin, mode: DriveMode) -> Result<(), GpioError> {
        let lines = self.lines.upgradable_read();

        match lines.get(&pin) {
            Some(handle) => handle.lock().reconfigure(mode),
            None => {
                // upgradable guards exclude each other, the insert cannot race
                let handle = LineHandle::new(&self.chip_path, pin as u32, mode)?;
                let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
                lines.insert(pin, FairMutex::new(handle));
                Ok(())
            }
        }
    }

    fn read_value(&self, pin: LogicalPin) -> Result<bool, GpioError> {
        self.with_line(pin, |handle| {
            let value = handle
                .request
                .value(handle.offset)
                .map_err(|e| GpioError::Backend(format!("get value: {e}")))?;
            Ok(match value {
                line::Value::InActive => false,
                line::Value::Active => true,
            })
        })
    }

    fn write_value(&self, pin: LogicalPin, value: bool) -> Result<(), GpioError> {
        let lines = self.lines.read();
        let handle = lines
            .get(&pin)
            .ok_or_else(|| GpioError::Backend("pin not configured, set mode first".into()))?;
        let mut handle = handle.lock();
        let offset = handle.offset;

        handle
            .request
            .set_value(
                offset,
                if value {
                    line::Value::Active
                } else {
                    line::Value::InActive
                },
            )
            .map_err(|e| GpioError::Backend(format!("set value: {e}")))?;
        Ok(())
    }

    fn release(&self) {
        // dropping the requests releases the lines
        self.lines.write().clear();
        self.initialized.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_lines_start_high() {
        let settings = LineHandle::make_line_settings(DriveMode::Output).unwrap();
        assert_eq!(settings.direction().unwrap(), line::Direction::Output);
        assert_eq!(settings.output_value().unwrap(), line::Value::Active);
    }

    #[test]
    fn alternate_functions_are_rejected() {
        assert!(LineHandle::make_line_settings(DriveMode::Alt1).is_err());
        assert!(LineHandle::make_line_config(4, DriveMode::Alt2).is_err());
    }
}
