use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use log::{debug, error, trace, warn};
use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::{DriveMode, TransitionFilter};
use crate::driver::DriverHandle;
use crate::error::GpioError;
use crate::gpio::{LogicalPin, PinCallback, PinEvent, PinState, SampledValue};

const STATE_IDLE: u8 = 0;
const STATE_POLLING: u8 = 1;
const STATE_STOPPED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Idle,
    Polling,
    Stopped,
}

impl GeneratorState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_IDLE => GeneratorState::Idle,
            STATE_POLLING => GeneratorState::Polling,
            _ => GeneratorState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventConfig {
    pub pin: LogicalPin,
    pub mode: DriveMode,
    pub filter: TransitionFilter,
    pub poll_interval: Duration,
}

#[derive(Clone)]
struct Listener {
    filter: TransitionFilter,
    callback: PinCallback,
}

type Listeners = Arc<RwLock<Vec<Listener>>>;

pub struct EventGenerator {
    config: EventConfig,
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    listeners: Listeners,
    task: Option<JoinHandle<()>>,
}

impl EventGenerator {
    pub fn new(config: EventConfig) -> Result<Self, GpioError> {
        if !config.mode.is_pollable() {
            warn!(
                "Pin {} requested in {:?} mode, only Input/Output polling is supported.",
                config.pin, config.mode
            );
            return Err(GpioError::UnsupportedDriveMode(config.mode));
        }

        Ok(Self {
            config,
            state: Arc::new(AtomicU8::new(STATE_IDLE)),
            stop: Arc::new(AtomicBool::new(false)),
            listeners: Arc::new(RwLock::new(Vec::new())),
            task: None,
        })
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    pub fn state(&self) -> GeneratorState {
        GeneratorState::from_raw(self.state.load(Ordering::Acquire))
    }

    // one listener per filter, the generator's own filter included
    pub fn add_listener(
        &self,
        filter: TransitionFilter,
        callback: PinCallback,
    ) -> Result<(), GpioError> {
        let pin = self.config.pin;
        let mut listeners = self.listeners.write();
        if filter == self.config.filter || listeners.iter().any(|l| l.filter == filter) {
            return Err(GpioError::DuplicateListener { pin, filter });
        }

        listeners.push(Listener { filter, callback });
        trace!("Mapped {filter:?} listener on pin {pin}.");
        Ok(())
    }

    pub fn remove_listener(&self, filter: TransitionFilter) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.filter != filter);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn start(
        &mut self,
        driver: DriverHandle,
        gate: Arc<Semaphore>,
        callback: PinCallback,
    ) -> Result<(), GpioError> {
        let pin = self.config.pin;
        if self.state() != GeneratorState::Idle {
            return Err(GpioError::AlreadyWatching(pin));
        }

        let permit = gate
            .try_acquire_owned()
            .map_err(|_| GpioError::AlreadyWatching(pin))?;

        if !driver.set_mode(pin, self.config.mode) {
            return Err(GpioError::Backend(format!(
                "failed to configure pin {pin} as {:?}",
                self.config.mode
            )));
        }

        let baseline = self.baseline(&driver)?;
        self.state.store(STATE_POLLING, Ordering::Release);

        let poll = PollLoop {
            config: self.config,
            driver,
            callback,
            stop: self.stop.clone(),
            state: self.state.clone(),
            listeners: self.listeners.clone(),
        };
        self.task = Some(tokio::spawn(poll.run(baseline, permit)));
        Ok(())
    }

    fn baseline(&self, driver: &DriverHandle) -> Result<SampledValue, GpioError> {
        let pin = self.config.pin;
        let baseline = match self.config.mode {
            DriveMode::Output => {
                // a failed write still leaves Off as the expected level
                driver.write_digital(pin, PinState::Off);
                SampledValue::new(PinState::Off.to_digital(), DriveMode::Output)
            }
            mode => SampledValue::new(driver.read_digital(pin)?, mode),
        };

        trace!("Initial pin event values has been set for {pin} pin.");
        Ok(baseline)
    }

    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("polling task for pin {} ended abnormally: {e}", self.config.pin);
            }
        }
        self.state.store(STATE_STOPPED, Ordering::Release);
    }
}

impl Drop for EventGenerator {
    fn drop(&mut self) {
        // the loop notices within one interval
        self.stop.store(true, Ordering::Release);
    }
}

struct PollLoop {
    config: EventConfig,
    driver: DriverHandle,
    callback: PinCallback,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    listeners: Listeners,
}

impl PollLoop {
    async fn run(self, baseline: SampledValue, permit: OwnedSemaphorePermit) {
        let EventConfig {
            pin,
            mode,
            filter,
            poll_interval,
        } = self.config;
        trace!("Started '{mode:?}' pin polling for {pin}.");

        let mut previous = baseline;
        let mut failing = false;

        while !self.stopping() {
            tokio::time::sleep(poll_interval).await;
            if self.stopping() {
                break;
            }

            let digital = match self.driver.read_digital(pin) {
                Ok(value) => value,
                Err(e) => {
                    if !failing {
                        warn!("Failed to read pin {pin}, polling continues: {e}");
                        failing = true;
                    }
                    continue;
                }
            };
            if failing {
                debug!("Reads of pin {pin} recovered");
                failing = false;
            }

            let current = SampledValue::new(digital, mode);
            if filter.matches(current.state, previous.state) {
                (self.callback)(&PinEvent {
                    pin,
                    filter,
                    current,
                    previous,
                });
            }
            if current.state != previous.state {
                self.notify_listeners(pin, current, previous);
            }
            previous = current;
        }

        self.state.store(STATE_STOPPED, Ordering::Release);
        trace!("Polling for '{pin}' has been stopped.");
        drop(permit);
    }

    fn notify_listeners(&self, pin: LogicalPin, current: SampledValue, previous: SampledValue) {
        // snapshot, so a callback may add or remove listeners
        let listeners = self.listeners.read().clone();
        for listener in listeners
            .iter()
            .filter(|l| l.filter.matches(current.state, previous.state))
        {
            (listener.callback)(&PinEvent {
                pin,
                filter: listener.filter,
                current,
                previous,
            });
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}
