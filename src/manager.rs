use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, broadcast};
use tokio_stream::wrappers::BroadcastStream;

use crate::config::{DriveMode, GpioConfig, TransitionFilter};
use crate::controller::PinController;
use crate::driver::DriverHandle;
use crate::error::GpioError;
use crate::generator::{EventConfig, EventGenerator};
use crate::gpio::{
    EventCallbackHandler, EventHandler, GpioBackend, LogicalPin, PinCallback, PinEvent, PinState,
    PinStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle {
    pin: LogicalPin,
    id: u64,
}

impl WatchHandle {
    pub fn pin(&self) -> LogicalPin {
        self.pin
    }
}

struct ActiveWatch {
    id: u64,
    generator: EventGenerator,
}

pub struct GpioCore {
    config: Arc<GpioConfig>,
    controller: PinController,
    watches: Mutex<FxHashMap<LogicalPin, ActiveWatch>>,
    gates: Mutex<FxHashMap<LogicalPin, Arc<Semaphore>>>,
    event_handler: EventHandler,
    next_watch_id: AtomicU64,
}

impl GpioCore {
    pub fn new(config: Arc<GpioConfig>) -> Self {
        let event_handler = Arc::new(EventCallbackHandler::new(
            config.pins.all(),
            config.broadcast_capacity,
            config.event_history_capacity,
        ));

        Self {
            controller: PinController::new(config.clone()),
            config,
            watches: Mutex::new(FxHashMap::default()),
            gates: Mutex::new(FxHashMap::default()),
            event_handler,
            next_watch_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &GpioConfig {
        &self.config
    }

    pub fn controller(&self) -> &PinController {
        &self.controller
    }

    pub fn init(&self) -> Result<DriverHandle, GpioError> {
        self.controller
            .init(self.config.driver, self.config.numbering_scheme)
    }

    pub fn init_with_backend(
        &self,
        backend: Arc<dyn GpioBackend>,
    ) -> Result<DriverHandle, GpioError> {
        self.controller
            .init_with_backend(backend, self.config.numbering_scheme)
    }

    pub fn is_allowed_to_execute(&self) -> bool {
        self.controller.is_allowed_to_execute()
    }

    fn gated_driver(&self) -> Option<DriverHandle> {
        self.controller.driver().ok()
    }

    fn gate(&self, pin: LogicalPin) -> Arc<Semaphore> {
        self.gates
            .lock()
            .entry(pin)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    fn event_sink(&self, callback: PinCallback) -> PinCallback {
        let handler = self.event_handler.clone();
        Arc::new(move |event: &PinEvent| {
            callback(event);
            handler.dispatch(event.clone());
        })
    }

    // Ok(None) when hardware access is unavailable
    pub async fn watch(
        &self,
        pin: LogicalPin,
        mode: DriveMode,
        filter: TransitionFilter,
        callback: PinCallback,
    ) -> Result<Option<WatchHandle>, GpioError> {
        let Some(driver) = self.gated_driver() else {
            debug!("Hardware access unavailable, ignoring watch request for pin {pin}");
            return Ok(None);
        };

        if !driver.is_valid_pin(pin) {
            warn!("The specified pin {pin} is invalid.");
            return Err(GpioError::InvalidPin(pin));
        }

        let mut generator = EventGenerator::new(EventConfig {
            pin,
            mode,
            filter,
            poll_interval: self.config.poll_interval(),
        })?;

        let mut watches = self.watches.lock();
        if watches.contains_key(&pin) {
            return Err(GpioError::AlreadyWatching(pin));
        }

        generator.start(driver, self.gate(pin), self.event_sink(callback))?;
        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        watches.insert(pin, ActiveWatch { id, generator });

        Ok(Some(WatchHandle { pin, id }))
    }

    pub async fn unwatch(&self, handle: WatchHandle) {
        let active = {
            let mut watches = self.watches.lock();
            match watches.get(&handle.pin) {
                Some(active) if active.id == handle.id => watches.remove(&handle.pin),
                _ => None,
            }
        };

        let Some(mut active) = active else {
            debug!("No active watch for pin {} with this handle", handle.pin);
            return;
        };

        active.generator.stop().await;
        trace!("Stopped pin polling for '{}' pin", handle.pin);
    }

    pub fn add_listener(
        &self,
        pin: LogicalPin,
        filter: TransitionFilter,
        callback: PinCallback,
    ) -> Result<bool, GpioError> {
        if !self.is_allowed_to_execute() {
            return Ok(false);
        }

        let watches = self.watches.lock();
        let active = watches.get(&pin).ok_or(GpioError::NotWatching(pin))?;
        active.generator.add_listener(filter, callback)?;
        Ok(true)
    }

    pub fn remove_listener(&self, pin: LogicalPin, filter: TransitionFilter) -> bool {
        self.watches
            .lock()
            .get(&pin)
            .is_some_and(|active| active.generator.remove_listener(filter))
    }

    pub async fn unwatch_all(&self) {
        let drained: Vec<(LogicalPin, ActiveWatch)> = self.watches.lock().drain().collect();

        for (pin, mut active) in drained {
            active.generator.stop().await;
            trace!("Stopped pin polling for '{pin}' pin");
        }
    }

    pub fn is_watching(&self, pin: LogicalPin) -> bool {
        self.watches.lock().contains_key(&pin)
    }

    pub fn watched_pins(&self) -> Vec<LogicalPin> {
        let mut pins: Vec<LogicalPin> = self.watches.lock().keys().copied().collect();
        pins.sort_unstable();
        pins
    }

    pub async fn watch_configured_pins(&self, callback: PinCallback) -> Vec<WatchHandle> {
        let requests = self
            .config
            .pins
            .input_pins
            .iter()
            .map(|&pin| (pin, DriveMode::Input))
            .chain(
                self.config
                    .pins
                    .output_pins
                    .iter()
                    .map(|&pin| (pin, DriveMode::Output)),
            );

        let mut handles = Vec::new();
        for (pin, mode) in requests {
            match self
                .watch(pin, mode, TransitionFilter::Any, callback.clone())
                .await
            {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => return handles,
                Err(e) => warn!("Could not watch pin {pin}: {e}"),
            }
        }

        info!("'{}' pin configurations with events initiated.", handles.len());
        handles
    }

    // unconfigured pins are switched to Output first
    pub fn set_pin_state(&self, pin: LogicalPin, state: PinState) -> bool {
        let Some(driver) = self.gated_driver() else {
            return false;
        };

        match driver.mode(pin) {
            Some(DriveMode::Output) => {}
            None => {
                if !driver.set_mode(pin, DriveMode::Output) {
                    return false;
                }
            }
            Some(mode) => {
                warn!("Cannot write pin {pin} while it is configured as {mode:?}.");
                return false;
            }
        }

        driver.write_digital(pin, state)
    }

    pub fn toggle_pin(&self, pin: LogicalPin) -> bool {
        let Some(driver) = self.gated_driver() else {
            return false;
        };

        if driver.mode(pin) != Some(DriveMode::Output) {
            warn!("Cannot toggle the pin {pin} as the pin mode is not set to output.");
            return false;
        }

        match driver.read_state(pin) {
            Ok(state) => driver.write_digital(pin, state.toggled()),
            Err(e) => {
                warn!("Cannot toggle pin {pin}: {e}");
                false
            }
        }
    }

    // the revert to Off runs on the current tokio runtime
    pub fn set_pin_state_for(&self, pin: LogicalPin, state: PinState, duration: Duration) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("Cannot schedule pin {pin} to return to Off outside a tokio runtime.");
            return false;
        };
        let Some(driver) = self.gated_driver() else {
            return false;
        };
        if !self.set_pin_state(pin, state) {
            return false;
        }

        runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            if driver.is_ready() && driver.write_digital(pin, PinState::Off) {
                trace!("Pin {pin} returned to Off after {duration:?}");
            }
        });
        true
    }

    pub fn pin_status(&self, pin: LogicalPin) -> Option<PinStatus> {
        self.gated_driver()?.pin_status(pin)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PinEvent> {
        self.event_handler.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<PinEvent> {
        BroadcastStream::new(self.event_handler.subscribe())
    }

    pub fn get_events(
        &self,
        pin: LogicalPin,
        limit: Option<usize>,
    ) -> Result<Vec<PinEvent>, GpioError> {
        if !self.event_handler.tracks(pin) {
            return Err(GpioError::InvalidPin(pin));
        }
        Ok(self.event_handler.history(pin, limit))
    }

    pub fn get_last_event(&self, pin: LogicalPin) -> Result<Option<PinEvent>, GpioError> {
        if !self.event_handler.tracks(pin) {
            return Err(GpioError::InvalidPin(pin));
        }
        Ok(self.event_handler.last(pin))
    }

    pub async fn shutdown(&self) {
        self.unwatch_all().await;

        if let Some(driver) = self.gated_driver() {
            driver.shutdown(self.config.graceful_shutdown);
        }
    }
}
