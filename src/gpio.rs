use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::{DriveMode, DriverKind, NumberingScheme, TransitionFilter};
use crate::error::GpioError;

pub type LogicalPin = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinState {
    On,
    Off,
}

impl PinState {
    // active-low: a low line means On
    pub fn from_digital(value: bool) -> Self {
        if value { PinState::Off } else { PinState::On }
    }

    pub fn to_digital(self) -> bool {
        matches!(self, PinState::Off)
    }

    pub fn toggled(self) -> Self {
        match self {
            PinState::On => PinState::Off,
            PinState::Off => PinState::On,
        }
    }
}

impl TransitionFilter {
    pub fn matches(&self, current: PinState, previous: PinState) -> bool {
        if current == previous {
            return false;
        }

        match self {
            TransitionFilter::OnOnly => current == PinState::On,
            TransitionFilter::OffOnly => current == PinState::Off,
            TransitionFilter::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampledValue {
    pub state: PinState,
    pub digital: bool,
    pub mode: DriveMode,
    pub timestamp_ms: u64,
}

impl SampledValue {
    pub fn new(digital: bool, mode: DriveMode) -> Self {
        Self {
            state: PinState::from_digital(digital),
            digital,
            mode,
            timestamp_ms: epoch_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PinEvent {
    pub pin: LogicalPin,
    pub filter: TransitionFilter,
    pub current: SampledValue,
    pub previous: SampledValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PinStatus {
    pub pin: LogicalPin,
    pub physical: Option<u8>,
    pub mode: Option<DriveMode>,
    pub state: PinState,
}

pub type PinCallback = Arc<dyn Fn(&PinEvent) + Send + Sync>;

pub trait GpioBackend: Send + Sync {
    fn kind(&self) -> DriverKind;
    fn init(&self, scheme: NumberingScheme) -> Result<(), GpioError>;
    fn is_initialized(&self) -> bool;
    fn supports_pin(&self, pin: LogicalPin) -> bool;
    fn set_mode(&self, pin: LogicalPin, mode: DriveMode) -> Result<(), GpioError>;
    fn read_value(&self, pin: LogicalPin) -> Result<bool, GpioError>;
    fn write_value(&self, pin: LogicalPin, value: bool) -> Result<(), GpioError>;
    fn release(&self);
}

pub struct EventCallbackHandler {
    event_tx: broadcast::Sender<PinEvent>,
    event_history: FxHashMap<LogicalPin, RwLock<VecDeque<PinEvent>>>,
    event_history_capacity: usize,
}

impl EventCallbackHandler {
    pub fn new(
        pins: impl IntoIterator<Item = LogicalPin>,
        broadcast_capacity: usize,
        event_history_capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        let event_history = pins
            .into_iter()
            .map(|pin| (pin, RwLock::new(VecDeque::new())))
            .collect();

        Self {
            event_tx,
            event_history,
            event_history_capacity,
        }
    }

    pub fn dispatch(&self, event: PinEvent) {
        if let Some(history_lock) = self.event_history.get(&event.pin) {
            let mut history = history_lock.write();
            while !history.is_empty() && history.len() >= self.event_history_capacity {
                history.pop_front();
            }
            if self.event_history_capacity > 0 {
                history.push_back(event.clone());
            }
        }
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PinEvent> {
        self.event_tx.subscribe()
    }

    pub fn tracks(&self, pin: LogicalPin) -> bool {
        self.event_history.contains_key(&pin)
    }

    // oldest first, `limit` keeps the most recent
    pub fn history(&self, pin: LogicalPin, limit: Option<usize>) -> Vec<PinEvent> {
        self.event_history
            .get(&pin)
            .map(|d| {
                let history = d.read();
                let skip = limit
                    .map(|lim| history.len().saturating_sub(lim))
                    .unwrap_or(0);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn last(&self, pin: LogicalPin) -> Option<PinEvent> {
        self.event_history
            .get(&pin)
            .and_then(|d| d.read().back().cloned())
    }
}

pub type EventHandler = Arc<EventCallbackHandler>;

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
