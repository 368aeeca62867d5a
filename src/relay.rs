use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::gpio::{LogicalPin, PinState};
use crate::manager::GpioCore;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RelayCycle {
    OneTwo,
    OneOne,
    OneMany,
    Single,
    Cycle,
}

#[derive(Debug, Clone, Copy)]
pub struct RelayTiming {
    pub unit: Duration,
}

impl Default for RelayTiming {
    fn default() -> Self {
        Self {
            unit: Duration::from_millis(1),
        }
    }
}

impl RelayTiming {
    async fn wait(&self, units: u32) {
        tokio::time::sleep(self.unit * units).await;
    }
}

const SINGLE_HOLD: u32 = 8000;

pub async fn relay_test(
    core: &GpioCore,
    pins: &[LogicalPin],
    cycle: RelayCycle,
    single_pin: LogicalPin,
    timing: RelayTiming,
) -> bool {
    if !core.is_allowed_to_execute() {
        return false;
    }
    if cycle != RelayCycle::Single && pins.is_empty() {
        warn!("No pins specified.");
        return false;
    }
    if let Some(pin) = pins.iter().find(|pin| !core.config().pins.is_output(**pin)) {
        warn!("Pin {pin} is not a relay pin.");
        return false;
    }

    info!("Relay test service started!");

    let passed = match cycle {
        RelayCycle::OneTwo => one_two(core, pins, timing).await,
        RelayCycle::OneOne => one_one(core, pins, timing).await,
        RelayCycle::OneMany => one_many(core, pins, timing).await,
        RelayCycle::Single => single(core, single_pin, timing).await,
        RelayCycle::Cycle => {
            one_two(core, pins, timing).await
                && one_one(core, pins, timing).await
                && one_many(core, pins, timing).await
        }
    };

    if passed {
        info!("Relay test {cycle:?} passed!");
    } else {
        warn!("One or more tests failed.");
    }
    passed
}

async fn single(core: &GpioCore, pin: LogicalPin, timing: RelayTiming) -> bool {
    if !core.config().pins.is_output(pin) {
        warn!("Pin {pin} is not a relay pin.");
        return false;
    }

    if !core.set_pin_state(pin, PinState::On) {
        return false;
    }
    info!("Waiting for {SINGLE_HOLD} units to close the relay...");
    timing.wait(SINGLE_HOLD).await;
    core.set_pin_state(pin, PinState::Off)
}

async fn one_two(core: &GpioCore, pins: &[LogicalPin], timing: RelayTiming) -> bool {
    // make sure every relay starts off
    execute_on_each(core, pins, PinState::Off, 30, timing).await
        && execute_on_each(core, pins, PinState::On, 400, timing).await
        && {
            timing.wait(500).await;
            execute_on_each(core, pins, PinState::Off, 150, timing).await
        }
        && {
            timing.wait(700).await;
            execute_on_each(core, pins, PinState::On, 200, timing).await
        }
        && {
            timing.wait(500).await;
            execute_on_each(core, pins, PinState::Off, 120, timing).await
        }
}

async fn one_one(core: &GpioCore, pins: &[LogicalPin], timing: RelayTiming) -> bool {
    if !execute_on_each(core, pins, PinState::Off, 50, timing).await {
        return false;
    }

    for &pin in pins {
        if !core.set_pin_state(pin, PinState::On) {
            return false;
        }
        timing.wait(500).await;
        if !core.set_pin_state(pin, PinState::Off) {
            return false;
        }
        timing.wait(100).await;
    }
    true
}

async fn one_many(core: &GpioCore, pins: &[LogicalPin], timing: RelayTiming) -> bool {
    if !execute_on_each(core, pins, PinState::Off, 50, timing).await {
        return false;
    }

    for &pin in pins {
        if !core.set_pin_state(pin, PinState::On) {
            return false;
        }
        for _ in 0..6 {
            timing.wait(200).await;
            core.set_pin_state(pin, PinState::Off);
            timing.wait(500).await;
            core.set_pin_state(pin, PinState::On);
        }
        if !core.set_pin_state(pin, PinState::Off) {
            return false;
        }
    }
    true
}

async fn execute_on_each(
    core: &GpioCore,
    pins: &[LogicalPin],
    state: PinState,
    delay: u32,
    timing: RelayTiming,
) -> bool {
    for &pin in pins {
        if !core.set_pin_state(pin, state) {
            return false;
        }
        timing.wait(delay).await;
    }
    true
}
