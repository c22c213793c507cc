use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SimError};
use crate::DeviceKey;

/// Value reported for a sensor read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Int(i64),
    Float(f64),
}

impl SensorValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            SensorValue::Int(v) => v as f64,
            SensorValue::Float(v) => v,
        }
    }
}

impl From<SensorValue> for serde_json::Value {
    fn from(value: SensorValue) -> Self {
        match value {
            SensorValue::Int(v) => serde_json::Value::from(v),
            SensorValue::Float(v) => serde_json::Value::from(v),
        }
    }
}

#[derive(Debug)]
struct GateState {
    value: SensorValue,
    version: u64,
    closed: bool,
}

/// Latest value of a sensor plus a generation counter.
///
/// The update loop `publish`es a value during a tick and `release`s the gate
/// once the tick is complete, which advances the generation and wakes every
/// reader. A reader returns only after the generation has moved past the one
/// it saw on entry, so its value is never older than the tick that was in
/// progress when it asked.
#[derive(Debug)]
pub struct SensorGate {
    state: Mutex<GateState>,
    fresh: Condvar,
}

impl SensorGate {
    pub fn new(initial: SensorValue) -> Self {
        Self {
            state: Mutex::new(GateState {
                value: initial,
                version: 0,
                closed: false,
            }),
            fresh: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, value: SensorValue) {
        self.lock().value = value;
    }

    /// Ends the tick for this sensor: advance the generation, wake readers.
    pub fn release(&self) {
        let mut state = self.lock();
        state.version = state.version.wrapping_add(1);
        drop(state);
        self.fresh.notify_all();
    }

    /// Wakes all readers with `GateClosed`; used on shutdown.
    pub fn close(&self) {
        self.lock().closed = true;
        self.fresh.notify_all();
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn latest(&self) -> SensorValue {
        self.lock().value
    }

    /// Blocks until the next release, then returns the published value.
    /// Returns `None` if the timeout expires first.
    pub fn wait_fresh(&self, timeout: Duration) -> Option<Result<SensorValue>> {
        let guard = self.lock();
        let seen = guard.version;
        let (guard, _) = self
            .fresh
            .wait_timeout_while(guard, timeout, |state| {
                state.version == seen && !state.closed
            })
            .unwrap_or_else(PoisonError::into_inner);

        if guard.version != seen {
            Some(Ok(guard.value))
        } else if guard.closed {
            Some(Err(SimError::GateClosed))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorKind {
    Touch,
    Color,
    /// `orientation` is relative to the robot heading, in radians.
    Ultrasonic { orientation: f64 },
    /// Tacho position of a motor, in degrees.
    Tacho,
}

impl SensorKind {
    pub fn initial_value(&self) -> SensorValue {
        match self {
            SensorKind::Touch | SensorKind::Color | SensorKind::Tacho => SensorValue::Int(0),
            SensorKind::Ultrasonic { .. } => SensorValue::Float(0.0),
        }
    }
}

#[derive(Debug)]
pub struct Sensor {
    pub key: DeviceKey,
    pub kind: SensorKind,
    pub driver: String,
    /// Mounting point in the robot frame (x forward, y left), millimetres.
    pub mount: (f64, f64),
    gate: SensorGate,
}

impl Sensor {
    pub fn new(key: DeviceKey, kind: SensorKind, driver: String, mount: (f64, f64)) -> Self {
        let gate = SensorGate::new(kind.initial_value());
        Self {
            key,
            kind,
            driver,
            mount,
            gate,
        }
    }

    pub fn gate(&self) -> &SensorGate {
        &self.gate
    }

    /// Waits for a value at least as fresh as the tick in progress.
    pub fn read(&self, timeout: Duration) -> Result<SensorValue> {
        match self.gate.wait_fresh(timeout) {
            Some(result) => result,
            None => Err(SimError::SensorTimeout {
                address: self.key.address.clone(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }
}
