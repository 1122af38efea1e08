//! Software-only devices for simulation setups and demos.

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    limits::Limits, status::StatusCode, status_info::DeviceStatus, value::RawValue, MaxAge,
    Moveable, Readable,
};
use crate::error::{DeviceError, DeviceResult};

#[derive(Debug, Clone)]
struct Motion {
    origin: f64,
    target: f64,
    started: Option<Instant>,
}

/// A continuous axis that travels at a fixed speed. A speed of zero moves
/// instantly.
pub struct VirtualMotor {
    name: String,
    unit: String,
    limits: Limits,
    speed: f64,
    motion: Mutex<Motion>,
    fault: Mutex<Option<String>>,
}

impl VirtualMotor {
    pub fn new(name: impl Into<String>, position: f64) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            limits: Limits::unlimited(),
            speed: 0.0,
            motion: Mutex::new(Motion {
                origin: position,
                target: position,
                started: None,
            }),
            fault: Mutex::new(None),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.max(0.0);
        self
    }

    /// Put the motor into an error state until the next `reset`.
    pub fn jam(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!("{}: jammed: {}", self.name, reason);
        let mut motion = self.motion.lock();
        let here = self.position_of(&motion);
        *motion = Motion {
            origin: here,
            target: here,
            started: None,
        };
        *self.fault.lock() = Some(reason);
    }

    /// Move the axis without going through `start`, as an operator turning
    /// the handwheel would.
    pub fn set_position(&self, position: f64) {
        *self.motion.lock() = Motion {
            origin: position,
            target: position,
            started: None,
        };
    }

    fn position_of(&self, motion: &Motion) -> f64 {
        let Some(started) = motion.started else {
            return motion.target;
        };
        if self.speed <= 0.0 {
            return motion.target;
        }
        let travelled = started.elapsed().as_secs_f64() * self.speed;
        let distance = motion.target - motion.origin;
        if travelled >= distance.abs() {
            motion.target
        } else {
            motion.origin + travelled * distance.signum()
        }
    }

    fn position(&self) -> f64 {
        self.position_of(&self.motion.lock())
    }
}

#[async_trait::async_trait]
impl Readable for VirtualMotor {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit(&self) -> &str {
        &self.unit
    }

    async fn read(&self, _maxage: MaxAge) -> DeviceResult<RawValue> {
        Ok(RawValue::Float(self.position()))
    }

    async fn status(&self, _maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        if let Some(reason) = self.fault.lock().clone() {
            return Ok(DeviceStatus::new(StatusCode::Error).with_message(reason));
        }
        let motion = self.motion.lock().clone();
        if self.position_of(&motion) != motion.target {
            return Ok(DeviceStatus::new(StatusCode::Busy).with_message(format!(
                "moving to {}",
                self.format(&RawValue::Float(motion.target))
            )));
        }
        Ok(DeviceStatus::ok().with_message("idle"))
    }

    async fn reset(&self) -> DeviceResult<()> {
        if self.fault.lock().take().is_some() {
            info!("{}: fault cleared", self.name);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Moveable for VirtualMotor {
    async fn start(&self, target: RawValue) -> DeviceResult<()> {
        let value = target
            .as_f64()
            .ok_or_else(|| DeviceError::invalid_value(&self.name, format!("{} is not a number", target)))?;
        self.limits.check(value).map_err(|reason| {
            DeviceError::invalid_value(&self.name, format!("{}: {}", self.format(&target), reason))
        })?;
        if let Some(reason) = self.fault.lock().clone() {
            return Err(DeviceError::movement(&self.name, reason));
        }

        let mut motion = self.motion.lock();
        let origin = self.position_of(&motion);
        debug!("{}: moving from {} to {}", self.name, origin, value);
        *motion = Motion {
            origin,
            target: value,
            started: Some(Instant::now()),
        };
        Ok(())
    }

    async fn stop(&self) -> DeviceResult<()> {
        let mut motion = self.motion.lock();
        let here = self.position_of(&motion);
        if here != motion.target {
            info!("{}: stopped at {}", self.name, here);
        }
        *motion = Motion {
            origin: here,
            target: here,
            started: None,
        };
        Ok(())
    }

    async fn is_allowed(&self, target: &RawValue) -> Result<(), String> {
        match target.as_f64() {
            Some(value) => self.limits.check(value),
            None => Err(format!("{} is not a number", target)),
        }
    }
}

/// A sensor whose value is set from outside.
pub struct VirtualReadable {
    name: String,
    unit: String,
    value: Mutex<RawValue>,
    status: Mutex<DeviceStatus>,
}

impl VirtualReadable {
    pub fn new(name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            value: Mutex::new(value.into()),
            status: Mutex::new(DeviceStatus::ok()),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn set_value(&self, value: impl Into<RawValue>) {
        *self.value.lock() = value.into();
    }

    pub fn set_status(&self, status: DeviceStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait::async_trait]
impl Readable for VirtualReadable {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit(&self) -> &str {
        &self.unit
    }

    async fn read(&self, _maxage: MaxAge) -> DeviceResult<RawValue> {
        Ok(self.value.lock().clone())
    }

    async fn status(&self, _maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        Ok(self.status.lock().clone())
    }
}
