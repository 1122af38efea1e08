//! Switchers guarded by a lock device.
//!
//! Before the guarded switcher moves, the lock is driven to its unlock value
//! and waited for. Once the switcher has arrived the lock is driven back,
//! either to the configured lock value or to where it was before the move.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    device::{
        status::StatusCode, status_info::DeviceStatus, value::RawValue, MaxAge, Moveable,
        Readable,
    },
    error::{DeviceError, DeviceResult},
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LockConfig {
    pub unlockvalue: RawValue,
    /// Lock position after the move; the previous lock position when unset.
    #[serde(default)]
    pub lockvalue: Option<RawValue>,
}

pub struct Locked {
    name: String,
    device: Arc<dyn Moveable>,
    lock: Arc<dyn Moveable>,
    config: LockConfig,
    running: AtomicBool,
    stop_requested: AtomicBool,
    sequence: Mutex<DeviceStatus>,
}

/// Clears the running flag however the sequence ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Locked {
    pub fn new(
        name: impl Into<String>,
        config: LockConfig,
        device: Arc<dyn Moveable>,
        lock: Arc<dyn Moveable>,
    ) -> Self {
        Self {
            name: name.into(),
            device,
            lock,
            config,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            sequence: Mutex::new(DeviceStatus::ok().with_message("idle")),
        }
    }

    pub fn device(&self) -> &Arc<dyn Moveable> {
        &self.device
    }

    pub fn lock(&self) -> &Arc<dyn Moveable> {
        &self.lock
    }

    fn set_step(&self, code: StatusCode, message: String) {
        debug!("{}: {}", self.name, message);
        *self.sequence.lock() = DeviceStatus::new(code).with_message(message);
    }

    fn interrupted(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    async fn check_lock_value(&self, value: &RawValue, what: &str) -> DeviceResult<()> {
        self.lock.is_allowed(value).await.map_err(|reason| {
            DeviceError::configuration(
                &self.name,
                format!(
                    "illegal {} {} for device {}: {}",
                    what,
                    self.lock.format(value),
                    self.lock.name(),
                    reason
                ),
            )
        })
    }

    async fn run_sequence(&self, target: RawValue, lockvalue: RawValue) -> DeviceResult<()> {
        self.set_step(StatusCode::Busy, format!("unlocking {}", self.lock.name()));
        self.lock.start(self.config.unlockvalue.clone()).await?;
        self.lock.wait().await?;
        if self.interrupted() {
            return Ok(());
        }

        self.set_step(
            StatusCode::Busy,
            format!("moving {} to {}", self.device.name(), self.device.format(&target)),
        );
        self.device.start(target).await?;
        self.device.wait().await?;
        if self.interrupted() {
            return Ok(());
        }

        self.set_step(StatusCode::Busy, format!("locking {}", self.lock.name()));
        self.lock.start(lockvalue).await?;
        self.lock.wait().await?;
        if self.interrupted() {
            return Ok(());
        }

        self.set_step(StatusCode::Ok, "idle".to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl Readable for Locked {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit(&self) -> &str {
        self.device.unit()
    }

    async fn read(&self, maxage: MaxAge) -> DeviceResult<RawValue> {
        self.device.read(maxage).await
    }

    /// While the sequence runs, the worse of the current step and the
    /// guarded device. Otherwise the guarded device alone.
    async fn status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        let device = self.device.status(maxage).await?;
        if !self.running.load(Ordering::SeqCst) {
            return Ok(device);
        }
        let step = self.sequence.lock().clone();
        Ok(if device.code > step.code { device } else { step })
    }

    async fn reset(&self) -> DeviceResult<()> {
        self.set_step(StatusCode::Ok, "idle".to_string());
        self.device.reset().await
    }

    fn format(&self, value: &RawValue) -> String {
        self.device.format(value)
    }
}

#[async_trait::async_trait]
impl Moveable for Locked {
    async fn start(&self, target: RawValue) -> DeviceResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::movement(
                &self.name,
                "can not start device, it is still moving",
            ));
        }
        let _running = RunningGuard(&self.running);
        self.stop_requested.store(false, Ordering::SeqCst);

        if let Err(reason) = self.device.is_allowed(&target).await {
            return Err(DeviceError::invalid_value(&self.name, reason));
        }
        self.check_lock_value(&self.config.unlockvalue, "unlockvalue")
            .await?;
        let lockvalue = match &self.config.lockvalue {
            Some(value) => value.clone(),
            None => self.lock.read(Duration::ZERO).await?,
        };
        self.check_lock_value(&lockvalue, "lockvalue").await?;

        let result = self.run_sequence(target, lockvalue).await;
        if let Err(err) = &result {
            let step = self.sequence.lock().message.clone();
            error!("{}: error upon {}: {}", self.name, step, err);
            self.set_step(StatusCode::Error, format!("error upon {}", step));
        }
        result
    }

    async fn stop(&self) -> DeviceResult<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        if self.running.load(Ordering::SeqCst) {
            self.set_step(StatusCode::NotReached, "operation interrupted".to_string());
        }
        let device = self.device.stop().await;
        let lock = self.lock.stop().await;
        device.and(lock)
    }

    async fn is_allowed(&self, target: &RawValue) -> Result<(), String> {
        self.device.is_allowed(target).await
    }

    fn wait_interval(&self) -> Duration {
        self.device.wait_interval()
    }
}
