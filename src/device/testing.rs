//! Scriptable devices for unit tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use super::{
    limits::Limits, status::StatusCode, status_info::DeviceStatus, value::RawValue, MaxAge,
    Moveable, Readable,
};
use crate::error::{DeviceError, DeviceResult};

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub struct MockMoveable {
    name: String,
    value: Mutex<RawValue>,
    status: Mutex<DeviceStatus>,
    status_error: Mutex<Option<String>>,
    busy_polls: AtomicUsize,
    status_calls: AtomicUsize,
    limits: Mutex<Limits>,
    follow_target: Mutex<bool>,
    starts: Mutex<Vec<RawValue>>,
    stops: AtomicUsize,
    resets: AtomicUsize,
    journal: Option<Journal>,
}

impl MockMoveable {
    pub fn new(name: &str, value: impl Into<RawValue>) -> Self {
        Self {
            name: name.to_string(),
            value: Mutex::new(value.into()),
            status: Mutex::new(DeviceStatus::ok().with_message("idle")),
            status_error: Mutex::new(None),
            busy_polls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            limits: Mutex::new(Limits::unlimited()),
            follow_target: Mutex::new(true),
            starts: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(journal.clone());
        self
    }

    pub fn with_limits(self, min: f64, max: f64) -> Self {
        *self.limits.lock() = Limits::new(min, max);
        self
    }

    pub fn set_value(&self, value: impl Into<RawValue>) {
        *self.value.lock() = value.into();
    }

    pub fn set_status(&self, status: DeviceStatus) {
        *self.status.lock() = status;
    }

    pub fn fail_status(&self, message: &str) {
        *self.status_error.lock() = Some(message.to_string());
    }

    /// Report `Busy` for the next `polls` status queries.
    pub fn script_busy(&self, polls: usize) {
        self.busy_polls.store(polls, Ordering::SeqCst);
    }

    /// Keep the current readback when started, as a jammed axis would.
    pub fn hold_position(&self) {
        *self.follow_target.lock() = false;
    }

    pub fn starts(&self) -> Vec<RawValue> {
        self.starts.lock().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    fn record(&self, entry: String) {
        if let Some(journal) = &self.journal {
            journal.lock().push(entry);
        }
    }
}

#[async_trait::async_trait]
impl Readable for MockMoveable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, _maxage: MaxAge) -> DeviceResult<RawValue> {
        Ok(self.value.lock().clone())
    }

    async fn status(&self, _maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.status_error.lock().clone() {
            return Err(DeviceError::communication(&self.name, message));
        }
        let busy = self
            .busy_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if busy {
            return Ok(DeviceStatus::new(StatusCode::Busy).with_message("moving"));
        }
        Ok(self.status.lock().clone())
    }

    async fn reset(&self) -> DeviceResult<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.record(format!("reset:{}", self.name));
        Ok(())
    }
}

#[async_trait::async_trait]
impl Moveable for MockMoveable {
    async fn start(&self, target: RawValue) -> DeviceResult<()> {
        self.record(format!("start:{}={}", self.name, target));
        self.starts.lock().push(target.clone());
        if *self.follow_target.lock() {
            *self.value.lock() = target;
        }
        Ok(())
    }

    async fn stop(&self) -> DeviceResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.record(format!("stop:{}", self.name));
        Ok(())
    }

    async fn is_allowed(&self, target: &RawValue) -> Result<(), String> {
        match target {
            RawValue::Float(v) => self.limits.lock().check(*v),
            RawValue::Text(_) => Ok(()),
        }
    }

    fn wait_interval(&self) -> Duration {
        Duration::from_millis(1)
    }

    async fn wait(&self) -> DeviceResult<RawValue> {
        self.record(format!("wait:{}", self.name));
        loop {
            let status = self.status(Duration::ZERO).await?;
            match status.code {
                StatusCode::Busy => tokio::time::sleep(self.wait_interval()).await,
                StatusCode::NotReached => {
                    return Err(DeviceError::position(&self.name, status.message))
                }
                StatusCode::Error => return Err(DeviceError::movement(&self.name, status.message)),
                _ => return self.read(Duration::ZERO).await,
            }
        }
    }
}

pub struct MockReadable {
    name: String,
    value: Mutex<RawValue>,
    status: Mutex<DeviceStatus>,
}

impl MockReadable {
    pub fn new(name: &str, value: impl Into<RawValue>) -> Self {
        Self {
            name: name.to_string(),
            value: Mutex::new(value.into()),
            status: Mutex::new(DeviceStatus::ok()),
        }
    }

    pub fn set_value(&self, value: impl Into<RawValue>) {
        *self.value.lock() = value.into();
    }

    pub fn set_status(&self, status: DeviceStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait::async_trait]
impl Readable for MockReadable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, _maxage: MaxAge) -> DeviceResult<RawValue> {
        Ok(self.value.lock().clone())
    }

    async fn status(&self, _maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        Ok(self.status.lock().clone())
    }
}
