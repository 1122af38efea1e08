pub mod limits;
pub mod status;
pub mod status_info;
pub mod value;
pub mod virtual_device;

#[cfg(test)]
pub(crate) mod testing;

use std::{sync::Arc, time::Duration};

use status::StatusCode;
use status_info::DeviceStatus;
use tracing::debug;
use value::RawValue;

use crate::error::{DeviceError, DeviceResult};

/// Age limit for cached values. `Duration::ZERO` asks for a fresh hardware
/// read.
pub type MaxAge = Duration;

pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_millis(300);

/// A device whose value and status can be queried.
#[async_trait::async_trait]
pub trait Readable: Send + Sync {
    fn name(&self) -> &str;

    fn unit(&self) -> &str {
        ""
    }

    async fn read(&self, maxage: MaxAge) -> DeviceResult<RawValue>;
    async fn status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus>;

    async fn reset(&self) -> DeviceResult<()> {
        Ok(())
    }

    fn format(&self, value: &RawValue) -> String {
        value.format_with_unit(self.unit())
    }
}

/// A device that can be driven to a target.
#[async_trait::async_trait]
pub trait Moveable: Readable {
    async fn start(&self, target: RawValue) -> DeviceResult<()>;
    async fn stop(&self) -> DeviceResult<()>;

    /// `Err` carries the human readable reason for refusing `target`.
    async fn is_allowed(&self, target: &RawValue) -> Result<(), String>;

    fn wait_interval(&self) -> Duration {
        DEFAULT_WAIT_INTERVAL
    }

    /// Block until the device leaves the busy state and return its value.
    async fn wait(&self) -> DeviceResult<RawValue> {
        loop {
            let status = self.status(Duration::ZERO).await?;
            match status.code {
                StatusCode::Busy => {
                    debug!("{}: waiting, {}", self.name(), status);
                    tokio::time::sleep(self.wait_interval()).await;
                }
                StatusCode::NotReached => {
                    return Err(DeviceError::position(self.name(), status.message));
                }
                StatusCode::Error => {
                    return Err(DeviceError::movement(self.name(), status.message));
                }
                _ => return self.read(Duration::ZERO).await,
            }
        }
    }
}

/// A device attached to a multi-device switcher, tagged by capability.
///
/// Only moveable entries take part in start/stop broadcasts; every entry is
/// read and contributes to the fused status.
#[derive(Clone)]
pub enum Attached {
    Moveable(Arc<dyn Moveable>),
    Readable(Arc<dyn Readable>),
}

impl Attached {
    pub fn name(&self) -> &str {
        match self {
            Attached::Moveable(dev) => dev.name(),
            Attached::Readable(dev) => dev.name(),
        }
    }

    pub fn format(&self, value: &RawValue) -> String {
        match self {
            Attached::Moveable(dev) => dev.format(value),
            Attached::Readable(dev) => dev.format(value),
        }
    }

    pub async fn read(&self, maxage: MaxAge) -> DeviceResult<RawValue> {
        match self {
            Attached::Moveable(dev) => dev.read(maxage).await,
            Attached::Readable(dev) => dev.read(maxage).await,
        }
    }

    pub async fn status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        match self {
            Attached::Moveable(dev) => dev.status(maxage).await,
            Attached::Readable(dev) => dev.status(maxage).await,
        }
    }

    pub async fn reset(&self) -> DeviceResult<()> {
        match self {
            Attached::Moveable(dev) => dev.reset().await,
            Attached::Readable(dev) => dev.reset().await,
        }
    }

    pub fn as_moveable(&self) -> Option<&Arc<dyn Moveable>> {
        match self {
            Attached::Moveable(dev) => Some(dev),
            Attached::Readable(_) => None,
        }
    }

    /// The read side of the device, whatever its capability.
    pub fn as_readable(&self) -> Arc<dyn Readable> {
        match self {
            Attached::Readable(dev) => dev.clone(),
            Attached::Moveable(_) => Arc::new(self.clone()),
        }
    }

    pub fn unit(&self) -> &str {
        match self {
            Attached::Moveable(dev) => dev.unit(),
            Attached::Readable(dev) => dev.unit(),
        }
    }
}

#[async_trait::async_trait]
impl Readable for Attached {
    fn name(&self) -> &str {
        Attached::name(self)
    }

    fn unit(&self) -> &str {
        Attached::unit(self)
    }

    async fn read(&self, maxage: MaxAge) -> DeviceResult<RawValue> {
        Attached::read(self, maxage).await
    }

    async fn status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        Attached::status(self, maxage).await
    }

    async fn reset(&self) -> DeviceResult<()> {
        Attached::reset(self).await
    }

    fn format(&self, value: &RawValue) -> String {
        Attached::format(self, value)
    }
}

/// Status of every device, fused into one. A device that fails to report is
/// counted as being in error.
pub async fn fused_status(devices: &[Attached], maxage: MaxAge) -> DeviceStatus {
    let mut statuses = Vec::with_capacity(devices.len());
    for dev in devices {
        let status = match dev.status(maxage).await {
            Ok(status) => status,
            Err(err) => DeviceStatus::new(StatusCode::Error).with_message(err.message()),
        };
        statuses.push((dev.name(), status));
    }
    status_info::multi_status(&statuses)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::device::testing::MockMoveable;

    /// Busy for a number of polls; relies on the provided `wait`.
    struct Countdown {
        polls: AtomicUsize,
        calls: AtomicUsize,
        end: DeviceStatus,
    }

    impl Countdown {
        fn new(polls: usize, end: DeviceStatus) -> Self {
            Self {
                polls: AtomicUsize::new(polls),
                calls: AtomicUsize::new(0),
                end,
            }
        }
    }

    #[async_trait::async_trait]
    impl Readable for Countdown {
        fn name(&self) -> &str {
            "countdown"
        }

        async fn read(&self, _maxage: MaxAge) -> DeviceResult<RawValue> {
            Ok(RawValue::Float(3.0))
        }

        async fn status(&self, _maxage: MaxAge) -> DeviceResult<DeviceStatus> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.polls.load(Ordering::SeqCst);
            if left > 0 {
                self.polls.store(left - 1, Ordering::SeqCst);
                return Ok(DeviceStatus::new(StatusCode::Busy));
            }
            Ok(self.end.clone())
        }
    }

    #[async_trait::async_trait]
    impl Moveable for Countdown {
        async fn start(&self, _target: RawValue) -> DeviceResult<()> {
            Ok(())
        }

        async fn stop(&self) -> DeviceResult<()> {
            Ok(())
        }

        async fn is_allowed(&self, _target: &RawValue) -> Result<(), String> {
            Ok(())
        }

        fn wait_interval(&self) -> Duration {
            Duration::from_millis(1)
        }
    }

    #[tokio::test]
    async fn test_wait_returns_value_once_idle() {
        let dev = Countdown::new(2, DeviceStatus::ok());
        let value = dev.wait().await.unwrap();
        assert_eq!(value, RawValue::Float(3.0));
        assert_eq!(dev.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_maps_error_states() {
        let dev = Countdown::new(0, DeviceStatus::new(StatusCode::NotReached).with_message("jammed"));
        assert!(matches!(
            dev.wait().await,
            Err(DeviceError::Position { .. })
        ));

        let dev = Countdown::new(1, DeviceStatus::new(StatusCode::Error).with_message("fault"));
        assert!(matches!(dev.wait().await, Err(DeviceError::Move { .. })));
    }

    #[tokio::test]
    async fn test_fused_status_counts_failures_as_error() {
        let ok = Arc::new(MockMoveable::new("a", 0.0));
        let broken = Arc::new(MockMoveable::new("b", 0.0));
        broken.fail_status("no answer");
        let devices = vec![Attached::Moveable(ok), Attached::Moveable(broken)];

        let fused = fused_status(&devices, Duration::ZERO).await;
        assert_eq!(fused.code, StatusCode::Error);
        assert!(fused.message.contains("b=no answer"));
    }
}
