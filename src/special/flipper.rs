use std::{sync::Arc, time::Duration};

use crate::{
    device::{status::StatusCode, status_info::DeviceStatus, value::RawValue, MaxAge, Moveable},
    error::{DeviceError, DeviceResult},
    mapped::{
        target::{TargetRequest, SAME, SWITCH},
        MappedCore, MappedMoveable, MappedReadable, Resolved,
    },
    switcher::{config::SwitcherConfig, Switcher},
};

/// A two-state spin flipper.
///
/// Besides its two configured states it accepts `same` (re-issue the current
/// state) and `switch` (go to the other state). An unconfigured readback is
/// never acceptable for a flipper, so it is reported as not reached even
/// when a fallback name is configured.
pub struct Flipper {
    inner: Switcher,
}

impl Flipper {
    pub fn new(
        name: impl Into<String>,
        config: SwitcherConfig,
        moveable: Arc<dyn Moveable>,
    ) -> DeviceResult<Self> {
        let name = name.into();
        if config.mapping.len() != 2 {
            return Err(DeviceError::configuration(
                &name,
                format!(
                    "a flipper needs exactly two states, {} are configured",
                    config.mapping.len()
                ),
            ));
        }
        if let Some(reserved) = [SAME, SWITCH]
            .into_iter()
            .find(|pseudo| config.mapping.contains_key(*pseudo))
        {
            return Err(DeviceError::configuration(
                &name,
                format!("{:?} is reserved and cannot be a state name", reserved),
            ));
        }
        Ok(Self {
            inner: Switcher::new(name, config, moveable)?,
        })
    }

    pub fn inner(&self) -> &Switcher {
        &self.inner
    }

    async fn current_state(&self) -> DeviceResult<String> {
        match self.do_read(Duration::ZERO).await {
            Ok(Resolved::Position(name)) => Ok(name),
            Ok(other) => Err(DeviceError::invalid_value(
                self.core().name(),
                format!("current state {:?} is not a configured state", other.name()),
            )),
            Err(err) => Err(DeviceError::invalid_value(
                self.core().name(),
                format!("current state cannot be determined: {}", err.message()),
            )),
        }
    }
}

#[async_trait::async_trait]
impl MappedReadable for Flipper {
    type Raw = RawValue;

    fn core(&self) -> &MappedCore<RawValue> {
        self.inner.core()
    }

    async fn read_raw(&self, maxage: MaxAge) -> DeviceResult<RawValue> {
        self.inner.read_raw(maxage).await
    }

    async fn attached_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        self.inner.attached_status(maxage).await
    }

    fn describe_attached(&self) -> String {
        self.inner.describe_attached()
    }

    fn format_raw(&self, raw: &RawValue) -> String {
        self.inner.format_raw(raw)
    }

    async fn do_reset(&self) -> DeviceResult<()> {
        self.inner.do_reset().await
    }

    async fn do_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        let status = self.inner.do_status(maxage).await?;
        if status.code == StatusCode::Unknown {
            return Ok(DeviceStatus::new(StatusCode::NotReached).with_message(status.message));
        }
        Ok(status)
    }
}

#[async_trait::async_trait]
impl MappedMoveable for Flipper {
    async fn start_raw(&self, raw: RawValue) -> DeviceResult<()> {
        self.inner.start_raw(raw).await
    }

    async fn is_allowed_raw(&self, raw: &RawValue) -> Result<(), String> {
        self.inner.is_allowed_raw(raw).await
    }

    async fn do_stop(&self) -> DeviceResult<()> {
        self.inner.do_stop().await
    }

    async fn resolve_target(&self, target: &RawValue) -> DeviceResult<String> {
        match TargetRequest::parse(target) {
            TargetRequest::Literal(name) => {
                self.inner.resolve_target(&RawValue::Text(name)).await
            }
            TargetRequest::Same => self.current_state().await,
            TargetRequest::Toggle => {
                let current = self.current_state().await?;
                let table = self.core().table();
                let other = table
                    .names()
                    .find(|name| *name != current)
                    .map(str::to_string);
                other.ok_or_else(|| {
                    DeviceError::invalid_value(self.core().name(), "no other state to switch to")
                })
            }
        }
    }
}
