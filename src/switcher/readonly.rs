use std::sync::Arc;

use crate::{
    device::{status_info::DeviceStatus, value::RawValue, MaxAge, Readable},
    error::DeviceResult,
    mapped::{table::PositionTable, MappedCore, MappedReadable},
};

use super::config::ReadonlySwitcherConfig;

/// Like a [`Switcher`](super::Switcher), but only reads: the attached device
/// is a readable, e.g. a digital input reporting a shutter state.
pub struct ReadonlySwitcher {
    core: MappedCore<RawValue>,
    readable: Arc<dyn Readable>,
}

impl ReadonlySwitcher {
    pub fn new(
        name: impl Into<String>,
        config: ReadonlySwitcherConfig,
        readable: Arc<dyn Readable>,
    ) -> DeviceResult<Self> {
        let name = name.into();
        let table = PositionTable::new(&name, config.mapping, config.precision.as_ref(), 1)?;
        Ok(Self {
            core: MappedCore::new(name, table).with_fallback(config.fallback),
            readable,
        })
    }

    pub fn readable(&self) -> &Arc<dyn Readable> {
        &self.readable
    }
}

#[async_trait::async_trait]
impl MappedReadable for ReadonlySwitcher {
    type Raw = RawValue;

    fn core(&self) -> &MappedCore<RawValue> {
        &self.core
    }

    async fn read_raw(&self, maxage: MaxAge) -> DeviceResult<RawValue> {
        self.readable.read(maxage).await
    }

    async fn attached_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        self.readable.status(maxage).await
    }

    fn describe_attached(&self) -> String {
        self.readable.name().to_string()
    }

    fn format_raw(&self, raw: &RawValue) -> String {
        self.readable.format(raw)
    }

    async fn do_reset(&self) -> DeviceResult<()> {
        self.readable.reset().await
    }
}
