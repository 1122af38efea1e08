use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::{
    device::{
        fused_status, status_info::DeviceStatus, value::RawValue, Attached, MaxAge, Moveable,
        Readable,
    },
    error::{DeviceError, DeviceResult},
    mapped::{table::PositionTable, MappedCore, MappedMoveable, MappedReadable},
};

use super::config::MultiSwitcherConfig;

/// Several devices driven together under one position name.
///
/// Mapping entries hold one raw value per attached device, moveables first,
/// then readables. Readables are only read back to verify the position; they
/// are never started.
pub struct MultiSwitcher {
    core: MappedCore<Vec<RawValue>>,
    moveables: Vec<Arc<dyn Moveable>>,
    devices: Vec<Attached>,
    blocking: AtomicBool,
    simulation: bool,
}

impl MultiSwitcher {
    pub fn new(
        name: impl Into<String>,
        config: MultiSwitcherConfig,
        moveables: Vec<Arc<dyn Moveable>>,
        readables: Vec<Arc<dyn Readable>>,
    ) -> DeviceResult<Self> {
        let name = name.into();
        if moveables.is_empty() {
            return Err(DeviceError::configuration(
                &name,
                "at least one moveable must be attached",
            ));
        }
        let devices: Vec<Attached> = moveables
            .iter()
            .cloned()
            .map(Attached::Moveable)
            .chain(readables.into_iter().map(Attached::Readable))
            .collect();
        let table = PositionTable::new(
            &name,
            config.mapping,
            config.precision.as_ref(),
            devices.len(),
        )?;
        Ok(Self {
            core: MappedCore::new(name, table).with_fallback(config.fallback),
            moveables,
            devices,
            blocking: AtomicBool::new(config.blockingmove),
            simulation: false,
        })
    }

    /// In simulation the readables are not asked once a target is known; their
    /// part of the readback is taken from the target's mapping entry.
    pub fn with_simulation(mut self, simulation: bool) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn moveables(&self) -> &[Arc<dyn Moveable>] {
        &self.moveables
    }

    pub fn devices(&self) -> &[Attached] {
        &self.devices
    }

    pub fn blocking(&self) -> bool {
        self.blocking.load(Ordering::Relaxed)
    }

    pub fn set_blocking(&self, blocking: bool) {
        self.blocking.store(blocking, Ordering::Relaxed);
    }

    /// Check every moveable's target before anything moves.
    pub(crate) async fn validate(&self, raw: &[RawValue]) -> DeviceResult<()> {
        if raw.len() < self.moveables.len() {
            return Err(DeviceError::invalid_value(
                self.core.name(),
                format!(
                    "target needs {} values, got {}",
                    self.moveables.len(),
                    raw.len()
                ),
            ));
        }
        for (dev, value) in self.moveables.iter().zip(raw) {
            if let Err(reason) = dev.is_allowed(value).await {
                return Err(DeviceError::invalid_value(
                    self.core.name(),
                    format!(
                        "target value {} not accepted by device {}: {}",
                        dev.format(value),
                        dev.name(),
                        reason
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Start the moveables at `indices`, in that order.
    pub(crate) async fn start_devices(&self, raw: &[RawValue], indices: &[usize]) -> DeviceResult<()> {
        for &i in indices {
            let (Some(dev), Some(value)) = (self.moveables.get(i), raw.get(i)) else {
                continue;
            };
            debug!("{}: starting {} to {}", self.core.name(), dev.name(), dev.format(value));
            dev.start(value.clone()).await?;
        }
        Ok(())
    }

    /// Wait until every moveable at `indices` is done. All of them are waited
    /// for even if one fails; the first failure is returned.
    pub(crate) async fn wait_devices(&self, indices: &[usize]) -> DeviceResult<()> {
        let waits = indices
            .iter()
            .filter_map(|&i| self.moveables.get(i))
            .map(|dev| async move { (dev.name().to_string(), dev.wait().await.map(|_| ())) });
        let results = join_all(waits).await;
        first_error(self.core.name(), "wait", results)
    }

    fn all_moveables(&self) -> Vec<usize> {
        (0..self.moveables.len()).collect()
    }
}

/// Reduce the results of a broadcast to the first error. Later errors are
/// only logged, so every device was addressed before the caller hears back.
pub(crate) fn first_error(
    owner: &str,
    action: &str,
    results: Vec<(String, DeviceResult<()>)>,
) -> DeviceResult<()> {
    let mut first = None;
    for (device, result) in results {
        if let Err(err) = result {
            if first.is_none() {
                first = Some(err);
            } else {
                warn!("{}: {} of {} failed: {}", owner, action, device, err);
            }
        }
    }
    first.map_or(Ok(()), Err)
}

#[async_trait::async_trait]
impl MappedReadable for MultiSwitcher {
    type Raw = Vec<RawValue>;

    fn core(&self) -> &MappedCore<Vec<RawValue>> {
        &self.core
    }

    async fn read_raw(&self, maxage: MaxAge) -> DeviceResult<Vec<RawValue>> {
        let simulated = if self.simulation {
            self.core
                .target()
                .and_then(|target| self.core.table().get(&target).cloned())
        } else {
            None
        };

        let mut values = Vec::with_capacity(self.devices.len());
        for (i, dev) in self.devices.iter().enumerate() {
            let predicted = match (dev, &simulated) {
                (Attached::Readable(_), Some(entry)) => entry.get(i).cloned(),
                _ => None,
            };
            match predicted {
                Some(value) => values.push(value),
                None => values.push(dev.read(maxage).await?),
            }
        }
        Ok(values)
    }

    async fn attached_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        Ok(fused_status(&self.devices, maxage).await)
    }

    fn describe_attached(&self) -> String {
        self.devices
            .iter()
            .map(Attached::name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn format_raw(&self, raw: &Vec<RawValue>) -> String {
        self.devices
            .iter()
            .zip(raw)
            .map(|(dev, value)| format!("{}={}", dev.name(), dev.format(value)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn do_reset(&self) -> DeviceResult<()> {
        let mut results = Vec::with_capacity(self.devices.len());
        for dev in &self.devices {
            results.push((dev.name().to_string(), dev.reset().await));
        }
        first_error(self.core.name(), "reset", results)
    }
}

#[async_trait::async_trait]
impl MappedMoveable for MultiSwitcher {
    async fn start_raw(&self, raw: Vec<RawValue>) -> DeviceResult<()> {
        self.validate(&raw).await?;
        let all = self.all_moveables();
        self.start_devices(&raw, &all).await?;
        if self.blocking() {
            self.wait_devices(&all).await?;
        }
        Ok(())
    }

    async fn is_allowed_raw(&self, raw: &Vec<RawValue>) -> Result<(), String> {
        self.validate(raw)
            .await
            .map_err(|err| err.message().to_string())
    }

    async fn do_stop(&self) -> DeviceResult<()> {
        let mut results = Vec::with_capacity(self.moveables.len());
        for dev in &self.moveables {
            results.push((dev.name().to_string(), dev.stop().await));
        }
        first_error(self.core.name(), "stop", results)
    }
}
