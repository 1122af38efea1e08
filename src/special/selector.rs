//! Velocity selector devices.
//!
//! The selector switcher picks one of a few tilt/speed presets. Detector
//! positions depend on the chosen preset, so every successful selector move
//! pushes the new preset name to its dependent detector switchers, which
//! then swap in the position table configured for that preset. Every
//! selector preset must have a table in every dependent, which is checked
//! when the selector is constructed.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    device::{status_info::DeviceStatus, value::RawValue, MaxAge, Moveable, Readable},
    error::{DeviceError, DeviceResult},
    mapped::{
        table::{PositionTable, Precision},
        MappedCore, MappedMoveable, MappedReadable, Resolved,
    },
    switcher::{config::SwitcherConfig, Switcher},
};

/// Receiver of upstream position changes.
pub trait MappingRefresh: Send + Sync {
    /// `Err` when no table is configured for `upstream`.
    fn check_upstream(&self, upstream: &str) -> DeviceResult<()>;

    fn refresh_mapping(&self, upstream: &str) -> DeviceResult<()>;
}

pub struct SelectorSwitcher {
    inner: Switcher,
    dependents: Vec<Arc<dyn MappingRefresh>>,
}

impl SelectorSwitcher {
    pub fn new(inner: Switcher, dependents: Vec<Arc<dyn MappingRefresh>>) -> DeviceResult<Self> {
        let table = inner.core().table();
        for dependent in &dependents {
            for name in table.names() {
                dependent.check_upstream(name)?;
            }
        }
        Ok(Self { inner, dependents })
    }

    /// Push the position the selector is at now to every dependent. Nothing
    /// is pushed while the selector is away from its configured positions.
    pub async fn sync_dependents(&self) -> DeviceResult<()> {
        let name = self.inner.core().name();
        let raw = match self.inner.read_raw(Duration::ZERO).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("{}: dependents not synchronized: {}", name, err);
                return Ok(());
            }
        };
        match self.inner.map_read_value(&raw) {
            Ok(Resolved::Position(position)) => {
                for dependent in &self.dependents {
                    dependent.refresh_mapping(&position)?;
                }
            }
            _ => warn!(
                "{}: not at a configured position, dependents not synchronized",
                name
            ),
        }
        Ok(())
    }

    pub fn inner(&self) -> &Switcher {
        &self.inner
    }
}

#[async_trait::async_trait]
impl MappedReadable for SelectorSwitcher {
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

    fn map_read_value(&self, raw: &RawValue) -> DeviceResult<Resolved> {
        self.inner.map_read_value(raw)
    }
}

#[async_trait::async_trait]
impl MappedMoveable for SelectorSwitcher {
    async fn start_raw(&self, raw: RawValue) -> DeviceResult<()> {
        self.inner.start_raw(raw).await
    }

    async fn is_allowed_raw(&self, raw: &RawValue) -> Result<(), String> {
        self.inner.is_allowed_raw(raw).await
    }

    async fn do_stop(&self) -> DeviceResult<()> {
        self.inner.do_stop().await
    }

    async fn after_start(&self, name: &str) -> DeviceResult<()> {
        for dependent in &self.dependents {
            dependent.refresh_mapping(name)?;
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DetectorSwitcherConfig {
    /// Position table per upstream selector position.
    pub mappings: IndexMap<String, IndexMap<String, RawValue>>,
    #[serde(default)]
    pub precision: Option<Precision>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default = "default_blocking")]
    pub blockingmove: bool,
}

fn default_blocking() -> bool {
    true
}

/// A detector position switcher whose table follows the selector setting.
pub struct DetectorPositionSwitcher {
    inner: Switcher,
    tables: IndexMap<String, PositionTable<RawValue>>,
}

impl DetectorPositionSwitcher {
    /// Starts out with the table of the first configured upstream position.
    pub fn new(
        name: impl Into<String>,
        config: DetectorSwitcherConfig,
        moveable: Arc<dyn Moveable>,
    ) -> DeviceResult<Self> {
        let name = name.into();
        let mut tables = IndexMap::with_capacity(config.mappings.len());
        for (upstream, mapping) in &config.mappings {
            let table = PositionTable::new(&name, mapping.clone(), config.precision.as_ref(), 1)?;
            tables.insert(upstream.clone(), table);
        }
        let Some(initial) = config.mappings.values().next() else {
            return Err(DeviceError::configuration(
                &name,
                "no detector positions configured",
            ));
        };

        let mut switcher_config = SwitcherConfig::new(initial.clone()).with_blocking(config.blockingmove);
        switcher_config.precision = config.precision;
        switcher_config.fallback = config.fallback;
        Ok(Self {
            inner: Switcher::new(name, switcher_config, moveable)?,
            tables,
        })
    }

    pub fn inner(&self) -> &Switcher {
        &self.inner
    }
}

impl DetectorPositionSwitcher {
    fn table_for(&self, upstream: &str) -> DeviceResult<&PositionTable<RawValue>> {
        self.tables.get(upstream).ok_or_else(|| {
            DeviceError::configuration(
                self.inner.core().name(),
                format!("no detector positions configured for selector position {:?}", upstream),
            )
        })
    }
}

impl MappingRefresh for DetectorPositionSwitcher {
    fn check_upstream(&self, upstream: &str) -> DeviceResult<()> {
        self.table_for(upstream).map(|_| ())
    }

    fn refresh_mapping(&self, upstream: &str) -> DeviceResult<()> {
        let table = self.table_for(upstream)?;
        info!(
            "{}: switching to positions for {}",
            self.inner.core().name(),
            upstream
        );
        self.inner.core().replace_table(table.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl MappedReadable for DetectorPositionSwitcher {
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
}

#[async_trait::async_trait]
impl MappedMoveable for DetectorPositionSwitcher {
    async fn start_raw(&self, raw: RawValue) -> DeviceResult<()> {
        self.inner.start_raw(raw).await
    }

    async fn is_allowed_raw(&self, raw: &RawValue) -> Result<(), String> {
        self.inner.is_allowed_raw(raw).await
    }

    async fn do_stop(&self) -> DeviceResult<()> {
        self.inner.do_stop().await
    }
}

/// Neutron wavelength selected by a velocity selector, `λ = k / speed`.
///
/// Not a switcher: a continuous device translating between wavelength and
/// the speed of the attached selector rotor.
pub struct SelectorWavelength {
    name: String,
    speed: Arc<dyn Moveable>,
    constant: f64,
    unit: String,
}

impl SelectorWavelength {
    pub fn new(
        name: impl Into<String>,
        speed: Arc<dyn Moveable>,
        constant: f64,
    ) -> DeviceResult<Self> {
        let name = name.into();
        if !constant.is_finite() || constant <= 0.0 {
            return Err(DeviceError::configuration(
                &name,
                format!("wavelength constant must be positive, got {}", constant),
            ));
        }
        Ok(Self {
            name,
            speed,
            constant,
            unit: "A".to_string(),
        })
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    fn speed_for(&self, target: &RawValue) -> Result<f64, String> {
        match target.as_f64() {
            Some(lambda) if lambda > 0.0 && lambda.is_finite() => Ok(self.constant / lambda),
            _ => Err(format!("wavelength must be a positive number, got {}", target)),
        }
    }
}

#[async_trait::async_trait]
impl Readable for SelectorWavelength {
    fn name(&self) -> &str {
        &self.name
    }

    fn unit(&self) -> &str {
        &self.unit
    }

    async fn read(&self, maxage: MaxAge) -> DeviceResult<RawValue> {
        let speed = self.speed.read(maxage).await?;
        match speed.as_f64() {
            Some(speed) if speed != 0.0 => Ok(RawValue::Float(self.constant / speed)),
            _ => Err(DeviceError::position(
                &self.name,
                format!(
                    "no wavelength defined at selector speed {}",
                    self.speed.format(&speed)
                ),
            )),
        }
    }

    async fn status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        self.speed.status(maxage).await
    }

    async fn reset(&self) -> DeviceResult<()> {
        self.speed.reset().await
    }
}

#[async_trait::async_trait]
impl Moveable for SelectorWavelength {
    async fn start(&self, target: RawValue) -> DeviceResult<()> {
        let speed = self
            .speed_for(&target)
            .map_err(|reason| DeviceError::invalid_value(&self.name, reason))?;
        self.speed.start(RawValue::Float(speed)).await
    }

    async fn stop(&self) -> DeviceResult<()> {
        self.speed.stop().await
    }

    async fn is_allowed(&self, target: &RawValue) -> Result<(), String> {
        let speed = self.speed_for(target)?;
        self.speed.is_allowed(&RawValue::Float(speed)).await
    }

    fn wait_interval(&self) -> Duration {
        self.speed.wait_interval()
    }
}
