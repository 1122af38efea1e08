pub mod config;
pub mod multi;
pub mod readonly;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::debug;

use crate::{
    device::{status_info::DeviceStatus, value::RawValue, MaxAge, Moveable},
    error::DeviceResult,
    mapped::{table::PositionTable, MappedCore, MappedMoveable, MappedReadable, Resolved},
};
use config::SwitcherConfig;

/// How a readback is matched against the configured positions.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadPolicy {
    /// Closest position within precision.
    Nearest,
    /// Like `Nearest`, but positions whose name starts with the prefix are
    /// only chosen when nothing else matches (parking positions of a
    /// collimation axis).
    Deferred { prefix: String },
    /// Tolerance grows with the setpoint: `precision + relative * |setpoint|`.
    /// Suits supplies whose regulation error scales with the output.
    Proportional { relative: f64 },
}

/// Maps position names onto discrete values of one continuous moveable.
///
/// Useful for a motor that only ever moves to a few known positions, e.g. a
/// monochromator changer, which can then be driven as `up`/`down` while the
/// underlying axis stays available for debugging.
pub struct Switcher {
    core: MappedCore<RawValue>,
    moveable: Arc<dyn Moveable>,
    blocking: AtomicBool,
    policy: ReadPolicy,
}

impl Switcher {
    pub fn new(
        name: impl Into<String>,
        config: SwitcherConfig,
        moveable: Arc<dyn Moveable>,
    ) -> DeviceResult<Self> {
        let name = name.into();
        let table = PositionTable::new(&name, config.mapping, config.precision.as_ref(), 1)?;
        let core = MappedCore::new(name, table)
            .with_fallback(config.fallback)
            .with_relax_mapping(config.relax_mapping);
        Ok(Self {
            core,
            moveable,
            blocking: AtomicBool::new(config.blockingmove),
            policy: ReadPolicy::Nearest,
        })
    }

    pub fn with_policy(mut self, policy: ReadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn moveable(&self) -> &Arc<dyn Moveable> {
        &self.moveable
    }

    pub fn blocking(&self) -> bool {
        self.blocking.load(Ordering::Relaxed)
    }

    pub fn set_blocking(&self, blocking: bool) {
        self.blocking.store(blocking, Ordering::Relaxed);
    }

    fn deferred_match(&self, raw: &RawValue, prefix: &str) -> Option<String> {
        let table = self.core.table();
        let candidates = table.candidates(std::slice::from_ref(raw));
        candidates
            .iter()
            .find(|c| !c.name.starts_with(prefix))
            .or_else(|| candidates.first())
            .map(|c| c.name.to_string())
    }

    fn proportional_match(&self, raw: &RawValue, relative: f64) -> Option<String> {
        let value = raw.as_f64()?;
        let table = self.core.table();
        let base = table.tolerances().first().copied().flatten().unwrap_or(0.0);
        table
            .entries()
            .filter_map(|(name, setpoint)| {
                let setpoint = setpoint.as_f64()?;
                let deviation = (value - setpoint).abs();
                (deviation <= base + relative * setpoint.abs()).then_some((name, deviation))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name.to_string())
    }
}

#[async_trait::async_trait]
impl MappedReadable for Switcher {
    type Raw = RawValue;

    fn core(&self) -> &MappedCore<RawValue> {
        &self.core
    }

    async fn read_raw(&self, maxage: MaxAge) -> DeviceResult<RawValue> {
        self.moveable.read(maxage).await
    }

    async fn attached_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        self.moveable.status(maxage).await
    }

    fn describe_attached(&self) -> String {
        self.moveable.name().to_string()
    }

    fn format_raw(&self, raw: &RawValue) -> String {
        self.moveable.format(raw)
    }

    async fn do_reset(&self) -> DeviceResult<()> {
        self.moveable.reset().await
    }

    fn map_read_value(&self, raw: &RawValue) -> DeviceResult<Resolved> {
        let found = match &self.policy {
            ReadPolicy::Nearest => self
                .core
                .table()
                .best_match(std::slice::from_ref(raw))
                .map(str::to_string),
            ReadPolicy::Deferred { prefix } => self.deferred_match(raw, prefix),
            ReadPolicy::Proportional { relative } => self.proportional_match(raw, *relative),
        };
        match found {
            Some(name) => Ok(Resolved::Position(name)),
            None => self.unmapped(raw),
        }
    }
}

#[async_trait::async_trait]
impl MappedMoveable for Switcher {
    async fn start_raw(&self, raw: RawValue) -> DeviceResult<()> {
        self.moveable.start(raw).await?;
        if self.blocking() {
            debug!("{}: waiting for {}", self.core.name(), self.moveable.name());
            self.moveable.wait().await?;
        }
        Ok(())
    }

    async fn is_allowed_raw(&self, raw: &RawValue) -> Result<(), String> {
        self.moveable.is_allowed(raw).await
    }

    async fn do_stop(&self) -> DeviceResult<()> {
        self.moveable.stop().await
    }
}
