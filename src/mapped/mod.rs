//! Translation between symbolic position names and raw device values.
//!
//! A mapped device owns a [`PositionTable`] and forwards the actual motion to
//! one or more attached devices. The name/raw translation, validation and the
//! status algorithm live here once; concrete switchers only provide the
//! device-count specific hooks (`read_raw`, `start_raw`, ...). Every
//! [`MappedReadable`] is a [`Readable`] and every [`MappedMoveable`] is a
//! [`Moveable`] whose values are `RawValue::Text(position_name)`.

pub mod table;
pub mod target;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    device::{
        status::StatusCode, status_info::DeviceStatus, value::RawValue, MaxAge, Moveable,
        Readable,
    },
    error::{DeviceError, DeviceResult},
};
use table::{PositionTable, RawTarget};

/// State shared by every mapped device.
pub struct MappedCore<R> {
    name: String,
    table: RwLock<Arc<PositionTable<R>>>,
    fallback: Option<String>,
    relax_mapping: bool,
    target: RwLock<Option<String>>,
}

impl<R: RawTarget> MappedCore<R> {
    pub fn new(name: impl Into<String>, table: PositionTable<R>) -> Self {
        Self {
            name: name.into(),
            table: RwLock::new(Arc::new(table)),
            fallback: None,
            relax_mapping: false,
            target: RwLock::new(None),
        }
    }

    pub fn with_fallback(mut self, fallback: Option<String>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Report unmapped readbacks as their formatted raw value instead of
    /// failing.
    pub fn with_relax_mapping(mut self, relax: bool) -> Self {
        self.relax_mapping = relax;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> Arc<PositionTable<R>> {
        self.table.read().clone()
    }

    pub fn replace_table(&self, table: PositionTable<R>) {
        *self.table.write() = Arc::new(table);
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn relax_mapping(&self) -> bool {
        self.relax_mapping
    }

    pub fn target(&self) -> Option<String> {
        self.target.read().clone()
    }

    pub fn set_target(&self, name: &str) {
        *self.target.write() = Some(name.to_string());
    }
}

/// Outcome of inverse-mapping a readback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A configured position.
    Position(String),
    /// Nothing matched; the configured fallback name.
    Fallback(String),
    /// Nothing matched and mapping is relaxed; the formatted raw value.
    Unmapped(String),
}

impl Resolved {
    pub fn name(&self) -> &str {
        match self {
            Resolved::Position(name) | Resolved::Fallback(name) | Resolved::Unmapped(name) => name,
        }
    }

    pub fn into_name(self) -> String {
        match self {
            Resolved::Position(name) | Resolved::Fallback(name) | Resolved::Unmapped(name) => name,
        }
    }

    pub fn is_position(&self) -> bool {
        matches!(self, Resolved::Position(_))
    }
}

#[async_trait::async_trait]
pub trait MappedReadable: Send + Sync {
    type Raw: RawTarget;

    fn core(&self) -> &MappedCore<Self::Raw>;

    async fn read_raw(&self, maxage: MaxAge) -> DeviceResult<Self::Raw>;

    /// Status of the attached device(s), fused.
    async fn attached_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus>;

    /// Names of the attached devices, for messages.
    fn describe_attached(&self) -> String;

    /// Raw value formatted with units, for messages.
    fn format_raw(&self, raw: &Self::Raw) -> String;

    async fn do_reset(&self) -> DeviceResult<()>;

    fn map_read_value(&self, raw: &Self::Raw) -> DeviceResult<Resolved> {
        let table = self.core().table();
        match table.best_match(raw.components()) {
            Some(name) => Ok(Resolved::Position(name.to_string())),
            None => self.unmapped(raw),
        }
    }

    /// Resolution of a readback that matches no configured position.
    fn unmapped(&self, raw: &Self::Raw) -> DeviceResult<Resolved> {
        let core = self.core();
        if let Some(fallback) = core.fallback() {
            return Ok(Resolved::Fallback(fallback.to_string()));
        }
        if core.relax_mapping() {
            return Ok(Resolved::Unmapped(self.format_raw(raw)));
        }
        Err(DeviceError::position(
            core.name(),
            format!(
                "unknown position of {}: {}",
                self.describe_attached(),
                self.format_raw(raw)
            ),
        ))
    }

    async fn do_read(&self, maxage: MaxAge) -> DeviceResult<Resolved> {
        let raw = self.read_raw(maxage).await?;
        self.map_read_value(&raw)
    }

    /// Attached status wins unless it is OK; only then the readback is
    /// checked against the configured positions.
    async fn do_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        let attached = self.attached_status(maxage).await?;
        if attached.code != StatusCode::Ok {
            if attached.is_busy() {
                if let Some(target) = self.core().target() {
                    return Ok(attached.with_message(format!("moving to {}", target)));
                }
            }
            return Ok(attached);
        }

        match self.do_read(maxage).await {
            Ok(Resolved::Position(_)) => Ok(DeviceStatus::ok()),
            Ok(Resolved::Fallback(_)) => Ok(DeviceStatus::new(StatusCode::Unknown).with_message(
                format!(
                    "unconfigured position of {}, using fallback",
                    self.describe_attached()
                ),
            )),
            Ok(Resolved::Unmapped(_)) => Ok(DeviceStatus::new(StatusCode::NotReached)
                .with_message(format!(
                    "unconfigured position of {} or still moving",
                    self.describe_attached()
                ))),
            Err(DeviceError::Position { message, .. }) => {
                Ok(DeviceStatus::new(StatusCode::NotReached).with_message(message))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait::async_trait]
pub trait MappedMoveable: MappedReadable {
    /// Issue the motion of the attached device(s).
    async fn start_raw(&self, raw: Self::Raw) -> DeviceResult<()>;

    async fn is_allowed_raw(&self, raw: &Self::Raw) -> Result<(), String>;

    async fn do_stop(&self) -> DeviceResult<()>;

    /// Turn a requested target into a configured position name.
    async fn resolve_target(&self, target: &RawValue) -> DeviceResult<String> {
        let table = self.core().table();
        match target {
            RawValue::Text(name) if table.contains(name) => Ok(name.clone()),
            _ => Err(DeviceError::invalid_value(
                self.core().name(),
                format!(
                    "unknown position name {:?}; valid names are: {}",
                    target.to_string(),
                    table.valid_names()
                ),
            )),
        }
    }

    fn map_target_value(&self, name: &str) -> DeviceResult<Self::Raw> {
        let table = self.core().table();
        table.get(name).cloned().ok_or_else(|| {
            DeviceError::invalid_value(
                self.core().name(),
                format!(
                    "unknown position name {:?}; valid names are: {}",
                    name,
                    table.valid_names()
                ),
            )
        })
    }

    /// Called after the motion was issued and the target recorded.
    async fn after_start(&self, _name: &str) -> DeviceResult<()> {
        Ok(())
    }

    async fn do_start(&self, target: RawValue) -> DeviceResult<()> {
        let name = self.resolve_target(&target).await?;
        let raw = self.map_target_value(&name)?;
        debug!(
            "{}: {} -> {}",
            self.core().name(),
            name,
            self.format_raw(&raw)
        );
        self.start_raw(raw).await?;
        self.core().set_target(&name);
        self.after_start(&name).await
    }

    async fn do_is_allowed(&self, target: &RawValue) -> Result<(), String> {
        let name = self
            .resolve_target(target)
            .await
            .map_err(|err| err.message().to_string())?;
        let raw = self
            .map_target_value(&name)
            .map_err(|err| err.message().to_string())?;
        self.is_allowed_raw(&raw).await
    }
}

#[async_trait::async_trait]
impl<T> Readable for T
where
    T: MappedReadable,
{
    fn name(&self) -> &str {
        self.core().name()
    }

    async fn read(&self, maxage: MaxAge) -> DeviceResult<RawValue> {
        Ok(RawValue::Text(self.do_read(maxage).await?.into_name()))
    }

    async fn status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        self.do_status(maxage).await
    }

    async fn reset(&self) -> DeviceResult<()> {
        self.do_reset().await
    }
}

#[async_trait::async_trait]
impl<T> Moveable for T
where
    T: MappedMoveable,
{
    async fn start(&self, target: RawValue) -> DeviceResult<()> {
        self.do_start(target).await
    }

    async fn stop(&self) -> DeviceResult<()> {
        self.do_stop().await
    }

    async fn is_allowed(&self, target: &RawValue) -> Result<(), String> {
        self.do_is_allowed(target).await
    }
}
