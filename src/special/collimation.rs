use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    device::{
        status_info::{multi_status, DeviceStatus},
        value::RawValue,
        MaxAge, Moveable, Readable,
    },
    error::DeviceResult,
    mapped::{table::Precision, MappedCore, MappedMoveable, MappedReadable, Resolved},
    switcher::{config::SwitcherConfig, ReadPolicy, Switcher},
};

/// Readback of a slit whose carrier is not in the active position.
pub const NOT_APPLICABLE: &str = "N.A.";

/// Default name prefix of collimation parking positions.
pub const PARKING_PREFIX: &str = "P";

pub const DEFAULT_PRECISION: f64 = 0.1;
pub const DEFAULT_FALLBACK: &str = "Unknown";

/// Settings of a collimation element switcher. Fields left unset take the
/// collimation defaults: precision 0.1, fallback `Unknown`, non-blocking
/// moves and the `P` parking prefix.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ColliSwitcherConfig {
    pub mapping: IndexMap<String, RawValue>,
    #[serde(default)]
    pub precision: Option<Precision>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default)]
    pub blockingmove: Option<bool>,
    #[serde(default)]
    pub relax_mapping: bool,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl ColliSwitcherConfig {
    pub fn new(mapping: IndexMap<String, RawValue>) -> Self {
        Self {
            mapping,
            precision: None,
            fallback: None,
            blockingmove: None,
            relax_mapping: false,
            prefix: None,
        }
    }

    fn split(self) -> (SwitcherConfig, String) {
        let config = SwitcherConfig {
            mapping: self.mapping,
            precision: Some(
                self.precision
                    .unwrap_or(Precision::Uniform(DEFAULT_PRECISION)),
            ),
            fallback: Some(
                self.fallback
                    .unwrap_or_else(|| DEFAULT_FALLBACK.to_string()),
            ),
            blockingmove: self.blockingmove.unwrap_or(false),
            relax_mapping: self.relax_mapping,
        };
        let prefix = self.prefix.unwrap_or_else(|| PARKING_PREFIX.to_string());
        (config, prefix)
    }
}

/// A collimation element switcher. Parking positions (names starting with
/// the prefix) often share coordinates with working positions and are only
/// reported when nothing else matches.
pub fn colli_switcher(
    name: impl Into<String>,
    config: ColliSwitcherConfig,
    moveable: Arc<dyn Moveable>,
) -> DeviceResult<Switcher> {
    let (config, prefix) = config.split();
    Ok(Switcher::new(name, config, moveable)?.with_policy(ReadPolicy::Deferred { prefix }))
}

/// A slit mounted on a moving carrier, e.g. a guide table. It is only
/// effective while the carrier is at `active_position`.
pub struct ColliSlit {
    inner: Switcher,
    carrier: Arc<dyn Readable>,
    active_position: RawValue,
}

impl ColliSlit {
    pub fn new(
        name: impl Into<String>,
        config: SwitcherConfig,
        moveable: Arc<dyn Moveable>,
        carrier: Arc<dyn Readable>,
        active_position: RawValue,
    ) -> DeviceResult<Self> {
        Ok(Self {
            inner: Switcher::new(name, config, moveable)?,
            carrier,
            active_position,
        })
    }

    pub fn inner(&self) -> &Switcher {
        &self.inner
    }

    async fn is_active(&self, maxage: MaxAge) -> DeviceResult<bool> {
        let position = self.carrier.read(maxage).await?;
        Ok(position.deviation(&self.active_position, None).is_some())
    }
}

#[async_trait::async_trait]
impl MappedReadable for ColliSlit {
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

    async fn do_read(&self, maxage: MaxAge) -> DeviceResult<Resolved> {
        if !self.is_active(maxage).await? {
            return Ok(Resolved::Unmapped(NOT_APPLICABLE.to_string()));
        }
        let raw = self.read_raw(maxage).await?;
        self.map_read_value(&raw)
    }

    async fn do_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        if self.is_active(maxage).await? {
            return self.inner.do_status(maxage).await;
        }
        let moveable = self.inner.moveable();
        let statuses = [
            (moveable.name(), moveable.status(maxage).await?),
            (self.carrier.name(), self.carrier.status(maxage).await?),
        ];
        Ok(multi_status(&statuses))
    }
}

#[async_trait::async_trait]
impl MappedMoveable for ColliSlit {
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

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indexmap::IndexMap;

    use super::*;
    use crate::device::{
        status::StatusCode,
        testing::{MockMoveable, MockReadable},
    };

    fn mapping(entries: &[(&str, f64)]) -> IndexMap<String, RawValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), RawValue::Float(*v)))
            .collect()
    }

    fn slit() -> (Arc<MockMoveable>, Arc<MockReadable>, ColliSlit) {
        let motor = Arc::new(MockMoveable::new("slit_m", 20.0));
        let table = Arc::new(MockReadable::new("col_2", "slit"));
        let slit = ColliSlit::new(
            "col_2_slit",
            SwitcherConfig::new(mapping(&[("20x20", 20.0), ("30x30", 30.0)])).with_precision(0.1),
            motor.clone(),
            table.clone(),
            "slit".into(),
        )
        .unwrap();
        (motor, table, slit)
    }

    #[tokio::test]
    async fn test_active_slit_behaves_like_switcher() {
        let (_motor, _table, slit) = slit();
        assert_eq!(slit.read(Duration::ZERO).await.unwrap(), RawValue::from("20x20"));
        slit.start("30x30".into()).await.unwrap();
        assert_eq!(slit.read(Duration::ZERO).await.unwrap(), RawValue::from("30x30"));
        assert!(slit.status(Duration::ZERO).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_inactive_slit_reads_not_applicable() {
        let (motor, table, slit) = slit();
        table.set_value("ng");
        motor.set_value(99.0);
        assert_eq!(
            slit.read(Duration::ZERO).await.unwrap(),
            RawValue::from(NOT_APPLICABLE)
        );

        table.set_status(DeviceStatus::new(StatusCode::Busy).with_message("moving to ng"));
        let status = slit.status(Duration::ZERO).await.unwrap();
        assert_eq!(status.code, StatusCode::Busy);
        assert!(status.message.contains("col_2=moving to ng"));
    }

    #[tokio::test]
    async fn test_parking_positions_are_last_resort() {
        let motor = Arc::new(MockMoveable::new("col_m", 400.0));
        let mut config =
            ColliSwitcherConfig::new(mapping(&[("P1", 400.0), ("ng", 400.0), ("P2", 800.0)]));
        config.fallback = Some("undefined".to_string());
        let sw = colli_switcher("col", config, motor.clone()).unwrap();
        assert_eq!(sw.read(Duration::ZERO).await.unwrap(), RawValue::from("ng"));
        motor.set_value(800.05);
        assert_eq!(sw.read(Duration::ZERO).await.unwrap(), RawValue::from("P2"));
        motor.set_value(600.0);
        assert_eq!(sw.read(Duration::ZERO).await.unwrap(), RawValue::from("undefined"));
    }

    #[tokio::test]
    async fn test_collimation_defaults() {
        let motor = Arc::new(MockMoveable::new("col_m", 400.08));
        let sw = colli_switcher(
            "col",
            ColliSwitcherConfig::new(mapping(&[("ng", 400.0), ("P1", 1200.0)])),
            motor.clone(),
        )
        .unwrap();
        assert_eq!(sw.read(Duration::ZERO).await.unwrap(), RawValue::from("ng"));
        assert!(!sw.blocking());

        motor.set_value(700.0);
        assert_eq!(sw.read(Duration::ZERO).await.unwrap(), RawValue::from(DEFAULT_FALLBACK));
        assert_eq!(
            sw.status(Duration::ZERO).await.unwrap().code,
            StatusCode::Unknown
        );
    }

    #[test]
    fn test_explicit_settings_override_defaults() {
        let config: ColliSwitcherConfig = toml::from_str(
            r#"
            mapping = { ng = 400.0, B1 = 800.0 }
            precision = 0.5
            blockingmove = true
            prefix = "B"
            "#,
        )
        .unwrap();
        let motor = Arc::new(MockMoveable::new("col_m", 400.0));
        let sw = colli_switcher("col", config, motor).unwrap();
        assert!(sw.blocking());
        assert_eq!(sw.core().table().tolerances(), &[Some(0.5)]);
    }
}
