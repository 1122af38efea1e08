use std::sync::Arc;

use tracing::debug;

use crate::{
    device::{status_info::DeviceStatus, value::RawValue, MaxAge, Moveable},
    error::DeviceResult,
    mapped::{MappedCore, MappedMoveable, MappedReadable},
    switcher::{config::MultiSwitcherConfig, multi::MultiSwitcher},
};

/// A set of attenuator blades switched together.
///
/// Blades that go to the `inserted` value are moved first and waited for;
/// only then are the remaining blades retracted, so the beam is never less
/// attenuated than at either end of the transition.
pub struct Attenuator {
    inner: MultiSwitcher,
    inserted: RawValue,
}

impl Attenuator {
    pub fn new(
        name: impl Into<String>,
        config: MultiSwitcherConfig,
        inserted: RawValue,
        blades: Vec<Arc<dyn Moveable>>,
    ) -> DeviceResult<Self> {
        Ok(Self {
            inner: MultiSwitcher::new(name, config, blades, vec![])?,
            inserted,
        })
    }

    pub fn inner(&self) -> &MultiSwitcher {
        &self.inner
    }

    /// Blade indices split into (inserting, retracting).
    fn phases(&self, raw: &[RawValue]) -> (Vec<usize>, Vec<usize>) {
        (0..self.inner.moveables().len()).partition(|&i| {
            raw.get(i)
                .is_some_and(|value| value.deviation(&self.inserted, None).is_some())
        })
    }
}

#[async_trait::async_trait]
impl MappedReadable for Attenuator {
    type Raw = Vec<RawValue>;

    fn core(&self) -> &MappedCore<Vec<RawValue>> {
        self.inner.core()
    }

    async fn read_raw(&self, maxage: MaxAge) -> DeviceResult<Vec<RawValue>> {
        self.inner.read_raw(maxage).await
    }

    async fn attached_status(&self, maxage: MaxAge) -> DeviceResult<DeviceStatus> {
        self.inner.attached_status(maxage).await
    }

    fn describe_attached(&self) -> String {
        self.inner.describe_attached()
    }

    fn format_raw(&self, raw: &Vec<RawValue>) -> String {
        self.inner.format_raw(raw)
    }

    async fn do_reset(&self) -> DeviceResult<()> {
        self.inner.do_reset().await
    }
}

#[async_trait::async_trait]
impl MappedMoveable for Attenuator {
    async fn start_raw(&self, raw: Vec<RawValue>) -> DeviceResult<()> {
        self.inner.validate(&raw).await?;
        let (inserting, retracting) = self.phases(&raw);
        debug!(
            "{}: inserting {:?} before retracting {:?}",
            self.core().name(),
            inserting,
            retracting
        );

        self.inner.start_devices(&raw, &inserting).await?;
        self.inner.wait_devices(&inserting).await?;
        self.inner.start_devices(&raw, &retracting).await?;
        if self.inner.blocking() {
            self.inner.wait_devices(&retracting).await?;
        }
        Ok(())
    }

    async fn is_allowed_raw(&self, raw: &Vec<RawValue>) -> Result<(), String> {
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
    use crate::{
        device::{
            testing::{journal, MockMoveable},
            Readable,
        },
        error::DeviceError,
    };

    fn blades(log: &crate::device::testing::Journal) -> Vec<Arc<MockMoveable>> {
        ["b1", "b2", "b3"]
            .iter()
            .map(|name| Arc::new(MockMoveable::new(name, "out").with_journal(log)))
            .collect()
    }

    fn levels() -> IndexMap<String, Vec<RawValue>> {
        let entry = |v: [&str; 3]| v.iter().map(|s| RawValue::from(*s)).collect::<Vec<_>>();
        let mut mapping = IndexMap::new();
        mapping.insert("none".to_string(), entry(["out", "out", "out"]));
        mapping.insert("x10".to_string(), entry(["in", "out", "out"]));
        mapping.insert("x100".to_string(), entry(["out", "in", "in"]));
        mapping
    }

    fn attenuator(blades: &[Arc<MockMoveable>]) -> Attenuator {
        Attenuator::new(
            "att",
            MultiSwitcherConfig::new(levels()),
            "in".into(),
            blades.iter().map(|b| b.clone() as Arc<dyn Moveable>).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_inserts_are_finished_before_retracts_start() {
        let log = journal();
        let blades = blades(&log);
        let att = attenuator(&blades);
        att.start("x10".into()).await.unwrap();
        log.lock().clear();

        att.start("x100".into()).await.unwrap();
        let entries = log.lock().clone();
        assert_eq!(
            entries,
            vec![
                "start:b2=in",
                "start:b3=in",
                "wait:b2",
                "wait:b3",
                "start:b1=out",
                "wait:b1",
            ]
        );
        assert_eq!(att.read(Duration::ZERO).await.unwrap(), RawValue::from("x100"));
    }

    #[tokio::test]
    async fn test_validation_precedes_both_phases() {
        let log = journal();
        let blades = blades(&log);
        let att = attenuator(&blades);
        let err = att.start("x1000".into()).await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidValue { .. }));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_non_blocking_skips_final_wait() {
        let log = journal();
        let blades = blades(&log);
        let att = attenuator(&blades);
        att.inner().set_blocking(false);
        att.start("x10".into()).await.unwrap();
        assert_eq!(
            log.lock().clone(),
            vec!["start:b1=in", "wait:b1", "start:b2=out", "start:b3=out"]
        );
    }
}
