use std::sync::Arc;

use crate::{
    device::Moveable,
    error::{DeviceError, DeviceResult},
    switcher::{config::SwitcherConfig, ReadPolicy, Switcher},
};

/// Relative regulation error assumed when none is configured.
pub const DEFAULT_RELATIVE_PRECISION: f64 = 0.01;

/// A switcher over a power supply: high voltage presets such as `off`,
/// `standby` and `on`. The readback of a supply deviates in proportion to
/// its output, so the matching window is `precision + relative * |setpoint|`.
pub fn voltage_switcher(
    name: impl Into<String>,
    config: SwitcherConfig,
    relative: Option<f64>,
    supply: Arc<dyn Moveable>,
) -> DeviceResult<Switcher> {
    let name = name.into();
    let relative = relative.unwrap_or(DEFAULT_RELATIVE_PRECISION);
    if !relative.is_finite() || relative < 0.0 {
        return Err(DeviceError::configuration(
            &name,
            format!("relative precision must be a non-negative number, got {}", relative),
        ));
    }
    Ok(Switcher::new(name, config, supply)?.with_policy(ReadPolicy::Proportional { relative }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indexmap::IndexMap;

    use super::*;
    use crate::device::{status::StatusCode, testing::MockMoveable, value::RawValue, Readable};

    fn presets() -> IndexMap<String, RawValue> {
        let mut mapping = IndexMap::new();
        mapping.insert("off".to_string(), RawValue::Float(0.0));
        mapping.insert("standby".to_string(), RawValue::Float(500.0));
        mapping.insert("on".to_string(), RawValue::Float(2500.0));
        mapping
    }

    #[tokio::test]
    async fn test_window_scales_with_setpoint() {
        let supply = Arc::new(MockMoveable::new("hv", 0.0));
        let hv = voltage_switcher(
            "hv_switch",
            SwitcherConfig::new(presets()).with_precision(2.0),
            None,
            supply.clone(),
        )
        .unwrap();

        supply.set_value(1.5);
        assert_eq!(hv.read(Duration::ZERO).await.unwrap(), RawValue::from("off"));
        supply.set_value(2476.0);
        assert_eq!(hv.read(Duration::ZERO).await.unwrap(), RawValue::from("on"));
        supply.set_value(508.0);
        assert_eq!(
            hv.status(Duration::ZERO).await.unwrap().code,
            StatusCode::NotReached
        );

        hv.start("standby".into()).await.unwrap();
        assert_eq!(supply.starts(), vec![RawValue::Float(500.0)]);
    }

    #[test]
    fn test_negative_relative_precision() {
        let supply = Arc::new(MockMoveable::new("hv", 0.0));
        let result = voltage_switcher("hv_switch", SwitcherConfig::new(presets()), Some(-0.1), supply);
        assert!(result.is_err());
    }
}
