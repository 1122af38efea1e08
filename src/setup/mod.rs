//! Instrument setup files.
//!
//! A setup is a TOML document with the server, manager and logging sections
//! and one `[devices.<name>]` table per device. Building a setup wires the
//! attached devices by name, constructs every device (which validates
//! mappings and precisions) and fails before anything enters service.
//! Selectors then push their current position to their detector switchers.

pub mod device_spec;
pub mod error;

use std::{collections::HashMap, path::Path, sync::Arc};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    device::{
        limits::Limits,
        virtual_device::{VirtualMotor, VirtualReadable},
        Attached, Moveable, Readable,
    },
    device_manager::config::ManagerConfig,
    logging::LoggingConfig,
    socket_server::config::SocketServerConfig,
    special::{
        attenuator::Attenuator,
        collimation::{colli_switcher, ColliSlit},
        flipper::Flipper,
        locked::Locked,
        selector::{DetectorPositionSwitcher, MappingRefresh, SelectorSwitcher, SelectorWavelength},
        voltage::voltage_switcher,
    },
    switcher::{multi::MultiSwitcher, readonly::ReadonlySwitcher, Switcher},
};
use device_spec::DeviceSpec;
use error::SetupError;

#[derive(Deserialize, Debug, Default)]
pub struct Setup {
    /// Predict readables of multi switchers instead of reading them.
    #[serde(default)]
    pub simulation: bool,
    #[serde(default)]
    pub server: SocketServerConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub devices: IndexMap<String, DeviceSpec>,
}

impl Setup {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SetupError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SetupError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SetupError> {
        Ok(toml::from_str(content)?)
    }

    /// Construct every device, attachments first, then bring dependent
    /// tables in line with the selectors.
    pub async fn build(&self) -> Result<DeviceRegistry, SetupError> {
        let mut builder = Builder {
            setup: self,
            built: HashMap::with_capacity(self.devices.len()),
            stack: Vec::new(),
        };
        for name in self.devices.keys() {
            builder.resolve(name, "setup")?;
        }

        let mut devices = IndexMap::with_capacity(self.devices.len());
        let mut selectors = Vec::new();
        for name in self.devices.keys() {
            if let Some(node) = builder.built.remove(name) {
                selectors.extend(node.selector);
                devices.insert(name.clone(), node.device);
            }
        }
        for selector in &selectors {
            selector.sync_dependents().await?;
        }
        info!("Built {} devices", devices.len());
        Ok(DeviceRegistry { devices })
    }
}

/// The devices of a built setup, in setup file order.
pub struct DeviceRegistry {
    devices: IndexMap<String, Attached>,
}

impl DeviceRegistry {
    pub fn get(&self, name: &str) -> Option<&Attached> {
        self.devices.get(name)
    }

    pub fn moveable(&self, name: &str) -> Option<Arc<dyn Moveable>> {
        self.get(name).and_then(|dev| dev.as_moveable().cloned())
    }

    pub fn readable(&self, name: &str) -> Option<Arc<dyn Readable>> {
        self.get(name).map(Attached::as_readable)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn into_devices(self) -> impl Iterator<Item = Attached> {
        self.devices.into_values()
    }
}

struct Node {
    device: Attached,
    refresh: Option<Arc<dyn MappingRefresh>>,
    selector: Option<Arc<SelectorSwitcher>>,
}

impl Node {
    fn moveable(device: impl Moveable + 'static) -> Self {
        Self::from(Attached::Moveable(Arc::new(device)))
    }
}

impl From<Attached> for Node {
    fn from(device: Attached) -> Self {
        Self {
            device,
            refresh: None,
            selector: None,
        }
    }
}

struct Builder<'a> {
    setup: &'a Setup,
    built: HashMap<String, Node>,
    stack: Vec<String>,
}

impl Builder<'_> {
    fn resolve(&mut self, name: &str, referenced_by: &str) -> Result<(), SetupError> {
        if self.built.contains_key(name) {
            return Ok(());
        }
        if self.stack.iter().any(|entry| entry == name) {
            let mut chain = self.stack.clone();
            chain.push(name.to_string());
            return Err(SetupError::Cycle(chain.join(" -> ")));
        }
        let spec = self
            .setup
            .devices
            .get(name)
            .ok_or_else(|| SetupError::UnknownDevice {
                device: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })?;

        self.stack.push(name.to_string());
        for attached in spec.attachments() {
            self.resolve(attached, name)?;
        }
        let node = self.construct(name, spec)?;
        self.stack.pop();

        debug!("Built device {}", name);
        self.built.insert(name.to_string(), node);
        Ok(())
    }

    fn node(&self, name: &str, referenced_by: &str) -> Result<&Node, SetupError> {
        self.built
            .get(name)
            .ok_or_else(|| SetupError::UnknownDevice {
                device: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })
    }

    fn moveable(&self, name: &str, referenced_by: &str) -> Result<Arc<dyn Moveable>, SetupError> {
        self.node(name, referenced_by)?
            .device
            .as_moveable()
            .cloned()
            .ok_or_else(|| SetupError::Capability {
                device: name.to_string(),
                expected: "moveable",
                referenced_by: referenced_by.to_string(),
            })
    }

    fn moveables(
        &self,
        names: &[String],
        referenced_by: &str,
    ) -> Result<Vec<Arc<dyn Moveable>>, SetupError> {
        names
            .iter()
            .map(|name| self.moveable(name, referenced_by))
            .collect()
    }

    fn readable(&self, name: &str, referenced_by: &str) -> Result<Arc<dyn Readable>, SetupError> {
        Ok(self.node(name, referenced_by)?.device.as_readable())
    }

    fn refresh(&self, name: &str, referenced_by: &str) -> Result<Arc<dyn MappingRefresh>, SetupError> {
        self.node(name, referenced_by)?
            .refresh
            .clone()
            .ok_or_else(|| SetupError::Capability {
                device: name.to_string(),
                expected: "a detector switcher",
                referenced_by: referenced_by.to_string(),
            })
    }

    fn construct(&self, name: &str, spec: &DeviceSpec) -> Result<Node, SetupError> {
        let node = match spec {
            DeviceSpec::VirtualMotor {
                position,
                unit,
                limits,
                speed,
            } => {
                let mut motor = VirtualMotor::new(name, *position);
                if let Some(unit) = unit {
                    motor = motor.with_unit(unit);
                }
                if let Some(limits) = limits {
                    motor = motor.with_limits(Limits::from(*limits));
                }
                if let Some(speed) = speed {
                    motor = motor.with_speed(*speed);
                }
                Node::moveable(motor)
            }
            DeviceSpec::VirtualReadable { value, unit } => {
                let mut readable = VirtualReadable::new(name, value.clone());
                if let Some(unit) = unit {
                    readable = readable.with_unit(unit);
                }
                Node::from(Attached::Readable(Arc::new(readable)))
            }
            DeviceSpec::Switcher { moveable, config } => Node::moveable(Switcher::new(
                name,
                config.clone(),
                self.moveable(moveable, name)?,
            )?),
            DeviceSpec::ReadonlySwitcher { readable, config } => {
                Node::from(Attached::Readable(Arc::new(ReadonlySwitcher::new(
                    name,
                    config.clone(),
                    self.readable(readable, name)?,
                )?)))
            }
            DeviceSpec::MultiSwitcher {
                moveables,
                readables,
                config,
            } => {
                let readables = readables
                    .iter()
                    .map(|dev| self.readable(dev, name))
                    .collect::<Result<Vec<_>, _>>()?;
                Node::moveable(
                    MultiSwitcher::new(
                        name,
                        config.clone(),
                        self.moveables(moveables, name)?,
                        readables,
                    )?
                    .with_simulation(self.setup.simulation),
                )
            }
            DeviceSpec::Attenuator {
                blades,
                inserted,
                config,
            } => Node::moveable(Attenuator::new(
                name,
                config.clone(),
                inserted.clone(),
                self.moveables(blades, name)?,
            )?),
            DeviceSpec::SelectorSwitcher {
                moveable,
                dependents,
                config,
            } => {
                let dependents = dependents
                    .iter()
                    .map(|dev| self.refresh(dev, name))
                    .collect::<Result<Vec<_>, _>>()?;
                let inner = Switcher::new(name, config.clone(), self.moveable(moveable, name)?)?;
                let selector = Arc::new(SelectorSwitcher::new(inner, dependents)?);
                Node {
                    selector: Some(selector.clone()),
                    ..Node::from(Attached::Moveable(selector))
                }
            }
            DeviceSpec::DetectorSwitcher { moveable, config } => {
                let switcher = Arc::new(DetectorPositionSwitcher::new(
                    name,
                    config.clone(),
                    self.moveable(moveable, name)?,
                )?);
                Node {
                    refresh: Some(switcher.clone()),
                    ..Node::from(Attached::Moveable(switcher))
                }
            }
            DeviceSpec::Wavelength {
                speed,
                constant,
                unit,
            } => {
                let mut wavelength =
                    SelectorWavelength::new(name, self.moveable(speed, name)?, *constant)?;
                if let Some(unit) = unit {
                    wavelength = wavelength.with_unit(unit);
                }
                Node::moveable(wavelength)
            }
            DeviceSpec::Flipper { moveable, config } => Node::moveable(Flipper::new(
                name,
                config.clone(),
                self.moveable(moveable, name)?,
            )?),
            DeviceSpec::ColliSwitcher { moveable, config } => Node::moveable(colli_switcher(
                name,
                config.clone(),
                self.moveable(moveable, name)?,
            )?),
            DeviceSpec::ColliSlit {
                moveable,
                carrier,
                active_position,
                config,
            } => Node::moveable(ColliSlit::new(
                name,
                config.clone(),
                self.moveable(moveable, name)?,
                self.readable(carrier, name)?,
                active_position.clone(),
            )?),
            DeviceSpec::Locked {
                device,
                lock,
                config,
            } => Node::moveable(Locked::new(
                name,
                config.clone(),
                self.moveable(device, name)?,
                self.moveable(lock, name)?,
            )),
            DeviceSpec::VoltageSwitcher {
                supply,
                relative,
                config,
            } => Node::moveable(voltage_switcher(
                name,
                config.clone(),
                *relative,
                self.moveable(supply, name)?,
            )?),
        };
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{device::value::RawValue, error::DeviceError};

    const CHANGER: &str = r#"
        simulation = false

        [server]
        socket_path = "/tmp/test.sock"

        [logging]
        level = "debug"

        [devices.changer_m]
        type = "virtual_motor"
        position = 14.55
        unit = "deg"
        limits = [0, 90]

        [devices.changer]
        type = "switcher"
        moveable = "changer_m"
        mapping = { up = 14.55, down = 51.3 }
        precision = 0.05
    "#;

    #[test]
    fn test_sections_and_defaults() {
        let setup = Setup::from_toml(CHANGER).unwrap();
        assert_eq!(setup.server.socket_path, "/tmp/test.sock");
        assert_eq!(setup.server.max_connections, 100);
        assert_eq!(setup.manager.cache_capacity, 1000);
        assert_eq!(setup.logging.level, "debug");
        assert_eq!(
            setup.devices.keys().collect::<Vec<_>>(),
            vec!["changer_m", "changer"]
        );
        assert_eq!(setup.devices["changer"].attachments(), vec!["changer_m"]);
    }

    #[tokio::test]
    async fn test_built_switcher_is_wired() {
        let registry = Setup::from_toml(CHANGER).unwrap().build().await.unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["changer_m", "changer"]);

        let changer = registry.moveable("changer").unwrap();
        assert_eq!(changer.read(Duration::ZERO).await.unwrap(), RawValue::from("up"));
        changer.start("down".into()).await.unwrap();
        let motor = registry.readable("changer_m").unwrap();
        assert_eq!(motor.read(Duration::ZERO).await.unwrap(), RawValue::Float(51.3));
        assert_eq!(motor.format(&RawValue::Float(51.3)), "51.300 deg");
    }

    #[tokio::test]
    async fn test_attachments_resolve_regardless_of_order() {
        let setup = Setup::from_toml(
            r#"
            [devices.shutter]
            type = "readonly_switcher"
            readable = "shutter_in"
            mapping = { open = 1, closed = 0 }

            [devices.shutter_in]
            type = "virtual_readable"
            value = 1
            "#,
        )
        .unwrap();
        let registry = setup.build().await.unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["shutter", "shutter_in"]);
        assert!(registry.moveable("shutter").is_none());
    }

    #[tokio::test]
    async fn test_unknown_attachment() {
        let setup = Setup::from_toml(
            r#"
            [devices.sw]
            type = "switcher"
            moveable = "ghost"
            mapping = { a = 1 }
            "#,
        )
        .unwrap();
        match setup.build().await {
            Err(SetupError::UnknownDevice {
                device,
                referenced_by,
            }) => {
                assert_eq!(device, "ghost");
                assert_eq!(referenced_by, "sw");
            }
            _ => panic!("expected an unknown device error"),
        }
    }

    #[tokio::test]
    async fn test_cyclic_attachment() {
        let setup = Setup::from_toml(
            r#"
            [devices.a]
            type = "switcher"
            moveable = "b"
            mapping = { x = "y" }

            [devices.b]
            type = "switcher"
            moveable = "a"
            mapping = { y = "x" }
            "#,
        )
        .unwrap();
        match setup.build().await {
            Err(SetupError::Cycle(chain)) => assert_eq!(chain, "a -> b -> a"),
            _ => panic!("expected a cycle error"),
        }
    }

    #[tokio::test]
    async fn test_readable_cannot_drive_a_switcher() {
        let setup = Setup::from_toml(
            r#"
            [devices.t]
            type = "virtual_readable"
            value = 3.0

            [devices.sw]
            type = "switcher"
            moveable = "t"
            mapping = { a = 3.0 }
            "#,
        )
        .unwrap();
        assert!(matches!(
            setup.build().await,
            Err(SetupError::Capability { expected: "moveable", .. })
        ));
    }

    #[tokio::test]
    async fn test_mapping_arity_fails_the_build() {
        let setup = Setup::from_toml(
            r#"
            [devices.m1]
            type = "virtual_motor"
            [devices.m2]
            type = "virtual_motor"
            [devices.m3]
            type = "virtual_motor"

            [devices.array]
            type = "multi_switcher"
            moveables = ["m1", "m2", "m3"]
            mapping = { short = [1.0, 2.0] }
            "#,
        )
        .unwrap();
        assert!(matches!(
            setup.build().await,
            Err(SetupError::Device(DeviceError::Configuration { .. }))
        ));
    }

    const SELECTOR: &str = r#"
        [devices.sel_tilt]
        type = "virtual_motor"
        position = 5.0

        [devices.det_z]
        type = "virtual_motor"
        position = 20.0

        [devices.det_pos]
        type = "detector_switcher"
        moveable = "det_z"
        precision = 0.01
        mappings = { low = { near = 1.0, far = 10.0 }, high = { near = 2.0, far = 20.0 } }

        [devices.selector]
        type = "selector_switcher"
        moveable = "sel_tilt"
        dependents = ["det_pos"]
    "#;

    #[tokio::test]
    async fn test_detector_tables_must_cover_selector() {
        let setup = Setup::from_toml(&format!(
            "{}mapping = {{ low = 0.0, high = 5.0, mid = 2.5 }}\n",
            SELECTOR
        ))
        .unwrap();
        match setup.build().await {
            Err(SetupError::Device(DeviceError::Configuration { device, message })) => {
                assert_eq!(device, "det_pos");
                assert!(message.contains("mid"));
            }
            _ => panic!("expected a configuration error"),
        }
    }

    #[tokio::test]
    async fn test_detector_follows_selector_at_startup() {
        let setup = Setup::from_toml(&format!(
            "{}mapping = {{ low = 0.0, high = 5.0 }}\n",
            SELECTOR
        ))
        .unwrap();
        let registry = setup.build().await.unwrap();
        let selector = registry.readable("selector").unwrap();
        assert_eq!(selector.read(Duration::ZERO).await.unwrap(), RawValue::from("high"));
        let det_pos = registry.readable("det_pos").unwrap();
        assert_eq!(det_pos.read(Duration::ZERO).await.unwrap(), RawValue::from("far"));
    }

    #[tokio::test]
    async fn test_locked_switcher_from_setup() {
        let setup = Setup::from_toml(
            r#"
            [devices.gear_m]
            type = "virtual_motor"
            position = 1.0

            [devices.gear_sw]
            type = "switcher"
            moveable = "gear_m"
            mapping = { slow = 1.0, fast = 2.0 }

            [devices.brake]
            type = "virtual_motor"
            position = 1.0

            [devices.gear]
            type = "locked"
            device = "gear_sw"
            lock = "brake"
            unlockvalue = 0.0
            "#,
        )
        .unwrap();
        let registry = setup.build().await.unwrap();
        let gear = registry.moveable("gear").unwrap();
        gear.start("fast".into()).await.unwrap();
        assert_eq!(gear.read(Duration::ZERO).await.unwrap(), RawValue::from("fast"));
        let brake = registry.readable("brake").unwrap();
        assert_eq!(brake.read(Duration::ZERO).await.unwrap(), RawValue::Float(1.0));
    }

    #[test]
    fn test_unknown_type_is_a_parse_error() {
        let err = Setup::from_toml(
            r#"
            [devices.x]
            type = "teleporter"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SetupError::Parse(_)));
    }
}
