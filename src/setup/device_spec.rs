use serde::Deserialize;

use crate::{
    device::value::RawValue,
    special::{
        collimation::ColliSwitcherConfig, locked::LockConfig, selector::DetectorSwitcherConfig,
    },
    switcher::config::{MultiSwitcherConfig, ReadonlySwitcherConfig, SwitcherConfig},
};

/// One `[devices.<name>]` table of a setup file.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceSpec {
    VirtualMotor {
        #[serde(default)]
        position: f64,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default)]
        limits: Option<[f64; 2]>,
        /// Units per second; instantaneous when absent.
        #[serde(default)]
        speed: Option<f64>,
    },
    VirtualReadable {
        value: RawValue,
        #[serde(default)]
        unit: Option<String>,
    },
    Switcher {
        moveable: String,
        #[serde(flatten)]
        config: SwitcherConfig,
    },
    ReadonlySwitcher {
        readable: String,
        #[serde(flatten)]
        config: ReadonlySwitcherConfig,
    },
    MultiSwitcher {
        moveables: Vec<String>,
        #[serde(default)]
        readables: Vec<String>,
        #[serde(flatten)]
        config: MultiSwitcherConfig,
    },
    Attenuator {
        blades: Vec<String>,
        inserted: RawValue,
        #[serde(flatten)]
        config: MultiSwitcherConfig,
    },
    SelectorSwitcher {
        moveable: String,
        /// Detector switchers whose tables follow this selector.
        #[serde(default)]
        dependents: Vec<String>,
        #[serde(flatten)]
        config: SwitcherConfig,
    },
    DetectorSwitcher {
        moveable: String,
        #[serde(flatten)]
        config: DetectorSwitcherConfig,
    },
    Wavelength {
        speed: String,
        constant: f64,
        #[serde(default)]
        unit: Option<String>,
    },
    Flipper {
        moveable: String,
        #[serde(flatten)]
        config: SwitcherConfig,
    },
    ColliSwitcher {
        moveable: String,
        #[serde(flatten)]
        config: ColliSwitcherConfig,
    },
    ColliSlit {
        moveable: String,
        carrier: String,
        active_position: RawValue,
        #[serde(flatten)]
        config: SwitcherConfig,
    },
    Locked {
        device: String,
        lock: String,
        #[serde(flatten)]
        config: LockConfig,
    },
    VoltageSwitcher {
        supply: String,
        #[serde(default)]
        relative: Option<f64>,
        #[serde(flatten)]
        config: SwitcherConfig,
    },
}

impl DeviceSpec {
    /// Names of the devices this one is attached to.
    pub fn attachments(&self) -> Vec<&str> {
        match self {
            DeviceSpec::VirtualMotor { .. } | DeviceSpec::VirtualReadable { .. } => vec![],
            DeviceSpec::Switcher { moveable, .. }
            | DeviceSpec::DetectorSwitcher { moveable, .. }
            | DeviceSpec::Flipper { moveable, .. }
            | DeviceSpec::ColliSwitcher { moveable, .. } => vec![moveable.as_str()],
            DeviceSpec::ReadonlySwitcher { readable, .. } => vec![readable.as_str()],
            DeviceSpec::MultiSwitcher {
                moveables,
                readables,
                ..
            } => moveables.iter().chain(readables).map(String::as_str).collect(),
            DeviceSpec::Attenuator { blades, .. } => blades.iter().map(String::as_str).collect(),
            DeviceSpec::SelectorSwitcher {
                moveable,
                dependents,
                ..
            } => std::iter::once(moveable)
                .chain(dependents)
                .map(String::as_str)
                .collect(),
            DeviceSpec::Wavelength { speed, .. } => vec![speed.as_str()],
            DeviceSpec::ColliSlit {
                moveable, carrier, ..
            } => vec![moveable.as_str(), carrier.as_str()],
            DeviceSpec::Locked { device, lock, .. } => vec![device.as_str(), lock.as_str()],
            DeviceSpec::VoltageSwitcher { supply, .. } => vec![supply.as_str()],
        }
    }
}
