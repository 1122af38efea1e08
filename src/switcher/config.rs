use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{device::value::RawValue, mapped::table::Precision};

fn default_blocking() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SwitcherConfig {
    pub mapping: IndexMap<String, RawValue>,
    #[serde(default)]
    pub precision: Option<Precision>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default = "default_blocking")]
    pub blockingmove: bool,
    #[serde(default)]
    pub relax_mapping: bool,
}

impl SwitcherConfig {
    pub fn new(mapping: IndexMap<String, RawValue>) -> Self {
        Self {
            mapping,
            precision: None,
            fallback: None,
            blockingmove: true,
            relax_mapping: false,
        }
    }

    pub fn with_precision(mut self, precision: f64) -> Self {
        self.precision = Some(Precision::Uniform(precision));
        self
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blockingmove = blocking;
        self
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReadonlySwitcherConfig {
    pub mapping: IndexMap<String, RawValue>,
    #[serde(default)]
    pub precision: Option<Precision>,
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MultiSwitcherConfig {
    /// One value per attached device, moveables first.
    pub mapping: IndexMap<String, Vec<RawValue>>,
    #[serde(default)]
    pub precision: Option<Precision>,
    #[serde(default)]
    pub fallback: Option<String>,
    #[serde(default = "default_blocking")]
    pub blockingmove: bool,
}

impl MultiSwitcherConfig {
    pub fn new(mapping: IndexMap<String, Vec<RawValue>>) -> Self {
        Self {
            mapping,
            precision: None,
            fallback: None,
            blockingmove: true,
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_fallback(mut self, fallback: &str) -> Self {
        self.fallback = Some(fallback.to_string());
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blockingmove = blocking;
        self
    }
}
