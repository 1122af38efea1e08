use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    device::value::RawValue,
    error::{DeviceError, DeviceResult},
};

/// Raw target of a mapped device: a single value, or one value per attached
/// device.
pub trait RawTarget: Clone + Send + Sync + 'static {
    fn components(&self) -> &[RawValue];
}

impl RawTarget for RawValue {
    fn components(&self) -> &[RawValue] {
        std::slice::from_ref(self)
    }
}

impl RawTarget for Vec<RawValue> {
    fn components(&self) -> &[RawValue] {
        self
    }
}

/// Allowed deviation between readback and configured position.
///
/// A scalar applies to every component; a list has one entry per attached
/// device (or a single entry used for all). `None` entries and zero ask for an
/// exact match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Precision {
    Uniform(f64),
    PerDevice(Vec<Option<f64>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub name: &'a str,
    pub deviation: f64,
}

/// The configured positions of a mapped device.
#[derive(Debug, Clone)]
pub struct PositionTable<R> {
    entries: IndexMap<String, R>,
    tolerances: Vec<Option<f64>>,
}

impl<R: RawTarget> PositionTable<R> {
    /// Validate entry arity and precision against the number of attached
    /// devices.
    pub fn new(
        device: &str,
        entries: IndexMap<String, R>,
        precision: Option<&Precision>,
        arity: usize,
    ) -> DeviceResult<Self> {
        if entries.is_empty() {
            return Err(DeviceError::configuration(device, "mapping is empty"));
        }
        for (name, raw) in &entries {
            if raw.components().len() != arity {
                return Err(DeviceError::configuration(
                    device,
                    format!(
                        "mapping entry {:?} has {} values, but {} devices are attached",
                        name,
                        raw.components().len(),
                        arity
                    ),
                ));
            }
        }
        let tolerances = normalize_precision(device, precision, arity)?;
        Ok(Self {
            entries,
            tolerances,
        })
    }

    pub fn get(&self, name: &str) -> Option<&R> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &R)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tolerances(&self) -> &[Option<f64>] {
        &self.tolerances
    }

    pub fn valid_names(&self) -> String {
        self.names().collect::<Vec<_>>().join(", ")
    }

    /// Every entry whose components all lie within tolerance of `sample`,
    /// closest first. Entries at equal total deviation keep configuration
    /// order.
    pub fn candidates(&self, sample: &[RawValue]) -> Vec<Candidate<'_>> {
        let mut found: Vec<Candidate<'_>> = self
            .entries
            .iter()
            .filter_map(|(name, raw)| {
                let deviation = deviation(raw.components(), sample, &self.tolerances)?;
                Some(Candidate {
                    name: name.as_str(),
                    deviation,
                })
            })
            .collect();
        found.sort_by(|a, b| a.deviation.total_cmp(&b.deviation));
        found
    }

    pub fn best_match(&self, sample: &[RawValue]) -> Option<&str> {
        self.candidates(sample).first().map(|c| c.name)
    }
}

fn deviation(target: &[RawValue], sample: &[RawValue], tolerances: &[Option<f64>]) -> Option<f64> {
    if target.len() != sample.len() {
        return None;
    }
    target
        .iter()
        .zip(sample)
        .zip(tolerances)
        .try_fold(0.0, |sum, ((t, s), tol)| Some(sum + s.deviation(t, *tol)?))
}

fn normalize_precision(
    device: &str,
    precision: Option<&Precision>,
    arity: usize,
) -> DeviceResult<Vec<Option<f64>>> {
    let tolerances = match precision {
        None => vec![None; arity],
        Some(Precision::Uniform(p)) => vec![Some(*p); arity],
        Some(Precision::PerDevice(list)) if list.len() == 1 => vec![list[0]; arity],
        Some(Precision::PerDevice(list)) if list.len() == arity => list.clone(),
        Some(Precision::PerDevice(list)) => {
            return Err(DeviceError::configuration(
                device,
                format!(
                    "the precision list must contain one element or one per attached device \
                     ({}), not {}",
                    arity,
                    list.len()
                ),
            ));
        }
    };
    if let Some(bad) = tolerances
        .iter()
        .flatten()
        .find(|p| !p.is_finite() || **p < 0.0)
    {
        return Err(DeviceError::configuration(
            device,
            format!("precision must be a non-negative number, got {}", bad),
        ));
    }
    Ok(tolerances)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floats(values: &[f64]) -> Vec<RawValue> {
        values.iter().copied().map(RawValue::Float).collect()
    }

    fn multi_table(precision: Option<Precision>) -> PositionTable<Vec<RawValue>> {
        let mut entries = IndexMap::new();
        entries.insert("X".to_string(), floats(&[1.0, 2.0]));
        entries.insert("Y".to_string(), floats(&[5.0, 6.0]));
        PositionTable::new("sw", entries, precision.as_ref(), 2).unwrap()
    }

    #[test]
    fn test_every_entry_maps_back_to_itself() {
        let table = multi_table(None);
        for (name, raw) in table.entries() {
            assert_eq!(table.best_match(raw), Some(name));
        }
    }

    #[test]
    fn test_one_component_out_of_tolerance_rejects_entry() {
        let table = multi_table(Some(Precision::PerDevice(vec![Some(0.05), Some(0.05)])));
        assert_eq!(table.best_match(&floats(&[1.0, 2.5])), None);
        assert_eq!(table.best_match(&floats(&[1.04, 1.96])), Some("X"));
    }

    #[test]
    fn test_none_component_requires_exact_match() {
        let table = multi_table(Some(Precision::PerDevice(vec![Some(0.5), None])));
        assert_eq!(table.best_match(&floats(&[1.3, 2.0])), Some("X"));
        assert_eq!(table.best_match(&floats(&[1.0, 2.01])), None);
    }

    #[test]
    fn test_overlapping_windows_pick_closest() {
        let mut entries = IndexMap::new();
        entries.insert("low".to_string(), RawValue::Float(10.0));
        entries.insert("high".to_string(), RawValue::Float(11.0));
        let table =
            PositionTable::new("sw", entries, Some(&Precision::Uniform(1.0)), 1).unwrap();

        assert_eq!(table.best_match(&floats(&[10.7])), Some("high"));
        assert_eq!(table.best_match(&floats(&[10.2])), Some("low"));
        // equidistant: configuration order decides
        assert_eq!(table.best_match(&floats(&[10.5])), Some("low"));
        assert_eq!(table.candidates(&floats(&[10.5])).len(), 2);
    }

    #[test]
    fn test_arity_mismatch_is_configuration_error() {
        let mut entries = IndexMap::new();
        entries.insert("X".to_string(), floats(&[1.0, 2.0]));
        let err = PositionTable::new("sw", entries, None, 3).unwrap_err();
        assert!(matches!(err, DeviceError::Configuration { .. }));
        assert!(err.to_string().contains("3 devices"));
    }

    #[test]
    fn test_precision_length_validation() {
        let mut entries = IndexMap::new();
        entries.insert("X".to_string(), floats(&[1.0, 2.0, 3.0]));

        let single = Precision::PerDevice(vec![Some(0.1)]);
        let table = PositionTable::new("sw", entries.clone(), Some(&single), 3).unwrap();
        assert_eq!(table.tolerances(), &[Some(0.1), Some(0.1), Some(0.1)]);

        let two = Precision::PerDevice(vec![Some(0.1), Some(0.2)]);
        assert!(PositionTable::new("sw", entries.clone(), Some(&two), 3).is_err());

        let negative = Precision::Uniform(-1.0);
        assert!(PositionTable::new("sw", entries, Some(&negative), 3).is_err());
    }

    #[test]
    fn test_precision_deserializes_scalar_or_list() {
        let scalar: Precision = serde_json::from_str("0.1").unwrap();
        assert_eq!(scalar, Precision::Uniform(0.1));
        let list: Precision = serde_json::from_str("[0.1, null]").unwrap();
        assert_eq!(list, Precision::PerDevice(vec![Some(0.1), None]));
    }
}
