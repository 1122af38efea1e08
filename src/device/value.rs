use serde::{Deserialize, Serialize};

/// A raw device value: a number for continuous axes, or a symbolic value for
/// devices that report names (switchers, digital inputs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Float(f64),
    Text(String),
}

impl RawValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RawValue::Float(v) => Some(*v),
            RawValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RawValue::Float(_) => None,
            RawValue::Text(s) => Some(s),
        }
    }

    /// Absolute deviation from `other` if both are within `tolerance` of each
    /// other. `None` tolerance (or zero) asks for exact equality; text values
    /// only ever match exactly.
    pub fn deviation(&self, other: &RawValue, tolerance: Option<f64>) -> Option<f64> {
        match (self, other) {
            (RawValue::Float(a), RawValue::Float(b)) => {
                match tolerance {
                    // window bounds computed from the target, so that
                    // `target + tol` itself is always inside
                    Some(tol) if tol > 0.0 => {
                        (*a >= *b - tol && *a <= *b + tol).then(|| (a - b).abs())
                    }
                    _ => (a == b).then_some(0.0),
                }
            }
            (RawValue::Text(a), RawValue::Text(b)) => (a == b).then_some(0.0),
            _ => None,
        }
    }

    /// Format with a trailing unit, the way status and error messages show
    /// values.
    pub fn format_with_unit(&self, unit: &str) -> String {
        if unit.is_empty() {
            self.to_string()
        } else {
            format!("{} {}", self, unit)
        }
    }
}

impl std::fmt::Display for RawValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawValue::Float(v) => write!(f, "{:.3}", v),
            RawValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}
