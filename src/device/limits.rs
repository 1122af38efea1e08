use serde::{Deserialize, Serialize};

/// Absolute travel window of a continuous axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

impl Limits {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn unlimited() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Reason a value is rejected, if it is.
    pub fn check(&self, value: f64) -> Result<(), String> {
        if value < self.min {
            Err(format!("below the lower limit {}", self.min))
        } else if value > self.max {
            Err(format!("above the upper limit {}", self.max))
        } else {
            Ok(())
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl From<[f64; 2]> for Limits {
    fn from([min, max]: [f64; 2]) -> Self {
        Self { min, max }
    }
}
