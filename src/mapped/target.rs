use crate::device::value::RawValue;

pub const SAME: &str = "same";
pub const SWITCH: &str = "switch";

/// A requested target before it is resolved to a configured position name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRequest {
    Literal(String),
    /// Re-issue whatever position the device is at now.
    Same,
    /// Go to the other of two configured positions.
    Toggle,
}

impl TargetRequest {
    /// Recognize the `same` and `switch` pseudo-positions. Anything else is
    /// taken literally.
    pub fn parse(target: &RawValue) -> Self {
        match target {
            RawValue::Text(name) if name == SAME => TargetRequest::Same,
            RawValue::Text(name) if name == SWITCH => TargetRequest::Toggle,
            RawValue::Text(name) => TargetRequest::Literal(name.clone()),
            RawValue::Float(value) => TargetRequest::Literal(value.to_string()),
        }
    }
}
