/// Errors raised by devices and switchers.
///
/// Every variant names the device it originates from so that an operator can
/// tell which physical axis is misconfigured, out of range or unreachable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    /// Static setup problem detected at initialization. The device must not
    /// enter service.
    #[error("{device}: configuration error: {message}")]
    Configuration { device: String, message: String },

    /// A caller asked for a target the device cannot accept.
    #[error("{device}: invalid value: {message}")]
    InvalidValue { device: String, message: String },

    /// The hardware readback does not correspond to any configured position.
    #[error("{device}: position error: {message}")]
    Position { device: String, message: String },

    /// A movement ended in an error state.
    #[error("{device}: move error: {message}")]
    Move { device: String, message: String },

    /// The device could not be reached or answered garbage.
    #[error("{device}: communication error: {message}")]
    Communication { device: String, message: String },
}

pub type DeviceResult<T> = Result<T, DeviceError>;

impl DeviceError {
    pub fn configuration(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn invalid_value(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn position(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Position {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn movement(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Move {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn communication(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Communication {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn device(&self) -> &str {
        match self {
            DeviceError::Configuration { device, .. }
            | DeviceError::InvalidValue { device, .. }
            | DeviceError::Position { device, .. }
            | DeviceError::Move { device, .. }
            | DeviceError::Communication { device, .. } => device,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            DeviceError::Configuration { message, .. }
            | DeviceError::InvalidValue { message, .. }
            | DeviceError::Position { message, .. }
            | DeviceError::Move { message, .. }
            | DeviceError::Communication { message, .. } => message,
        }
    }

    /// Stable identifier used in protocol error responses.
    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::Configuration { .. } => "configuration_error",
            DeviceError::InvalidValue { .. } => "invalid_value",
            DeviceError::Position { .. } => "position_error",
            DeviceError::Move { .. } => "move_error",
            DeviceError::Communication { .. } => "communication_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_device() {
        let err = DeviceError::position("changer", "unknown position of motor: 3.2 deg");
        assert_eq!(
            err.to_string(),
            "changer: position error: unknown position of motor: 3.2 deg"
        );
        assert_eq!(err.device(), "changer");
        assert_eq!(err.code(), "position_error");
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            DeviceError::configuration("d", "m").code(),
            DeviceError::invalid_value("d", "m").code(),
            DeviceError::position("d", "m").code(),
            DeviceError::movement("d", "m").code(),
            DeviceError::communication("d", "m").code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
