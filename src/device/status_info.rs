use serde::{Deserialize, Serialize};

use super::status::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub code: StatusCode,
    pub message: String,
}

impl DeviceStatus {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            message: String::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn is_busy(&self) -> bool {
        self.code == StatusCode::Busy
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self.code, StatusCode::Error | StatusCode::NotReached)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

/// Combine the statuses of several devices into one.
///
/// The resulting code is the most severe one. The message lists every device
/// as `name=message`; messages that themselves contain `=` are parenthesised.
pub fn multi_status<S: AsRef<str>>(statuses: &[(S, DeviceStatus)]) -> DeviceStatus {
    if statuses.is_empty() {
        return DeviceStatus::new(StatusCode::Unknown)
            .with_message("no status could be determined (no attached devices)");
    }

    let mut code = StatusCode::Ok;
    let mut parts = Vec::with_capacity(statuses.len());
    for (name, status) in statuses {
        if status.message.contains('=') {
            parts.push(format!("{}=({})", name.as_ref(), status.message));
        } else {
            parts.push(format!("{}={}", name.as_ref(), status.message));
        }
        code = code.max(status.code);
    }

    DeviceStatus::new(code).with_message(parts.join(", "))
}
