use serde::{Deserialize, Serialize};

/// Status constants, ordered by severity.
///
/// When several devices are combined the highest value wins, so the order of
/// the variants is significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Ok,
    Warn,
    Busy,
    #[serde(rename = "NOTREACHED")]
    NotReached,
    Disabled,
    Error,
    Unknown,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Warn => "WARN",
            StatusCode::Busy => "BUSY",
            StatusCode::NotReached => "NOTREACHED",
            StatusCode::Disabled => "DISABLED",
            StatusCode::Error => "ERROR",
            StatusCode::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
