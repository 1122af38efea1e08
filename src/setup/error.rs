use std::path::PathBuf;

use crate::error::DeviceError;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to read setup file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse setup: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{referenced_by}: attached device {device:?} is not defined")]
    UnknownDevice {
        device: String,
        referenced_by: String,
    },

    #[error("cyclic attachment: {0}")]
    Cycle(String),

    #[error("{referenced_by}: attached device {device:?} must be {expected}")]
    Capability {
        device: String,
        expected: &'static str,
        referenced_by: String,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}
