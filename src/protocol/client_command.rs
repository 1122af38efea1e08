use serde::{Deserialize, Serialize};

use crate::device::value::RawValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "move")]
    Move {
        device: String,
        target: RawValue,
        /// Return only once the device has arrived.
        #[serde(default)]
        wait: bool,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "read")]
    Read {
        device: String,
        /// Seconds; zero or absent asks for a fresh value.
        #[serde(default)]
        maxage: f64,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "status")]
    Status {
        device: String,
        #[serde(default)]
        maxage: f64,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "is_allowed")]
    IsAllowed {
        device: String,
        target: RawValue,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "stop")]
    Stop {
        device: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "reset")]
    Reset {
        device: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "wait")]
    Wait {
        device: String,
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "list_devices")]
    ListDevices {
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
}

impl ClientCommand {
    pub fn id(&self) -> Option<&String> {
        match self {
            ClientCommand::Move { id, .. } => id.as_ref(),
            ClientCommand::Read { id, .. } => id.as_ref(),
            ClientCommand::Status { id, .. } => id.as_ref(),
            ClientCommand::IsAllowed { id, .. } => id.as_ref(),
            ClientCommand::Stop { id, .. } => id.as_ref(),
            ClientCommand::Reset { id, .. } => id.as_ref(),
            ClientCommand::Wait { id, .. } => id.as_ref(),
            ClientCommand::ListDevices { id, .. } => id.as_ref(),
            ClientCommand::Ping { id, .. } => id.as_ref(),
        }
    }
}
