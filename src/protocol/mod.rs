pub mod client_command;
pub mod error;
pub mod server_response;

use std::time::Duration;

use client_command::ClientCommand;
use error::ProtocolError;
use server_response::ServerResponse;

use anyhow::Result;

pub fn parse_command(json_str: &str) -> Result<ClientCommand, ProtocolError> {
    serde_json::from_str(json_str).map_err(ProtocolError::from)
}

pub fn serialize_response(response: &ServerResponse) -> Result<String, ProtocolError> {
    serde_json::to_string(response).map_err(ProtocolError::from)
}

/// Convert a max age in seconds as sent by clients.
pub fn parse_maxage(seconds: f64) -> Result<Duration, ProtocolError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| ProtocolError::InvalidMaxAge(seconds))
}
