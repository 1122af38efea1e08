use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SocketServerConfig {
    pub socket_path: String,
    pub max_connections: usize,
    /// Longest accepted command line, in bytes.
    pub buffer_size: usize,
}

impl Default for SocketServerConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/devswitch.sock".to_string(),
            max_connections: 100,
            buffer_size: 8192,
        }
    }
}
