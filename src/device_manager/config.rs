use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ManagerConfig {
    /// Upper bound on how long any cached read or status is kept.
    pub cache_ttl_ms: u64,
    pub cache_capacity: u64,
    pub command_buffer: usize,
}

impl ManagerConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5000,
            cache_capacity: 1000,
            command_buffer: 100,
        }
    }
}
