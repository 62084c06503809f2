/// Transport configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gatt::ATT_OVERHEAD;

/// Largest ATT MTU a peer may negotiate (512 byte attribute + 5 header bytes)
pub const ATT_MTU_LIMIT: u16 = 517;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid default MTU: {0}")]
    InvalidDefaultMtu(u16),
    #[error("Invalid max MTU: {0}")]
    InvalidMaxMtu(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// MTU requested after profile selection. Android caps at 512 and some
    /// BLE 4.2 devices at 251; the peer answers with what it supports.
    pub max_mtu: u16,
    /// MTU assumed before (or without) negotiation
    pub default_mtu: u16,
    /// Whether to request `max_mtu` at all
    pub request_mtu: bool,
    /// Whether to subscribe to pairing / disconnect broadcasts while connected
    pub subscribe_system_events: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            max_mtu: 512,
            default_mtu: 23,
            request_mtu: true,
            subscribe_system_events: true,
        }
    }
}

impl SerialConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_mtu(mut self, mtu: u16) -> Self {
        self.max_mtu = mtu;
        self
    }

    pub fn with_default_mtu(mut self, mtu: u16) -> Self {
        self.default_mtu = mtu;
        self
    }

    pub fn with_request_mtu(mut self, enabled: bool) -> Self {
        self.request_mtu = enabled;
        self
    }

    pub fn with_system_events(mut self, enabled: bool) -> Self {
        self.subscribe_system_events = enabled;
        self
    }

    /// Payload size used until an MTU exchange succeeds
    pub fn default_payload_size(&self) -> usize {
        payload_size_for_mtu(self.default_mtu)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_mtu <= ATT_OVERHEAD {
            return Err(ConfigError::InvalidDefaultMtu(self.default_mtu));
        }
        if self.max_mtu < self.default_mtu || self.max_mtu > ATT_MTU_LIMIT {
            return Err(ConfigError::InvalidMaxMtu(self.max_mtu));
        }
        Ok(())
    }
}

/// Usable payload bytes for a given ATT MTU, never below 1
pub fn payload_size_for_mtu(mtu: u16) -> usize {
    usize::from(mtu.saturating_sub(ATT_OVERHEAD)).max(1)
}
