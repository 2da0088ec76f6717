//! Session configuration
//!
//! The exchange service and characteristic identifiers are configuration
//! constants supplied at initialization, not discovered at runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Exchange service UUID (0xB10E0001 in the Bluetooth base range)
pub const EXCHANGE_SERVICE_UUID: Uuid = Uuid::from_u128(0xB10E_0001_0000_1000_8000_00805F9B34FB);

/// Exchange characteristic UUID (0xB10E0002 in the Bluetooth base range)
pub const EXCHANGE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xB10E_0002_0000_1000_8000_00805F9B34FB);

/// Default capacity for the scan and notification channels
pub const DEFAULT_EVENT_BUFFER: usize = 32;

/// Errors for configuration validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service and characteristic identifiers must be non-nil")]
    MissingIdentifier,
    #[error("event buffer capacity must be > 0")]
    InvalidEventBuffer,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Service hosting the exchange characteristic
    pub service_uuid: Uuid,
    /// The single characteristic used for the control/data protocol
    pub characteristic_uuid: Uuid,
    /// Capacity of the push-event channels (scan stream, notifications)
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_uuid: EXCHANGE_SERVICE_UUID,
            characteristic_uuid: EXCHANGE_CHARACTERISTIC_UUID,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Create a configuration for a specific service and characteristic
    pub fn new(service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        Self {
            service_uuid,
            characteristic_uuid,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Set the push-event channel capacity
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_uuid.is_nil() || self.characteristic_uuid.is_nil() {
            return Err(ConfigError::MissingIdentifier);
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidEventBuffer);
        }
        Ok(())
    }
}
