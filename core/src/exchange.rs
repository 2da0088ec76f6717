//! Outbound exchange protocol — control operations addressed by index and
//! operation code.
//!
//! The payload schema carried over the exchange characteristic belongs to
//! the application; this module only guarantees that the index and operation
//! reach the builder, and that the default frame fits a single
//! characteristic write after text encoding.

use serde::{Deserialize, Serialize};

/// Maximum acknowledged characteristic write size
pub const MAX_CHARACTERISTIC_WRITE: usize = 512;

/// Maximum raw frame size. Base64 expands payloads by 4/3, so the raw frame
/// ceiling keeps the encoded write within [`MAX_CHARACTERISTIC_WRITE`].
pub const MAX_FRAME_SIZE: usize = (MAX_CHARACTERISTIC_WRITE / 4) * 3;

/// A single outbound control operation.
///
/// Transient — constructed per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Target device identifier
    pub device_id: String,
    /// Monotonic correlation/addressing value
    pub index: u64,
    /// Control operation code
    pub operation: u8,
}

impl ExchangeRequest {
    /// Create a request for the given device
    pub fn new(device_id: impl Into<String>, index: u64, operation: u8) -> Self {
        Self {
            device_id: device_id.into(),
            index,
            operation,
        }
    }
}

/// Collaborator seam rendering a request into the opaque payload written to
/// the exchange characteristic.
///
/// The error type is the application's own, hence `anyhow`.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, request: &ExchangeRequest) -> anyhow::Result<Vec<u8>>;
}

/// Wire frame produced by the default builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ControlFrame {
    index: u64,
    operation: u8,
}

/// Default request builder: a bincode-serialized control frame
pub struct FrameBuilder;

impl RequestBuilder for FrameBuilder {
    fn build(&self, request: &ExchangeRequest) -> anyhow::Result<Vec<u8>> {
        let frame = ControlFrame {
            index: request.index,
            operation: request.operation,
        };
        let bytes = bincode::serialize(&frame)?;
        if bytes.len() > MAX_FRAME_SIZE {
            anyhow::bail!(
                "frame too large: {} bytes (max {})",
                bytes.len(),
                MAX_FRAME_SIZE
            );
        }
        Ok(bytes)
    }
}
