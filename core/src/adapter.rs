//! Transport adapter abstraction — the radio driver seam.
//!
//! The session core never touches the radio directly; it consumes this
//! interface. Scan results and characteristic notifications are push-based
//! and delivered over channels, so driver callbacks may arrive on any
//! execution context without blocking the caller. Connect, discovery, and
//! write are the only operations that suspend awaiting a transport
//! round-trip.

use crate::registry::PeripheralDescriptor;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Errors reported by the transport layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("capability discovery failed: {0}")]
    DiscoveryFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("notification lost: {0}")]
    NotificationLost(String),
}

/// Push event from an in-progress scan
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A peripheral advertisement was received
    Discovered(PeripheralDescriptor),
    /// The scan stream reported a transient failure; scanning continues
    Failed(String),
}

impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanEvent::Discovered(descriptor) => {
                write!(f, "Discovered {{ id: {}, name: {:?} }}", descriptor.id, descriptor.name)
            }
            ScanEvent::Failed(reason) => write!(f, "Failed {{ {} }}", reason),
        }
    }
}

/// Asynchronous delivery on the subscribed characteristic: either a new
/// transport-encoded payload or a transport-level failure
#[derive(Debug, Clone)]
pub enum Notification {
    /// Transport-encoded text carried by the characteristic
    Payload(String),
    /// The transport failed to deliver a notification
    Dropped(TransportError),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Payload(text) => write!(f, "Payload {{ len: {} }}", text.len()),
            Notification::Dropped(err) => write!(f, "Dropped {{ {} }}", err),
        }
    }
}

/// Opaque handle to an established peripheral connection.
///
/// Issued by the adapter on a successful connect and passed back for
/// discovery, subscription, and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    device_id: String,
}

impl ConnectionHandle {
    /// Create a handle for the given device identifier
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    /// Identifier of the connected device
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Radio transport primitives consumed by the session manager.
///
/// Implementations wrap a platform BLE driver. All methods must be safe to
/// call from the session's tasks; `stop_scan` and `cancel_connection` are
/// best-effort and must tolerate being called when nothing is in progress.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Begin an unfiltered scan, pushing discovery and scan-error events
    /// into `events` until `stop_scan` is called
    fn start_scan(&self, events: mpsc::Sender<ScanEvent>);

    /// Stop an in-progress scan; a no-op when no scan is running
    fn stop_scan(&self);

    /// Establish a connection to the given device
    async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, TransportError>;

    /// Cancel an established or in-progress connection; best-effort
    fn cancel_connection(&self, device_id: &str);

    /// Enumerate services and characteristics on the connection
    async fn discover_capabilities(&self, handle: &ConnectionHandle)
        -> Result<(), TransportError>;

    /// Install the inbound-notification handler for one characteristic
    fn subscribe(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        notifications: mpsc::Sender<Notification>,
    );

    /// Write transport-encoded text to a characteristic with acknowledgment
    async fn write(
        &self,
        handle: &ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        encoded: &str,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_handle_accessors() {
        let handle = ConnectionHandle::new("device-1");
        assert_eq!(handle.device_id(), "device-1");
    }

    #[test]
    fn test_connection_handle_equality() {
        assert_eq!(ConnectionHandle::new("a"), ConnectionHandle::new("a"));
        assert_ne!(ConnectionHandle::new("a"), ConnectionHandle::new("b"));
    }

    #[test]
    fn test_scan_event_display() {
        let descriptor = PeripheralDescriptor::new("1", Some("Pulse".to_string()));
        let event = ScanEvent::Discovered(descriptor);
        let display = format!("{}", event);
        assert!(display.contains("Discovered"));
        assert!(display.contains("Pulse"));

        let failed = ScanEvent::Failed("radio off".to_string());
        assert!(format!("{}", failed).contains("radio off"));
    }

    #[test]
    fn test_notification_display() {
        let payload = Notification::Payload("aGVsbG8=".to_string());
        assert!(format!("{}", payload).contains("len: 8"));

        let dropped = Notification::Dropped(TransportError::NotificationLost("gone".into()));
        assert!(format!("{}", dropped).contains("notification lost"));
    }

    #[test]
    fn test_transport_error_display() {
        assert!(TransportError::ConnectFailed("timeout".into())
            .to_string()
            .contains("connect failed"));
        assert!(TransportError::DiscoveryFailed("gatt".into())
            .to_string()
            .contains("capability discovery failed"));
        assert!(TransportError::WriteFailed("nack".into())
            .to_string()
            .contains("write failed"));
    }
}
