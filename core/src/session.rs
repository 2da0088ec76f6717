//! Session manager — the peripheral session state machine.
//!
//! Owns at most one active connection and drives it through
//! `Idle → Scanning → Connecting → Discovering → Subscribed → Idle`. Every
//! entry point validates the current state and rejects an invalid transition
//! instead of silently overwriting an in-progress attempt. A failed attempt
//! is not a resident state: the failure is logged, reported to the caller,
//! and the machine lands back in `Idle` with no connection retained.
//!
//! Collaborators are injected at construction: the radio driver behind
//! [`BleAdapter`], the permission dialog behind the gate, the outbound
//! payload schema behind [`RequestBuilder`], and the inbound deserialize
//! boundary behind [`PayloadHandler`].

use crate::adapter::{BleAdapter, ConnectionHandle, Notification, ScanEvent};
use crate::codec;
use crate::config::{ConfigError, SessionConfig};
use crate::exchange::{ExchangeRequest, FrameBuilder, RequestBuilder};
use crate::permissions::PermissionGate;
use crate::registry::{DeviceRegistry, PeripheralDescriptor};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No scan or connection in progress
    Idle,
    /// Scan stream running, registry accumulating
    Scanning,
    /// Connect round-trip in flight
    Connecting,
    /// Capability discovery in flight
    Discovering,
    /// Connected and subscribed to the exchange characteristic
    Subscribed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Scanning => write!(f, "Scanning"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Discovering => write!(f, "Discovering"),
            SessionState::Subscribed => write!(f, "Subscribed"),
        }
    }
}

/// Errors surfaced by the session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("operation {operation} invalid in state {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },
    #[error("transport connect failed: {0}")]
    TransportConnectFailed(String),
    #[error("transport discovery failed: {0}")]
    TransportDiscoveryFailed(String),
    #[error("transport write failed: {0}")]
    TransportWriteFailed(String),
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),
    #[error("notification dropped: {0}")]
    NotificationDropped(String),
    #[error("request rejected: {0}")]
    RequestRejected(String),
}

/// Application boundary for decoded inbound payloads.
///
/// Deserialization and filtering of the byte sequence are the application's
/// concern; the session hands over raw decoded bytes.
pub trait PayloadHandler: Send + Sync {
    fn on_payload(&self, payload: Vec<u8>);
}

struct ActiveConnection {
    descriptor: PeripheralDescriptor,
    handle: ConnectionHandle,
}

/// The peripheral session: discovery, single-connection arbitration, and the
/// exchange write path.
pub struct SessionManager {
    adapter: Arc<dyn BleAdapter>,
    gate: PermissionGate,
    config: SessionConfig,
    builder: Arc<dyn RequestBuilder>,
    registry: Arc<DeviceRegistry>,
    state: Arc<RwLock<SessionState>>,
    connection: Arc<RwLock<Option<ActiveConnection>>>,
    last_error: Arc<RwLock<Option<SessionError>>>,
    handler: Arc<RwLock<Option<Arc<dyn PayloadHandler>>>>,
    scan_pump: Mutex<Option<JoinHandle<()>>>,
    notify_pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a session manager over an injected adapter and permission gate
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        gate: PermissionGate,
        config: SessionConfig,
    ) -> Result<Self, ConfigError> {
        init_tracing();
        config.validate()?;

        Ok(Self {
            adapter,
            gate,
            config,
            builder: Arc::new(FrameBuilder),
            registry: Arc::new(DeviceRegistry::new()),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            connection: Arc::new(RwLock::new(None)),
            last_error: Arc::new(RwLock::new(None)),
            handler: Arc::new(RwLock::new(None)),
            scan_pump: Mutex::new(None),
            notify_pump: Mutex::new(None),
        })
    }

    /// Replace the default control-frame builder with an application one
    pub fn with_request_builder(mut self, builder: Arc<dyn RequestBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Install the boundary receiving decoded inbound payloads
    pub fn set_payload_handler(&self, handler: Option<Box<dyn PayloadHandler>>) {
        *self.handler.write() = handler.map(|h| Arc::from(h) as Arc<dyn PayloadHandler>);
    }

    // ------------------------------------------------------------------------
    // PERMISSIONS
    // ------------------------------------------------------------------------

    /// Request the radio capabilities required by the platform generation.
    ///
    /// Thin pass-through to the gate: a denial is reported, never enforced
    /// here — the caller decides whether to surface it or retry.
    pub async fn request_permissions(&self) -> bool {
        self.gate.request_capability().await
    }

    /// Result-shaped variant of [`Self::request_permissions`] for callers
    /// composing the grant into an error flow
    pub async fn ensure_permissions(&self) -> Result<(), SessionError> {
        if self.request_permissions().await {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied)
        }
    }

    // ------------------------------------------------------------------------
    // DISCOVERY
    // ------------------------------------------------------------------------

    /// Start an unfiltered scan.
    ///
    /// Valid only from `Idle`. Clears the registry and the last exchange
    /// error, then routes every discovery event through the registry. Scan
    /// stream failures are logged and do not halt the scan. Must be called
    /// from within a Tokio runtime.
    pub fn scan_for_peripherals(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.write();
            if *state != SessionState::Idle {
                return Err(SessionError::InvalidTransition {
                    operation: "scan",
                    state: *state,
                });
            }
            *state = SessionState::Scanning;
        }

        self.registry.reset();
        *self.last_error.write() = None;

        let (events_tx, mut events_rx) = mpsc::channel(self.config.event_buffer);
        let registry = Arc::clone(&self.registry);
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                match event {
                    ScanEvent::Discovered(descriptor) => {
                        let id = descriptor.id.clone();
                        if registry.observe(descriptor) {
                            debug!("peripheral discovered: {}", id);
                        }
                    }
                    ScanEvent::Failed(reason) => {
                        // Best-effort stream: log and keep scanning
                        warn!("scan error: {}", reason);
                    }
                }
            }
        });
        *self.scan_pump.lock() = Some(pump);

        self.adapter.start_scan(events_tx);
        info!("scan started");
        Ok(())
    }

    /// Restart discovery from scratch: stop any scan, clear the registry and
    /// the last exchange error. Invalid while a connection is active.
    pub fn reset(&self) -> Result<(), SessionError> {
        if self.connection.read().is_some() {
            return Err(SessionError::InvalidTransition {
                operation: "reset",
                state: *self.state.read(),
            });
        }
        self.halt_scan();
        self.registry.reset();
        *self.last_error.write() = None;
        *self.state.write() = SessionState::Idle;
        info!("session reset");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // CONNECTION LIFECYCLE
    // ------------------------------------------------------------------------

    /// Connect to a discovered peripheral and subscribe to the exchange
    /// characteristic.
    ///
    /// Valid from `Idle` or `Scanning`; a second connect while an attempt or
    /// session is in progress is rejected — the session supports exactly one
    /// logical connection. On success the scan is stopped exactly once and
    /// the state is `Subscribed`. On failure the attempt is abandoned and
    /// the state is `Idle` with no connection retained; there is no
    /// automatic retry.
    pub async fn connect_to_device(
        &self,
        descriptor: &PeripheralDescriptor,
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state.write();
            match *state {
                SessionState::Idle | SessionState::Scanning => {
                    *state = SessionState::Connecting;
                }
                current => {
                    return Err(SessionError::InvalidTransition {
                        operation: "connect",
                        state: current,
                    });
                }
            }
        }

        info!("connecting to {}", descriptor.id);
        let handle = match self.adapter.connect(&descriptor.id).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!("connect to {} failed: {}", descriptor.id, err);
                self.halt_scan();
                *self.state.write() = SessionState::Idle;
                return Err(SessionError::TransportConnectFailed(err.to_string()));
            }
        };

        *self.state.write() = SessionState::Discovering;
        if let Err(err) = self.adapter.discover_capabilities(&handle).await {
            warn!("capability discovery on {} failed: {}", descriptor.id, err);
            self.adapter.cancel_connection(&descriptor.id);
            self.halt_scan();
            *self.state.write() = SessionState::Idle;
            return Err(SessionError::TransportDiscoveryFailed(err.to_string()));
        }

        self.halt_scan();

        let (notify_tx, notify_rx) = mpsc::channel(self.config.event_buffer);
        self.adapter.subscribe(
            &handle,
            self.config.service_uuid,
            self.config.characteristic_uuid,
            notify_tx,
        );
        self.spawn_notify_pump(notify_rx);

        *self.connection.write() = Some(ActiveConnection {
            descriptor: descriptor.clone(),
            handle,
        });
        *self.state.write() = SessionState::Subscribed;
        info!("subscribed to {}", descriptor.id);
        Ok(())
    }

    /// Tear down the active connection.
    ///
    /// The only cancellation primitive: aborts the inbound subscription and
    /// releases the connection at the adapter. A no-op (never an error) when
    /// no connection is active; safe to call in any state, idempotent.
    pub fn disconnect_from_device(&self) {
        let active = self.connection.write().take();
        let Some(active) = active else {
            debug!("disconnect requested with no active connection");
            return;
        };

        if let Some(pump) = self.notify_pump.lock().take() {
            pump.abort();
        }
        self.adapter.cancel_connection(&active.descriptor.id);
        *self.state.write() = SessionState::Idle;
        info!("disconnected from {}", active.descriptor.id);
    }

    // ------------------------------------------------------------------------
    // EXCHANGE
    // ------------------------------------------------------------------------

    /// Issue one acknowledged control write to the exchange characteristic.
    ///
    /// Builds the request through the injected builder, encodes it, and
    /// writes it once. A transport failure is returned to the caller with no
    /// retry; the session stays connected either way.
    pub async fn exchange_control(
        &self,
        device: &PeripheralDescriptor,
        index: u64,
        operation: u8,
    ) -> Result<(), SessionError> {
        let handle = {
            let connection = self.connection.read();
            match connection.as_ref() {
                Some(active) => active.handle.clone(),
                None => {
                    return Err(SessionError::InvalidTransition {
                        operation: "exchange",
                        state: *self.state.read(),
                    });
                }
            }
        };

        let request = ExchangeRequest::new(device.id.clone(), index, operation);
        let frame = self
            .builder
            .build(&request)
            .map_err(|err| SessionError::RequestRejected(err.to_string()))?;
        let encoded = codec::encode(&frame);

        if let Err(err) = self
            .adapter
            .write(
                &handle,
                self.config.service_uuid,
                self.config.characteristic_uuid,
                &encoded,
            )
            .await
        {
            warn!("exchange write to {} failed: {}", device.id, err);
            return Err(SessionError::TransportWriteFailed(err.to_string()));
        }

        debug!("exchange {} op {} written to {}", index, operation, device.id);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // READ ACCESS
    // ------------------------------------------------------------------------

    /// Current machine state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Descriptor of the connected device, if any
    pub fn connected_device(&self) -> Option<PeripheralDescriptor> {
        self.connection.read().as_ref().map(|c| c.descriptor.clone())
    }

    /// Ordered snapshot of every device discovered this scan session
    pub fn all_devices(&self) -> Vec<PeripheralDescriptor> {
        self.registry.snapshot()
    }

    /// Last error recorded on the inbound notification path.
    ///
    /// Overwritten by each new error, cleared when a fresh scan begins or
    /// the session is reset.
    pub fn last_exchange_error(&self) -> Option<SessionError> {
        self.last_error.read().clone()
    }

    // ------------------------------------------------------------------------
    // INTERNALS
    // ------------------------------------------------------------------------

    /// Stop the scan stream if one is running; the adapter is told to stop
    /// at most once per started scan.
    fn halt_scan(&self) {
        if let Some(pump) = self.scan_pump.lock().take() {
            pump.abort();
            self.adapter.stop_scan();
            debug!("scan stopped");
        }
    }

    /// Pump inbound notifications through the codec into the payload
    /// boundary. Errors land in the last-error slot and never tear the
    /// session down; the pump itself is aborted by `disconnect_from_device`.
    fn spawn_notify_pump(&self, mut notify_rx: mpsc::Receiver<Notification>) {
        let last_error = Arc::clone(&self.last_error);
        let handler = Arc::clone(&self.handler);
        let pump = tokio::spawn(async move {
            while let Some(notification) = notify_rx.recv().await {
                match notification {
                    Notification::Dropped(err) => {
                        warn!("notification error: {}", err);
                        *last_error.write() =
                            Some(SessionError::NotificationDropped(err.to_string()));
                    }
                    Notification::Payload(text) => match codec::decode(&text) {
                        Ok(payload) => {
                            let handler = handler.read().clone();
                            if let Some(handler) = handler {
                                handler.on_payload(payload);
                            }
                        }
                        Err(err) => {
                            warn!("inbound payload rejected: {}", err);
                            *last_error.write() =
                                Some(SessionError::MalformedEncoding(err.to_string()));
                        }
                    },
                }
            }
        });
        *self.notify_pump.lock() = Some(pump);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::TransportError;
    use crate::permissions::{MockPermissionBridge, PlatformGeneration};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct StubAdapter;

    #[async_trait]
    impl BleAdapter for StubAdapter {
        fn start_scan(&self, _events: mpsc::Sender<ScanEvent>) {}
        fn stop_scan(&self) {}
        async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, TransportError> {
            Ok(ConnectionHandle::new(device_id))
        }
        fn cancel_connection(&self, _device_id: &str) {}
        async fn discover_capabilities(
            &self,
            _handle: &ConnectionHandle,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn subscribe(
            &self,
            _handle: &ConnectionHandle,
            _service: Uuid,
            _characteristic: Uuid,
            _notifications: mpsc::Sender<Notification>,
        ) {
        }
        async fn write(
            &self,
            _handle: &ConnectionHandle,
            _service: Uuid,
            _characteristic: Uuid,
            _encoded: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn ungated_gate() -> PermissionGate {
        PermissionGate::new(
            PlatformGeneration::Ungated,
            Arc::new(MockPermissionBridge::new()),
        )
    }

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(StubAdapter), ungated_gate(), SessionConfig::default())
            .expect("valid config")
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = manager();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.connected_device().is_none());
        assert!(session.all_devices().is_empty());
        assert!(session.last_exchange_error().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SessionConfig::default().with_event_buffer(0);
        let result = SessionManager::new(Arc::new(StubAdapter), ungated_gate(), config);
        assert!(result.is_err());
    }

    #[test]
    fn test_disconnect_without_connection_is_noop() {
        let session = manager();
        session.disconnect_from_device();
        session.disconnect_from_device();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_scan_requires_idle() {
        let session = manager();
        session.scan_for_peripherals().expect("first scan");
        assert_eq!(session.state(), SessionState::Scanning);

        let second = session.scan_for_peripherals();
        assert_eq!(
            second,
            Err(SessionError::InvalidTransition {
                operation: "scan",
                state: SessionState::Scanning,
            })
        );
    }

    #[tokio::test]
    async fn test_connect_then_disconnect_roundtrip() {
        let session = manager();
        let device = PeripheralDescriptor::new("dev-1", Some("Pulse".to_string()));

        session.connect_to_device(&device).await.expect("connect");
        assert_eq!(session.state(), SessionState::Subscribed);
        assert_eq!(session.connected_device().map(|d| d.id), Some("dev-1".to_string()));

        session.disconnect_from_device();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.connected_device().is_none());

        // Idempotent
        session.disconnect_from_device();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_second_connect_rejected_while_subscribed() {
        let session = manager();
        let first = PeripheralDescriptor::new("dev-1", Some("A".to_string()));
        let second = PeripheralDescriptor::new("dev-2", Some("B".to_string()));

        session.connect_to_device(&first).await.expect("connect");
        let result = session.connect_to_device(&second).await;
        assert_eq!(
            result,
            Err(SessionError::InvalidTransition {
                operation: "connect",
                state: SessionState::Subscribed,
            })
        );
        // The original session is untouched
        assert_eq!(session.connected_device().map(|d| d.id), Some("dev-1".to_string()));
    }

    #[tokio::test]
    async fn test_exchange_without_connection_rejected() {
        let session = manager();
        let device = PeripheralDescriptor::new("dev-1", None);
        let result = session.exchange_control(&device, 7, 2).await;
        assert_eq!(
            result,
            Err(SessionError::InvalidTransition {
                operation: "exchange",
                state: SessionState::Idle,
            })
        );
    }

    #[tokio::test]
    async fn test_reset_rejected_while_connected() {
        let session = manager();
        let device = PeripheralDescriptor::new("dev-1", None);
        session.connect_to_device(&device).await.expect("connect");
        assert!(session.reset().is_err());
    }

    #[tokio::test]
    async fn test_ensure_permissions_denied_maps_to_error() {
        let mut bridge = MockPermissionBridge::new();
        bridge.expect_request().returning(|_| Vec::new());
        let gate = PermissionGate::new(PlatformGeneration::LegacyRuntime, Arc::new(bridge));
        let session =
            SessionManager::new(Arc::new(StubAdapter), gate, SessionConfig::default())
                .expect("valid config");

        assert!(!session.request_permissions().await);
        assert_eq!(
            session.ensure_permissions().await,
            Err(SessionError::PermissionDenied)
        );
        // A denial never blocks a later grant attempt
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Idle.to_string(), "Idle");
        assert_eq!(SessionState::Scanning.to_string(), "Scanning");
        assert_eq!(SessionState::Connecting.to_string(), "Connecting");
        assert_eq!(SessionState::Discovering.to_string(), "Discovering");
        assert_eq!(SessionState::Subscribed.to_string(), "Subscribed");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = SessionError::InvalidTransition {
            operation: "connect",
            state: SessionState::Subscribed,
        };
        assert_eq!(
            err.to_string(),
            "operation connect invalid in state Subscribed"
        );
    }
}
