// BlueLink Core — peripheral session spine
//
// One radio, one peripheral, one characteristic. Everything here exists to
// take a session from "nothing nearby" to "bytes flowing" and back without
// losing track of which of those two worlds it is in.

pub mod adapter;
pub mod codec;
pub mod config;
pub mod exchange;
pub mod permissions;
pub mod registry;
pub mod session;

pub use adapter::{BleAdapter, ConnectionHandle, Notification, ScanEvent, TransportError};
pub use codec::CodecError;
pub use config::{
    ConfigError, SessionConfig, DEFAULT_EVENT_BUFFER, EXCHANGE_CHARACTERISTIC_UUID,
    EXCHANGE_SERVICE_UUID,
};
pub use exchange::{ExchangeRequest, FrameBuilder, RequestBuilder, MAX_FRAME_SIZE};
pub use permissions::{
    Capability, PermissionBridge, PermissionGate, PlatformGeneration,
    STAGED_PERMISSION_API_LEVEL,
};
pub use registry::{DeviceRegistry, PeripheralDescriptor};
pub use session::{PayloadHandler, SessionError, SessionManager, SessionState};
