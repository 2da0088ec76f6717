//! Permission gate — capability check preceding any scan.
//!
//! Platforms with a staged permission model split radio access across
//! several runtime grants whose composition changed between platform
//! generations. The gate requests the superset required by the running
//! generation and reports granted only when every requested capability was
//! granted. The platform dialog itself lives behind [`PermissionBridge`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Platform API level at which dedicated radio scan/connect permissions
/// replaced the location-only grant
pub const STAGED_PERMISSION_API_LEVEL: u32 = 31;

/// A single platform capability involved in radio discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Fine location, historically required for radio scanning
    FineLocation,
    /// Dedicated radio scan permission
    RadioScan,
    /// Dedicated radio connect permission
    RadioConnect,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::FineLocation => write!(f, "FineLocation"),
            Capability::RadioScan => write!(f, "RadioScan"),
            Capability::RadioConnect => write!(f, "RadioConnect"),
        }
    }
}

/// Which permission model the running platform uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformGeneration {
    /// Staged platform below the dedicated-radio-permission threshold:
    /// location alone gates scanning
    LegacyRuntime,
    /// Staged platform with dedicated radio permissions plus location
    StagedRuntime,
    /// No staged negotiation; capability is implicitly granted
    Ungated,
}

impl PlatformGeneration {
    /// Map a numeric platform API level to its permission generation
    pub fn from_api_level(api_level: u32) -> Self {
        if api_level >= STAGED_PERMISSION_API_LEVEL {
            PlatformGeneration::StagedRuntime
        } else {
            PlatformGeneration::LegacyRuntime
        }
    }

    /// The capabilities this generation must request before scanning
    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            PlatformGeneration::LegacyRuntime => &[Capability::FineLocation],
            PlatformGeneration::StagedRuntime => &[
                Capability::RadioScan,
                Capability::RadioConnect,
                Capability::FineLocation,
            ],
            PlatformGeneration::Ungated => &[],
        }
    }
}

/// Platform bridge that shows the permission dialog and reports the outcome.
///
/// Implementations receive the capabilities to request and return the subset
/// the user granted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionBridge: Send + Sync {
    async fn request(&self, capabilities: Vec<Capability>) -> Vec<Capability>;
}

/// Capability check preceding any scan request.
///
/// The gate itself never blocks later calls; a denial is reported to the
/// caller, who decides whether to surface it or retry.
pub struct PermissionGate {
    generation: PlatformGeneration,
    bridge: Arc<dyn PermissionBridge>,
}

impl PermissionGate {
    /// Create a gate for the given platform generation
    pub fn new(generation: PlatformGeneration, bridge: Arc<dyn PermissionBridge>) -> Self {
        Self { generation, bridge }
    }

    /// The generation this gate negotiates for
    pub fn generation(&self) -> PlatformGeneration {
        self.generation
    }

    /// Request every capability the platform generation requires.
    ///
    /// Returns `true` only if all of them were granted; `Ungated` platforms
    /// report `true` without consulting the bridge.
    pub async fn request_capability(&self) -> bool {
        let required = self.generation.required_capabilities();
        if required.is_empty() {
            debug!("platform is ungated; capability implicitly granted");
            return true;
        }

        let granted = self.bridge.request(required.to_vec()).await;
        let all_granted = required.iter().all(|cap| granted.contains(cap));
        if all_granted {
            info!("radio capabilities granted ({} requested)", required.len());
        } else {
            let denied: Vec<String> = required
                .iter()
                .filter(|cap| !granted.contains(cap))
                .map(|cap| cap.to_string())
                .collect();
            info!("radio capability denied: {}", denied.join(", "));
        }
        all_granted
    }
}
