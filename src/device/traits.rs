use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::transport::client::BinaryArtifact;
use crate::transport::protocol::DeviceTelemetry;

/// Device family served by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Primary,
    Alternate,
    Auxiliary,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRole::Primary => write!(f, "primary"),
            DeviceRole::Alternate => write!(f, "alternate"),
            DeviceRole::Auxiliary => write!(f, "auxiliary"),
        }
    }
}

/// One attachable device family: the presence probe the supervisor scans
/// plus the action sink the command dispatcher drives. Implementations hold
/// whatever per-device identity they need; the connector treats them as
/// opaque.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    fn role(&self) -> DeviceRole;

    /// Probe whether a device of this family is physically attached.
    async fn is_present(&self) -> bool;

    /// Current device state reported with every push request.
    fn telemetry(&self) -> DeviceTelemetry;

    /// Execute a compiled user program on the device. Ownership of the
    /// artifact ends here; it is never cached beyond this call.
    async fn run_program(&self, artifact: &BinaryArtifact) -> Result<()>;

    /// Flash a firmware image onto the device.
    async fn flash_firmware(&self, artifact: &BinaryArtifact) -> Result<()>;

    /// Stop whatever the device is currently doing.
    async fn abort_action(&self) -> Result<()>;
}
