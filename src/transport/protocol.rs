// Wire messages for the push/poll protocol — JSON over HTTPS.

use serde::{Deserialize, Serialize};

use crate::device::traits::DeviceRole;

/// Client-to-server command tag carried in every push request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestCmd {
    /// First contact: ask the server for a session token.
    Register,
    /// Long-poll for the next command, keeping the session alive.
    Push,
}

/// Server-to-client command tag. Tags outside the closed set decode to
/// `Unrecognized` so a protocol extension cannot panic the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerCmd {
    Repeat,
    Download,
    Update,
    Abort,
    Disconnect,
    RegisterError,
    #[serde(other)]
    Unrecognized,
}

/// Device state reported with every push request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTelemetry {
    pub role: DeviceRole,
    pub firmware_version: String,
    pub battery: String,
    pub connection: String,
}

/// One push request, built fresh per call and immutable once sent. The token
/// stays empty until the first successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub cmd: RequestCmd,
    pub token: String,
    #[serde(flatten)]
    pub telemetry: DeviceTelemetry,
}

/// A decoded server response. `token` is present on a successful REGISTER;
/// `filename` names the firmware image for UPDATE; `cause` carries the
/// server-supplied reason on REGISTER_ERROR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub cmd: ServerCmd,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}
