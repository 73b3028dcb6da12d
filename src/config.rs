use std::env;

use serde::Deserialize;

/// Interval between presence probe rounds while no device is attached.
pub const DISCOVERY_INTERVAL_MS: u64 = 200;

/// Upper bound for one long-poll round trip. The server intentionally holds
/// the push request for roughly ten seconds before answering; keep ample
/// headroom so the hold is never cut short locally.
pub const PUSH_TIMEOUT_SECS: u64 = 30;

/// Timeout for establishing a TCP connection to the server.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Server address used when none is configured (`host:port`).
pub const DEFAULT_SERVER_ADDRESS: &str = "localhost:1999";

/// The three REST endpoints derived from one base server address.
///
/// Always recomputed as a whole: replacing the base address can never leave
/// the trio partially updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub push_url: String,
    pub download_url: String,
    pub update_url: String,
}

impl ServerEndpoint {
    /// Derive the endpoint trio from a base address such as `localhost:1999`
    /// or `192.168.178.10:1337`. A `http://` / `https://` prefix is kept as
    /// given; bare `host:port` defaults to `https://`.
    pub fn from_address(address: &str) -> Self {
        let address = address.trim().trim_end_matches('/');
        let base = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("https://{}", address)
        };
        Self {
            push_url: format!("{}/rest/pushcmd", base),
            download_url: format!("{}/rest/download", base),
            update_url: format!("{}/rest/update", base),
        }
    }
}

/// Top-level configuration for the agent daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Server address in `host:port` form (scheme optional).
    pub server_address: String,
    /// Device node whose presence marks the primary controller as attached.
    pub primary_device_node: String,
    /// Device node for the alternate controller.
    pub alternate_device_node: String,
    /// Device node for the auxiliary board.
    pub auxiliary_device_node: String,
    /// Directory where downloaded programs and firmware images are spooled.
    pub spool_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_ADDRESS.to_string(),
            primary_device_node: "/dev/ttyACM0".to_string(),
            alternate_device_node: "/dev/rfcomm0".to_string(),
            auxiliary_device_node: "/dev/ttyUSB0".to_string(),
            spool_dir: env::temp_dir().join("blocklink").display().to_string(),
        }
    }
}

impl AgentConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for anything unset. `BLOCKLINK_SERVER` overrides the server address;
    /// the device nodes and spool directory follow the same naming.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_address: env::var("BLOCKLINK_SERVER").unwrap_or(defaults.server_address),
            primary_device_node: env::var("BLOCKLINK_PRIMARY_NODE")
                .unwrap_or(defaults.primary_device_node),
            alternate_device_node: env::var("BLOCKLINK_ALTERNATE_NODE")
                .unwrap_or(defaults.alternate_device_node),
            auxiliary_device_node: env::var("BLOCKLINK_AUXILIARY_NODE")
                .unwrap_or(defaults.auxiliary_device_node),
            spool_dir: env::var("BLOCKLINK_SPOOL_DIR").unwrap_or(defaults.spool_dir),
        }
    }
}
