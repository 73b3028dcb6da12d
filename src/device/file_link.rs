// Filesystem-backed device link — presence is a serial device node, artifacts
// spool to a drop directory for the device-family toolchain to pick up.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tracing::{info, warn};

use super::traits::{DeviceLink, DeviceRole};
use crate::transport::client::BinaryArtifact;
use crate::transport::protocol::DeviceTelemetry;

/// Fallback artifact names for servers that omit the Filename header.
const DEFAULT_PROGRAM_NAME: &str = "program.bin";
const DEFAULT_FIRMWARE_NAME: &str = "firmware.bin";

/// The daemon's concrete device link. Presence is the existence of the
/// configured device node (e.g. `/dev/ttyACM0`); programs and firmware
/// images are written into the spool directory. Low-level device control is
/// a separate concern and happens outside this process.
pub struct FileDeviceLink {
    role: DeviceRole,
    device_node: PathBuf,
    spool_dir: PathBuf,
    firmware_version: String,
}

impl FileDeviceLink {
    pub fn new(role: DeviceRole, device_node: impl Into<PathBuf>, spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            role,
            device_node: device_node.into(),
            spool_dir: spool_dir.into(),
            firmware_version: "1.0.0".to_string(),
        }
    }

    async fn spool(&self, subdir: &str, artifact: &BinaryArtifact, fallback: &str) -> Result<PathBuf> {
        let dir = self.spool_dir.join(subdir);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating spool directory {}", dir.display()))?;

        // Only the final path component of the server-supplied name is used.
        let name = Path::new(&artifact.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| fallback.to_string());

        let path = dir.join(name);
        fs::write(&path, &artifact.data)
            .await
            .with_context(|| format!("writing artifact to {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl DeviceLink for FileDeviceLink {
    fn role(&self) -> DeviceRole {
        self.role
    }

    async fn is_present(&self) -> bool {
        fs::try_exists(&self.device_node).await.unwrap_or(false)
    }

    fn telemetry(&self) -> DeviceTelemetry {
        DeviceTelemetry {
            role: self.role,
            firmware_version: self.firmware_version.clone(),
            battery: "unknown".to_string(),
            connection: "usb".to_string(),
        }
    }

    async fn run_program(&self, artifact: &BinaryArtifact) -> Result<()> {
        let path = self.spool("programs", artifact, DEFAULT_PROGRAM_NAME).await?;
        info!(
            "{}: program {} ({} bytes) spooled to {}",
            self.role,
            artifact.name,
            artifact.data.len(),
            path.display()
        );
        Ok(())
    }

    async fn flash_firmware(&self, artifact: &BinaryArtifact) -> Result<()> {
        let path = self.spool("firmware", artifact, DEFAULT_FIRMWARE_NAME).await?;
        info!(
            "{}: firmware {} ({} bytes) spooled to {}",
            self.role,
            artifact.name,
            artifact.data.len(),
            path.display()
        );
        Ok(())
    }

    async fn abort_action(&self) -> Result<()> {
        warn!("{}: abort requested, no action running", self.role);
        Ok(())
    }
}
