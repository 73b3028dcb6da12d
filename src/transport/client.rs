// HTTPS transport — one self-contained request per call, cancellable mid-flight.

use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::{header, Client, Response};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::protocol::{PushRequest, PushResponse};
use crate::config::{ServerEndpoint, CONNECT_TIMEOUT_SECS, PUSH_TIMEOUT_SECS};

/// Errors surfaced by the transport layer. `Cancelled` is the normal
/// consequence of a user-initiated disconnect, not a failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("server rejected request: HTTP {0}")]
    HttpStatus(u16),
    #[error("response body is not valid JSON: {0}")]
    MalformedResponse(String),
    #[error("binary response carried no content")]
    EmptyBody,
    #[error("request cancelled")]
    Cancelled,
}

/// A binary payload fetched from the server, named by the `Filename`
/// response header. The name is empty when the server did not send one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryArtifact {
    pub name: String,
    pub data: Bytes,
}

/// Stateless-per-call request helper. All protocol state (token, telemetry)
/// lives in the caller-supplied request; the client only holds the endpoint
/// trio and connection options.
pub struct TransportClient {
    client: Client,
    endpoint: RwLock<ServerEndpoint>,
    shutdown: CancellationToken,
}

impl TransportClient {
    /// Build a client for the given base address. Connections are never
    /// pooled across calls, so aborting one in-flight call cannot affect
    /// any other.
    pub fn new(server_address: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(PUSH_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint: RwLock::new(ServerEndpoint::from_address(server_address)),
            shutdown: CancellationToken::new(),
        })
    }

    /// Point the client at a different server. The endpoint trio is swapped
    /// as a whole; calls already in flight keep the URLs they captured at
    /// call start.
    pub fn update_server_address(&self, address: &str) {
        let endpoint = ServerEndpoint::from_address(address);
        debug!("server endpoint updated to {}", endpoint.push_url);
        *self.endpoint.write() = endpoint;
    }

    /// Snapshot of the current endpoint trio.
    pub fn endpoint(&self) -> ServerEndpoint {
        self.endpoint.read().clone()
    }

    /// Long-poll push: POST the request as JSON and block until the server
    /// answers (it holds the call for roughly ten seconds) or `cancel`
    /// fires. An aborted call returns `Cancelled` instead of blocking on.
    pub async fn push(
        &self,
        request: &PushRequest,
        cancel: &CancellationToken,
    ) -> Result<PushResponse, TransportError> {
        let url = self.endpoint.read().push_url.clone();
        debug!("push {} cmd={:?}", url, request.cmd);

        let send = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(request)
            .send();
        let response = self.race(send, cancel).await?;
        Self::check_status(&response)?;

        let body = self.race(response.bytes(), cancel).await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::MalformedResponse(e.to_string()))
    }

    /// Fetch a compiled user program: the same POST shape as `push`, but the
    /// response body is the raw binary and the `Filename` header names it.
    pub async fn download_program(
        &self,
        request: &PushRequest,
        cancel: &CancellationToken,
    ) -> Result<BinaryArtifact, TransportError> {
        let url = self.endpoint.read().download_url.clone();
        debug!("download {}", url);

        let send = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/octet-stream")
            .json(request)
            .send();
        let response = self.race(send, cancel).await?;
        self.read_artifact(response, cancel).await
    }

    /// Fetch a firmware image by name: GET against the update endpoint, no
    /// request body.
    pub async fn download_firmware(
        &self,
        fw_file: &str,
        cancel: &CancellationToken,
    ) -> Result<BinaryArtifact, TransportError> {
        let url = format!("{}/{}", self.endpoint.read().update_url, fw_file);
        debug!("firmware {}", url);

        let send = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/octet-stream")
            .send();
        let response = self.race(send, cancel).await?;
        self.read_artifact(response, cancel).await
    }

    /// Release connection resources and fail any in-flight call with
    /// `Cancelled`. Idempotent, never returns an error: there is nothing
    /// productive to do with a close failure at shutdown time.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Race a request future against the per-call token and client shutdown.
    async fn race<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, reqwest::Error>>,
        cancel: &CancellationToken,
    ) -> Result<T, TransportError> {
        if self.shutdown.is_cancelled() || cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        tokio::select! {
            result = fut => result.map_err(|e| TransportError::Unreachable(e.to_string())),
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            _ = self.shutdown.cancelled() => Err(TransportError::Cancelled),
        }
    }

    fn check_status(response: &Response) -> Result<(), TransportError> {
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus(status.as_u16()));
        }
        Ok(())
    }

    async fn read_artifact(
        &self,
        response: Response,
        cancel: &CancellationToken,
    ) -> Result<BinaryArtifact, TransportError> {
        Self::check_status(&response)?;

        // A missing Filename header yields an unnamed artifact, not an error.
        let name = response
            .headers()
            .get("Filename")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let data: Bytes = self.race(response.bytes(), cancel).await?;
        if data.is_empty() {
            return Err(TransportError::EmptyBody);
        }
        Ok(BinaryArtifact { name, data })
    }
}
