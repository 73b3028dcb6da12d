// Connector state machine — one device session: register, long-poll,
// dispatch, disconnect. The worker re-arms discovery on every exit so a
// device can be unplugged and replugged without restarting the process.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch::{dispatch, Flow};
use super::state::{ConnectionState, StateReceiver, StatusUpdate, STATE_EVENT_CAPACITY};
use crate::device::traits::{DeviceLink, DeviceRole};
use crate::transport::client::{TransportClient, TransportError};
use crate::transport::protocol::{PushRequest, RequestCmd, ServerCmd};

/// Why a session ended on the failure path.
#[derive(Debug, Error)]
enum SessionError {
    #[error("registration rejected: {0}")]
    RegisterRejected(String),
    #[error("{0}")]
    Protocol(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One connector instance per device role. All state transitions happen on
/// the task running `run_session`; the controlling side only reads published
/// snapshots and pokes the cancellation slot through `abort`.
pub struct Connector {
    link: Arc<dyn DeviceLink>,
    transport: Arc<TransportClient>,
    state: Mutex<ConnectionState>,
    events_tx: broadcast::Sender<StatusUpdate>,
    session_token: Mutex<String>,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl Connector {
    pub fn new(link: Arc<dyn DeviceLink>, transport: Arc<TransportClient>) -> Self {
        let (events_tx, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Self {
            link,
            transport,
            state: Mutex::new(ConnectionState::Discovering),
            events_tx,
            session_token: Mutex::new(String::new()),
            in_flight: Mutex::new(None),
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.link.role()
    }

    /// Subscribe to the transition feed, for lifecycle display. Every
    /// transition is delivered in order.
    pub fn subscribe(&self) -> StateReceiver {
        self.events_tx.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// The session token currently attached to push requests; empty outside
    /// an established session.
    pub fn session_token(&self) -> String {
        self.session_token.lock().clone()
    }

    /// Delegate to the device's presence probe.
    pub async fn is_present(&self) -> bool {
        self.link.is_present().await
    }

    /// Cancel the in-flight network call, if any. Safe to call from any
    /// task in any state; a no-op when nothing is in flight.
    pub fn abort(&self) {
        if let Some(token) = self.in_flight.lock().as_ref() {
            info!("{}: abort requested", self.link.role());
            token.cancel();
        }
    }

    /// Drive one device session to completion. Returns once the session is
    /// over (server disconnect, user abort, lost device, or error) with the
    /// state re-armed to `Discovering` and the token cleared.
    pub async fn run_session(&self) {
        match self.drive().await {
            Ok(()) => {}
            Err(SessionError::Transport(TransportError::Cancelled)) => {
                // User-initiated disconnect; never surfaced as an error.
                info!("{}: session cancelled", self.link.role());
            }
            Err(e) => {
                warn!("{}: session failed: {}", self.link.role(), e);
                self.publish(ConnectionState::Error, Some(e.to_string()));
            }
        }

        self.publish(ConnectionState::Disconnecting, None);
        self.session_token.lock().clear();
        self.disarm_cancel();
        self.publish(ConnectionState::Discovering, None);
    }

    async fn drive(&self) -> Result<(), SessionError> {
        self.publish(ConnectionState::Registering, None);
        self.register().await?;
        self.publish(ConnectionState::ConnectedIdle, None);

        loop {
            // Presence is probed between network calls; a vanished device
            // ends the session without another request being issued.
            if !self.link.is_present().await {
                info!("{}: device no longer present", self.link.role());
                return Ok(());
            }

            self.publish(ConnectionState::Polling, None);
            let request = self.build_request(RequestCmd::Push);
            let cancel = self.arm_cancel();
            let result = self.transport.push(&request, &cancel).await;
            self.disarm_cancel();
            let response = result?;
            debug!("{}: server answered {:?}", self.link.role(), response.cmd);

            match dispatch(self, response).await? {
                Flow::Continue(detail) => self.publish(ConnectionState::ConnectedIdle, detail),
                Flow::Disconnect => {
                    info!("{}: server ended the session", self.link.role());
                    return Ok(());
                }
                Flow::Fault(cause) => return Err(SessionError::Protocol(cause)),
            }
        }
    }

    async fn register(&self) -> Result<(), SessionError> {
        let request = self.build_request(RequestCmd::Register);
        let cancel = self.arm_cancel();
        let result = self.transport.push(&request, &cancel).await;
        self.disarm_cancel();
        let response = result?;

        if response.cmd == ServerCmd::RegisterError {
            let cause = response.cause.unwrap_or_else(|| "no cause given".to_string());
            return Err(SessionError::RegisterRejected(cause));
        }
        match response.token {
            Some(token) if !token.is_empty() => {
                info!("{}: registered with server", self.link.role());
                *self.session_token.lock() = token;
                Ok(())
            }
            _ => Err(SessionError::RegisterRejected(
                "server sent no session token".to_string(),
            )),
        }
    }

    /// Build a push request carrying the current token and telemetry. The
    /// token is attached unchanged to every request after registration.
    pub(crate) fn build_request(&self, cmd: RequestCmd) -> PushRequest {
        PushRequest {
            cmd,
            token: self.session_token.lock().clone(),
            telemetry: self.link.telemetry(),
        }
    }

    /// Install a fresh cancellation token for the next network call. The
    /// slot is cleared at the start of each call and set by `abort`.
    pub(crate) fn arm_cancel(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.in_flight.lock() = Some(token.clone());
        token
    }

    pub(crate) fn disarm_cancel(&self) {
        *self.in_flight.lock() = None;
    }

    pub(crate) fn transport(&self) -> &TransportClient {
        &self.transport
    }

    pub(crate) fn link(&self) -> &dyn DeviceLink {
        self.link.as_ref()
    }

    /// Publish a state transition to observers.
    pub(crate) fn publish(&self, state: ConnectionState, detail: Option<String>) {
        match &detail {
            Some(d) => info!("{}: {} ({})", self.link.role(), state, d),
            None => debug!("{}: {}", self.link.role(), state),
        }
        *self.state.lock() = state;
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self.events_tx.send(StatusUpdate { state, detail });
    }
}
