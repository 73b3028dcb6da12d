use std::fmt;

use tokio::sync::broadcast;

/// Transition backlog kept per observer before the feed reports lag.
pub const STATE_EVENT_CAPACITY: usize = 64;

/// Lifecycle of one connector. Transitions are performed only by the worker
/// task that owns the connector; everyone else sees read-only snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Discovering,
    Registering,
    ConnectedIdle,
    Polling,
    Executing,
    Disconnecting,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Discovering => "discovering",
            ConnectionState::Registering => "registering",
            ConnectionState::ConnectedIdle => "connected",
            ConnectionState::Polling => "waiting for command",
            ConnectionState::Executing => "executing command",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(label)
    }
}

/// Snapshot delivered to state observers: the new state plus an optional
/// human-readable detail line (error cause, action outcome). Every
/// transition is delivered, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub state: ConnectionState,
    pub detail: Option<String>,
}

/// Read side of a connector's transition feed, for the UI collaborator.
pub type StateReceiver = broadcast::Receiver<StatusUpdate>;
