// Supervisor — owns process-wide lifecycle: the discovery scan and the
// single active worker. No device talks to the server without going through
// here first.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use crate::config::DISCOVERY_INTERVAL_MS;
use crate::connector::worker::Connector;

pub struct ConnectorSupervisor {
    /// Connectors in fixed priority order: primary, alternate, auxiliary.
    connectors: Vec<Arc<Connector>>,
    active: RwLock<Option<Arc<Connector>>>,
}

impl ConnectorSupervisor {
    pub fn new(connectors: Vec<Arc<Connector>>) -> Self {
        Self {
            connectors,
            active: RwLock::new(None),
        }
    }

    /// The connector currently holding a device session, if any. This is
    /// the handle the UI uses for lifecycle display and abort requests.
    pub fn active(&self) -> Option<Arc<Connector>> {
        self.active.read().clone()
    }

    /// Run discovery and sessions for the lifetime of the process. Probing
    /// is suspended while a worker is active and resumes for every role as
    /// soon as the worker returns with no device present.
    pub async fn run(&self) {
        loop {
            let connector = self.wait_for_device().await;
            info!("{}: device found, starting session", connector.role());

            *self.active.write() = Some(connector.clone());
            connector.run_session().await;
            *self.active.write() = None;

            info!("{}: session over, resuming discovery", connector.role());
        }
    }

    /// Scan the presence probes in priority order until one reports a
    /// device. Never returns while nothing is attached.
    async fn wait_for_device(&self) -> Arc<Connector> {
        loop {
            for connector in &self.connectors {
                if connector.is_present().await {
                    return connector.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(DISCOVERY_INTERVAL_MS)).await;
        }
    }
}
