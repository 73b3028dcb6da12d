use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use blocklink::config::AgentConfig;
use blocklink::connector::worker::Connector;
use blocklink::device::file_link::FileDeviceLink;
use blocklink::device::traits::DeviceRole;
use blocklink::supervisor::ConnectorSupervisor;
use blocklink::transport::client::TransportClient;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AgentConfig::from_env();
    info!("connecting to {}", config.server_address);

    let transport = Arc::new(TransportClient::new(&config.server_address)?);

    let links: [(DeviceRole, &str); 3] = [
        (DeviceRole::Primary, &config.primary_device_node),
        (DeviceRole::Alternate, &config.alternate_device_node),
        (DeviceRole::Auxiliary, &config.auxiliary_device_node),
    ];
    let connectors = links
        .into_iter()
        .map(|(role, node)| {
            let link = Arc::new(FileDeviceLink::new(role, node, &config.spool_dir));
            Arc::new(Connector::new(link, transport.clone()))
        })
        .collect();

    let supervisor = ConnectorSupervisor::new(connectors);

    tokio::select! {
        _ = supervisor.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            if let Some(active) = supervisor.active() {
                active.abort();
            }
            transport.shutdown();
        }
    }

    Ok(())
}
