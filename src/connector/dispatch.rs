// Command dispatch — maps a decoded server response onto device actions.

use tracing::warn;

use super::state::ConnectionState;
use super::worker::Connector;
use crate::transport::client::TransportError;
use crate::transport::protocol::{PushResponse, RequestCmd, ServerCmd};

/// What the worker loop should do after one server response is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Keep the session, optionally reporting an action outcome.
    Continue(Option<String>),
    /// The server ended the session.
    Disconnect,
    /// Protocol-level failure, with the server-supplied cause where given.
    Fault(String),
}

/// Execute one server command. Transport failures while fetching an artifact
/// propagate to the worker (cancel ends the session quietly, anything else
/// is an error); failures inside the device collaborator are reported as a
/// status and the session keeps polling.
pub(crate) async fn dispatch(
    connector: &Connector,
    response: PushResponse,
) -> Result<Flow, TransportError> {
    match response.cmd {
        ServerCmd::Repeat => Ok(Flow::Continue(None)),

        ServerCmd::Download => {
            connector.publish(
                ConnectionState::Executing,
                Some("downloading user program".to_string()),
            );
            let request = connector.build_request(RequestCmd::Push);
            let cancel = connector.arm_cancel();
            let result = connector.transport().download_program(&request, &cancel).await;
            connector.disarm_cancel();
            let artifact = result?;

            match connector.link().run_program(&artifact).await {
                Ok(()) => Ok(Flow::Continue(Some(format!(
                    "program {} delivered",
                    display_name(&artifact.name)
                )))),
                Err(e) => {
                    warn!("{}: program run failed: {:#}", connector.role(), e);
                    Ok(Flow::Continue(Some(format!("program run failed: {}", e))))
                }
            }
        }

        ServerCmd::Update => {
            let Some(filename) = response.filename.filter(|f| !f.is_empty()) else {
                return Ok(Flow::Fault("UPDATE without a firmware file name".to_string()));
            };
            connector.publish(
                ConnectionState::Executing,
                Some(format!("updating firmware from {}", filename)),
            );
            let cancel = connector.arm_cancel();
            let result = connector.transport().download_firmware(&filename, &cancel).await;
            connector.disarm_cancel();
            let artifact = result?;

            match connector.link().flash_firmware(&artifact).await {
                Ok(()) => Ok(Flow::Continue(Some(format!(
                    "firmware {} flashed",
                    display_name(&artifact.name)
                )))),
                Err(e) => {
                    warn!("{}: firmware flash failed: {:#}", connector.role(), e);
                    Ok(Flow::Continue(Some(format!("firmware flash failed: {}", e))))
                }
            }
        }

        ServerCmd::Abort => match connector.link().abort_action().await {
            Ok(()) => Ok(Flow::Continue(Some("running action aborted".to_string()))),
            Err(e) => {
                warn!("{}: abort action failed: {:#}", connector.role(), e);
                Ok(Flow::Continue(Some(format!("abort failed: {}", e))))
            }
        },

        ServerCmd::Disconnect => Ok(Flow::Disconnect),

        ServerCmd::RegisterError => Ok(Flow::Fault(
            response
                .cause
                .unwrap_or_else(|| "registration invalidated by server".to_string()),
        )),

        ServerCmd::Unrecognized => Ok(Flow::Fault("unrecognized server command".to_string())),
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "<unnamed>"
    } else {
        name
    }
}
