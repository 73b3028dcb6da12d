// End-to-end tests for the connector state machine against a scripted
// mock server.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::TryRecvError;

use blocklink::connector::state::{ConnectionState, StateReceiver};
use blocklink::connector::worker::Connector;
use blocklink::device::traits::{DeviceLink, DeviceRole};
use blocklink::transport::client::{BinaryArtifact, TransportClient};
use blocklink::transport::protocol::DeviceTelemetry;

/// Mock server scripted with one response per push request. Script entries
/// may carry `__status` (reply with that HTTP status) or `__sleep`
/// (hold the long-poll that many milliseconds, then REPEAT). An exhausted
/// script answers DISCONNECT so sessions always terminate.
#[derive(Clone)]
struct TestServer {
    pushes: Arc<Mutex<Vec<Value>>>,
    downloads: Arc<Mutex<Vec<Value>>>,
    script: Arc<Mutex<VecDeque<Value>>>,
    program: Arc<Vec<u8>>,
}

impl TestServer {
    fn new(script: Vec<Value>, program: Vec<u8>) -> Self {
        Self {
            pushes: Arc::new(Mutex::new(Vec::new())),
            downloads: Arc::new(Mutex::new(Vec::new())),
            script: Arc::new(Mutex::new(script.into())),
            program: Arc::new(program),
        }
    }

    async fn start(&self) -> SocketAddr {
        let app = Router::new()
            .route("/rest/pushcmd", post(push_handler))
            .route("/rest/download", post(download_handler))
            .with_state(self.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

async fn push_handler(State(server): State<TestServer>, Json(body): Json<Value>) -> Response {
    server.pushes.lock().push(body);
    let next = server
        .script
        .lock()
        .pop_front()
        .unwrap_or_else(|| json!({"cmd": "DISCONNECT"}));

    if let Some(status) = next.get("__status").and_then(Value::as_u64) {
        return StatusCode::from_u16(status as u16).unwrap().into_response();
    }
    if let Some(ms) = next.get("__sleep").and_then(Value::as_u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        return Json(json!({"cmd": "REPEAT"})).into_response();
    }
    Json(next).into_response()
}

async fn download_handler(State(server): State<TestServer>, Json(body): Json<Value>) -> Response {
    server.downloads.lock().push(body);
    ([("Filename", "prog.bin")], server.program.as_ref().clone()).into_response()
}

/// Device link scripted for presence, recording every action.
struct ScriptedLink {
    role: DeviceRole,
    present_script: Mutex<VecDeque<bool>>,
    present_default: AtomicBool,
    runs: Mutex<Vec<BinaryArtifact>>,
    aborts: AtomicUsize,
}

impl ScriptedLink {
    fn always_present(role: DeviceRole) -> Self {
        Self::with_presence(role, Vec::new(), true)
    }

    fn with_presence(role: DeviceRole, script: Vec<bool>, default: bool) -> Self {
        Self {
            role,
            present_script: Mutex::new(script.into()),
            present_default: AtomicBool::new(default),
            runs: Mutex::new(Vec::new()),
            aborts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DeviceLink for ScriptedLink {
    fn role(&self) -> DeviceRole {
        self.role
    }

    async fn is_present(&self) -> bool {
        if let Some(value) = self.present_script.lock().pop_front() {
            return value;
        }
        self.present_default.load(Ordering::SeqCst)
    }

    fn telemetry(&self) -> DeviceTelemetry {
        DeviceTelemetry {
            role: self.role,
            firmware_version: "1.9.1".to_string(),
            battery: "7.4".to_string(),
            connection: "usb".to_string(),
        }
    }

    async fn run_program(&self, artifact: &BinaryArtifact) -> Result<()> {
        self.runs.lock().push(artifact.clone());
        Ok(())
    }

    async fn flash_firmware(&self, _artifact: &BinaryArtifact) -> Result<()> {
        Ok(())
    }

    async fn abort_action(&self) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Collect every transition buffered on the feed so far, in order.
fn drain_states(rx: &mut StateReceiver) -> Vec<ConnectionState> {
    let mut states = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(update) => states.push(update.state),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    states
}

async fn run_to_completion(connector: &Connector) {
    tokio::time::timeout(Duration::from_secs(10), connector.run_session())
        .await
        .expect("session must terminate");
}

fn connector_for(addr: SocketAddr, link: Arc<ScriptedLink>) -> Arc<Connector> {
    let transport = Arc::new(TransportClient::new(&format!("http://{}", addr)).unwrap());
    Arc::new(Connector::new(link, transport))
}

#[tokio::test]
async fn test_scenario_register_repeat_download_repeat() {
    let program: Vec<u8> = (0..128).map(|i| i as u8).collect();
    let server = TestServer::new(
        vec![
            json!({"cmd": "REPEAT", "token": "abc"}),
            json!({"cmd": "REPEAT"}),
            json!({"cmd": "REPEAT"}),
            json!({"cmd": "REPEAT"}),
            json!({"cmd": "DOWNLOAD", "filename": "prog.bin"}),
            json!({"cmd": "REPEAT"}),
            json!({"cmd": "DISCONNECT"}),
        ],
        program.clone(),
    );
    let addr = server.start().await;

    let link = Arc::new(ScriptedLink::always_present(DeviceRole::Primary));
    let connector = connector_for(addr, link.clone());
    let mut events = connector.subscribe();

    run_to_completion(&connector).await;
    let states = drain_states(&mut events);

    // The registration push and every poll afterwards, in order.
    let pushes = server.pushes.lock();
    assert_eq!(pushes.len(), 7);
    assert_eq!(pushes[0]["cmd"], "REGISTER");
    assert_eq!(pushes[0]["token"], "");
    for push in &pushes[1..] {
        assert_eq!(push["cmd"], "PUSH");
        // The token from REGISTER rides along unchanged on every poll.
        assert_eq!(push["token"], "abc");
    }

    // The download request carries the same session token.
    let downloads = server.downloads.lock();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0]["token"], "abc");

    // The device saw the exact artifact the server sent.
    let runs = link.runs.lock();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, "prog.bin");
    assert_eq!(&runs[0].data[..], &program[..]);

    assert!(states.contains(&ConnectionState::Executing));
    assert!(!states.contains(&ConnectionState::Error));
    assert_eq!(*states.last().unwrap(), ConnectionState::Discovering);

    // Token cleared once the session is over.
    assert_eq!(connector.session_token(), "");
}

#[tokio::test]
async fn test_scenario_register_rejected_by_status() {
    let server = TestServer::new(vec![json!({"__status": 500})], Vec::new());
    let addr = server.start().await;

    let connector = connector_for(addr, Arc::new(ScriptedLink::always_present(DeviceRole::Primary)));
    let mut events = connector.subscribe();

    run_to_completion(&connector).await;
    let states = drain_states(&mut events);

    assert_eq!(server.pushes.lock().len(), 1);
    assert_eq!(connector.session_token(), "");

    assert!(states.contains(&ConnectionState::Error));
    assert!(states.contains(&ConnectionState::Disconnecting));
    assert_eq!(*states.last().unwrap(), ConnectionState::Discovering);
}

#[tokio::test]
async fn test_register_without_token_is_rejected() {
    let server = TestServer::new(vec![json!({"cmd": "REPEAT"})], Vec::new());
    let addr = server.start().await;

    let connector = connector_for(addr, Arc::new(ScriptedLink::always_present(DeviceRole::Primary)));
    let mut events = connector.subscribe();

    run_to_completion(&connector).await;
    let states = drain_states(&mut events);

    assert_eq!(server.pushes.lock().len(), 1);
    assert!(states.contains(&ConnectionState::Error));
    assert_eq!(connector.session_token(), "");
}

#[tokio::test]
async fn test_scenario_server_disconnect_clears_token() {
    let server = TestServer::new(
        vec![
            json!({"cmd": "REPEAT", "token": "abc"}),
            json!({"cmd": "DISCONNECT"}),
        ],
        Vec::new(),
    );
    let addr = server.start().await;

    let connector = connector_for(addr, Arc::new(ScriptedLink::always_present(DeviceRole::Primary)));
    let mut events = connector.subscribe();

    run_to_completion(&connector).await;
    let states = drain_states(&mut events);

    assert_eq!(server.pushes.lock().len(), 2);
    assert_eq!(connector.session_token(), "");

    assert!(!states.contains(&ConnectionState::Error));
    assert_eq!(*states.last().unwrap(), ConnectionState::Discovering);
}

#[tokio::test]
async fn test_abort_unblocks_pending_poll() {
    let server = TestServer::new(
        vec![
            json!({"cmd": "REPEAT", "token": "abc"}),
            json!({"__sleep": 8000}),
        ],
        Vec::new(),
    );
    let addr = server.start().await;

    let connector = connector_for(addr, Arc::new(ScriptedLink::always_present(DeviceRole::Primary)));
    let mut events = connector.subscribe();

    let worker = connector.clone();
    let session = tokio::spawn(async move { worker.run_session().await });

    // Let the worker get blocked in the long-poll, then pull the plug.
    tokio::time::sleep(Duration::from_millis(300)).await;
    connector.abort();

    tokio::time::timeout(Duration::from_secs(3), session)
        .await
        .expect("abort must unblock the session promptly")
        .unwrap();
    let states = drain_states(&mut events);

    // A user abort is a normal disconnect, never an error.
    assert!(!states.contains(&ConnectionState::Error));
    assert!(states.contains(&ConnectionState::Disconnecting));
    assert_eq!(*states.last().unwrap(), ConnectionState::Discovering);
    assert_eq!(connector.session_token(), "");
}

#[tokio::test]
async fn test_lost_presence_stops_polling() {
    let server = TestServer::new(
        vec![
            json!({"cmd": "REPEAT", "token": "abc"}),
            json!({"cmd": "REPEAT"}),
        ],
        Vec::new(),
    );
    let addr = server.start().await;

    // Present for the first poll round, gone before the second.
    let link = Arc::new(ScriptedLink::with_presence(
        DeviceRole::Primary,
        vec![true, false],
        false,
    ));
    let connector = connector_for(addr, link);
    let mut events = connector.subscribe();

    run_to_completion(&connector).await;
    let states = drain_states(&mut events);

    // One REGISTER, one PUSH, and nothing more once the device vanished.
    assert_eq!(server.pushes.lock().len(), 2);

    assert!(!states.contains(&ConnectionState::Error));
    assert_eq!(*states.last().unwrap(), ConnectionState::Discovering);
}
