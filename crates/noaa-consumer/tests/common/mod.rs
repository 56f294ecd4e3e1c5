// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared harnesses for the integration suites: an in-process traffic
//! controller, a CONNECT proxy, and envelope fixtures.

#![allow(dead_code)]

pub mod proxy;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dropsonde_events::{ContainerMetric, Envelope, EventType, LogMessage, MessageType, ValueMetric};
use noaa_consumer::DebugPrinter;
use prost::Message;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

pub const APP_ID: &str = "app-guid";
pub const TOKEN: &str = "bearer secret-token";
pub const UNAUTHORIZED_BODY: &str = "{\"error\":\"invalid_token\"}";
pub const BOUNDARY: &str = "d661b2c1426a3abcf1c0524d7fdbc774c42a767bdd6702141702d16047bc";

/// How an HTTP endpoint of the fake controller answers.
#[derive(Debug, Clone)]
pub enum HttpReply {
    /// 200 with a multipart body, one part per frame.
    Multipart(Vec<Vec<u8>>),
    /// Any other status with a plain body.
    Status(u16, String),
}

impl Default for HttpReply {
    fn default() -> Self {
        HttpReply::Multipart(Vec::new())
    }
}

/// Request observed by the fake controller.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HashMap<String, String>,
}

/// Scripted behaviour and observations of the fake controller.
#[derive(Default)]
struct ControllerState {
    /// Frames written to every `/apps/:id/stream` and `/firehose/:id` socket.
    stream_frames: Vec<Vec<u8>>,
    /// Frames written to `/dump/` sockets.
    dump_frames: Vec<Vec<u8>>,
    /// When set, stream sockets stay open after their frames until the client leaves.
    hold_open: bool,
    /// Ping payload sent before any frame; the client must answer with a pong.
    server_ping: Option<Vec<u8>>,
    /// Rejects websocket upgrades with this status and body.
    reject_upgrades: Option<(u16, String)>,
    recent_reply: HttpReply,
    container_reply: HttpReply,
    dump_hits: usize,
    recent_hits: usize,
    pings_received: usize,
    pongs_received: Vec<Vec<u8>>,
    client_closed: bool,
    requests: Vec<RecordedRequest>,
}

type SharedState = Arc<Mutex<ControllerState>>;

/// In-process traffic controller speaking the stream, firehose, dump and
/// recent-log protocols.
pub struct TrafficController {
    addr: SocketAddr,
    state: SharedState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TrafficController {
    /// Spawns the controller on an ephemeral port.
    pub async fn start() -> Self {
        let state: SharedState = Arc::new(Mutex::new(ControllerState::default()));
        let router = Router::new()
            .route("/apps/:id/stream", get(handle_stream))
            .route("/firehose/:id", get(handle_stream))
            .route("/dump/", get(handle_dump))
            .route("/apps/:id/recentlogs", get(handle_recent_logs))
            .route("/apps/:id/containermetrics", get(handle_container_metrics))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("controller bind");
        let addr = listener.local_addr().expect("controller address");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("controller run");
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Websocket base address to hand to the consumer.
    pub fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn set_stream_frames(&self, frames: Vec<Vec<u8>>) {
        self.state.lock().await.stream_frames = frames;
    }

    pub async fn set_dump_frames(&self, frames: Vec<Vec<u8>>) {
        self.state.lock().await.dump_frames = frames;
    }

    pub async fn hold_streams_open(&self) {
        self.state.lock().await.hold_open = true;
    }

    pub async fn ping_before_frames(&self, payload: Vec<u8>) {
        self.state.lock().await.server_ping = Some(payload);
    }

    pub async fn reject_upgrades(&self, status: u16, body: &str) {
        self.state.lock().await.reject_upgrades = Some((status, body.to_string()));
    }

    pub async fn set_recent_reply(&self, reply: HttpReply) {
        self.state.lock().await.recent_reply = reply;
    }

    pub async fn set_container_reply(&self, reply: HttpReply) {
        self.state.lock().await.container_reply = reply;
    }

    pub async fn dump_hits(&self) -> usize {
        self.state.lock().await.dump_hits
    }

    pub async fn recent_hits(&self) -> usize {
        self.state.lock().await.recent_hits
    }

    pub async fn pings_received(&self) -> usize {
        self.state.lock().await.pings_received
    }

    pub async fn pongs_received(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.pongs_received.clone()
    }

    pub async fn client_closed(&self) -> bool {
        self.state.lock().await.client_closed
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }
}

impl Drop for TrafficController {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn record(state: &SharedState, uri: &Uri, headers: &HeaderMap) {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    state.lock().await.requests.push(RecordedRequest {
        path,
        headers: headers_to_map(headers),
    });
}

async fn handle_stream(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    record(&state, &uri, &headers).await;
    let rejection = state.lock().await.reject_upgrades.clone();
    if let Some((status, body)) = rejection {
        return reject(status, body);
    }
    ws.on_upgrade(move |socket| serve_stream(socket, state))
}

async fn serve_stream(mut socket: WebSocket, state: SharedState) {
    let (frames, hold_open, server_ping) = {
        let guard = state.lock().await;
        (
            guard.stream_frames.clone(),
            guard.hold_open,
            guard.server_ping.clone(),
        )
    };

    if let Some(payload) = server_ping {
        if socket.send(WsMessage::Ping(payload)).await.is_err() {
            return;
        }
        while let Some(Ok(message)) = socket.recv().await {
            if let WsMessage::Pong(payload) = message {
                state.lock().await.pongs_received.push(payload);
                break;
            }
        }
    }

    for frame in frames {
        if socket.send(WsMessage::Binary(frame)).await.is_err() {
            return;
        }
    }

    if hold_open {
        while let Some(message) = socket.recv().await {
            match message {
                Ok(WsMessage::Ping(_)) => state.lock().await.pings_received += 1,
                Ok(WsMessage::Pong(payload)) => state.lock().await.pongs_received.push(payload),
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        state.lock().await.client_closed = true;
    } else {
        let _ = socket.send(WsMessage::Close(None)).await;
    }
}

async fn handle_dump(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if query.get("app").map_or(true, |app| app.is_empty()) {
        return reject(400, "missing app".to_string());
    }
    record(&state, &uri, &headers).await;
    let (rejection, frames) = {
        let mut guard = state.lock().await;
        guard.dump_hits += 1;
        (guard.reject_upgrades.clone(), guard.dump_frames.clone())
    };
    if let Some((status, body)) = rejection {
        return reject(status, body);
    }
    ws.on_upgrade(move |mut socket| async move {
        for frame in frames {
            if socket.send(WsMessage::Binary(frame)).await.is_err() {
                return;
            }
        }
        let _ = socket.send(WsMessage::Close(None)).await;
    })
}

async fn handle_recent_logs(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, &uri, &headers).await;
    let reply = {
        let mut guard = state.lock().await;
        guard.recent_hits += 1;
        guard.recent_reply.clone()
    };
    http_reply(reply)
}

async fn handle_container_metrics(
    State(state): State<SharedState>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    record(&state, &uri, &headers).await;
    let reply = state.lock().await.container_reply.clone();
    http_reply(reply)
}

fn reject(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).expect("valid status");
    (status, body).into_response()
}

fn http_reply(reply: HttpReply) -> Response {
    match reply {
        HttpReply::Multipart(frames) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                format!("multipart/x-protobuf; boundary={BOUNDARY}"),
            )],
            multipart_body(&frames),
        )
            .into_response(),
        HttpReply::Status(status, body) => reject(status, body),
    }
}

/// Encodes frames as a multipart body using [`BOUNDARY`].
pub fn multipart_body(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for frame in frames {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(frame);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Converts headers into a plain string map for assertions.
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value_str) = value.to_str() {
            map.insert(name.as_str().to_ascii_lowercase(), value_str.to_string());
        }
    }
    map
}

/// Waits for an asynchronous condition to succeed within the supplied timeout.
pub async fn wait_for_condition<T, F, Fut>(timeout: Duration, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if Instant::now() >= deadline {
            panic!("condition not satisfied within {:?}", timeout);
        }
        sleep(Duration::from_millis(20)).await;
    }
}

/// Frame that does not decode as an envelope.
pub fn garbage_frame() -> Vec<u8> {
    vec![0xff, 0xff, 0xff]
}

pub fn log_envelope(text: &str, timestamp: i64) -> Envelope {
    Envelope {
        origin: "doppler".to_string(),
        event_type: EventType::LogMessage as i32,
        timestamp: Some(timestamp),
        log_message: Some(LogMessage {
            message: text.as_bytes().to_vec(),
            message_type: MessageType::Out as i32,
            timestamp,
            app_id: Some(APP_ID.to_string()),
            source_type: Some("APP/PROC/WEB".to_string()),
            source_instance: Some("0".to_string()),
        }),
        ..Default::default()
    }
}

pub fn log_frame(text: &str, timestamp: i64) -> Vec<u8> {
    log_envelope(text, timestamp).encode_to_vec()
}

pub fn value_metric_frame(name: &str) -> Vec<u8> {
    Envelope {
        origin: "gorouter".to_string(),
        event_type: EventType::ValueMetric as i32,
        value_metric: Some(ValueMetric {
            name: name.to_string(),
            value: 42.0,
            unit: "ms".to_string(),
        }),
        ..Default::default()
    }
    .encode_to_vec()
}

pub fn container_metric_frame(instance_index: i32) -> Vec<u8> {
    Envelope {
        origin: "rep".to_string(),
        event_type: EventType::ContainerMetric as i32,
        container_metric: Some(ContainerMetric {
            application_id: APP_ID.to_string(),
            instance_index,
            cpu_percentage: 12.5,
            memory_bytes: 64 << 20,
            disk_bytes: 128 << 20,
            ..Default::default()
        }),
        ..Default::default()
    }
    .encode_to_vec()
}

/// Extracts log texts from delivered envelopes.
pub fn log_texts(envelopes: &[Envelope]) -> Vec<String> {
    envelopes
        .iter()
        .filter_map(|envelope| envelope.log_message.as_ref())
        .map(|log| log.text().into_owned())
        .collect()
}

/// Debug printer recording every dump for later inspection.
#[derive(Clone, Default)]
pub struct RecordingPrinter {
    entries: Arc<std::sync::Mutex<Vec<(String, String)>>>,
}

impl RecordingPrinter {
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().expect("printer lock").clone()
    }
}

impl DebugPrinter for RecordingPrinter {
    fn print(&self, title: &str, dump: &str) {
        self.entries
            .lock()
            .expect("printer lock")
            .push((title.to_string(), dump.to_string()));
    }
}
