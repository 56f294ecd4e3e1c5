// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Websocket connection establishment against the traffic controller.
//!
//! The upgrade request is written and its response read here rather than
//! inside tungstenite, so a rejected handshake can be read to the end of its
//! body. Once the server switches protocols the stream is handed to
//! tungstenite for framing.

use rustls::pki_types::ServerName;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderValue, AUTHORIZATION, ORIGIN, SEC_WEBSOCKET_KEY,
};
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::config::ConsumerConfig;
use crate::debug::{request_dump, response_dump, REQUEST_TITLE, RESPONSE_TITLE};
use crate::error::ConsumerError;
use crate::http1::{self, ResponseHead};
use crate::proxy;

/// Origin presented on every upgrade request.
const ORIGIN_VALUE: &str = "http://localhost";

/// Live websocket owned by a single stream worker.
pub(crate) type TrafficSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens an authenticated websocket to `endpoint + path`.
///
/// `connector` carries the TLS settings for `wss` endpoints. The connect
/// callback runs once, after the handshake succeeded and before returning.
pub(crate) async fn establish(
    config: &ConsumerConfig,
    connector: Option<&TlsConnector>,
    path: &str,
    token: &str,
) -> Result<TrafficSocket, ConsumerError> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(ConsumerError::InvalidPath(path.to_string()));
    }
    let endpoint = config.endpoint_url()?;
    let host = endpoint
        .host_str()
        .ok_or_else(|| ConsumerError::InvalidEndpoint(config.endpoint.clone()))?
        .to_string();
    let port = endpoint
        .port_or_known_default()
        .ok_or_else(|| ConsumerError::InvalidEndpoint(config.endpoint.clone()))?;

    let url = format!("{}{}", config.endpoint, path);
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| ConsumerError::connection(err, &config.endpoint))?;
    let headers = request.headers_mut();
    headers.insert(ORIGIN, HeaderValue::from_static(ORIGIN_VALUE));
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(token).map_err(|_| ConsumerError::InvalidHeader("Authorization"))?,
    );

    config
        .debug_printer
        .print(REQUEST_TITLE, &request_dump(path, request.headers()));

    let failed = |cause: String| ConsumerError::connection(cause, &config.endpoint);

    let tcp = proxy::dial(config.proxy.as_ref(), &host, port)
        .await
        .map_err(failed)?;
    let mut stream = if endpoint.scheme() == "wss" {
        let connector = connector.ok_or_else(|| {
            ConsumerError::Tls("no TLS configuration for a wss endpoint".to_string())
        })?;
        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        let server_name = ServerName::try_from(bare_host.to_string())
            .map_err(|err| failed(err.to_string()))?;
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|err| failed(err.to_string()))?;
        MaybeTlsStream::Rustls(tls)
    } else {
        MaybeTlsStream::Plain(tcp)
    };

    stream
        .write_all(&encode_request(&request))
        .await
        .map_err(|err| failed(err.to_string()))?;
    let (head, early) = http1::read_response_head(&mut stream)
        .await
        .map_err(failed)?;
    config
        .debug_printer
        .print(RESPONSE_TITLE, &response_dump(&head));

    match head.status {
        101 => {
            check_upgrade(&head, &request).map_err(failed)?;
            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(config.max_message_size);
            ws_config.max_frame_size = Some(config.max_message_size);
            let socket =
                WebSocketStream::from_partially_read(stream, early, Role::Client, Some(ws_config))
                    .await;
            debug!(endpoint = %config.endpoint, path, "traffic controller websocket established");
            if let Some(callback) = &config.on_connect {
                callback();
            }
            Ok(socket)
        }
        401 => {
            let mut body = early;
            if let Err(err) = http1::read_body(&mut stream, &head, &mut body).await {
                debug!(error = %err, "unauthorized response body cut short");
            }
            Err(ConsumerError::Unauthorized {
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
        status => {
            let status_line = format!("{status} {}", head.reason);
            Err(failed(format!(
                "websocket: bad handshake (status {})",
                status_line.trim_end()
            )))
        }
    }
}

/// Serialises the upgrade request as an HTTP/1.1 head.
fn encode_request(request: &Request) -> Vec<u8> {
    let target = request
        .uri()
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/");
    let mut encoded = format!("GET {target} HTTP/1.1\r\n").into_bytes();
    for (name, value) in request.headers() {
        encoded.extend_from_slice(name.as_str().as_bytes());
        encoded.extend_from_slice(b": ");
        encoded.extend_from_slice(value.as_bytes());
        encoded.extend_from_slice(b"\r\n");
    }
    encoded.extend_from_slice(b"\r\n");
    encoded
}

/// Verifies a 101 response actually accepted our websocket key.
fn check_upgrade(head: &ResponseHead, request: &Request) -> Result<(), String> {
    if !head.header_has_token("upgrade", "websocket") {
        return Err("websocket: bad handshake (missing upgrade header)".to_string());
    }
    if !head.header_has_token("connection", "upgrade") {
        return Err("websocket: bad handshake (missing connection header)".to_string());
    }
    let key = request
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .map(|key| key.as_bytes())
        .unwrap_or_default();
    let expected = derive_accept_key(key);
    if head.header("sec-websocket-accept") != Some(expected.as_bytes()) {
        return Err("websocket: bad handshake (invalid accept key)".to_string());
    }
    Ok(())
}
