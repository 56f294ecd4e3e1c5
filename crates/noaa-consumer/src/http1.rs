// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP/1.x response heads for proxy tunnels and websocket upgrades.
//!
//! Both exchanges run on a raw stream that is handed over to another protocol
//! afterwards, so the head is parsed here and any bytes read past it are
//! returned to the caller.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest response head accepted.
const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Largest body kept from a rejected upgrade.
const MAX_BODY_BYTES: usize = 64 * 1024;
const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 1024;
/// Bound on waiting for the rest of a body the server announced.
const BODY_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub minor_version: u8,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl ResponseHead {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_slice())
    }

    /// Whether a comma-separated header lists `token`.
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.header(name)
            .and_then(|value| std::str::from_utf8(value).ok())
            .is_some_and(|value| {
                value
                    .split(',')
                    .any(|part| part.trim().eq_ignore_ascii_case(token))
            })
    }

    pub fn content_length(&self) -> Option<usize> {
        std::str::from_utf8(self.header("content-length")?)
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

/// Reads until a complete response head has arrived.
///
/// Returns the head together with the bytes that followed it in the last read.
pub(crate) async fn read_response_head<S>(stream: &mut S) -> Result<(ResponseHead, Vec<u8>), String>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("connection closed before the response head was complete".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&buffer) {
            Ok(httparse::Status::Complete(head_len)) => {
                let head = ResponseHead {
                    minor_version: response.version.unwrap_or(1),
                    status: response.code.unwrap_or_default(),
                    reason: response.reason.unwrap_or_default().to_string(),
                    headers: response
                        .headers
                        .iter()
                        .map(|header| (header.name.to_string(), header.value.to_vec()))
                        .collect(),
                };
                return Ok((head, buffer[head_len..].to_vec()));
            }
            Ok(httparse::Status::Partial) if buffer.len() < MAX_HEAD_BYTES => {}
            Ok(httparse::Status::Partial) => {
                return Err("response head too large".to_string());
            }
            Err(err) => return Err(format!("malformed response head: {err}")),
        }
    }
}

/// Completes `body` (the bytes already read past the head) from the stream.
///
/// A `Content-Length` body is read up to its announced length; without one
/// the body runs until EOF. Either way at most 64 KiB are kept. On error or
/// timeout `body` keeps whatever arrived before it.
pub(crate) async fn read_body<S>(
    stream: &mut S,
    head: &ResponseHead,
    body: &mut Vec<u8>,
) -> Result<(), String>
where
    S: AsyncRead + Unpin,
{
    let limit = head
        .content_length()
        .unwrap_or(MAX_BODY_BYTES)
        .min(MAX_BODY_BYTES);
    body.truncate(limit);
    let remaining = (limit - body.len()) as u64;

    let mut limited = (&mut *stream).take(remaining);
    match tokio::time::timeout(BODY_READ_TIMEOUT, limited.read_to_end(body)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("timed out reading response body".to_string()),
    }
}
