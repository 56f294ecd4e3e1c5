// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal HTTP CONNECT proxy for tunnelling tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{copy_bidirectional, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Whether the proxy tunnels CONNECT requests or refuses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    Tunnel,
    RequireAuth,
}

pub struct FakeProxy {
    addr: SocketAddr,
    connects: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeProxy {
    pub async fn start(mode: ProxyMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("proxy bind");
        let addr = listener.local_addr().expect("proxy address");
        let connects = Arc::new(Mutex::new(Vec::new()));
        let recorded = connects.clone();

        let handle = tokio::spawn(async move {
            while let Ok((client, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let _ = serve_client(client, mode, recorded).await;
                });
            }
        });

        Self {
            addr,
            connects,
            handle,
        }
    }

    /// Proxy URL to hand to a resolver.
    pub fn url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}", self.addr)).expect("proxy url")
    }

    /// Raw CONNECT request heads received so far.
    pub async fn connect_requests(&self) -> Vec<String> {
        self.connects.lock().await.clone()
    }
}

impl Drop for FakeProxy {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_client(
    mut client: TcpStream,
    mode: ProxyMode,
    recorded: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if client.read(&mut byte).await? == 0 {
            return Ok(());
        }
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head).into_owned();
    recorded.lock().await.push(head.clone());

    match mode {
        ProxyMode::RequireAuth => {
            client
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nContent-Length: 0\r\n\r\n")
                .await?;
            Ok(())
        }
        ProxyMode::Tunnel => {
            let target = head
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or_default()
                .to_string();
            let mut upstream = TcpStream::connect(&target).await?;
            client
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await?;
            copy_bidirectional(&mut client, &mut upstream).await?;
            Ok(())
        }
    }
}
