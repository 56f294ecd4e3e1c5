// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Proxy resolution and HTTP CONNECT tunnelling for websocket dials.
//!
//! Websocket upgrades are dialed by hand so they can be tunnelled through an
//! HTTP proxy: the target is resolved as an `http://host:port` URL, and when a
//! proxy applies the TCP stream is opened to the proxy and upgraded with a
//! `CONNECT` request before the TLS and websocket handshakes run on top.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use base64::Engine;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::http1::{self, ResponseHead};

type ResolveFn = dyn Fn(&Url) -> Result<Option<Url>, String> + Send + Sync;

/// Decides which proxy (if any) should carry a connection to a target URL.
#[derive(Clone)]
pub struct ProxyResolver {
    resolve: Arc<ResolveFn>,
}

impl ProxyResolver {
    /// Wraps a custom resolution function.
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn(&Url) -> Result<Option<Url>, String> + Send + Sync + 'static,
    {
        Self {
            resolve: Arc::new(resolve),
        }
    }

    /// Resolver that always routes through `proxy`.
    pub fn fixed(proxy: Url) -> Self {
        Self::new(move |_| Ok(Some(proxy.clone())))
    }

    /// Resolver driven by `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY` (or their
    /// lower-case spellings), captured once at construction.
    pub fn from_environment() -> Self {
        Self::from_settings(EnvProxySettings::from_env_iter(env::vars()))
    }

    /// Resolver backed by already captured proxy settings.
    pub fn from_settings(settings: EnvProxySettings) -> Self {
        Self::new(move |target| settings.proxy_for(target))
    }

    /// Returns the proxy for `target`, or `None` to connect directly.
    pub fn resolve(&self, target: &Url) -> Result<Option<Url>, String> {
        (self.resolve)(target)
    }
}

impl fmt::Debug for ProxyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyResolver").finish_non_exhaustive()
    }
}

/// Proxy settings captured from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvProxySettings {
    /// Proxy used for `http` targets.
    pub http_proxy: Option<String>,
    /// Proxy used for `https` targets.
    pub https_proxy: Option<String>,
    /// Comma separated hosts or domain suffixes that bypass the proxy.
    pub no_proxy: Option<String>,
}

impl EnvProxySettings {
    /// Builds settings from key/value pairs; upper-case names win over lower-case ones.
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let lookup = |upper: &str, lower: &str| {
            map.get(upper)
                .or_else(|| map.get(lower))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            http_proxy: lookup("HTTP_PROXY", "http_proxy"),
            https_proxy: lookup("HTTPS_PROXY", "https_proxy"),
            no_proxy: lookup("NO_PROXY", "no_proxy"),
        }
    }

    /// Picks the proxy for `target` following the usual environment conventions.
    pub fn proxy_for(&self, target: &Url) -> Result<Option<Url>, String> {
        let raw = match target.scheme() {
            "https" | "wss" => self.https_proxy.as_deref(),
            _ => self.http_proxy.as_deref(),
        };
        let Some(raw) = raw else {
            return Ok(None);
        };
        let Some(host) = target.host_str() else {
            return Ok(None);
        };
        if is_local_host(host) || self.bypasses(host) {
            return Ok(None);
        }
        parse_proxy_url(raw).map(Some)
    }

    fn bypasses(&self, host: &str) -> bool {
        let Some(no_proxy) = self.no_proxy.as_deref() else {
            return false;
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        no_proxy
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .any(|entry| {
                if entry == "*" {
                    return true;
                }
                // Entries may carry a port; only the host part takes part in matching.
                let entry = entry.rsplit_once(':').map_or(entry, |(host, port)| {
                    if port.chars().all(|c| c.is_ascii_digit()) {
                        host
                    } else {
                        entry
                    }
                });
                let suffix = entry.trim_start_matches('.');
                host == suffix || host.ends_with(&format!(".{suffix}"))
            })
    }
}

/// Accepts `host:port` shorthand by assuming the `http` scheme.
fn parse_proxy_url(raw: &str) -> Result<Url, String> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    Url::parse(&candidate).map_err(|err| format!("invalid proxy address {raw:?}: {err}"))
}

fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Opens a TCP stream to `host:port`, tunnelling through a proxy when one applies.
pub(crate) async fn dial(
    resolver: Option<&ProxyResolver>,
    host: &str,
    port: u16,
) -> Result<TcpStream, String> {
    let addr = format!("{host}:{port}");
    let Some(resolver) = resolver else {
        return TcpStream::connect(&addr).await.map_err(|err| err.to_string());
    };

    let target =
        Url::parse(&format!("http://{addr}")).map_err(|err| format!("invalid target {addr}: {err}"))?;
    let Some(proxy) = resolver.resolve(&target)? else {
        return TcpStream::connect(&addr).await.map_err(|err| err.to_string());
    };

    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| format!("proxy address {proxy} has no host"))?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(80);
    debug!(proxy = %format!("{proxy_host}:{proxy_port}"), target = %addr, "tunnelling websocket through proxy");

    let mut stream = TcpStream::connect(format!("{proxy_host}:{proxy_port}"))
        .await
        .map_err(|err| err.to_string())?;
    stream
        .write_all(connect_request(&addr, &proxy).as_bytes())
        .await
        .map_err(|err| err.to_string())?;
    let (head, early) = http1::read_response_head(&mut stream).await?;
    check_connect_status(&head)?;
    if !early.is_empty() {
        return Err("proxy sent data before the tunnel was established".to_string());
    }
    Ok(stream)
}

/// Builds the CONNECT request, adding basic credentials embedded in the proxy URL.
fn connect_request(addr: &str, proxy: &Url) -> String {
    let mut request = format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n");
    if !proxy.username().is_empty() {
        let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or(""));
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Accepts a 200 response; otherwise returns the proxy's reason phrase.
fn check_connect_status(head: &ResponseHead) -> Result<(), String> {
    if head.status == 200 {
        return Ok(());
    }
    let reason = head.reason.trim();
    if reason.is_empty() {
        Err(format!("proxy refused CONNECT with status {}", head.status))
    } else {
        Err(reason.to_string())
    }
}
