// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consumer configuration and environment-driven helpers.
//!
//! [`ConsumerConfig`] is the immutable configuration shared by every
//! operation of one consumer. [`ConsumerEnv`] derives the same settings from
//! `NOAA_*` environment variables so embedders (and the `noaa-tail` binary)
//! can bootstrap a consumer without writing code.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::debug::{DebugPrinter, NullDebugPrinter, TracingDebugPrinter};
use crate::error::ConsumerError;
use crate::proxy::{EnvProxySettings, ProxyResolver};

/// Interval between client pings on an open stream.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(25);
/// Output channel capacity; one slot keeps the handoff close to a rendezvous.
pub const DEFAULT_STREAM_BUFFER: usize = 1;
/// Largest websocket message accepted from the traffic controller.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;

/// Environment variable holding the traffic controller address.
const ENV_TRAFFIC_CONTROLLER_URL: &str = "NOAA_TRAFFIC_CONTROLLER_URL";
/// Environment variable holding the authorization token sent verbatim.
const ENV_AUTH_TOKEN: &str = "NOAA_AUTH_TOKEN";
const ENV_SKIP_SSL_VALIDATION: &str = "NOAA_SKIP_SSL_VALIDATION";
const ENV_KEEP_ALIVE_SECONDS: &str = "NOAA_KEEP_ALIVE_SECONDS";
const ENV_STREAM_BUFFER: &str = "NOAA_STREAM_BUFFER";
/// Environment variable routing handshake dumps to `tracing`.
const ENV_DEBUG: &str = "NOAA_DEBUG";
const ENV_LOG_LEVEL: &str = "NOAA_LOG_LEVEL";
const ENV_TAIL_MODE: &str = "NOAA_TAIL_MODE";
const ENV_APP_ID: &str = "NOAA_APP_ID";
const ENV_SUBSCRIPTION_ID: &str = "NOAA_SUBSCRIPTION_ID";

const DEFAULT_LOG_LEVEL: &str = "info";

/// Callback invoked once after each successful connection establishment.
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// TLS settings shared by websocket dials and recent-log HTTP requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Accept any server certificate. Intended for test environments only.
    pub skip_verify: bool,
}

/// Immutable configuration shared by all operations of one consumer.
#[derive(Clone)]
pub struct ConsumerConfig {
    /// Traffic controller base address (`ws://` or `wss://`), without trailing slash.
    pub endpoint: String,
    pub tls: TlsOptions,
    /// Proxy used for websocket dials and HTTP fetches; `None` always connects directly.
    pub proxy: Option<ProxyResolver>,
    pub on_connect: Option<ConnectCallback>,
    pub debug_printer: Arc<dyn DebugPrinter>,
    /// Interval between client pings on open streams.
    pub keep_alive: Duration,
    /// Capacity of each stream's output channel.
    pub stream_buffer: usize,
    pub max_message_size: usize,
}

impl ConsumerConfig {
    /// Creates a configuration with defaults: environment-derived proxy,
    /// certificate verification on, no-op debug printer, 25 s keep-alive.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            tls: TlsOptions::default(),
            proxy: Some(ProxyResolver::from_environment()),
            on_connect: None,
            debug_printer: Arc::new(NullDebugPrinter),
            keep_alive: DEFAULT_KEEP_ALIVE,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_skip_verify(mut self, skip_verify: bool) -> Self {
        self.tls.skip_verify = skip_verify;
        self
    }

    /// Replaces the proxy resolver; `None` disables proxying entirely.
    pub fn with_proxy(mut self, proxy: Option<ProxyResolver>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    pub fn with_debug_printer<P>(mut self, printer: P) -> Self
    where
        P: DebugPrinter + 'static,
    {
        self.debug_printer = Arc::new(printer);
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Checks the endpoint is a `ws`/`wss` URL with a host and the numeric settings are positive.
    pub fn validate(&self) -> Result<(), ConsumerError> {
        let url = self.endpoint_url()?;
        if url.host_str().is_none() {
            return Err(ConsumerError::InvalidEndpoint(self.endpoint.clone()));
        }
        if self.keep_alive.is_zero() {
            return Err(ConsumerError::InvalidConfig(
                "keep-alive interval must be greater than zero".to_string(),
            ));
        }
        if self.stream_buffer == 0 {
            return Err(ConsumerError::InvalidConfig(
                "stream buffer must hold at least one envelope".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConsumerError::InvalidConfig(
                "maximum message size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses the endpoint, accepting only websocket schemes.
    pub(crate) fn endpoint_url(&self) -> Result<Url, ConsumerError> {
        let url = Url::parse(&self.endpoint)
            .map_err(|_| ConsumerError::InvalidEndpoint(self.endpoint.clone()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            _ => Err(ConsumerError::InvalidEndpoint(self.endpoint.clone())),
        }
    }
}

impl fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls)
            .field("proxy", &self.proxy.is_some())
            .field("on_connect", &self.on_connect.is_some())
            .field("keep_alive", &self.keep_alive)
            .field("stream_buffer", &self.stream_buffer)
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}

/// Operation run by an environment-configured consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TailMode {
    /// Log messages for one app.
    #[default]
    Tail,
    /// Every event for one app.
    Stream,
    /// Every event for a firehose subscription.
    Firehose,
    Recent,
    ContainerMetrics,
}

impl TailMode {
    /// Whether the mode targets a subscription instead of an app.
    pub fn needs_subscription(self) -> bool {
        matches!(self, Self::Firehose)
    }
}

impl FromStr for TailMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tail" => Ok(Self::Tail),
            "stream" => Ok(Self::Stream),
            "firehose" => Ok(Self::Firehose),
            "recent" => Ok(Self::Recent),
            "container-metrics" | "container_metrics" => Ok(Self::ContainerMetrics),
            other => Err(format!("unknown tail mode {other:?}")),
        }
    }
}

impl fmt::Display for TailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tail => "tail",
            Self::Stream => "stream",
            Self::Firehose => "firehose",
            Self::Recent => "recent",
            Self::ContainerMetrics => "container-metrics",
        };
        f.write_str(name)
    }
}

/// Captures environment-derived options used to bootstrap a consumer.
#[derive(Debug, Clone)]
pub struct ConsumerEnv {
    pub traffic_controller_url: Option<String>,
    /// Authorization token, sent verbatim (typically `bearer <jwt>`).
    pub auth_token: Option<String>,
    pub skip_ssl_validation: bool,
    pub keep_alive: Duration,
    pub stream_buffer: usize,
    /// When `true`, handshake dumps go to [`TracingDebugPrinter`].
    pub debug: bool,
    pub log_level: String,
    pub tail_mode: TailMode,
    pub app_id: Option<String>,
    pub subscription_id: Option<String>,
    /// Proxy variables captured alongside the consumer settings.
    pub proxy: EnvProxySettings,
    problems: Vec<String>,
}

impl ConsumerEnv {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    ///
    /// Values that cannot be parsed fall back to their defaults and are
    /// reported by [`ConsumerEnv::validate`].
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
        let mut problems = Vec::new();

        let traffic_controller_url = map
            .get(ENV_TRAFFIC_CONTROLLER_URL)
            .and_then(|value| sanitize_non_empty(value));
        let auth_token = map
            .get(ENV_AUTH_TOKEN)
            .and_then(|value| sanitize_non_empty(value));
        let skip_ssl_validation =
            parse_bool(map.get(ENV_SKIP_SSL_VALIDATION).map(String::as_str), false);
        let keep_alive = match parse_positive(&map, ENV_KEEP_ALIVE_SECONDS) {
            Ok(Some(seconds)) => Duration::from_secs(seconds),
            Ok(None) => DEFAULT_KEEP_ALIVE,
            Err(problem) => {
                problems.push(problem);
                DEFAULT_KEEP_ALIVE
            }
        };
        let stream_buffer = match parse_positive(&map, ENV_STREAM_BUFFER) {
            Ok(Some(capacity)) => usize::try_from(capacity).unwrap_or(usize::MAX),
            Ok(None) => DEFAULT_STREAM_BUFFER,
            Err(problem) => {
                problems.push(problem);
                DEFAULT_STREAM_BUFFER
            }
        };
        let debug = parse_bool(map.get(ENV_DEBUG).map(String::as_str), false);
        let log_level = map
            .get(ENV_LOG_LEVEL)
            .and_then(|value| sanitize_non_empty(value))
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let tail_mode = match map
            .get(ENV_TAIL_MODE)
            .and_then(|value| sanitize_non_empty(value))
        {
            Some(raw) => raw.parse().unwrap_or_else(|problem| {
                problems.push(format!("{ENV_TAIL_MODE}: {problem}"));
                TailMode::default()
            }),
            None => TailMode::default(),
        };
        let app_id = map
            .get(ENV_APP_ID)
            .and_then(|value| sanitize_non_empty(value));
        let subscription_id = map
            .get(ENV_SUBSCRIPTION_ID)
            .and_then(|value| sanitize_non_empty(value));
        let proxy = EnvProxySettings::from_env_iter(map.clone());

        Self {
            traffic_controller_url,
            auth_token,
            skip_ssl_validation,
            keep_alive,
            stream_buffer,
            debug,
            log_level,
            tail_mode,
            app_id,
            subscription_id,
            proxy,
            problems,
        }
    }

    /// Reports unparsable values and settings missing for the selected mode.
    pub fn validate(&self) -> Result<(), ConsumerError> {
        let mut problems = self.problems.clone();
        if self.traffic_controller_url.is_none() {
            problems.push(format!("{ENV_TRAFFIC_CONTROLLER_URL} is required"));
        }
        if self.auth_token.is_none() {
            problems.push(format!("{ENV_AUTH_TOKEN} is required"));
        }
        if self.tail_mode.needs_subscription() {
            if self.subscription_id.is_none() {
                problems.push(format!(
                    "{ENV_SUBSCRIPTION_ID} is required in {} mode",
                    self.tail_mode
                ));
            }
        } else if self.app_id.is_none() {
            problems.push(format!(
                "{ENV_APP_ID} is required in {} mode",
                self.tail_mode
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConsumerError::InvalidConfig(problems.join("; ")))
        }
    }

    /// Converts the captured settings into a validated [`ConsumerConfig`].
    pub fn to_config(&self) -> Result<ConsumerConfig, ConsumerError> {
        self.validate()?;
        let endpoint = self.traffic_controller_url.clone().unwrap_or_default();
        let mut config = ConsumerConfig::new(endpoint)
            .with_skip_verify(self.skip_ssl_validation)
            .with_proxy(Some(ProxyResolver::from_settings(self.proxy.clone())))
            .with_keep_alive(self.keep_alive)
            .with_stream_buffer(self.stream_buffer);
        if self.debug {
            config = config.with_debug_printer(TracingDebugPrinter);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses boolean values from strings, falling back to the provided default.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}

/// Parses an optional strictly positive integer variable.
fn parse_positive(map: &HashMap<String, String>, key: &str) -> Result<Option<u64>, String> {
    let Some(raw) = map.get(key).and_then(|value| sanitize_non_empty(value)) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => Err(format!("{key} must be a positive integer, got {raw:?}")),
        Ok(value) => Ok(Some(value)),
    }
}
