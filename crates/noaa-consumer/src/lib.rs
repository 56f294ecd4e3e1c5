// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming consumer for the Loggregator traffic controller.
//!
//! A [`Consumer`] opens authenticated websockets to the traffic controller and
//! turns the binary frames it receives into [`Envelope`]s delivered through an
//! [`EnvelopeStream`]. It also fetches the buffered recent logs and container
//! metrics of an application over HTTP.
//!
//! ```no_run
//! # async fn run() -> Result<(), noaa_consumer::ConsumerError> {
//! use noaa_consumer::{Consumer, ConsumerConfig};
//!
//! let consumer = Consumer::new(ConsumerConfig::new("wss://doppler.example.com:443"))?;
//! let mut logs = consumer.tailing_logs("app-guid", "bearer token").await?;
//! while let Some(envelope) = logs.recv().await {
//!     if let Some(log) = envelope.log_message {
//!         println!("{}", log.text());
//!     }
//! }
//! println!("stream ended: {:?}", logs.finish().await);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
mod connection;
pub mod consumer;
pub mod debug;
pub mod error;
mod http1;
pub mod proxy;
pub mod recent;
pub mod sort;
pub mod stream;
pub mod telemetry;
mod tls;

pub use config::{ConnectCallback, ConsumerConfig, ConsumerEnv, TailMode, TlsOptions};
pub use consumer::Consumer;
pub use debug::{DebugPrinter, NullDebugPrinter, TracingDebugPrinter};
pub use dropsonde_events::{ContainerMetric, Envelope, EventType, LogMessage};
pub use error::ConsumerError;
pub use proxy::{EnvProxySettings, ProxyResolver};
pub use recent::EnvelopeBatch;
pub use sort::{sort_by_timestamp, sort_container_metrics, sort_recent};
pub use stream::{EnvelopeStream, StreamCloser, StreamEnd};
pub use telemetry::{FrameCounters, FrameSnapshot};
