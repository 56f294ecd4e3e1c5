// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Consumer facade tying configuration, transports and workers together.

use std::fmt;
use std::sync::Arc;

use dropsonde_events::ContainerMetric;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::ConsumerConfig;
use crate::connection::establish;
use crate::error::ConsumerError;
use crate::recent::{fetch_container_metrics, fetch_envelopes, EnvelopeBatch, FetchOutcome};
use crate::stream::EnvelopeStream;
use crate::telemetry::{FrameCounters, FrameSnapshot};
use crate::tls::{client_config, create_reqwest_client_builder};

/// Client for one traffic controller.
///
/// Every stream call opens its own websocket and returns its own
/// [`EnvelopeStream`], so calls may run concurrently on one consumer.
#[derive(Clone)]
pub struct Consumer {
    config: Arc<ConsumerConfig>,
    http: reqwest::Client,
    connector: Option<TlsConnector>,
    counters: Arc<FrameCounters>,
}

impl Consumer {
    /// Validates the configuration and prepares the HTTP and TLS clients.
    ///
    /// Secure endpoints get one rustls configuration shared by the websocket
    /// connector and the HTTP client.
    pub fn new(config: ConsumerConfig) -> Result<Self, ConsumerError> {
        config.validate()?;

        let tls = if config.endpoint_url()?.scheme() == "wss" {
            Some(Arc::new(client_config(config.tls)?))
        } else {
            None
        };

        let builder = create_reqwest_client_builder(tls.as_deref());
        let builder = match config.proxy.clone() {
            Some(resolver) => builder.proxy(reqwest::Proxy::custom(move |url| {
                match resolver.resolve(url) {
                    Ok(proxy) => proxy,
                    Err(err) => {
                        warn!(url = %url, error = %err, "proxy resolution failed, connecting directly");
                        None
                    }
                }
            })),
            None => builder.no_proxy(),
        };
        let http = builder
            .build()
            .map_err(|err| ConsumerError::Tls(err.to_string()))?;

        let connector = tls.map(TlsConnector::from);

        Ok(Self {
            config: Arc::new(config),
            http,
            connector,
            counters: Arc::new(FrameCounters::default()),
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Snapshot of the frame counters shared by all calls on this consumer.
    pub fn counters(&self) -> FrameSnapshot {
        self.counters.snapshot()
    }

    /// Streams every event for an application.
    pub async fn stream(&self, app_id: &str, token: &str) -> Result<EnvelopeStream, ConsumerError> {
        self.open(&format!("/apps/{app_id}/stream"), token).await
    }

    /// Streams only the log messages of an application.
    pub async fn tailing_logs(
        &self,
        app_id: &str,
        token: &str,
    ) -> Result<EnvelopeStream, ConsumerError> {
        Ok(self.stream(app_id, token).await?.logs_only())
    }

    /// Streams every event of a firehose subscription.
    ///
    /// Consumers sharing a subscription id split the firehose between them.
    pub async fn firehose(
        &self,
        subscription_id: &str,
        token: &str,
    ) -> Result<EnvelopeStream, ConsumerError> {
        self.open(&format!("/firehose/{subscription_id}"), token).await
    }

    /// Opens a stream on an arbitrary traffic controller path.
    pub async fn open(&self, path: &str, token: &str) -> Result<EnvelopeStream, ConsumerError> {
        let socket = establish(&self.config, self.connector.as_ref(), path, token).await?;
        self.counters.record_connection();
        Ok(EnvelopeStream::spawn(
            socket,
            self.config.keep_alive,
            self.config.stream_buffer,
            self.counters.clone(),
        ))
    }

    /// Fetches the buffered recent logs of an application.
    ///
    /// Controllers that reject the HTTP endpoint with 400 are asked through
    /// the legacy websocket dump instead; that path never reports a read error.
    pub async fn recent_logs(
        &self,
        app_id: &str,
        token: &str,
    ) -> Result<EnvelopeBatch, ConsumerError> {
        let outcome = fetch_envelopes(
            &self.http,
            &self.config,
            &self.counters,
            app_id,
            token,
            "recentlogs",
        )
        .await?;
        match outcome {
            FetchOutcome::Batch(batch) => Ok(batch),
            FetchOutcome::BadRequest => {
                debug!(app_id, "recent logs endpoint rejected the request, draining legacy dump");
                let dump = self.open(&format!("/dump/?app={app_id}"), token).await?;
                let (envelopes, end) = dump.drain().await;
                debug!(app_id, ?end, count = envelopes.len(), "legacy dump drained");
                Ok(EnvelopeBatch {
                    envelopes,
                    interrupted: None,
                })
            }
        }
    }

    /// Fetches the latest container metrics of an application, sorted by instance index.
    pub async fn container_metrics(
        &self,
        app_id: &str,
        token: &str,
    ) -> Result<Vec<ContainerMetric>, ConsumerError> {
        fetch_container_metrics(&self.http, &self.config, &self.counters, app_id, token).await
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.config)
            .field("tls_connector", &self.connector.is_some())
            .field("counters", &self.counters.snapshot())
            .finish()
    }
}
