// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One-shot retrieval of buffered envelopes over HTTP.
//!
//! The traffic controller answers `GET /apps/{id}/recentlogs` (and
//! `/containermetrics`) with a `multipart/x-protobuf` body where each part is
//! one encoded envelope. Older controllers answer 400 instead; callers then
//! fall back to draining the legacy websocket dump endpoint.

use dropsonde_events::{decode_frame, ContainerMetric, Envelope, LogMessage};
use regex::Regex;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use crate::config::ConsumerConfig;
use crate::error::ConsumerError;
use crate::sort::sort_container_metrics;
use crate::telemetry::FrameCounters;

const BOUNDARY_PATTERN: &str = r"boundary=(.*)";

/// Envelopes read from a multipart response.
///
/// `interrupted` holds the read error that stopped iteration early; the
/// envelopes decoded before it are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeBatch {
    pub envelopes: Vec<Envelope>,
    pub interrupted: Option<ConsumerError>,
}

impl EnvelopeBatch {
    /// Log message payloads of the batch, in batch order.
    pub fn log_messages(&self) -> Vec<LogMessage> {
        self.envelopes
            .iter()
            .filter_map(|envelope| envelope.log_message.clone())
            .collect()
    }
}

/// Result of a multipart fetch before fallback handling.
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    Batch(EnvelopeBatch),
    /// The server answered 400; the caller decides what that means.
    BadRequest,
}

/// Fetches `/apps/{app_id}/{resource}` and decodes the multipart body.
pub(crate) async fn fetch_envelopes(
    client: &reqwest::Client,
    config: &ConsumerConfig,
    counters: &FrameCounters,
    app_id: &str,
    token: &str,
    resource: &str,
) -> Result<FetchOutcome, ConsumerError> {
    let url = http_url(config, app_id, resource)?;
    let authorization =
        HeaderValue::from_str(token).map_err(|_| ConsumerError::InvalidHeader("Authorization"))?;

    debug!(url = %url, "requesting buffered envelopes");
    let response = client
        .get(&url)
        .header(AUTHORIZATION, authorization)
        .send()
        .await
        .map_err(|err| ConsumerError::connection(err, &config.endpoint))?;

    let status = response.status();
    debug!(url = %url, status = %status, "buffered envelopes response");
    if status == StatusCode::UNAUTHORIZED {
        let body = response
            .bytes()
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        return Err(ConsumerError::Unauthorized { body });
    }
    if status == StatusCode::BAD_REQUEST {
        return Ok(FetchOutcome::BadRequest);
    }
    if status != StatusCode::OK {
        return Err(ConsumerError::NotFound);
    }

    let boundary = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_boundary)
        .ok_or(ConsumerError::BadResponse)?;

    let batch = read_multipart(response, boundary, counters).await;
    Ok(FetchOutcome::Batch(batch))
}

/// Fetches container metrics, sorted by instance index.
///
/// A log message in the response carries a server-side error and fails the call.
pub(crate) async fn fetch_container_metrics(
    client: &reqwest::Client,
    config: &ConsumerConfig,
    counters: &FrameCounters,
    app_id: &str,
    token: &str,
) -> Result<Vec<ContainerMetric>, ConsumerError> {
    let batch =
        match fetch_envelopes(client, config, counters, app_id, token, "containermetrics").await? {
            FetchOutcome::Batch(batch) => batch,
            FetchOutcome::BadRequest => return Err(ConsumerError::NotFound),
        };
    if let Some(err) = batch.interrupted {
        return Err(err);
    }
    if let Some(log) = batch
        .envelopes
        .iter()
        .find_map(|envelope| envelope.log_message.as_ref())
    {
        return Err(ConsumerError::Upstream(log.text().into_owned()));
    }

    let mut metrics: Vec<ContainerMetric> = batch
        .envelopes
        .into_iter()
        .filter_map(|envelope| envelope.container_metric)
        .collect();
    sort_container_metrics(&mut metrics);
    Ok(metrics)
}

/// Maps the websocket endpoint to its HTTP twin: `ws` → `http`, anything else → `https`.
fn http_url(config: &ConsumerConfig, app_id: &str, resource: &str) -> Result<String, ConsumerError> {
    let endpoint = config.endpoint_url()?;
    let scheme = if endpoint.scheme() == "ws" { "http" } else { "https" };
    let authority = &endpoint[url::Position::BeforeHost..url::Position::AfterPort];
    Ok(format!("{scheme}://{authority}/apps/{app_id}/{resource}"))
}

/// Extracts the multipart boundary, dropping surrounding whitespace and quotes.
fn extract_boundary(content_type: &str) -> Option<String> {
    let pattern = Regex::new(BOUNDARY_PATTERN).ok()?;
    let captures = pattern.captures(content_type)?;
    let boundary = captures.get(1)?.as_str().trim().trim_matches('"');
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

/// Decodes every part as one frame, skipping malformed ones.
///
/// Iteration stops at the first read error, which is recorded in the batch.
async fn read_multipart(
    response: reqwest::Response,
    boundary: String,
    counters: &FrameCounters,
) -> EnvelopeBatch {
    let mut multipart = multer::Multipart::new(response.bytes_stream(), boundary);
    let mut batch = EnvelopeBatch::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                batch.interrupted = Some(ConsumerError::Transport(err.to_string()));
                break;
            }
        };
        let frame = match field.bytes().await {
            Ok(frame) => frame,
            Err(err) => {
                batch.interrupted = Some(ConsumerError::Transport(err.to_string()));
                break;
            }
        };
        match decode_frame(&frame) {
            Ok(envelope) => {
                counters.record_decoded();
                batch.envelopes.push(envelope);
            }
            Err(err) => {
                counters.record_dropped();
                debug!(error = %err, len = frame.len(), "skipping malformed multipart frame");
            }
        }
    }
    batch
}
