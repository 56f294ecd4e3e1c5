// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;

/// Errors surfaced by consumer operations.
///
/// Establishment and fetch failures are returned synchronously from the call
/// that caused them. Once a stream is running, its termination cause is
/// reported through [`crate::StreamEnd`] instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    /// The traffic controller could not be reached (DNS, TCP, proxy, TLS, handshake).
    #[error("Error dialing traffic controller server: {cause}.\nPlease ask your Cloud Foundry Operator to check the platform configuration (traffic controller is {endpoint}).")]
    Connection { cause: String, endpoint: String },

    /// The server answered 401; `body` holds the raw response body.
    #[error("Unauthorized error: {body}")]
    Unauthorized { body: String },

    /// The recent-log endpoint answered with an unexpected status.
    #[error("unknown issue when making HTTP request to Loggregator")]
    NotFound,

    /// A 200 response did not carry a usable multipart boundary.
    #[error("bad server response")]
    BadResponse,

    /// The server reported an error in place of the requested data.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Stream paths must be non-empty and start with `/`.
    #[error("invalid stream path {0:?}: paths must be non-empty and start with '/'")]
    InvalidPath(String),

    /// The configured traffic controller address is not a usable websocket URL.
    #[error("invalid traffic controller endpoint {0:?}")]
    InvalidEndpoint(String),

    /// A header value (typically the authorization token) is not valid HTTP.
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// A read failed after data started flowing.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConsumerError {
    /// Wraps a dial failure with the remediation hint pointing at the endpoint.
    pub(crate) fn connection(cause: impl Display, endpoint: &str) -> Self {
        Self::Connection {
            cause: cause.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Returns `true` for [`ConsumerError::Unauthorized`].
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let error = ConsumerError::connection("connection refused", "wss://doppler.example.com:443");
        let message = error.to_string();
        assert!(message.starts_with("Error dialing traffic controller server: connection refused."));
        assert!(message.contains("traffic controller is wss://doppler.example.com:443"));
    }

    #[test]
    fn test_unauthorized_error_display() {
        let error = ConsumerError::Unauthorized {
            body: r#"{"error":"invalid_token"}"#.to_string(),
        };
        assert_eq!(
            error.to_string(),
            r#"Unauthorized error: {"error":"invalid_token"}"#
        );
        assert!(error.is_unauthorized());
        assert!(!ConsumerError::NotFound.is_unauthorized());
    }

    #[test]
    fn test_error_debug() {
        let error = ConsumerError::BadResponse;
        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("BadResponse"));
    }
}
