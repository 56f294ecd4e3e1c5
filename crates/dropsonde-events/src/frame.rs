// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Validation of raw binary frames received from the traffic controller.

use prost::Message;

use crate::events::Envelope;

/// Reasons a frame is rejected as malformed.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The bytes are not a protobuf-encoded envelope.
    #[error("failed to decode envelope frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The envelope carries an event type this consumer does not know.
    #[error("unknown envelope event type {0}")]
    UnknownEventType(i32),
    /// The required `origin` field is absent.
    #[error("envelope frame is missing its origin")]
    MissingOrigin,
}

/// Decodes one frame into an [`Envelope`], enforcing the proto2 required fields.
pub fn decode_frame(bytes: &[u8]) -> Result<Envelope, FrameError> {
    let envelope = Envelope::decode(bytes)?;
    if envelope.kind().is_none() {
        return Err(FrameError::UnknownEventType(envelope.event_type));
    }
    if envelope.origin.is_empty() {
        return Err(FrameError::MissingOrigin);
    }
    Ok(envelope)
}
