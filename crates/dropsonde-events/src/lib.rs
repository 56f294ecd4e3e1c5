// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Protobuf models for the dropsonde `events` package.
//!
//! The Loggregator traffic controller ships every log line and metric as a
//! binary `Envelope` frame. This crate declares those proto2 messages with
//! `prost` derives and validates raw frames before they reach consumers. All
//! message types derive `serde` serialization to ease JSON bridging in
//! higher-level tools.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

// Base64 serialization for required Vec<u8> fields
pub(crate) mod serde_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// Custom deserializer that treats null as the default value
pub(crate) mod null_as_default {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        let opt = Option::<T>::deserialize(deserializer)?;
        Ok(opt.unwrap_or_default())
    }
}

// Skip serializing empty maps, mirroring Go's `omitempty` tags.
pub(crate) mod skip_map {
    use std::collections::HashMap;

    pub fn is_empty(value: &HashMap<String, String>) -> bool {
        value.is_empty()
    }
}

pub mod events;
pub mod frame;

pub use events::envelope::EventType;
pub use events::log_message::MessageType;
pub use events::{
    ContainerMetric, CounterEvent, Envelope, Error, HttpStartStop, LogMessage, PeerType, Uuid,
    ValueMetric,
};
pub use frame::{decode_frame, FrameError};
