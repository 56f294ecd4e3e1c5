// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Message definitions for the dropsonde `events` proto2 package.
//!
//! Field tags and labels match `envelope.proto`, `log.proto`, `metric.proto`,
//! `http.proto`, `error.proto` and `uuid.proto` from dropsonde-protocol so the
//! frames produced by the traffic controller decode unchanged.

use serde::{Deserialize, Serialize};

/// Wraps a single event together with the metadata of the emitting component.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    /// Unique description of the process that emitted the event.
    #[prost(string, required, tag = "1")]
    #[serde(deserialize_with = "crate::null_as_default::deserialize")]
    pub origin: ::prost::alloc::string::String,
    /// Discriminates which payload field is populated.
    #[prost(enumeration = "envelope::EventType", required, tag = "2")]
    pub event_type: i32,
    /// Nanoseconds since the UNIX epoch.
    #[prost(int64, optional, tag = "6")]
    pub timestamp: ::core::option::Option<i64>,
    #[prost(string, optional, tag = "13")]
    pub deployment: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "14")]
    pub job: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "15")]
    pub index: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "16")]
    pub ip: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(map = "string, string", tag = "17")]
    #[serde(skip_serializing_if = "crate::skip_map::is_empty")]
    pub tags: ::std::collections::HashMap<
        ::prost::alloc::string::String,
        ::prost::alloc::string::String,
    >,
    #[prost(message, optional, tag = "7")]
    pub http_start_stop: ::core::option::Option<HttpStartStop>,
    #[prost(message, optional, tag = "8")]
    pub log_message: ::core::option::Option<LogMessage>,
    #[prost(message, optional, tag = "9")]
    pub value_metric: ::core::option::Option<ValueMetric>,
    #[prost(message, optional, tag = "10")]
    pub counter_event: ::core::option::Option<CounterEvent>,
    #[prost(message, optional, tag = "11")]
    pub error: ::core::option::Option<Error>,
    #[prost(message, optional, tag = "12")]
    pub container_metric: ::core::option::Option<ContainerMetric>,
}

/// Nested message and enum types in `Envelope`.
pub mod envelope {
    use serde::{Deserialize, Serialize};

    /// Type of the wrapped event.
    #[derive(
        Clone,
        Copy,
        Debug,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        ::prost::Enumeration,
        Serialize,
        Deserialize,
    )]
    #[repr(i32)]
    pub enum EventType {
        HttpStartStop = 4,
        LogMessage = 5,
        ValueMetric = 6,
        CounterEvent = 7,
        Error = 8,
        ContainerMetric = 9,
    }
}

impl Envelope {
    /// Returns the decoded event type, or `None` when the wire value is unknown.
    pub fn kind(&self) -> Option<envelope::EventType> {
        envelope::EventType::try_from(self.event_type).ok()
    }

    /// Returns `true` when the envelope wraps a [`LogMessage`].
    pub fn is_log_message(&self) -> bool {
        self.kind() == Some(envelope::EventType::LogMessage)
    }

    /// Envelope timestamp in nanoseconds, zero when the emitter left it unset.
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp.unwrap_or_default()
    }
}

/// A single line of application or platform output.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct LogMessage {
    /// Raw bytes of the log line.
    #[prost(bytes = "vec", required, tag = "1")]
    #[serde(with = "crate::serde_base64")]
    pub message: ::prost::alloc::vec::Vec<u8>,
    #[prost(enumeration = "log_message::MessageType", required, tag = "2")]
    pub message_type: i32,
    /// Nanoseconds since the UNIX epoch.
    #[prost(int64, required, tag = "3")]
    pub timestamp: i64,
    #[prost(string, optional, tag = "4")]
    pub app_id: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "5")]
    pub source_type: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "6")]
    pub source_instance: ::core::option::Option<::prost::alloc::string::String>,
}

/// Nested message and enum types in `LogMessage`.
pub mod log_message {
    use serde::{Deserialize, Serialize};

    /// Output stream the line was written to.
    #[derive(
        Clone,
        Copy,
        Debug,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        ::prost::Enumeration,
        Serialize,
        Deserialize,
    )]
    #[repr(i32)]
    pub enum MessageType {
        Out = 1,
        Err = 2,
    }
}

impl LogMessage {
    /// Returns the log line as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> ::std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}

/// A named gauge value.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueMetric {
    #[prost(string, required, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(double, required, tag = "2")]
    pub value: f64,
    #[prost(string, required, tag = "3")]
    pub unit: ::prost::alloc::string::String,
}

/// Increment of a named counter.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterEvent {
    #[prost(string, required, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint64, required, tag = "2")]
    pub delta: u64,
    #[prost(uint64, optional, tag = "3")]
    pub total: ::core::option::Option<u64>,
}

/// Resource usage of one application instance.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerMetric {
    #[prost(string, required, tag = "1")]
    pub application_id: ::prost::alloc::string::String,
    #[prost(int32, required, tag = "2")]
    pub instance_index: i32,
    #[prost(double, required, tag = "3")]
    pub cpu_percentage: f64,
    #[prost(uint64, required, tag = "4")]
    pub memory_bytes: u64,
    #[prost(uint64, required, tag = "5")]
    pub disk_bytes: u64,
    #[prost(uint64, optional, tag = "6")]
    pub memory_bytes_quota: ::core::option::Option<u64>,
    #[prost(uint64, optional, tag = "7")]
    pub disk_bytes_quota: ::core::option::Option<u64>,
}

/// Error reported by a platform component.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Error {
    #[prost(string, required, tag = "1")]
    pub source: ::prost::alloc::string::String,
    #[prost(int32, required, tag = "2")]
    pub code: i32,
    #[prost(string, required, tag = "3")]
    pub message: ::prost::alloc::string::String,
}

/// 128-bit identifier split into two little-endian halves.
#[derive(Clone, Copy, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Uuid {
    #[prost(uint64, required, tag = "1")]
    pub low: u64,
    #[prost(uint64, required, tag = "2")]
    pub high: u64,
}

/// Lifecycle of one HTTP request observed by the router or an application.
#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStartStop {
    #[prost(int64, required, tag = "1")]
    pub start_timestamp: i64,
    #[prost(int64, required, tag = "2")]
    pub stop_timestamp: i64,
    #[prost(message, optional, tag = "3")]
    pub request_id: ::core::option::Option<Uuid>,
    #[prost(enumeration = "PeerType", required, tag = "4")]
    pub peer_type: i32,
    #[prost(int32, required, tag = "5")]
    pub method: i32,
    #[prost(string, required, tag = "6")]
    pub uri: ::prost::alloc::string::String,
    #[prost(string, required, tag = "7")]
    pub remote_address: ::prost::alloc::string::String,
    #[prost(string, required, tag = "8")]
    pub user_agent: ::prost::alloc::string::String,
    #[prost(int32, required, tag = "9")]
    pub status_code: i32,
    #[prost(int64, required, tag = "10")]
    pub content_length: i64,
    #[prost(message, optional, tag = "12")]
    pub application_id: ::core::option::Option<Uuid>,
    #[prost(int32, optional, tag = "13")]
    pub instance_index: ::core::option::Option<i32>,
    #[prost(string, optional, tag = "14")]
    pub instance_id: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, repeated, tag = "15")]
    pub forwarded: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// Side of the connection that reported an [`HttpStartStop`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    ::prost::Enumeration,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum PeerType {
    Client = 1,
    Server = 2,
}
