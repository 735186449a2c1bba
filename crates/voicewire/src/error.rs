//! Error taxonomy for the protocol core.
//!
//! Split by failure domain:
//! - [`WireError`]: one frame could not be encoded or decoded; the caller
//!   should treat the connection as unusable and disconnect.
//! - [`TransportError`]: connect/bind failures, surfaced synchronously and
//!   never retried here.
//! - [`UriError`]: a connection URI was rejected before any I/O.
//! - [`EventError`]: a domain message could not be built from an [`Event`].
//! - [`PipelineError`]: an invalid pipeline stage range.
//!
//! [`Event`]: crate::event::Event

use std::io;

use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Frame-level encode/decode failures.
///
/// A clean end of stream at a frame boundary is *not* an error; reads report
/// it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum WireError {
    /// Header line was not valid JSON or lacked a `type` field.
    #[error("malformed frame header: {0}")]
    MalformedHeader(#[source] serde_json::Error),

    /// No newline within the header size bound.
    #[error("frame header exceeds {max} bytes without a newline")]
    HeaderTooLong { max: usize },

    /// An event with an empty `type` cannot go on the wire.
    #[error("event type must not be empty")]
    EmptyEventType,

    /// Data block was not a valid JSON object.
    #[error("malformed frame data block: {0}")]
    MalformedData(#[source] serde_json::Error),

    /// Header declared `data_length` + `payload_length` values whose sum
    /// does not fit in a frame size.
    #[error("declared frame length overflows")]
    FrameLengthOverflow,

    /// Stream ended after the header line but before `data_length` +
    /// `payload_length` bytes arrived.
    #[error("stream ended in the middle of a frame")]
    TruncatedFrame,

    /// Event data could not be serialized.
    #[error("failed to serialize event data: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Connect/bind/lifecycle failures on a transport binding.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Read/write attempted before `connect()` or after `disconnect()`.
    #[error("transport is not connected")]
    NotConnected,

    /// Failed to spawn an external program as a peer.
    #[error("failed to spawn program {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Umbrella for client read/write paths, which can fail at either the
/// transport or the framing layer.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Connection URI rejections. Raised before any connection attempt.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UriError {
    #[error("unsupported scheme {scheme:?}: only tcp://, unix:// and stdio:// are supported")]
    UnsupportedScheme { scheme: String },

    #[error("a host must be specified when using a 'tcp://' URI")]
    MissingHost,

    #[error("a port must be specified when using a 'tcp://' URI")]
    MissingPort,

    #[error("invalid port {port:?} in 'tcp://' URI")]
    InvalidPort { port: String },

    #[error("a socket path must be specified when using a 'unix://' URI")]
    MissingPath,

    #[error("socket path {path:?} in 'unix://' URI must be absolute")]
    RelativePath { path: String },

    #[error("malformed URI {uri:?}: expected '<scheme>://...'")]
    Malformed { uri: String },
}

/// Validation failures when converting an [`Event`](crate::event::Event)
/// into a typed domain message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("expected a {expected:?} event, got {actual:?}")]
    WrongType { expected: String, actual: String },

    #[error("{event_type:?} event is missing required field {field:?}")]
    MissingField {
        event_type: String,
        field: String,
    },

    #[error("{event_type:?} event has an invalid value for field {field:?}: {reason}")]
    InvalidField {
        event_type: String,
        field: String,
        reason: String,
    },
}

/// Invalid pipeline stage range, rejected at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid stage range: end stage {end} comes before start stage {start}")]
    InvalidStageOrder {
        start: PipelineStage,
        end: PipelineStage,
    },
}
