//! Error types for the request client.
//!
//! # Design
//! Failures fall into four families callers actually branch on: the request
//! could not be built, the network failed, the caller gave up, or the body
//! could not be decoded. `ErrorKind` names the family; the variants keep the
//! underlying source for debugging. A fifth, `Client`, covers misuse of the
//! client itself (no runtime, closed dispatcher).

use std::string::FromUtf8Error;

use reqwest::header::{InvalidHeaderName, InvalidHeaderValue};
use thiserror::Error;

use crate::context::Cancellation;

/// Boxed error returned by request hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was rejected before any network attempt.
    Build,
    /// The transport failed (DNS, connect, TLS, protocol, transport timeout).
    Network,
    /// The caller's context was cancelled or its deadline passed.
    Cancelled,
    /// The response body could not be read or decoded.
    Decode,
    /// The client itself could not serve the call.
    Client,
}

/// Errors returned by `Client` calls and `Response` body readers.
#[derive(Debug, Error)]
pub enum Error {
    /// The joined base URL and path did not parse as an absolute URL.
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A default or per-call header name is not a valid HTTP token.
    #[error("invalid header name '{name}': {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: InvalidHeaderName,
    },

    /// A header value contains bytes HTTP does not allow.
    #[error("invalid value for header '{name}': {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: InvalidHeaderValue,
    },

    /// The JSON body could not be serialized.
    #[error("failed to serialize request body: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    /// The caller's request hook returned an error; nothing was sent.
    #[error("request hook failed: {source}")]
    Hook {
        #[source]
        source: BoxError,
    },

    /// The transport failed: DNS, connect, TLS, protocol or its own timeout.
    #[error("request failed: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },

    /// The caller's context ended before a response arrived.
    #[error(transparent)]
    Cancelled(Cancellation),

    /// The connection failed while the body was being read.
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: reqwest::Error,
    },

    /// `text()` was called on a body that is not UTF-8.
    #[error("response body is not valid UTF-8: {source}")]
    Utf8 {
        #[source]
        source: FromUtf8Error,
    },

    /// `json()` could not decode the body into the requested type.
    #[error("failed to decode response body: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },

    /// The body was already read by an earlier `bytes`, `text` or `json` call.
    #[error("response body was already consumed")]
    BodyConsumed,

    /// `ClientBuilder::build` ran outside a Tokio runtime.
    #[error("client must be built from within a Tokio runtime")]
    NoRuntime,

    /// The underlying `reqwest` client could not be constructed.
    #[error("failed to build HTTP transport: {source}")]
    BuildTransport {
        #[source]
        source: reqwest::Error,
    },

    /// The worker pool stopped before the call produced a result.
    #[error("dispatcher is closed")]
    DispatcherClosed,

    /// The task running the round trip panicked.
    #[error("request task failed: {0}")]
    TaskFailed(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { .. }
            | Self::InvalidHeaderName { .. }
            | Self::InvalidHeaderValue { .. }
            | Self::Serialize { .. }
            | Self::Hook { .. } => ErrorKind::Build,
            Self::Network { .. } => ErrorKind::Network,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::ReadBody { .. } | Self::Utf8 { .. } | Self::Decode { .. } | Self::BodyConsumed => {
                ErrorKind::Decode
            }
            Self::NoRuntime
            | Self::BuildTransport { .. }
            | Self::DispatcherClosed
            | Self::TaskFailed(_) => ErrorKind::Client,
        }
    }

    /// True when the caller gave up, as opposed to the call failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn is_decode(&self) -> bool {
        self.kind() == ErrorKind::Decode
    }

    pub fn cancellation(&self) -> Option<Cancellation> {
        match self {
            Self::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
