//! Transport adapter contract.
//!
//! An adapter is started with the local [`Advertisement`] and returns a
//! channel of [`TransportEvent`]s. Endpoint events may repeat or flap; the
//! engine deduplicates them. Inbound transfers arrive as [`InboundStream`]s,
//! each carrying its own ordered channel of [`InboundEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use tokio::sync::mpsc;

/// Metadata as carried on the wire
pub type WireMetadata = BTreeMap<String, String>;

/// Stable transport-level identity of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(String);

impl EndpointId {
    /// Create an endpoint ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What the local device announces to the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Local identity
    pub id: EndpointId,
    /// Human-readable name
    pub display_name: String,
}

/// Transport layer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(String),

    /// Transport is closed or not started
    #[error("Transport is closed")]
    Closed,

    /// Address binding failed
    #[error("Failed to bind: {0}")]
    BindFailed(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No route to the endpoint
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    /// Peer sent something that does not parse
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Stream ended before all content arrived
    #[error("Stream truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Announced length
        expected: u64,
        /// Bytes received
        actual: u64,
    },
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Header sent ahead of an item's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadHeader {
    /// Item metadata, already sanitized by the sender
    pub metadata: WireMetadata,
    /// Content length, if known up front
    pub length: Option<u64>,
}

/// Event reported by an adapter
#[derive(Debug)]
pub enum TransportEvent {
    /// An endpoint was seen (may repeat)
    EndpointAppeared {
        /// Stable identity
        id: EndpointId,
        /// Current display name
        display_name: String,
    },
    /// An endpoint is gone
    EndpointDisappeared {
        /// Stable identity
        id: EndpointId,
    },
    /// A remote endpoint opened a stream to us
    InboundOpened(InboundStream),
}

/// Event on a single inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Metadata arrived; the type is known from here on
    Header(PayloadHeader),
    /// A block of content
    Data(Vec<u8>),
    /// All content delivered
    Finished,
    /// The stream broke
    Failed(TransportError),
}

/// An inbound byte stream
pub struct InboundStream {
    /// Sending endpoint
    pub source: EndpointId,
    /// Ordered stream events; closing without `Finished` means failure
    pub events: mpsc::Receiver<InboundEvent>,
}

impl InboundStream {
    /// Create an inbound stream and the sender that feeds it
    #[must_use]
    pub fn channel(source: EndpointId, capacity: usize) -> (mpsc::Sender<InboundEvent>, Self) {
        let (tx, events) = mpsc::channel(capacity);
        (tx, Self { source, events })
    }
}

impl fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundStream")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Outgoing byte stream to one endpoint
#[async_trait]
pub trait ByteSink: Send {
    /// Send the header; must be called once, before any content
    async fn send_header(&mut self, header: &PayloadHeader) -> TransportResult<()>;

    /// Send a block of content
    async fn send_chunk(&mut self, chunk: &[u8]) -> TransportResult<()>;

    /// Flush and close the stream
    async fn finish(&mut self) -> TransportResult<()>;
}

/// Abstract discovery and transfer substrate.
///
/// Adapters own reconnection and retry policy; the engine only relays what
/// they report.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Start advertising and browsing.
    ///
    /// Returns the event channel for this run. Calling `start` on a started
    /// adapter returns [`TransportError::BindFailed`].
    async fn start(&self, advert: Advertisement) -> TransportResult<mpsc::Receiver<TransportEvent>>;

    /// Stop advertising and browsing; closes the event channel
    async fn stop(&self) -> TransportResult<()>;

    /// Open a byte stream to `endpoint`
    async fn open_outgoing(&self, endpoint: &EndpointId) -> TransportResult<Box<dyn ByteSink>>;

    /// Returns true between `start` and `stop`
    fn is_started(&self) -> bool;
}
