//! # Drift Transport
//!
//! Transport adapters for the Drift sharing engine.
//!
//! The engine never touches sockets directly. It drives a
//! [`TransportAdapter`](transport::TransportAdapter), which advertises the
//! local device, reports endpoints appearing and disappearing, opens outgoing
//! byte streams and hands over inbound ones.
//!
//! This crate provides:
//! - The adapter contract ([`transport`])
//! - An in-process network for tests and demos ([`memory`])
//! - A LAN adapter: UDP broadcast beacons plus TCP streams ([`lan`])
//! - LAN framing ([`wire`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lan;
pub mod memory;
pub mod transport;
pub mod wire;

pub use lan::{LanConfig, LanTransport};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use transport::{
    Advertisement, ByteSink, EndpointId, InboundEvent, InboundStream, PayloadHeader,
    TransportAdapter, TransportError, TransportEvent, TransportResult, WireMetadata,
};

/// Capacity of adapter event channels
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of per-stream inbound event channels
pub const STREAM_CHANNEL_CAPACITY: usize = 64;
