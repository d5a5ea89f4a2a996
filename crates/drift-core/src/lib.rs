//! # Drift Core
//!
//! The Drift sharing engine: discovers nearby devices through a transport
//! adapter, keeps the set of known items, and runs concurrent incoming and
//! outgoing item transfers.
//!
//! ## Architecture
//!
//! ```text
//!   TransportAdapter ──events──► DiscoveryManager ──► EndpointFound / Lost
//!          │
//!          └──inbound stream──► TransferTracker ──► Item ──► KnownItemRegistry
//!                                     ▲                             │
//!   EngineHandle::send ───────────────┘                             ▼
//!                                                      KnownItemsChanged, ...
//! ```
//!
//! All state lives on one engine task; [`EngineHandle`] is a cloneable
//! command surface and [`Subscription`] an ordered, lossless event stream.
//!
//! ## Example
//!
//! ```no_run
//! use drift_core::{Engine, EngineConfig, EngineEvent};
//! use drift_transport::MemoryNetwork;
//! use std::sync::Arc;
//!
//! # async fn example() -> drift_core::Result<()> {
//! let network = MemoryNetwork::new();
//! let engine = Engine::spawn(EngineConfig::default(), Arc::new(network.transport()))?;
//! let mut events = engine.subscribe().await?;
//! engine.start().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let EngineEvent::EndpointFound(endpoint) = event {
//!         println!("found {endpoint}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod filter;
pub mod handlers;
pub mod progress;
pub mod registry;
pub mod tracker;

pub use config::{CleanupConfig, EngineConfig, TransferConfig};
pub use endpoint::Endpoint;
pub use engine::{Engine, EngineHandle};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, Subscription, SubscriptionId};
pub use filter::AllowedTypes;
pub use handlers::{HandlerRegistry, ItemHandler};
pub use progress::Progress;
pub use registry::{KnownItemRegistry, KnownItems};
pub use tracker::{
    IncomingState, IncomingTransfer, OutgoingState, OutgoingTransfer, TransferId, TransferTracker,
};

pub use drift_files::{Item, ItemId, Metadata};
