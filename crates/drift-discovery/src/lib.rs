//! # Drift Discovery
//!
//! Endpoint discovery for the Drift sharing engine.
//!
//! Transport adapters report sightings as they happen: the same endpoint may
//! be announced many times, and a disappearance may arrive for an endpoint
//! that was never reported. [`DiscoveryManager`] filters this into a clean
//! sequence where every endpoint is found once, then lost once.
//!
//! ```text
//!   appeared(a) appeared(a) appeared(a) disappeared(a) disappeared(a)
//!        │                                    │
//!        ▼                                    ▼
//!     Found(a)                              Lost(a)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;

pub use manager::{DiscoveredEndpoint, DiscoveryEvent, DiscoveryManager};
