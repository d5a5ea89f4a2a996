//! # Drift Files
//!
//! Item store for the Drift sharing engine.
//!
//! This crate provides:
//! - [`Item`]: a shareable unit of content plus title, type and metadata
//! - Temporary (engine-owned) versus persistent (caller-owned) storage
//! - Lazy materialization of in-memory items to temporary files
//! - The reserved metadata key policy applied when items go on the wire
//! - Type conformance checks for free-form type identifiers
//!
//! ## Storage Lifecycle
//!
//! ```text
//!   from_buffer ──► Buffer ──materialize──► Temporary ──adopt──► Persistent
//!                      └────────────────adopt─────────────────────┘
//!   from_file   ────────────────────────────────────────────────► Persistent
//! ```
//!
//! Temporary storage is deleted when the last handle to the item is dropped.
//! Persistent storage is never modified or deleted by Drift.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod item;
pub mod metadata;
pub mod types;

pub use error::{ItemError, Result};
pub use item::{ContentReader, Item, ItemId};
pub use metadata::{Metadata, WireDescription, describe, sanitize};
pub use types::{GENERIC_DATA_TYPE, TypeClassifier, TypeTree};

/// Default read size used when streaming item content (64 KiB)
pub const DEFAULT_READ_SIZE: usize = 64 * 1024;
