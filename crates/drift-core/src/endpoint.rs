//! Endpoint handles

use drift_transport::EndpointId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Handle to a remote device discovered during one engine run.
///
/// Handles are tied to the run ("generation") that issued them. After
/// `stop`, handles from earlier runs are rejected by `send`. Two handles are
/// equal when they name the same transport identity in the same run; the
/// display name does not take part.
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: EndpointId,
    display_name: String,
    generation: u64,
}

impl Endpoint {
    pub(crate) fn new(id: EndpointId, display_name: String, generation: u64) -> Self {
        Self {
            id,
            display_name,
            generation,
        }
    }

    /// Transport identity
    #[must_use]
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// Display name when the handle was issued
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Engine run the handle belongs to
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if both handles name the same device, in any run
    #[must_use]
    pub fn same_device(&self, other: &Endpoint) -> bool {
        self.id == other.id
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.generation == other.generation
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.generation.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}
