//! Discovery Manager
//!
//! Turns the raw, possibly repeating appear/disappear signals of a transport
//! adapter into clean found/lost transitions.

use drift_transport::EndpointId;
use std::collections::HashMap;

/// An endpoint currently considered present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    /// Transport identity
    pub id: EndpointId,
    /// Last display name seen
    pub display_name: String,
}

/// Transition reported by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// Endpoint became present
    Found(DiscoveredEndpoint),
    /// Endpoint is no longer present
    Lost(DiscoveredEndpoint),
}

/// Deduplicating relay for endpoint sightings.
///
/// Keyed by [`EndpointId`]: an identity is reported found at most once while
/// present and lost exactly once when the transport reports it gone. Display
/// names are not part of identity; a renamed sighting updates the stored name
/// without a new event.
#[derive(Debug, Default)]
pub struct DiscoveryManager {
    present: HashMap<EndpointId, DiscoveredEndpoint>,
}

impl DiscoveryManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting; returns `Found` only for a newly present endpoint
    pub fn on_appeared(&mut self, id: EndpointId, display_name: String) -> Option<DiscoveryEvent> {
        if let Some(existing) = self.present.get_mut(&id) {
            if existing.display_name != display_name {
                tracing::debug!(
                    endpoint = %id,
                    old = %existing.display_name,
                    new = %display_name,
                    "Endpoint renamed"
                );
                existing.display_name = display_name;
            }
            return None;
        }

        let endpoint = DiscoveredEndpoint {
            id: id.clone(),
            display_name,
        };
        tracing::debug!(endpoint = %id, name = %endpoint.display_name, "Endpoint found");
        self.present.insert(id, endpoint.clone());
        Some(DiscoveryEvent::Found(endpoint))
    }

    /// Record a loss; returns `Lost` only if the endpoint was found earlier
    pub fn on_disappeared(&mut self, id: &EndpointId) -> Option<DiscoveryEvent> {
        match self.present.remove(id) {
            Some(endpoint) => {
                tracing::debug!(endpoint = %id, "Endpoint lost");
                Some(DiscoveryEvent::Lost(endpoint))
            }
            None => {
                tracing::trace!(endpoint = %id, "Ignoring loss of unknown endpoint");
                None
            }
        }
    }

    /// Forget every endpoint without reporting losses
    pub fn clear(&mut self) {
        self.present.clear();
    }

    /// Endpoint with the given identity, if present
    #[must_use]
    pub fn get(&self, id: &EndpointId) -> Option<&DiscoveredEndpoint> {
        self.present.get(id)
    }

    /// Returns true if the endpoint is present
    #[must_use]
    pub fn is_present(&self, id: &EndpointId) -> bool {
        self.present.contains_key(id)
    }

    /// Snapshot of present endpoints, ordered by identity
    #[must_use]
    pub fn present(&self) -> Vec<DiscoveredEndpoint> {
        let mut endpoints: Vec<_> = self.present.values().cloned().collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }

    /// Number of present endpoints
    #[must_use]
    pub fn len(&self) -> usize {
        self.present.len()
    }

    /// Returns true if nothing is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.present.is_empty()
    }
}
