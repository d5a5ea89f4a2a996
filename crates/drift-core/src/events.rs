//! Engine events and subscriptions.

use crate::endpoint::Endpoint;
use crate::error::EngineError;
use crate::registry::KnownItems;
use crate::tracker::{IncomingTransfer, OutgoingTransfer};
use drift_files::Item;
use std::fmt;
use tokio::sync::mpsc;

/// Event published to every subscriber
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A device became reachable
    EndpointFound(Endpoint),
    /// A device is gone
    EndpointLost(Endpoint),
    /// An incoming transfer was accepted (or, with no filter, opened)
    ReceiveStarted(IncomingTransfer),
    /// An announced incoming transfer ended
    ReceiveFinished {
        /// The transfer
        transfer: IncomingTransfer,
        /// Received item, or the failure
        result: Result<Item, EngineError>,
    },
    /// An outgoing transfer began
    SendStarted(OutgoingTransfer),
    /// An outgoing transfer ended
    SendFinished {
        /// The transfer
        transfer: OutgoingTransfer,
        /// Failure, if any
        result: Result<(), EngineError>,
    },
    /// The known-item set changed
    KnownItemsChanged(KnownItems),
    /// The engine is about to stop
    Stopping,
}

impl EngineEvent {
    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::EndpointFound(_) => "endpoint_found",
            EngineEvent::EndpointLost(_) => "endpoint_lost",
            EngineEvent::ReceiveStarted(_) => "receive_started",
            EngineEvent::ReceiveFinished { .. } => "receive_finished",
            EngineEvent::SendStarted(_) => "send_started",
            EngineEvent::SendFinished { .. } => "send_finished",
            EngineEvent::KnownItemsChanged(_) => "known_items_changed",
            EngineEvent::Stopping => "stopping",
        }
    }
}

/// Subscription identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Ordered, lossless stream of engine events.
///
/// Dropping the subscription ends delivery.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, events: mpsc::UnboundedReceiver<EngineEvent>) -> Self {
        Self { id, events }
    }

    /// Identifier for [`unsubscribe`](crate::EngineHandle::unsubscribe)
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next event; `None` once unsubscribed or the engine is gone
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }

    /// Next event if one is queued
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.events.try_recv().ok()
    }
}

/// Subscriber list held by the engine task
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    next_id: u64,
    senders: Vec<(SubscriptionId, mpsc::UnboundedSender<EngineEvent>)>,
}

impl Subscribers {
    pub(crate) fn subscribe(&mut self) -> Subscription {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push((id, tx));
        Subscription::new(id, rx)
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.senders.len();
        self.senders.retain(|(sid, _)| *sid != id);
        self.senders.len() != before
    }

    /// Deliver to every live subscriber, dropping closed ones
    pub(crate) fn emit(&mut self, event: EngineEvent) {
        tracing::trace!(event = event.kind(), subscribers = self.senders.len(), "Emitting event");
        self.senders
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}
