//! Transfer tracking.
//!
//! The [`TransferTracker`] owns the set of in-flight transfers. Each transfer
//! runs in its own task ([`incoming::run_receive`], [`outgoing::run_send`])
//! and reports back to the engine task through [`TransferReport`]s; the
//! tracker itself is only touched by the engine task.

pub mod incoming;
pub mod outgoing;

use crate::endpoint::Endpoint;
use crate::error::Result;
use drift_files::Item;
use std::collections::HashMap;
use std::fmt;
use tokio::task::AbortHandle;

pub use incoming::{IncomingState, IncomingTransfer};
pub use outgoing::{OutgoingState, OutgoingTransfer};

/// Transfer identifier, unique within one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub(crate) u64);

impl TransferId {
    /// Numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Message from a transfer task to the engine task
#[derive(Debug)]
pub(crate) enum TransferReport {
    /// Incoming header parsed and type accepted
    Classified { id: TransferId },
    /// Incoming type not allowed
    Rejected { id: TransferId },
    /// Incoming stream ended
    Received { id: TransferId, result: Result<Item> },
    /// Outgoing stream ended
    Sent { id: TransferId, result: Result<()> },
}

struct IncomingEntry {
    transfer: IncomingTransfer,
    announced: bool,
    task: Option<AbortHandle>,
}

struct OutgoingEntry {
    transfer: OutgoingTransfer,
    task: Option<AbortHandle>,
}

/// Transfers removed by [`TransferTracker::abort_all`]
#[derive(Debug, Default)]
pub struct Aborted {
    /// Incoming transfers that had been announced to observers
    pub incoming: Vec<IncomingTransfer>,
    /// Incoming transfers that were never announced
    pub unannounced: usize,
    /// Outgoing transfers
    pub outgoing: Vec<OutgoingTransfer>,
}

/// Set of in-flight transfers
#[derive(Default)]
pub struct TransferTracker {
    next_id: u64,
    incoming: HashMap<TransferId, IncomingEntry>,
    outgoing: HashMap<TransferId, OutgoingEntry>,
}

impl TransferTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> TransferId {
        self.next_id += 1;
        TransferId(self.next_id)
    }

    /// Track a new incoming transfer in `PendingClassification`
    pub fn begin_incoming(&mut self, source: Endpoint) -> IncomingTransfer {
        let id = self.allocate_id();
        let transfer = IncomingTransfer::new(id, source);
        self.incoming.insert(
            id,
            IncomingEntry {
                transfer: transfer.clone(),
                announced: false,
                task: None,
            },
        );
        transfer
    }

    /// Track a new outgoing transfer in `Pending`
    pub fn begin_outgoing(&mut self, destination: Endpoint, item: Item) -> OutgoingTransfer {
        let id = self.allocate_id();
        let transfer = OutgoingTransfer::new(id, destination, item);
        self.outgoing.insert(
            id,
            OutgoingEntry {
                transfer: transfer.clone(),
                task: None,
            },
        );
        transfer
    }

    pub(crate) fn attach_incoming_task(&mut self, id: TransferId, task: AbortHandle) {
        if let Some(entry) = self.incoming.get_mut(&id) {
            entry.task = Some(task);
        }
    }

    pub(crate) fn attach_outgoing_task(&mut self, id: TransferId, task: AbortHandle) {
        if let Some(entry) = self.outgoing.get_mut(&id) {
            entry.task = Some(task);
        }
    }

    /// Mark an incoming transfer as announced.
    ///
    /// Returns the transfer the first time only.
    pub fn announce_incoming(&mut self, id: TransferId) -> Option<IncomingTransfer> {
        let entry = self.incoming.get_mut(&id)?;
        if entry.announced {
            return None;
        }
        entry.announced = true;
        Some(entry.transfer.clone())
    }

    /// Stop tracking an incoming transfer.
    ///
    /// Returns the transfer and whether it had been announced.
    pub fn finish_incoming(&mut self, id: TransferId) -> Option<(IncomingTransfer, bool)> {
        self.incoming
            .remove(&id)
            .map(|entry| (entry.transfer, entry.announced))
    }

    /// Stop tracking an outgoing transfer
    pub fn finish_outgoing(&mut self, id: TransferId) -> Option<OutgoingTransfer> {
        self.outgoing.remove(&id).map(|entry| entry.transfer)
    }

    /// Announced, in-flight incoming transfers from `endpoint`
    #[must_use]
    pub fn incoming_from(&self, endpoint: &Endpoint) -> Vec<IncomingTransfer> {
        let mut transfers: Vec<_> = self
            .incoming
            .values()
            .filter(|entry| entry.announced && entry.transfer.source().same_device(endpoint))
            .filter(|entry| entry.transfer.state() != IncomingState::Rejected)
            .map(|entry| entry.transfer.clone())
            .collect();
        transfers.sort_by_key(IncomingTransfer::id);
        transfers
    }

    /// In-flight outgoing transfers to `endpoint`
    #[must_use]
    pub fn outgoing_to(&self, endpoint: &Endpoint) -> Vec<OutgoingTransfer> {
        let mut transfers: Vec<_> = self
            .outgoing
            .values()
            .filter(|entry| entry.transfer.destination().same_device(endpoint))
            .map(|entry| entry.transfer.clone())
            .collect();
        transfers.sort_by_key(OutgoingTransfer::id);
        transfers
    }

    /// Number of in-flight incoming transfers, announced or not
    #[must_use]
    pub fn incoming_count(&self) -> usize {
        self.incoming.len()
    }

    /// Number of in-flight outgoing transfers
    #[must_use]
    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    /// Abort every task and stop tracking every transfer
    pub fn abort_all(&mut self) -> Aborted {
        let mut aborted = Aborted::default();

        let mut incoming: Vec<_> = self.incoming.drain().map(|(_, entry)| entry).collect();
        incoming.sort_by_key(|entry| entry.transfer.id());
        for entry in incoming {
            if let Some(task) = entry.task {
                task.abort();
            }
            if entry.announced {
                aborted.incoming.push(entry.transfer);
            } else {
                aborted.unannounced += 1;
            }
        }

        let mut outgoing: Vec<_> = self.outgoing.drain().map(|(_, entry)| entry).collect();
        outgoing.sort_by_key(|entry| entry.transfer.id());
        for entry in outgoing {
            if let Some(task) = entry.task {
                task.abort();
            }
            aborted.outgoing.push(entry.transfer);
        }

        aborted
    }
}
