//! Outgoing transfers.
//!
//! ```text
//!   Pending ──► Sending ──► Completed
//!      │           │
//!      └───────────┴──────► Failed
//! ```

use super::{TransferId, TransferReport};
use crate::endpoint::Endpoint;
use crate::error::{EngineError, Result};
use crate::progress::Progress;
use drift_files::{Item, sanitize};
use drift_transport::{PayloadHeader, TransportAdapter};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Outgoing transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingState {
    /// Stream not open yet
    Pending,
    /// Header written, content flowing
    Sending,
    /// All content delivered
    Completed,
    /// Stream failed or was cancelled
    Failed,
}

impl OutgoingState {
    /// Returns true for states with no further transitions
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, OutgoingState::Completed | OutgoingState::Failed)
    }

    fn can_transition_to(self, next: OutgoingState) -> bool {
        use OutgoingState::{Completed, Failed, Pending, Sending};
        matches!(
            (self, next),
            (Pending, Sending | Failed) | (Sending, Completed | Failed)
        )
    }
}

impl fmt::Display for OutgoingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutgoingState::Pending => "pending",
            OutgoingState::Sending => "sending",
            OutgoingState::Completed => "completed",
            OutgoingState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct OutgoingInner {
    state: OutgoingState,
    sent: u64,
    total: Option<u64>,
    error: Option<EngineError>,
}

/// Handle to one outgoing transfer
#[derive(Clone)]
pub struct OutgoingTransfer {
    id: TransferId,
    destination: Endpoint,
    item: Item,
    inner: Arc<Mutex<OutgoingInner>>,
}

impl OutgoingTransfer {
    pub(crate) fn new(id: TransferId, destination: Endpoint, item: Item) -> Self {
        Self {
            id,
            destination,
            item,
            inner: Arc::new(Mutex::new(OutgoingInner {
                state: OutgoingState::Pending,
                sent: 0,
                total: None,
                error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutgoingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transfer identifier
    #[must_use]
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Receiving endpoint
    #[must_use]
    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    /// Item being sent
    #[must_use]
    pub fn item(&self) -> &Item {
        &self.item
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> OutgoingState {
        self.lock().state
    }

    /// Bytes written so far
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.lock().sent
    }

    /// Current progress
    #[must_use]
    pub fn progress(&self) -> Progress {
        let inner = self.lock();
        Progress::from_counts(inner.sent, inner.total)
    }

    /// The failure, once failed
    #[must_use]
    pub fn error(&self) -> Option<EngineError> {
        self.lock().error.clone()
    }

    fn set_total(&self, total: u64) {
        self.lock().total = Some(total);
    }

    fn record(&self, bytes: u64) {
        self.lock().sent += bytes;
    }

    pub(crate) fn transition(&self, next: OutgoingState) -> bool {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(next) {
            tracing::debug!(
                transfer = %self.id,
                from = %inner.state,
                to = %next,
                "Ignoring invalid outgoing transition"
            );
            return false;
        }
        inner.state = next;
        true
    }

    pub(crate) fn fail(&self, error: EngineError) -> bool {
        if !self.transition(OutgoingState::Failed) {
            return false;
        }
        self.lock().error = Some(error);
        true
    }
}

impl PartialEq for OutgoingTransfer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OutgoingTransfer {}

impl fmt::Debug for OutgoingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("OutgoingTransfer")
            .field("id", &self.id)
            .field("destination", &self.destination.id())
            .field("item", &self.item.id())
            .field("state", &inner.state)
            .field("sent", &inner.sent)
            .finish_non_exhaustive()
    }
}

/// What a send task needs besides the transfer
pub(crate) struct SendContext {
    pub adapter: Arc<dyn TransportAdapter>,
    pub chunk_size: usize,
}

/// Stream one item to its destination and report the outcome
pub(crate) async fn run_send(
    transfer: OutgoingTransfer,
    ctx: SendContext,
    reports: mpsc::UnboundedSender<TransferReport>,
) {
    let result = send(&transfer, &ctx).await;
    let _ = reports.send(TransferReport::Sent {
        id: transfer.id(),
        result,
    });
}

async fn send(transfer: &OutgoingTransfer, ctx: &SendContext) -> Result<()> {
    let item = transfer.item();
    let mut sink = ctx
        .adapter
        .open_outgoing(transfer.destination().id())
        .await?;

    let length = item.len()?;
    transfer.set_total(length);
    let header = PayloadHeader {
        metadata: sanitize(item.metadata(), item.title(), item.item_type(), Some(length)),
        length: Some(length),
    };
    sink.send_header(&header).await?;
    transfer.transition(OutgoingState::Sending);

    let mut reader = item.open_reader().await?;
    while let Some(chunk) = reader.next_chunk(ctx.chunk_size).await? {
        sink.send_chunk(&chunk).await?;
        transfer.record(chunk.len() as u64);
        tracing::trace!(transfer = %transfer.id(), progress = %transfer.progress(), "Sent chunk");
    }

    sink.finish().await?;
    Ok(())
}
