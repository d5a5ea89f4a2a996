//! Incoming transfers.
//!
//! ```text
//!   PendingClassification ──► Rejected
//!          │      │
//!          │      └──► Receiving ──► Completed
//!          │                │
//!          └────────────────┴──────► Failed
//! ```
//!
//! A stream can fail before its header arrives, so `Failed` is reachable
//! from `PendingClassification` too.

use super::{TransferId, TransferReport};
use crate::endpoint::Endpoint;
use crate::error::{EngineError, Result};
use crate::filter::AllowedTypes;
use crate::progress::Progress;
use drift_files::{GENERIC_DATA_TYPE, Item, describe};
use drift_transport::{InboundEvent, TransportError};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// Prefix for buffer files of incoming transfers
const RECEIVE_PREFIX: &str = "drift-recv-";

/// Incoming transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingState {
    /// Waiting for the header
    PendingClassification,
    /// Type not allowed; discarded silently
    Rejected,
    /// Accepted, content arriving
    Receiving,
    /// Item created and registered
    Completed,
    /// Stream broke or was cancelled
    Failed,
}

impl IncomingState {
    /// Returns true for states with no further transitions
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IncomingState::Rejected | IncomingState::Completed | IncomingState::Failed
        )
    }

    fn can_transition_to(self, next: IncomingState) -> bool {
        use IncomingState::{Completed, Failed, PendingClassification, Receiving, Rejected};
        matches!(
            (self, next),
            (PendingClassification, Rejected | Receiving | Failed) | (Receiving, Completed | Failed)
        )
    }
}

impl fmt::Display for IncomingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncomingState::PendingClassification => "pending",
            IncomingState::Rejected => "rejected",
            IncomingState::Receiving => "receiving",
            IncomingState::Completed => "completed",
            IncomingState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct IncomingInner {
    state: IncomingState,
    title: Option<String>,
    item_type: Option<String>,
    received: u64,
    total: Option<u64>,
    item: Option<Item>,
    error: Option<EngineError>,
}

/// Handle to one incoming transfer.
///
/// Clones observe the same transfer. A transfer object is never reused for
/// another stream.
#[derive(Clone)]
pub struct IncomingTransfer {
    id: TransferId,
    source: Endpoint,
    inner: Arc<Mutex<IncomingInner>>,
}

impl IncomingTransfer {
    pub(crate) fn new(id: TransferId, source: Endpoint) -> Self {
        Self {
            id,
            source,
            inner: Arc::new(Mutex::new(IncomingInner {
                state: IncomingState::PendingClassification,
                title: None,
                item_type: None,
                received: 0,
                total: None,
                item: None,
                error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IncomingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Transfer identifier
    #[must_use]
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Sending endpoint
    #[must_use]
    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> IncomingState {
        self.lock().state
    }

    /// Declared type; `None` until the header has arrived
    #[must_use]
    pub fn item_type(&self) -> Option<String> {
        self.lock().item_type.clone()
    }

    /// Declared title; `None` until the header has arrived
    #[must_use]
    pub fn title(&self) -> Option<String> {
        self.lock().title.clone()
    }

    /// Bytes received so far
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.lock().received
    }

    /// Current progress
    #[must_use]
    pub fn progress(&self) -> Progress {
        let inner = self.lock();
        Progress::from_counts(inner.received, inner.total)
    }

    /// The received item, once completed
    #[must_use]
    pub fn item(&self) -> Option<Item> {
        self.lock().item.clone()
    }

    /// The failure, once failed
    #[must_use]
    pub fn error(&self) -> Option<EngineError> {
        self.lock().error.clone()
    }

    pub(crate) fn classify(&self, title: &str, item_type: &str, total: Option<u64>) {
        let mut inner = self.lock();
        inner.title = Some(title.to_string());
        inner.item_type = Some(item_type.to_string());
        inner.total = total;
    }

    pub(crate) fn record(&self, bytes: u64) {
        self.lock().received += bytes;
    }

    pub(crate) fn transition(&self, next: IncomingState) -> bool {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(next) {
            tracing::debug!(
                transfer = %self.id,
                from = %inner.state,
                to = %next,
                "Ignoring invalid incoming transition"
            );
            return false;
        }
        inner.state = next;
        true
    }

    pub(crate) fn complete(&self, item: Item) -> bool {
        if !self.transition(IncomingState::Completed) {
            return false;
        }
        self.lock().item = Some(item);
        true
    }

    pub(crate) fn fail(&self, error: EngineError) -> bool {
        if !self.transition(IncomingState::Failed) {
            return false;
        }
        self.lock().error = Some(error);
        true
    }
}

impl PartialEq for IncomingTransfer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for IncomingTransfer {}

impl fmt::Debug for IncomingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("IncomingTransfer")
            .field("id", &self.id)
            .field("source", &self.source.id())
            .field("state", &inner.state)
            .field("item_type", &inner.item_type)
            .field("received", &inner.received)
            .finish_non_exhaustive()
    }
}

/// What a receive task needs besides the stream
pub(crate) struct ReceiveContext {
    pub filter: AllowedTypes,
    pub temp_dir: PathBuf,
}

enum Received {
    Rejected,
    Item(Item),
}

/// Drive one inbound stream to completion and report the outcome
pub(crate) async fn run_receive(
    transfer: IncomingTransfer,
    mut events: mpsc::Receiver<InboundEvent>,
    ctx: ReceiveContext,
    reports: mpsc::UnboundedSender<TransferReport>,
) {
    let id = transfer.id();
    let report = match receive(&transfer, &mut events, &ctx, &reports).await {
        Ok(Received::Rejected) => TransferReport::Rejected { id },
        Ok(Received::Item(item)) => TransferReport::Received { id, result: Ok(item) },
        Err(e) => TransferReport::Received { id, result: Err(e) },
    };
    let _ = reports.send(report);
}

async fn receive(
    transfer: &IncomingTransfer,
    events: &mut mpsc::Receiver<InboundEvent>,
    ctx: &ReceiveContext,
    reports: &mpsc::UnboundedSender<TransferReport>,
) -> Result<Received> {
    let id = transfer.id();
    let header = match events.recv().await {
        Some(InboundEvent::Header(header)) => header,
        Some(InboundEvent::Failed(e)) => return Err(e.into()),
        Some(_) => {
            return Err(TransportError::Protocol("content before header".to_string()).into());
        }
        None => return Err(TransportError::Closed.into()),
    };

    let description = describe(&header.metadata);
    let item_type = description
        .item_type
        .unwrap_or_else(|| GENERIC_DATA_TYPE.to_string());
    let total = header.length.or(description.length);
    transfer.classify(&description.title, &item_type, total);

    if !ctx.filter.allows(&item_type) {
        tracing::debug!(transfer = %id, item_type = %item_type, "Rejecting incoming transfer");
        transfer.transition(IncomingState::Rejected);
        return Ok(Received::Rejected);
    }
    transfer.transition(IncomingState::Receiving);
    let _ = reports.send(TransferReport::Classified { id });

    let buffer = tempfile::Builder::new()
        .prefix(RECEIVE_PREFIX)
        .tempfile_in(&ctx.temp_dir)?;
    let (file, path) = buffer.into_parts();
    let mut file = tokio::fs::File::from_std(file);

    loop {
        match events.recv().await {
            Some(InboundEvent::Data(chunk)) => {
                file.write_all(&chunk).await?;
                transfer.record(chunk.len() as u64);
                tracing::trace!(transfer = %id, progress = %transfer.progress(), "Received chunk");
            }
            Some(InboundEvent::Finished) => break,
            Some(InboundEvent::Failed(e)) => return Err(e.into()),
            Some(InboundEvent::Header(_)) => {
                return Err(TransportError::Protocol("duplicate header".to_string()).into());
            }
            None => return Err(TransportError::Closed.into()),
        }
    }

    let actual = transfer.bytes_received();
    match total {
        Some(expected) if actual < expected => {
            return Err(TransportError::Truncated { expected, actual }.into());
        }
        Some(expected) if actual > expected => {
            return Err(TransportError::Protocol(format!(
                "received {actual} bytes, {expected} announced"
            ))
            .into());
        }
        _ => {}
    }

    file.flush().await?;
    drop(file);

    Ok(Received::Item(Item::from_temp_path(
        path,
        description.title,
        item_type,
        description.metadata,
    )))
}
