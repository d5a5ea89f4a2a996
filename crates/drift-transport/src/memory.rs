//! In-process transport.
//!
//! A [`MemoryNetwork`] is a hub that any number of [`MemoryTransport`]s join.
//! Started transports see each other appear, and an outgoing stream opened by
//! one is delivered as an inbound stream to the other. The network also lets
//! tests inject raw adapter events (duplicates, flaps, hand-driven inbound
//! streams) and force connection failures.

use crate::transport::{
    Advertisement, ByteSink, EndpointId, InboundEvent, InboundStream, PayloadHeader,
    TransportAdapter, TransportError, TransportEvent, TransportResult,
};
use crate::{EVENT_CHANNEL_CAPACITY, STREAM_CHANNEL_CAPACITY};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// A started participant on the network
struct Peer {
    display_name: String,
    events: mpsc::Sender<TransportEvent>,
}

#[derive(Default)]
struct NetworkState {
    peers: HashMap<EndpointId, Peer>,
}

/// Shared in-process network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Create an empty network
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a transport attached to this network
    #[must_use]
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            local: Mutex::new(None),
            started: AtomicBool::new(false),
            fail_next_open: AtomicBool::new(false),
        }
    }

    /// Number of started transports
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    /// Deliver a raw adapter event to the transport registered as `target`.
    ///
    /// Waits for room in the target's event channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnknownEndpoint`] if `target` is not started
    /// and [`TransportError::Closed`] if it stopped listening.
    pub async fn inject(&self, target: &EndpointId, event: TransportEvent) -> TransportResult<()> {
        let events = self
            .lock()
            .peers
            .get(target)
            .map(|peer| peer.events.clone())
            .ok_or_else(|| TransportError::UnknownEndpoint(target.clone()))?;
        events.send(event).await.map_err(|_| TransportError::Closed)
    }

    /// Open a hand-driven inbound stream to `target`, as if sent by `source`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnknownEndpoint`] if `target` is not started.
    pub async fn open_inbound(
        &self,
        target: &EndpointId,
        source: EndpointId,
    ) -> TransportResult<mpsc::Sender<InboundEvent>> {
        let (tx, stream) = InboundStream::channel(source, STREAM_CHANNEL_CAPACITY);
        self.inject(target, TransportEvent::InboundOpened(stream)).await?;
        Ok(tx)
    }
}

/// Send queued events, each after its receiver has room
async fn deliver_all(pending: Vec<(mpsc::Sender<TransportEvent>, TransportEvent)>) {
    for (events, event) in pending {
        if events.send(event).await.is_err() {
            tracing::trace!("Memory transport peer stopped listening");
        }
    }
}

/// Transport attached to a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: Mutex<Option<EndpointId>>,
    started: AtomicBool,
    fail_next_open: AtomicBool,
}

impl MemoryTransport {
    /// Make the next `open_outgoing` call fail with a connection error
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::SeqCst);
    }

    fn local_id(&self) -> Option<EndpointId> {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TransportAdapter for MemoryTransport {
    async fn start(&self, advert: Advertisement) -> TransportResult<mpsc::Receiver<TransportEvent>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TransportError::BindFailed("already started".to_string()));
        }

        let (rx, pending) = {
            let mut state = self.network.lock();
            // Room for every existing peer, so the backlog never waits on a reader
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY + state.peers.len());

            let mut pending = Vec::with_capacity(state.peers.len());
            for (id, peer) in &state.peers {
                let backlog = tx.try_send(TransportEvent::EndpointAppeared {
                    id: id.clone(),
                    display_name: peer.display_name.clone(),
                });
                debug_assert!(backlog.is_ok());
                pending.push((
                    peer.events.clone(),
                    TransportEvent::EndpointAppeared {
                        id: advert.id.clone(),
                        display_name: advert.display_name.clone(),
                    },
                ));
            }

            state.peers.insert(
                advert.id.clone(),
                Peer {
                    display_name: advert.display_name.clone(),
                    events: tx,
                },
            );
            (rx, pending)
        };
        deliver_all(pending).await;

        tracing::debug!(id = %advert.id, name = %advert.display_name, "Memory transport started");
        *self.local.lock().unwrap_or_else(PoisonError::into_inner) = Some(advert.id);
        Ok(rx)
    }

    async fn stop(&self) -> TransportResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(local) = self.local.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Ok(());
        };

        let pending: Vec<_> = {
            let mut state = self.network.lock();
            state.peers.remove(&local);
            state
                .peers
                .values()
                .map(|peer| {
                    (
                        peer.events.clone(),
                        TransportEvent::EndpointDisappeared { id: local.clone() },
                    )
                })
                .collect()
        };
        deliver_all(pending).await;

        tracing::debug!(id = %local, "Memory transport stopped");
        Ok(())
    }

    async fn open_outgoing(&self, endpoint: &EndpointId) -> TransportResult<Box<dyn ByteSink>> {
        let local = self.local_id().ok_or(TransportError::Closed)?;
        if self.fail_next_open.swap(false, Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(format!(
                "injected failure opening stream to {endpoint}"
            )));
        }

        let tx = self.network.open_inbound(endpoint, local).await?;
        Ok(Box::new(MemorySink { tx }))
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

/// Outgoing half of an in-memory stream
struct MemorySink {
    tx: mpsc::Sender<InboundEvent>,
}

impl MemorySink {
    async fn push(&self, event: InboundEvent) -> TransportResult<()> {
        self.tx.send(event).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl ByteSink for MemorySink {
    async fn send_header(&mut self, header: &PayloadHeader) -> TransportResult<()> {
        self.push(InboundEvent::Header(header.clone())).await
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> TransportResult<()> {
        self.push(InboundEvent::Data(chunk.to_vec())).await
    }

    async fn finish(&mut self) -> TransportResult<()> {
        self.push(InboundEvent::Finished).await
    }
}
