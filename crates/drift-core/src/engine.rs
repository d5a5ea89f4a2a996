//! Engine task and handle.
//!
//! [`Engine::spawn`] moves all engine state into a single task
//! ([`run_engine_loop`]) and returns an [`EngineHandle`]. Every mutating
//! handle call is a command carrying a `oneshot` reply, so commands apply in
//! arrival order and their effects are visible when the call returns.
//! Transport events and transfer-task reports are handled on the same task,
//! which makes the event order seen by subscribers the order in which state
//! changed.

use crate::config::EngineConfig;
use crate::endpoint::Endpoint;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, Subscribers, Subscription, SubscriptionId};
use crate::filter::AllowedTypes;
use crate::registry::{KnownItemRegistry, KnownItems};
use crate::tracker::incoming::{ReceiveContext, run_receive};
use crate::tracker::outgoing::{SendContext, run_send};
use crate::tracker::{
    IncomingTransfer, OutgoingState, OutgoingTransfer, TransferReport, TransferTracker,
};
use drift_discovery::{DiscoveryEvent, DiscoveryManager};
use drift_files::Item;
use drift_transport::{
    Advertisement, EndpointId, InboundStream, TransportAdapter, TransportEvent,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

type Reply<T> = oneshot::Sender<T>;

/// Commands sent from handles to the engine task
enum EngineCmd {
    Start(Reply<Result<()>>),
    Stop(Reply<()>),
    IsStarted(Reply<bool>),
    Subscribe(Reply<Subscription>),
    Unsubscribe(SubscriptionId, Reply<bool>),
    AddKnownItem(Item, Reply<bool>),
    RemoveAllKnownItems(Reply<()>),
    RetainKnownItems(Reply<usize>),
    ReleaseKnownItems(Reply<Result<usize>>),
    AllowedTypes(Reply<AllowedTypes>),
    SetAllowedTypes(AllowedTypes, Reply<Result<()>>),
    Send {
        item: Item,
        endpoint: Endpoint,
        reply: Reply<Result<OutgoingTransfer>>,
    },
    Endpoints(Reply<Vec<Endpoint>>),
    IncomingFrom(Endpoint, Reply<Vec<IncomingTransfer>>),
    OutgoingTo(Endpoint, Reply<Vec<OutgoingTransfer>>),
    Shutdown(Reply<()>),
}

/// Engine state, owned by the engine task
pub struct Engine {
    identifier: String,
    config: EngineConfig,
    adapter: Arc<dyn TransportAdapter>,
    started: bool,
    generation: u64,
    transport_events: Option<mpsc::Receiver<TransportEvent>>,
    discovery: DiscoveryManager,
    registry: KnownItemRegistry,
    tracker: TransferTracker,
    subscribers: Subscribers,
    allowed_types: AllowedTypes,
    reports: mpsc::UnboundedSender<TransferReport>,
}

impl Engine {
    /// Validate `config`, spawn the engine task and return its handle.
    ///
    /// Must be called from within a Tokio runtime. The engine starts in the
    /// stopped state. The task exits when every handle is dropped or
    /// [`EngineHandle::shutdown`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the configuration is invalid.
    pub fn spawn(config: EngineConfig, adapter: Arc<dyn TransportAdapter>) -> Result<EngineHandle> {
        config.validate()?;

        let identifier = hex::encode(rand::random::<[u8; 8]>());
        let (commands_tx, commands_rx) = mpsc::channel(config.command_buffer);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let registry = KnownItemRegistry::new();

        let handle = EngineHandle {
            commands: commands_tx,
            known_items: registry.watch(),
            identifier: Arc::from(identifier.as_str()),
            display_name: Arc::from(config.display_name.as_str()),
        };

        let engine = Engine {
            identifier,
            allowed_types: config.allowed_types.clone(),
            config,
            adapter,
            started: false,
            generation: 1,
            transport_events: None,
            discovery: DiscoveryManager::new(),
            registry,
            tracker: TransferTracker::new(),
            subscribers: Subscribers::default(),
            reports: reports_tx,
        };

        tracing::debug!(
            id = %engine.identifier,
            name = %engine.config.display_name,
            "Spawning engine task"
        );
        tokio::spawn(run_engine_loop(engine, commands_rx, reports_rx));
        Ok(handle)
    }

    async fn handle_command(&mut self, cmd: EngineCmd) {
        match cmd {
            EngineCmd::Start(reply) => {
                let _ = reply.send(self.start().await);
            }
            EngineCmd::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
            EngineCmd::IsStarted(reply) => {
                let _ = reply.send(self.started);
            }
            EngineCmd::Subscribe(reply) => {
                let subscription = self.subscribers.subscribe();
                tracing::debug!(
                    subscription = %subscription.id(),
                    subscribers = self.subscribers.len(),
                    "Subscriber added"
                );
                let _ = reply.send(subscription);
            }
            EngineCmd::Unsubscribe(id, reply) => {
                let _ = reply.send(self.subscribers.unsubscribe(id));
            }
            EngineCmd::AddKnownItem(item, reply) => {
                let added = self.registry.add(item);
                if added {
                    self.emit_known_items();
                }
                let _ = reply.send(added);
            }
            EngineCmd::RemoveAllKnownItems(reply) => {
                if self.registry.clear_forced() {
                    self.emit_known_items();
                }
                let _ = reply.send(());
            }
            EngineCmd::RetainKnownItems(reply) => {
                let _ = reply.send(self.registry.retain());
            }
            EngineCmd::ReleaseKnownItems(reply) => {
                let _ = reply.send(self.registry.release());
            }
            EngineCmd::AllowedTypes(reply) => {
                let _ = reply.send(self.allowed_types.clone());
            }
            EngineCmd::SetAllowedTypes(types, reply) => {
                let _ = reply.send(self.set_allowed_types(types));
            }
            EngineCmd::Send {
                item,
                endpoint,
                reply,
            } => {
                let _ = reply.send(self.send(item, endpoint));
            }
            EngineCmd::Endpoints(reply) => {
                let endpoints = self
                    .discovery
                    .present()
                    .into_iter()
                    .map(|e| Endpoint::new(e.id, e.display_name, self.generation))
                    .collect();
                let _ = reply.send(endpoints);
            }
            EngineCmd::IncomingFrom(endpoint, reply) => {
                let _ = reply.send(self.tracker.incoming_from(&endpoint));
            }
            EngineCmd::OutgoingTo(endpoint, reply) => {
                let _ = reply.send(self.tracker.outgoing_to(&endpoint));
            }
            EngineCmd::Shutdown(reply) => {
                // Handled by the loop
                let _ = reply.send(());
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        let advert = Advertisement {
            id: EndpointId::new(self.identifier.clone()),
            display_name: self.config.display_name.clone(),
        };
        let events = self.adapter.start(advert).await?;
        self.transport_events = Some(events);
        self.started = true;

        tracing::info!(
            id = %self.identifier,
            name = %self.config.display_name,
            generation = self.generation,
            "Engine started"
        );
        Ok(())
    }

    async fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.subscribers.emit(EngineEvent::Stopping);

        let aborted = self.tracker.abort_all();
        for transfer in aborted.incoming {
            self.registry.unhold();
            transfer.fail(EngineError::Cancelled);
            self.subscribers.emit(EngineEvent::ReceiveFinished {
                transfer,
                result: Err(EngineError::Cancelled),
            });
        }
        for _ in 0..aborted.unannounced {
            self.registry.unhold();
        }
        for transfer in aborted.outgoing {
            self.registry.unhold();
            transfer.fail(EngineError::Cancelled);
            self.subscribers.emit(EngineEvent::SendFinished {
                transfer,
                result: Err(EngineError::Cancelled),
            });
        }

        if let Err(e) = self.adapter.stop().await {
            tracing::warn!(error = %e, "Transport adapter failed to stop cleanly");
        }
        self.transport_events = None;
        self.discovery.clear();
        self.started = false;
        self.generation += 1;

        if self.registry.clear_forced() {
            self.emit_known_items();
        }

        tracing::info!(
            id = %self.identifier,
            retains = self.registry.retain_count(),
            "Engine stopped"
        );
    }

    fn set_allowed_types(&mut self, types: AllowedTypes) -> Result<()> {
        if self.started {
            return Err(EngineError::invalid_state(
                "allowed types can only change while stopped",
            ));
        }
        tracing::debug!(count = types.len(), "Allowed types updated");
        self.allowed_types = types;
        Ok(())
    }

    fn send(&mut self, item: Item, endpoint: Endpoint) -> Result<OutgoingTransfer> {
        if !self.started {
            return Err(EngineError::invalid_state("engine is stopped"));
        }
        if endpoint.generation() != self.generation {
            return Err(EngineError::invalid_state(
                "endpoint handle is from an earlier run",
            ));
        }

        let transfer = self.tracker.begin_outgoing(endpoint, item);
        self.registry.hold();
        tracing::info!(
            transfer = %transfer.id(),
            item = %transfer.item().id(),
            to = %transfer.destination(),
            "Sending item"
        );
        self.subscribers
            .emit(EngineEvent::SendStarted(transfer.clone()));

        let ctx = SendContext {
            adapter: Arc::clone(&self.adapter),
            chunk_size: self.config.transfer.chunk_size,
        };
        let task = tokio::spawn(run_send(transfer.clone(), ctx, self.reports.clone()));
        self.tracker
            .attach_outgoing_task(transfer.id(), task.abort_handle());
        Ok(transfer)
    }

    fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        let Some(event) = event else {
            tracing::warn!("Transport adapter closed its event channel");
            self.transport_events = None;
            return;
        };

        match event {
            TransportEvent::EndpointAppeared { id, display_name } => {
                if let Some(DiscoveryEvent::Found(found)) =
                    self.discovery.on_appeared(id, display_name)
                {
                    let endpoint = Endpoint::new(found.id, found.display_name, self.generation);
                    tracing::info!(endpoint = %endpoint, "Endpoint found");
                    self.subscribers.emit(EngineEvent::EndpointFound(endpoint));
                }
            }
            TransportEvent::EndpointDisappeared { id } => {
                if let Some(DiscoveryEvent::Lost(lost)) = self.discovery.on_disappeared(&id) {
                    let endpoint = Endpoint::new(lost.id, lost.display_name, self.generation);
                    tracing::info!(endpoint = %endpoint, "Endpoint lost");
                    self.subscribers.emit(EngineEvent::EndpointLost(endpoint));
                }
            }
            TransportEvent::InboundOpened(stream) => self.accept_inbound(stream),
        }
    }

    fn accept_inbound(&mut self, stream: InboundStream) {
        let InboundStream { source, events } = stream;
        let display_name = self
            .discovery
            .get(&source)
            .map_or_else(|| source.to_string(), |e| e.display_name.clone());
        let endpoint = Endpoint::new(source, display_name, self.generation);

        let transfer = self.tracker.begin_incoming(endpoint);
        self.registry.hold();
        tracing::debug!(transfer = %transfer.id(), from = %transfer.source(), "Inbound stream opened");

        if self.allowed_types.is_empty() {
            if let Some(transfer) = self.tracker.announce_incoming(transfer.id()) {
                self.subscribers.emit(EngineEvent::ReceiveStarted(transfer));
            }
        }

        let ctx = ReceiveContext {
            filter: self.allowed_types.clone(),
            temp_dir: self.config.temp_dir.clone(),
        };
        let id = transfer.id();
        let task = tokio::spawn(run_receive(transfer, events, ctx, self.reports.clone()));
        self.tracker.attach_incoming_task(id, task.abort_handle());
    }

    fn handle_report(&mut self, report: TransferReport) {
        match report {
            TransferReport::Classified { id } => {
                if let Some(transfer) = self.tracker.announce_incoming(id) {
                    self.subscribers.emit(EngineEvent::ReceiveStarted(transfer));
                }
            }
            TransferReport::Rejected { id } => {
                if self.tracker.finish_incoming(id).is_some() {
                    self.registry.unhold();
                }
            }
            TransferReport::Received { id, result } => {
                let Some((transfer, announced)) = self.tracker.finish_incoming(id) else {
                    return;
                };
                self.registry.unhold();
                self.finish_receive(transfer, announced, result);
            }
            TransferReport::Sent { id, result } => {
                let Some(transfer) = self.tracker.finish_outgoing(id) else {
                    return;
                };
                self.registry.unhold();
                self.finish_send(transfer, result);
            }
        }
    }

    fn finish_receive(&mut self, transfer: IncomingTransfer, announced: bool, result: Result<Item>) {
        match result {
            Ok(item) => {
                transfer.complete(item.clone());
                tracing::info!(
                    transfer = %transfer.id(),
                    item = %item.id(),
                    title = %item.title(),
                    item_type = %item.item_type(),
                    "Item received"
                );
                if self.registry.add(item.clone()) {
                    self.emit_known_items();
                }
                self.subscribers.emit(EngineEvent::ReceiveFinished {
                    transfer,
                    result: Ok(item),
                });
            }
            Err(e) => {
                transfer.fail(e.clone());
                tracing::warn!(transfer = %transfer.id(), error = %e, "Receive failed");
                if announced {
                    self.subscribers.emit(EngineEvent::ReceiveFinished {
                        transfer,
                        result: Err(e),
                    });
                }
            }
        }
    }

    fn finish_send(&mut self, transfer: OutgoingTransfer, result: Result<()>) {
        match &result {
            Ok(()) => {
                transfer.transition(OutgoingState::Completed);
                tracing::info!(transfer = %transfer.id(), bytes = transfer.bytes_sent(), "Item sent");
            }
            Err(e) => {
                transfer.fail(e.clone());
                tracing::warn!(transfer = %transfer.id(), error = %e, "Send failed");
            }
        }
        self.subscribers
            .emit(EngineEvent::SendFinished { transfer, result });
    }

    fn auto_cleanup(&mut self) {
        if !self
            .registry
            .is_idle(self.config.cleanup.idle_after, Instant::now())
        {
            return;
        }
        if self.registry.clear_gated() {
            tracing::info!("Automatic cleanup cleared known items");
            self.emit_known_items();
        }
    }

    fn emit_known_items(&mut self) {
        self.subscribers
            .emit(EngineEvent::KnownItemsChanged(self.registry.snapshot()));
    }
}

async fn next_transport_event(
    events: &mut Option<mpsc::Receiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Engine task body
async fn run_engine_loop(
    mut engine: Engine,
    mut commands: mpsc::Receiver<EngineCmd>,
    mut reports: mpsc::UnboundedReceiver<TransferReport>,
) {
    let mut cleanup = engine.config.cleanup.interval.map(|every| {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            biased;

            cmd = commands.recv() => {
                match cmd {
                    Some(EngineCmd::Shutdown(reply)) => {
                        tracing::debug!("Received Shutdown command");
                        engine.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => engine.handle_command(cmd).await,
                    None => {
                        tracing::debug!("All engine handles dropped, shutting down");
                        break;
                    }
                }
            }

            Some(report) = reports.recv() => engine.handle_report(report),

            event = next_transport_event(&mut engine.transport_events),
                if engine.transport_events.is_some() => {
                engine.handle_transport_event(event);
            }

            _ = next_tick(&mut cleanup), if cleanup.is_some() => engine.auto_cleanup(),
        }
    }

    engine.stop().await;
    tracing::info!(id = %engine.identifier, "Engine task stopped");
}

/// Cloneable command surface of a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCmd>,
    known_items: watch::Receiver<KnownItems>,
    identifier: Arc<str>,
    display_name: Arc<str>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> EngineCmd) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| EngineError::channel("engine task exited"))?;
        rx.await
            .map_err(|_| EngineError::channel("engine task dropped the reply"))
    }

    /// Random identifier advertised to other devices (hex)
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Display name advertised to other devices
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Start advertising and browsing; no-op if already started
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the adapter fails to start.
    pub async fn start(&self) -> Result<()> {
        self.request(EngineCmd::Start).await?
    }

    /// Stop the engine; no-op if already stopped.
    ///
    /// Emits [`EngineEvent::Stopping`], cancels in-flight transfers,
    /// forgets endpoints, invalidates endpoint handles and clears the known
    /// items regardless of outstanding retains.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn stop(&self) -> Result<()> {
        self.request(EngineCmd::Stop).await
    }

    /// Returns true between `start` and `stop`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn is_started(&self) -> Result<bool> {
        self.request(EngineCmd::IsStarted).await
    }

    /// Subscribe to engine events
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn subscribe(&self) -> Result<Subscription> {
        self.request(EngineCmd::Subscribe).await
    }

    /// End a subscription; returns false if it was not active
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        self.request(|reply| EngineCmd::Unsubscribe(id, reply)).await
    }

    /// Add an item to the known items; returns false if already known
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn add_known_item(&self, item: Item) -> Result<bool> {
        self.request(|reply| EngineCmd::AddKnownItem(item, reply))
            .await
    }

    /// Clear the known items regardless of outstanding retains
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn remove_all_known_items(&self) -> Result<()> {
        self.request(EngineCmd::RemoveAllKnownItems).await
    }

    /// Suppress automatic cleanup; returns the new counter value
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn retain_known_items(&self) -> Result<usize> {
        self.request(EngineCmd::RetainKnownItems).await
    }

    /// Undo one `retain_known_items`; returns the new counter value
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RetainUnderflow`] if the counter is already zero.
    pub async fn release_known_items(&self) -> Result<usize> {
        self.request(EngineCmd::ReleaseKnownItems).await?
    }

    /// Current known items
    #[must_use]
    pub fn known_items(&self) -> KnownItems {
        self.known_items.borrow().clone()
    }

    /// Receiver that observes every change of the known items
    #[must_use]
    pub fn watch_known_items(&self) -> watch::Receiver<KnownItems> {
        self.known_items.clone()
    }

    /// Current allowed-type filter
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn allowed_types(&self) -> Result<AllowedTypes> {
        self.request(EngineCmd::AllowedTypes).await
    }

    /// Replace the allowed-type filter
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] if the engine is started.
    pub async fn set_allowed_types(&self, types: AllowedTypes) -> Result<()> {
        self.request(|reply| EngineCmd::SetAllowedTypes(types, reply))
            .await?
    }

    /// Send `item` to `endpoint`.
    ///
    /// The returned transfer runs in the background; its outcome arrives as
    /// [`EngineEvent::SendFinished`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidState`] if the engine is stopped or the
    /// endpoint handle is from an earlier run.
    pub async fn send(&self, item: Item, endpoint: &Endpoint) -> Result<OutgoingTransfer> {
        let endpoint = endpoint.clone();
        self.request(|reply| EngineCmd::Send {
            item,
            endpoint,
            reply,
        })
        .await?
    }

    /// Endpoints currently present
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn endpoints(&self) -> Result<Vec<Endpoint>> {
        self.request(EngineCmd::Endpoints).await
    }

    /// Announced, in-flight incoming transfers from `endpoint`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn incoming_transfers_from(&self, endpoint: &Endpoint) -> Result<Vec<IncomingTransfer>> {
        let endpoint = endpoint.clone();
        self.request(|reply| EngineCmd::IncomingFrom(endpoint, reply))
            .await
    }

    /// In-flight outgoing transfers to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is gone.
    pub async fn outgoing_transfers_to(&self, endpoint: &Endpoint) -> Result<Vec<OutgoingTransfer>> {
        let endpoint = endpoint.clone();
        self.request(|reply| EngineCmd::OutgoingTo(endpoint, reply))
            .await
    }

    /// Stop the engine and end its task
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Channel`] if the engine task is already gone.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(EngineCmd::Shutdown).await
    }
}
