//! LAN transport: UDP broadcast beacons and TCP streams.
//!
//! While started, the adapter broadcasts a [`Beacon`] every
//! `beacon_interval` and listens for beacons from other devices. A peer is
//! reported on every beacon it sends (the engine deduplicates) and reported
//! gone after `peer_timeout` of silence or when it sends a `bye` beacon.
//!
//! Items travel over one TCP connection each, framed as described in
//! [`crate::wire`].

use crate::transport::{
    Advertisement, ByteSink, EndpointId, InboundEvent, InboundStream, PayloadHeader,
    TransportAdapter, TransportError, TransportEvent, TransportResult,
};
use crate::wire::{Beacon, BeaconKind, MAX_BEACON_LEN, StreamHeader, read_header, write_header};
use crate::{EVENT_CHANNEL_CAPACITY, STREAM_CHANNEL_CAPACITY};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Read buffer for inbound streams
const STREAM_READ_SIZE: usize = 64 * 1024;

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// LAN adapter configuration
#[derive(Debug, Clone)]
pub struct LanConfig {
    /// UDP port beacons are sent to and received on
    pub discovery_port: u16,
    /// Address the TCP listener binds to (port 0 picks one)
    pub listen_addr: SocketAddr,
    /// Destination address for beacons
    pub broadcast_addr: IpAddr,
    /// Interval between beacons
    pub beacon_interval: Duration,
    /// Silence after which a peer is reported gone
    pub peer_timeout: Duration,
    /// Longest wait for the next read on an inbound stream
    pub read_timeout: Duration,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            discovery_port: 47800,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            beacon_interval: Duration::from_secs(2),
            peer_timeout: Duration::from_secs(7),
            read_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerRecord {
    addr: SocketAddr,
    last_seen: Instant,
}

type PeerTable = Arc<DashMap<EndpointId, PeerRecord>>;

struct Running {
    advert: Advertisement,
    socket: Arc<UdpSocket>,
    port: u16,
    tasks: Vec<JoinHandle<()>>,
}

/// LAN transport adapter
pub struct LanTransport {
    config: LanConfig,
    peers: PeerTable,
    running: Mutex<Option<Running>>,
    started: AtomicBool,
}

impl LanTransport {
    /// Create an adapter; nothing is bound until `start`
    #[must_use]
    pub fn new(config: LanConfig) -> Self {
        Self {
            config,
            peers: Arc::new(DashMap::new()),
            running: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// TCP port accepting streams, while started
    pub async fn stream_port(&self) -> Option<u16> {
        self.running.lock().await.as_ref().map(|r| r.port)
    }

    /// Number of peers currently heard from
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn beacon_target(&self) -> SocketAddr {
        SocketAddr::new(self.config.broadcast_addr, self.config.discovery_port)
    }
}

/// Bind the shared discovery socket with broadcast enabled
fn bind_discovery_socket(port: u16) -> TransportResult<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .map_err(|e| TransportError::BindFailed(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;
    socket
        .set_broadcast(true)
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket
        .bind(&addr.into())
        .map_err(|e| TransportError::BindFailed(format!("{addr}: {e}")))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::BindFailed(e.to_string()))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|e| TransportError::BindFailed(e.to_string()))
}

#[async_trait]
impl TransportAdapter for LanTransport {
    async fn start(&self, advert: Advertisement) -> TransportResult<mpsc::Receiver<TransportEvent>> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::BindFailed("already started".to_string()));
        }

        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {e}", self.config.listen_addr)))?;
        let port = listener.local_addr()?.port();
        let socket = Arc::new(bind_discovery_socket(self.config.discovery_port)?);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let hello = Beacon {
            kind: BeaconKind::Hello,
            id: advert.id.clone(),
            display_name: advert.display_name.clone(),
            port,
        };

        let tasks = vec![
            tokio::spawn(beacon_loop(
                Arc::clone(&socket),
                hello,
                self.beacon_target(),
                self.config.beacon_interval,
            )),
            tokio::spawn(listen_loop(
                Arc::clone(&socket),
                advert.id.clone(),
                Arc::clone(&self.peers),
                tx.clone(),
            )),
            tokio::spawn(sweep_loop(
                Arc::clone(&self.peers),
                tx.clone(),
                self.config.beacon_interval,
                self.config.peer_timeout,
            )),
            tokio::spawn(accept_loop(listener, tx, self.config.read_timeout)),
        ];

        tracing::info!(
            id = %advert.id,
            name = %advert.display_name,
            stream_port = port,
            discovery_port = self.config.discovery_port,
            "LAN transport started"
        );

        *running = Some(Running {
            advert,
            socket,
            port,
            tasks,
        });
        self.started.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&self) -> TransportResult<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        self.started.store(false, Ordering::SeqCst);

        let bye = Beacon {
            kind: BeaconKind::Bye,
            id: running.advert.id.clone(),
            display_name: running.advert.display_name.clone(),
            port: running.port,
        };
        match bye.encode() {
            Ok(datagram) => {
                if let Err(e) = running.socket.send_to(&datagram, self.beacon_target()).await {
                    tracing::debug!(error = %e, "Failed to send bye beacon");
                }
            }
            Err(e) => tracing::debug!(error = %e, "Failed to encode bye beacon"),
        }

        for task in running.tasks {
            task.abort();
        }
        self.peers.clear();

        tracing::info!(id = %running.advert.id, "LAN transport stopped");
        Ok(())
    }

    async fn open_outgoing(&self, endpoint: &EndpointId) -> TransportResult<Box<dyn ByteSink>> {
        let sender = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|r| r.advert.id.clone())
            .ok_or(TransportError::Closed)?;

        let addr = self
            .peers
            .get(endpoint)
            .map(|peer| peer.addr)
            .ok_or_else(|| TransportError::UnknownEndpoint(endpoint.clone()))?;

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        tracing::debug!(endpoint = %endpoint, addr = %addr, "Opened outgoing stream");
        Ok(Box::new(TcpSink { stream, sender }))
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

async fn beacon_loop(socket: Arc<UdpSocket>, hello: Beacon, target: SocketAddr, every: Duration) {
    let datagram = match hello.encode() {
        Ok(datagram) => datagram,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode beacon");
            return;
        }
    };

    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(&datagram, target).await {
            tracing::debug!(error = %e, target = %target, "Beacon send failed");
        }
    }
}

async fn listen_loop(
    socket: Arc<UdpSocket>,
    local: EndpointId,
    peers: PeerTable,
    events: mpsc::Sender<TransportEvent>,
) {
    let mut buf = vec![0u8; MAX_BEACON_LEN];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "Discovery socket failed");
                return;
            }
        };

        let beacon = match Beacon::decode(&buf[..len]) {
            Ok(beacon) => beacon,
            Err(e) => {
                tracing::trace!(from = %from, error = %e, "Ignoring malformed beacon");
                continue;
            }
        };
        if beacon.id == local {
            continue;
        }

        let event = match beacon.kind {
            BeaconKind::Hello => {
                peers.insert(
                    beacon.id.clone(),
                    PeerRecord {
                        addr: SocketAddr::new(from.ip(), beacon.port),
                        last_seen: Instant::now(),
                    },
                );
                TransportEvent::EndpointAppeared {
                    id: beacon.id,
                    display_name: beacon.display_name,
                }
            }
            BeaconKind::Bye => {
                if peers.remove(&beacon.id).is_none() {
                    continue;
                }
                TransportEvent::EndpointDisappeared { id: beacon.id }
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    }
}

async fn sweep_loop(
    peers: PeerTable,
    events: mpsc::Sender<TransportEvent>,
    every: Duration,
    timeout: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;

        let stale: Vec<EndpointId> = peers
            .iter()
            .filter(|entry| entry.last_seen.elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        for id in stale {
            if peers
                .remove_if(&id, |_, record| record.last_seen.elapsed() > timeout)
                .is_some()
            {
                tracing::debug!(endpoint = %id, "Peer timed out");
                if events
                    .send(TransportEvent::EndpointDisappeared { id })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::Sender<TransportEvent>,
    read_timeout: Duration,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!(peer = %addr, "Accepted inbound stream");
                tokio::spawn(handle_inbound(stream, events.clone(), read_timeout));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept inbound stream");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Read one framed item from `stream` and relay it as an inbound stream
///
/// A peer that sends nothing for `read_timeout` fails the stream.
async fn handle_inbound<S>(
    mut stream: S,
    events: mpsc::Sender<TransportEvent>,
    read_timeout: Duration,
) where
    S: AsyncRead + Unpin,
{
    let header = match tokio::time::timeout(read_timeout, read_header(&mut stream)).await {
        Ok(Ok(header)) => header,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Dropping inbound stream with bad header");
            return;
        }
        Err(_) => {
            tracing::debug!("Dropping inbound stream that sent no header");
            return;
        }
    };

    let (tx, inbound) = InboundStream::channel(header.sender.clone(), STREAM_CHANNEL_CAPACITY);
    if events.send(TransportEvent::InboundOpened(inbound)).await.is_err() {
        return;
    }

    let expected = header.payload.length;
    if tx.send(InboundEvent::Header(header.payload)).await.is_err() {
        return;
    }

    let mut received: u64 = 0;
    let mut buf = vec![0u8; STREAM_READ_SIZE];
    loop {
        let read = match tokio::time::timeout(read_timeout, stream.read(&mut buf)).await {
            Ok(read) => read,
            Err(_) => {
                tracing::debug!(received, "Inbound stream stalled");
                let _ = tx
                    .send(InboundEvent::Failed(TransportError::Io("timed out".to_string())))
                    .await;
                return;
            }
        };
        match read {
            Ok(0) => {
                let last = match expected {
                    Some(expected) if received < expected => {
                        InboundEvent::Failed(TransportError::Truncated {
                            expected,
                            actual: received,
                        })
                    }
                    Some(expected) if received > expected => InboundEvent::Failed(
                        TransportError::Protocol(format!(
                            "received {received} bytes, {expected} announced"
                        )),
                    ),
                    _ => InboundEvent::Finished,
                };
                let _ = tx.send(last).await;
                return;
            }
            Ok(n) => {
                received += n as u64;
                if tx.send(InboundEvent::Data(buf[..n].to_vec())).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(InboundEvent::Failed(e.into())).await;
                return;
            }
        }
    }
}

/// Outgoing TCP stream
struct TcpSink {
    stream: TcpStream,
    sender: EndpointId,
}

#[async_trait]
impl ByteSink for TcpSink {
    async fn send_header(&mut self, header: &PayloadHeader) -> TransportResult<()> {
        let framed = StreamHeader {
            sender: self.sender.clone(),
            payload: header.clone(),
        };
        write_header(&mut self.stream, &framed).await
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> TransportResult<()> {
        self.stream.write_all(chunk).await?;
        Ok(())
    }

    async fn finish(&mut self) -> TransportResult<()> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
