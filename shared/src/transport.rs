//! Two-channel datagram transport over UDP
//!
//! Each datagram carries one bincode-encoded [`Envelope`]. Channel 0 is
//! reliable and ordered: every payload gets a sequence number, is resent until
//! acknowledged and is delivered in sequence order exactly once. Channel 1 is
//! fire-and-forget.
//!
//! A [`Host`] either listens for peers ([`Host::bind`]) or owns a single
//! outgoing connection ([`Host::connect`]). Sends are queued and written by
//! [`Host::flush`]; [`Host::next_event`] flushes, runs the resend, ping and
//! timeout timers and waits for the next connect, receive or disconnect.

use bincode::Options;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;

pub type PeerId = u32;

/// Largest datagram the transport sends or accepts
pub const MAX_DATAGRAM: usize = 4096;

/// Granularity of the resend, ping and timeout timers
const SERVICE_INTERVAL: Duration = Duration::from_millis(10);

/// RTT smoothing factor applied to each new sample
const RTT_SMOOTHING: f32 = 0.125;

/// How far past the next expected reliable sequence a datagram may be buffered
pub const REORDER_WINDOW: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Reliable,
    Unreliable,
}

impl Channel {
    pub fn id(self) -> u8 {
        match self {
            Channel::Reliable => 0,
            Channel::Unreliable => 1,
        }
    }

    pub fn from_id(id: u8) -> Option<Channel> {
        match id {
            0 => Some(Channel::Reliable),
            1 => Some(Channel::Unreliable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connect {
        peer: PeerId,
    },
    Receive {
        peer: PeerId,
        channel: Channel,
        payload: Vec<u8>,
    },
    Disconnect {
        peer: PeerId,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("envelope encoding failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("peer {0} has not completed the handshake")]
    NotConnected(PeerId),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
enum Envelope {
    Connect,
    Accept,
    Reliable { sequence: u32, payload: Vec<u8> },
    Ack { sequence: u32 },
    Unreliable { payload: Vec<u8> },
    Ping { sent_ms: u64 },
    Pong { sent_ms: u64 },
    Disconnect,
}

fn wire_options() -> impl Options {
    bincode::options().with_limit(MAX_DATAGRAM as u64)
}

fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, TransportError> {
    Ok(wire_options().serialize(envelope)?)
}

fn decode_envelope(data: &[u8]) -> Result<Envelope, bincode::Error> {
    wire_options().deserialize(data)
}

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub max_peers: usize,
    pub resend_interval: Duration,
    pub connect_retry_interval: Duration,
    pub ping_interval: Duration,
    pub timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_peers: 32,
            resend_interval: Duration::from_millis(100),
            connect_retry_interval: Duration::from_millis(250),
            ping_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct PendingReliable {
    datagram: Vec<u8>,
    last_sent: Instant,
}

/// Sequencing state of the reliable channel for one peer
#[derive(Debug, Default)]
pub struct ReliableChannel {
    next_send: u32,
    unacked: BTreeMap<u32, PendingReliable>,
    next_expected: u32,
    reorder: BTreeMap<u32, Vec<u8>>,
}

impl ReliableChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next sequence number and returns the datagram to send
    fn wrap(&mut self, payload: Vec<u8>, now: Instant) -> Result<Vec<u8>, TransportError> {
        let sequence = self.next_send;
        let datagram = encode_envelope(&Envelope::Reliable { sequence, payload })?;
        self.next_send = self.next_send.wrapping_add(1);
        self.unacked.insert(
            sequence,
            PendingReliable {
                datagram: datagram.clone(),
                last_sent: now,
            },
        );
        Ok(datagram)
    }

    pub fn on_ack(&mut self, sequence: u32) {
        self.unacked.remove(&sequence);
    }

    /// Whether `sequence` should be acknowledged: anything already delivered,
    /// or ahead of delivery by less than [`REORDER_WINDOW`]. Sequence numbers
    /// compare with wrap-around.
    pub fn accepts(&self, sequence: u32) -> bool {
        let ahead = sequence.wrapping_sub(self.next_expected);
        let behind = self.next_expected.wrapping_sub(sequence);
        ahead < REORDER_WINDOW || behind <= u32::MAX / 2
    }

    /// Accepts an incoming sequenced payload and returns everything that is
    /// now deliverable in order. Duplicates and sequences outside the reorder
    /// window yield nothing.
    pub fn on_receive(&mut self, sequence: u32, payload: Vec<u8>) -> Vec<Vec<u8>> {
        if sequence.wrapping_sub(self.next_expected) >= REORDER_WINDOW {
            return Vec::new();
        }
        self.reorder.entry(sequence).or_insert(payload);

        let mut ready = Vec::new();
        while let Some(payload) = self.reorder.remove(&self.next_expected) {
            ready.push(payload);
            self.next_expected = self.next_expected.wrapping_add(1);
        }
        ready
    }

    fn due_resends(&mut self, now: Instant, interval: Duration) -> Vec<Vec<u8>> {
        self.unacked
            .values_mut()
            .filter(|pending| now.duration_since(pending.last_sent) >= interval)
            .map(|pending| {
                pending.last_sent = now;
                pending.datagram.clone()
            })
            .collect()
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    pub fn buffered_count(&self) -> usize {
        self.reorder.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Connecting,
    Connected,
}

#[derive(Debug)]
struct Peer {
    addr: SocketAddr,
    state: PeerState,
    reliable: ReliableChannel,
    rtt_ms: Option<f32>,
    last_received: Instant,
    last_ping: Instant,
    last_connect_attempt: Instant,
}

impl Peer {
    fn new(addr: SocketAddr, state: PeerState, now: Instant) -> Self {
        Self {
            addr,
            state,
            reliable: ReliableChannel::new(),
            rtt_ms: None,
            last_received: now,
            last_ping: now,
            last_connect_attempt: now,
        }
    }

    fn record_rtt(&mut self, sample_ms: f32) {
        self.rtt_ms = Some(match self.rtt_ms {
            Some(rtt) => rtt + (sample_ms - rtt) * RTT_SMOOTHING,
            None => sample_ms,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Listener,
    Connector,
}

pub struct Host {
    socket: UdpSocket,
    role: Role,
    config: HostConfig,
    peers: HashMap<PeerId, Peer>,
    by_addr: HashMap<SocketAddr, PeerId>,
    next_peer_id: PeerId,
    events: VecDeque<TransportEvent>,
    outbox: VecDeque<(SocketAddr, Vec<u8>)>,
    recv_buf: Vec<u8>,
    started: Instant,
    next_service: Instant,
}

impl Host {
    /// Listens for incoming peers on `addr`
    pub async fn bind(addr: &str, config: HostConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Transport listening on {}", socket.local_addr()?);
        Ok(Self::with_socket(socket, Role::Listener, config))
    }

    /// Opens a connection to `server`. The peer is reported through a
    /// [`TransportEvent::Connect`] once the server accepts it.
    pub async fn connect(server: SocketAddr, config: HostConfig) -> Result<Self, TransportError> {
        let local = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await?;
        let mut host = Self::with_socket(socket, Role::Connector, config);

        let now = Instant::now();
        let peer_id = host.allocate_peer_id();
        host.peers
            .insert(peer_id, Peer::new(server, PeerState::Connecting, now));
        host.by_addr.insert(server, peer_id);
        host.queue_envelope(server, &Envelope::Connect)?;

        info!("Connecting to {}", server);
        Ok(host)
    }

    fn with_socket(socket: UdpSocket, role: Role, config: HostConfig) -> Self {
        let now = Instant::now();
        Self {
            socket,
            role,
            config,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            next_peer_id: 0,
            events: VecDeque::new(),
            outbox: VecDeque::new(),
            recv_buf: vec![0u8; MAX_DATAGRAM],
            started: now,
            next_service: now,
        }
    }

    fn allocate_peer_id(&mut self) -> PeerId {
        let id = self.next_peer_id;
        self.next_peer_id = self.next_peer_id.wrapping_add(1);
        id
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Milliseconds since the host was created
    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.state == PeerState::Connected)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn peer_count(&self) -> usize {
        self.peers
            .values()
            .filter(|peer| peer.state == PeerState::Connected)
            .count()
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers
            .get(&peer)
            .map_or(false, |p| p.state == PeerState::Connected)
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|p| p.addr)
    }

    /// Smoothed round-trip time, once at least one ping has returned
    pub fn rtt_ms(&self, peer: PeerId) -> Option<f32> {
        self.peers.get(&peer).and_then(|p| p.rtt_ms)
    }

    /// Payloads sent on the reliable channel that are still awaiting an ack
    pub fn unacked(&self, peer: PeerId) -> usize {
        self.peers
            .get(&peer)
            .map_or(0, |p| p.reliable.unacked_count())
    }

    /// Queues `payload` for `peer`. Nothing is written until the next flush.
    pub fn send(
        &mut self,
        peer: PeerId,
        channel: Channel,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let now = Instant::now();
        let target = self
            .peers
            .get_mut(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        if target.state != PeerState::Connected {
            return Err(TransportError::NotConnected(peer));
        }

        let datagram = match channel {
            Channel::Reliable => target.reliable.wrap(payload, now)?,
            Channel::Unreliable => encode_envelope(&Envelope::Unreliable { payload })?,
        };
        let addr = target.addr;
        self.outbox.push_back((addr, datagram));
        Ok(())
    }

    /// Queues `payload` for every connected peer
    pub fn broadcast(&mut self, channel: Channel, payload: &[u8]) -> Result<(), TransportError> {
        for peer in self.peer_ids() {
            self.send(peer, channel, payload.to_vec())?;
        }
        Ok(())
    }

    /// Drops `peer` and tells the other end. No local event is raised.
    pub fn disconnect(&mut self, peer: PeerId) -> Result<(), TransportError> {
        let removed = self
            .peers
            .remove(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        self.by_addr.remove(&removed.addr);
        self.queue_envelope(removed.addr, &Envelope::Disconnect)?;
        debug!("Disconnected peer {} at {}", peer, removed.addr);
        Ok(())
    }

    /// Writes every queued datagram to the socket. A datagram the socket
    /// refuses is logged and dropped.
    pub async fn flush(&mut self) {
        while let Some((addr, datagram)) = self.outbox.front() {
            if let Err(e) = self.socket.send_to(datagram, *addr).await {
                warn!("Failed to send datagram to {}: {}", addr, e);
            }
            self.outbox.pop_front();
        }
    }

    /// Waits for the next transport event.
    ///
    /// Cancel safe: queued events and sends survive a dropped call.
    pub async fn next_event(&mut self) -> Result<TransportEvent, TransportError> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }

            let now = Instant::now();
            if now >= self.next_service {
                self.service_timers(now)?;
                self.next_service = now + SERVICE_INTERVAL;
                continue;
            }

            self.flush().await;

            let wake = tokio::time::Instant::from_std(self.next_service);
            tokio::select! {
                received = self.socket.recv_from(&mut self.recv_buf) => match received {
                    Ok((len, addr)) => {
                        let datagram = self.recv_buf[..len].to_vec();
                        self.handle_datagram(addr, &datagram, Instant::now())?;
                    }
                    Err(e) => warn!("Error receiving datagram: {}", e),
                },
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    fn queue_envelope(&mut self, addr: SocketAddr, envelope: &Envelope) -> Result<(), TransportError> {
        let datagram = encode_envelope(envelope)?;
        self.outbox.push_back((addr, datagram));
        Ok(())
    }

    fn handle_datagram(
        &mut self,
        addr: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) -> Result<(), TransportError> {
        let envelope = match decode_envelope(datagram) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed datagram from {}: {}", addr, e);
                return Ok(());
            }
        };

        let known = self.by_addr.get(&addr).copied();
        let peer_id = match known {
            Some(peer_id) => peer_id,
            None => {
                if envelope == Envelope::Connect && self.role == Role::Listener {
                    self.accept_peer(addr, now)?;
                } else {
                    debug!("Ignoring datagram from unknown address {}", addr);
                }
                return Ok(());
            }
        };

        let sent_ms_now = self.now_ms();
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return Ok(());
        };
        peer.last_received = now;

        match envelope {
            Envelope::Connect => {
                // Accept was lost; the peer already exists
                self.queue_envelope(addr, &Envelope::Accept)?;
            }
            Envelope::Accept => {
                if peer.state == PeerState::Connecting {
                    peer.state = PeerState::Connected;
                    info!("Connected to {} as peer {}", addr, peer_id);
                    self.events
                        .push_back(TransportEvent::Connect { peer: peer_id });
                }
            }
            Envelope::Reliable { sequence, payload } => {
                // Left unacked until the handshake completes so it is resent
                if peer.state != PeerState::Connected {
                    return Ok(());
                }
                if !peer.reliable.accepts(sequence) {
                    debug!("Refusing reliable sequence {} from {}", sequence, addr);
                    return Ok(());
                }
                let ready = peer.reliable.on_receive(sequence, payload);
                self.queue_envelope(addr, &Envelope::Ack { sequence })?;
                for payload in ready {
                    self.events.push_back(TransportEvent::Receive {
                        peer: peer_id,
                        channel: Channel::Reliable,
                        payload,
                    });
                }
            }
            Envelope::Ack { sequence } => peer.reliable.on_ack(sequence),
            Envelope::Unreliable { payload } => {
                if peer.state == PeerState::Connected {
                    self.events.push_back(TransportEvent::Receive {
                        peer: peer_id,
                        channel: Channel::Unreliable,
                        payload,
                    });
                }
            }
            Envelope::Ping { sent_ms } => {
                self.queue_envelope(addr, &Envelope::Pong { sent_ms })?;
            }
            Envelope::Pong { sent_ms } => {
                peer.record_rtt(sent_ms_now.saturating_sub(sent_ms) as f32);
            }
            Envelope::Disconnect => {
                self.peers.remove(&peer_id);
                self.by_addr.remove(&addr);
                info!("Peer {} at {} disconnected", peer_id, addr);
                self.events
                    .push_back(TransportEvent::Disconnect { peer: peer_id });
            }
        }

        Ok(())
    }

    fn accept_peer(&mut self, addr: SocketAddr, now: Instant) -> Result<(), TransportError> {
        if self.peers.len() >= self.config.max_peers {
            warn!("Refusing {}: peer limit {} reached", addr, self.config.max_peers);
            return self.queue_envelope(addr, &Envelope::Disconnect);
        }

        let peer_id = self.allocate_peer_id();
        self.peers
            .insert(peer_id, Peer::new(addr, PeerState::Connected, now));
        self.by_addr.insert(addr, peer_id);
        self.queue_envelope(addr, &Envelope::Accept)?;

        info!("Accepted peer {} from {}", peer_id, addr);
        self.events.push_back(TransportEvent::Connect { peer: peer_id });
        Ok(())
    }

    fn service_timers(&mut self, now: Instant) -> Result<(), TransportError> {
        let sent_ms = self.now_ms();
        let mut expired = Vec::new();
        let mut outgoing = Vec::new();

        for (&peer_id, peer) in self.peers.iter_mut() {
            if now.duration_since(peer.last_received) >= self.config.timeout {
                expired.push(peer_id);
                continue;
            }

            match peer.state {
                PeerState::Connecting => {
                    if now.duration_since(peer.last_connect_attempt)
                        >= self.config.connect_retry_interval
                    {
                        peer.last_connect_attempt = now;
                        outgoing.push((peer.addr, encode_envelope(&Envelope::Connect)?));
                    }
                }
                PeerState::Connected => {
                    for datagram in peer
                        .reliable
                        .due_resends(now, self.config.resend_interval)
                    {
                        outgoing.push((peer.addr, datagram));
                    }
                    if now.duration_since(peer.last_ping) >= self.config.ping_interval {
                        peer.last_ping = now;
                        outgoing.push((peer.addr, encode_envelope(&Envelope::Ping { sent_ms })?));
                    }
                }
            }
        }

        self.outbox.extend(outgoing);

        for peer_id in expired {
            if let Some(peer) = self.peers.remove(&peer_id) {
                self.by_addr.remove(&peer.addr);
                warn!("Peer {} at {} timed out", peer_id, peer.addr);
                self.events
                    .push_back(TransportEvent::Disconnect { peer: peer_id });
            }
        }

        Ok(())
    }
}
