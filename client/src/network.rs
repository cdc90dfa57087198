//! Network thread and the client frame loop
//!
//! macroquad owns the main thread, so the transport lives on its own thread
//! with a current-thread tokio runtime. The two sides exchange messages over
//! unbounded mpsc channels and the frame loop never blocks on the network.

use crate::input::{InputManager, ToggleEvents};
use crate::rendering::{HudInfo, Renderer};
use crate::view::ClientWorldView;
use log::{debug, error, info, warn};
use macroquad::prelude::{get_frame_time, next_frame};
use shared::{
    Controls, FixedTimestep, Host, HostConfig, Message, PeerId, TransportEvent, TICK_RATE,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::sleep_until;

/// How long the network loop sleeps when nothing is waiting on fake ping
const IDLE_WAKE: Duration = Duration::from_secs(3600);

/// What the network thread reports to the frame loop
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Connected,
    Message { message: Message, rtt_ms: f32 },
    Disconnected,
}

#[derive(Debug)]
enum Command {
    Send(Message),
    Shutdown,
}

/// Frame loop side of the network thread
pub struct NetworkHandle {
    commands: UnboundedSender<Command>,
    events: UnboundedReceiver<NetEvent>,
    thread: Option<JoinHandle<()>>,
}

impl NetworkHandle {
    /// Starts the network thread and begins connecting to `server`.
    ///
    /// `fake_ping_ms` delays both directions by half the value each.
    pub fn spawn(
        server: SocketAddr,
        config: HostConfig,
        fake_ping_ms: u64,
    ) -> Result<Self, std::io::Error> {
        let (command_tx, command_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let thread = std::thread::Builder::new()
            .name("network".to_string())
            .spawn(move || {
                runtime.block_on(network_loop(
                    server,
                    config,
                    Duration::from_millis(fake_ping_ms / 2),
                    command_rx,
                    event_tx,
                ));
            })?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            thread: Some(thread),
        })
    }

    /// Queues a message for the server. Returns false once the thread is gone.
    pub fn send(&self, message: Message) -> bool {
        self.commands.send(Command::Send(message)).is_ok()
    }

    pub fn try_recv(&mut self) -> Option<NetEvent> {
        self.events.try_recv().ok()
    }

    /// Disconnects from the server and waits for the thread to finish
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Network thread panicked");
            }
        }
    }
}

impl Drop for NetworkHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Holds items back until a fixed delay has passed since they were pushed.
/// The delay is constant, so items come due in push order.
struct DelayLine<T> {
    delay: Duration,
    queue: VecDeque<(tokio::time::Instant, T)>,
}

impl<T> DelayLine<T> {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            queue: VecDeque::new(),
        }
    }

    fn push(&mut self, item: T, now: tokio::time::Instant) {
        self.queue.push_back((now + self.delay, item));
    }

    fn next_due(&self) -> Option<tokio::time::Instant> {
        self.queue.front().map(|(due, _)| *due)
    }

    fn pop_due(&mut self, now: tokio::time::Instant) -> Option<T> {
        match self.queue.front() {
            Some((due, _)) if *due <= now => self.queue.pop_front().map(|(_, item)| item),
            _ => None,
        }
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}

async fn network_loop(
    server: SocketAddr,
    config: HostConfig,
    delay: Duration,
    mut commands: UnboundedReceiver<Command>,
    events: UnboundedSender<NetEvent>,
) {
    let mut host = match Host::connect(server, config).await {
        Ok(host) => host,
        Err(e) => {
            error!("Failed to open connection to {}: {}", server, e);
            let _ = events.send(NetEvent::Disconnected);
            return;
        }
    };
    let mut server_peer: Option<PeerId> = None;
    let mut outbound: DelayLine<Message> = DelayLine::new(delay);
    let mut inbound: DelayLine<NetEvent> = DelayLine::new(delay);

    loop {
        let now = tokio::time::Instant::now();

        // Only messages queued after connect are ever in the outbound line
        if let (Some(peer), Some(due)) = (server_peer, outbound.next_due()) {
            if due <= now {
                while let Some(message) = outbound.pop_due(now) {
                    if let Err(e) = host.send(peer, message.channel(), message.encode()) {
                        error!("Failed to send {:?}: {}", message.kind(), e);
                    }
                }
                host.flush().await;
            }
        }
        while let Some(event) = inbound.pop_due(now) {
            if events.send(event).is_err() {
                return;
            }
        }

        let wake = match (outbound.next_due(), inbound.next_due()) {
            (Some(a), Some(b)) => a.min(b),
            (Some(due), None) | (None, Some(due)) => due,
            (None, None) => now + IDLE_WAKE,
        };

        tokio::select! {
            _ = sleep_until(wake) => {}

            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if server_peer.is_some() {
                        outbound.push(message, tokio::time::Instant::now());
                    } else {
                        debug!("Dropping {:?} before connect", message.kind());
                    }
                }
                Some(Command::Shutdown) | None => {
                    let dropped = outbound.pending();
                    if dropped > 0 {
                        debug!("Dropping {} delayed messages on shutdown", dropped);
                    }
                    if let Some(peer) = server_peer {
                        if host.disconnect(peer).is_ok() {
                            host.flush().await;
                        }
                    }
                    info!("Network thread stopped");
                    return;
                }
            },

            event = host.next_event() => match event {
                Ok(TransportEvent::Connect { peer }) => {
                    info!("Connected to {}", server);
                    server_peer = Some(peer);
                    if let Err(e) = host.send(peer, Message::Join.channel(), Message::Join.encode()) {
                        error!("Failed to send JOIN: {}", e);
                    }
                    host.flush().await;
                    if events.send(NetEvent::Connected).is_err() {
                        return;
                    }
                }
                Ok(TransportEvent::Receive { peer, payload, .. }) => {
                    match Message::decode(&payload) {
                        Ok(message) => {
                            let rtt_ms = host.rtt_ms(peer).unwrap_or(0.0);
                            let event = NetEvent::Message { message, rtt_ms };
                            inbound.push(event, tokio::time::Instant::now());
                        }
                        Err(e) => warn!("Malformed packet from server: {}", e),
                    }
                }
                Ok(TransportEvent::Disconnect { .. }) => {
                    warn!("Disconnected from server");
                    let _ = events.send(NetEvent::Disconnected);
                    return;
                }
                Err(e) => {
                    error!("Transport error: {}", e);
                    let _ = events.send(NetEvent::Disconnected);
                    return;
                }
            },
        }
    }
}

pub struct Client {
    network: NetworkHandle,
    view: ClientWorldView,
    input_manager: InputManager,
    renderer: Renderer,
    timestep: FixedTimestep,
    started: Instant,

    connected: bool,
    rtt_ms: Option<f32>,
    show_history: bool,
}

impl Client {
    pub fn new(server: SocketAddr, fake_ping_ms: u64) -> Result<Self, Box<dyn std::error::Error>> {
        let network = NetworkHandle::spawn(server, HostConfig::default(), fake_ping_ms)?;

        Ok(Self::with_network(network))
    }

    fn with_network(network: NetworkHandle) -> Self {
        Client {
            network,
            view: ClientWorldView::new(),
            input_manager: InputManager::new(),
            renderer: Renderer::new(),
            timestep: FixedTimestep::from_tick_rate(TICK_RATE),
            started: Instant::now(),
            connected: false,
            rtt_ms: None,
            show_history: false,
        }
    }

    pub fn view(&self) -> &ClientWorldView {
        &self.view
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn handle_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Connected => {
                self.connected = true;
            }
            NetEvent::Message { message, rtt_ms } => {
                if rtt_ms > 0.0 {
                    self.rtt_ms = Some(rtt_ms);
                }
                self.view.apply_message(message, rtt_ms);
            }
            NetEvent::Disconnected => {
                self.connected = false;
                self.rtt_ms = None;
            }
        }
    }

    fn poll_network(&mut self) {
        while let Some(event) = self.network.try_recv() {
            self.handle_net_event(event);
        }
    }

    fn handle_toggles(&mut self, toggles: ToggleEvents) {
        let features = &mut self.view.toggles;
        if toggles.prediction {
            features.prediction = !features.prediction;
            info!("Client-side prediction: {}", features.prediction);
        }
        if toggles.reconciliation {
            features.reconciliation = !features.reconciliation;
            info!("Server reconciliation: {}", features.reconciliation);
        }
        if toggles.interpolation {
            features.interpolation = !features.interpolation;
            info!("Interpolation: {}", features.interpolation);
        }
        if toggles.history_overlay {
            self.show_history = !self.show_history;
        }
    }

    /// One fixed client tick: predict locally and send the input
    fn tick(&mut self, controls: Controls) {
        let timestamp_ms = self.started.elapsed().as_millis() as u64;
        if let Some(input) = self.view.predict(controls, timestamp_ms) {
            if self.connected && !self.network.send(Message::Input(input)) {
                self.connected = false;
            }
        }
    }

    fn hud(&self) -> HudInfo {
        HudInfo {
            toggles: self.view.toggles,
            connected: self.connected,
            rtt_ms: self.rtt_ms,
            show_history: self.show_history,
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            self.poll_network();

            let (toggles, controls) = self.input_manager.update();
            if toggles.quit {
                break;
            }
            if toggles.any() {
                self.handle_toggles(toggles);
            }

            self.timestep
                .accumulate(Duration::from_secs_f32(get_frame_time().max(0.0)));
            while self.timestep.consume_tick() {
                self.tick(controls);
            }

            let render_time = self.view.render_time_ms();
            self.view.interpolate(render_time);

            let hud = self.hud();
            self.renderer.render(&self.view, &hud);

            next_frame().await;
        }

        info!("Shutting down");
        self.network.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Channel, Entity, Snapshot};

    fn offline_client() -> Client {
        // Nothing listens on the discard port; the handshake just retries
        let server: SocketAddr = "127.0.0.1:9".parse().unwrap();
        Client::new(server, 0).unwrap()
    }

    #[test]
    fn test_connect_and_messages_update_view() {
        let mut client = offline_client();
        assert!(!client.is_connected());

        client.handle_net_event(NetEvent::Connected);
        assert!(client.is_connected());

        let entity = Entity::new(4, 1.0, 2.0, 0.0, 0xFF00FF00);
        client.handle_net_event(NetEvent::Message {
            message: Message::NewEntity(entity),
            rtt_ms: 40.0,
        });
        client.handle_net_event(NetEvent::Message {
            message: Message::SetControlledEntity { entity_id: 4 },
            rtt_ms: 40.0,
        });

        assert_eq!(client.view().controlled(), Some(4));
        assert_eq!(client.rtt_ms, Some(40.0));

        client.handle_net_event(NetEvent::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.rtt_ms, None);
    }

    #[test]
    fn test_toggles_flip_view_features() {
        let mut client = offline_client();

        client.handle_toggles(ToggleEvents {
            prediction: true,
            interpolation: true,
            history_overlay: true,
            ..Default::default()
        });

        assert!(!client.view.toggles.prediction);
        assert!(client.view.toggles.reconciliation);
        assert!(!client.view.toggles.interpolation);
        assert!(client.show_history);

        client.handle_toggles(ToggleEvents {
            prediction: true,
            ..Default::default()
        });
        assert!(client.view.toggles.prediction);
    }

    #[test]
    fn test_tick_predicts_controlled_entity() {
        let mut client = offline_client();
        client.handle_net_event(NetEvent::Message {
            message: Message::NewEntity(Entity::new(1, 0.0, 0.0, 0.0, 0xFFFFFFFF)),
            rtt_ms: 0.0,
        });
        client.handle_net_event(NetEvent::Message {
            message: Message::SetControlledEntity { entity_id: 1 },
            rtt_ms: 0.0,
        });

        client.tick(Controls::new(1.0, 0.0));
        client.tick(Controls::new(1.0, 0.0));

        assert_eq!(client.view().prediction().next_frame(), 3);
        assert_eq!(client.view().prediction().input_history().len(), 2);
        assert!(client.view().controlled_entity().unwrap().vx > 0.0);
    }

    #[test]
    fn test_remote_snapshot_reaches_interpolator() {
        let mut client = offline_client();
        client.handle_net_event(NetEvent::Message {
            message: Message::NewEntity(Entity::new(2, 0.0, 0.0, 0.0, 0xFFFFFFFF)),
            rtt_ms: 0.0,
        });

        let snapshot = Snapshot {
            entity_id: 2,
            x: 3.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            ori: 0.0,
            omega: 0.0,
            timestamp_ms: 500,
            frame: 30,
            ack_frame: 0,
        };
        client.handle_net_event(NetEvent::Message {
            message: Message::Snapshot(snapshot),
            rtt_ms: 0.0,
        });

        assert_eq!(client.view().interpolator(2).map(|i| i.len()), Some(1));
    }

    fn snapshot_at(frame: u32) -> Snapshot {
        Snapshot {
            entity_id: 7,
            x: frame as f32,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            ori: 0.0,
            omega: 0.0,
            timestamp_ms: u64::from(frame) * 16,
            frame,
            ack_frame: 0,
        }
    }

    #[test]
    fn test_delay_line_releases_in_order_when_due() {
        let delay = Duration::from_millis(50);
        let mut line = DelayLine::new(delay);
        let start = tokio::time::Instant::now();

        line.push(1, start);
        line.push(2, start + Duration::from_millis(10));
        assert_eq!(line.next_due(), Some(start + delay));

        assert_eq!(line.pop_due(start + Duration::from_millis(49)), None);
        assert_eq!(line.pop_due(start + delay), Some(1));
        assert_eq!(line.pop_due(start + delay), None);
        assert_eq!(line.pop_due(start + Duration::from_millis(60)), Some(2));
        assert_eq!(line.pending(), 0);
        assert_eq!(line.next_due(), None);
    }

    /// A burst under fake ping arrives one delay late, not one delay per message
    #[tokio::test]
    async fn test_fake_ping_does_not_serialize_burst() {
        const BURST: usize = 30;
        let mut server = Host::bind("127.0.0.1:0", HostConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        // 100 ms each way
        let mut handle = NetworkHandle::spawn(addr, HostConfig::default(), 200).unwrap();

        let peer = loop {
            if let TransportEvent::Connect { peer } = server.next_event().await.unwrap() {
                break peer;
            }
        };
        loop {
            if let TransportEvent::Receive { payload, .. } = server.next_event().await.unwrap() {
                if Message::decode(&payload).unwrap() == Message::Join {
                    break;
                }
            }
        }

        for frame in 0..BURST as u32 {
            let message = Message::Snapshot(snapshot_at(frame));
            server
                .send(peer, Channel::Unreliable, message.encode())
                .unwrap();
        }
        let sent_at = Instant::now();
        server.flush().await;

        let mut received = 0;
        let deadline = sent_at + Duration::from_secs(2);
        while received < BURST && Instant::now() < deadline {
            while let Some(event) = handle.try_recv() {
                if matches!(event, NetEvent::Message { .. }) {
                    received += 1;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let elapsed = sent_at.elapsed();

        assert_eq!(received, BURST);
        assert!(elapsed >= Duration::from_millis(90), "arrived after {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1000), "arrived after {:?}", elapsed);
        handle.shutdown();
    }
}
