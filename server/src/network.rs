//! Server authority loop: transport events in, fixed-step simulation, snapshots out

use crate::world::WorldState;
use log::{debug, error, info, warn};
use shared::{
    FixedTimestep, Host, HostConfig, Message, PeerId, TransportError, TransportEvent, FIXED_DT,
    TICK_RATE,
};
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

/// Runtime settings of the server loop
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    /// How often TIME_SYNC is broadcast
    pub time_sync_interval: Duration,
    /// How often the loop wakes to check the tick accumulator
    pub wake_interval: Duration,
    /// Remove a disconnected peer's entity instead of leaving it in the world
    pub reap_disconnected: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            time_sync_interval: Duration::from_millis(1000),
            wake_interval: Duration::from_millis(5),
            reap_disconnected: false,
        }
    }
}

/// Main server coordinating networking and the authoritative simulation
pub struct Server {
    host: Host,
    world: WorldState,
    timestep: FixedTimestep,
    config: ServerConfig,
    last_time_sync: Option<Instant>,
}

impl Server {
    pub async fn new(addr: &str, config: ServerConfig) -> Result<Self, TransportError> {
        Self::with_world(addr, config, WorldState::new()).await
    }

    pub async fn with_world(
        addr: &str,
        config: ServerConfig,
        world: WorldState,
    ) -> Result<Self, TransportError> {
        let host_config = HostConfig {
            max_peers: config.max_clients,
            ..HostConfig::default()
        };
        let host = Host::bind(addr, host_config).await?;
        info!("Server listening on {}", host.local_addr()?);

        Ok(Server {
            host,
            world,
            timestep: FixedTimestep::from_tick_rate(TICK_RATE),
            config,
            last_time_sync: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.host.local_addr()
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn peer_count(&self) -> usize {
        self.host.peer_count()
    }

    fn send_message(&mut self, peer: PeerId, message: &Message) {
        if let Err(e) = self.host.send(peer, message.channel(), message.encode()) {
            error!("Failed to queue {:?} for peer {}: {}", message.kind(), peer, e);
        }
    }

    fn broadcast_message(&mut self, message: &Message) {
        if let Err(e) = self.host.broadcast(message.channel(), &message.encode()) {
            error!("Failed to broadcast {:?}: {}", message.kind(), e);
        }
    }

    /// Reacts to one transport event
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect { peer } => {
                info!("Peer {} connected", peer);
            }
            TransportEvent::Receive { peer, payload, .. } => match Message::decode(&payload) {
                Ok(message) => self.handle_message(peer, message),
                Err(e) => warn!("Dropping malformed packet from peer {}: {}", peer, e),
            },
            TransportEvent::Disconnect { peer } => self.handle_disconnect(peer),
        }
    }

    fn handle_message(&mut self, peer: PeerId, message: Message) {
        match message {
            Message::Join => self.handle_join(peer),
            Message::Input(input) => {
                if !self
                    .world
                    .apply_input(input.entity_id, input.controls(), input.frame)
                {
                    warn!(
                        "Input from peer {} for unknown entity {}",
                        peer, input.entity_id
                    );
                }
            }
            Message::State { entity_id, x, y } => {
                debug!(
                    "Ignoring client state for entity {} at ({}, {}) from peer {}",
                    entity_id, x, y, peer
                );
            }
            other => {
                warn!("Unexpected {:?} from peer {}", other.kind(), peer);
            }
        }
    }

    /// Roster first, then the new entity to everyone, then control to the joiner
    fn handle_join(&mut self, peer: PeerId) {
        let roster: Vec<Message> = self
            .world
            .entities()
            .iter()
            .map(|entity| Message::NewEntity(*entity))
            .collect();
        for message in &roster {
            self.send_message(peer, message);
        }

        if let Some(existing) = self.world.entity_of(peer) {
            info!("Peer {} re-joined, still controls entity {}", peer, existing);
            self.send_message(peer, &Message::SetControlledEntity { entity_id: existing });
            return;
        }

        let Some(entity_id) = self.world.spawn_entity(peer) else {
            warn!("No entity id left for peer {}", peer);
            return;
        };
        if let Some(entity) = self.world.get(entity_id).copied() {
            self.broadcast_message(&Message::NewEntity(entity));
        }
        self.send_message(peer, &Message::SetControlledEntity { entity_id });
    }

    fn handle_disconnect(&mut self, peer: PeerId) {
        let Some(entity_id) = self.world.release_peer(peer) else {
            info!("Peer {} disconnected", peer);
            return;
        };

        if self.config.reap_disconnected {
            self.world.remove_entity(entity_id);
            self.broadcast_message(&Message::EntityRemoved { entity_id });
            info!("Peer {} disconnected, entity {} removed", peer, entity_id);
        } else {
            info!("Peer {} disconnected, entity {} left in place", peer, entity_id);
        }
    }

    /// Runs one simulation tick and queues its outgoing messages
    pub fn tick(&mut self) {
        self.world.step_all(FIXED_DT);

        let timestamp_ms = self.host.now_ms();
        for snapshot in self.world.snapshots(timestamp_ms) {
            self.broadcast_message(&Message::Snapshot(snapshot));
        }

        let sync_due = self
            .last_time_sync
            .map_or(true, |last| last.elapsed() >= self.config.time_sync_interval);
        if sync_due {
            self.last_time_sync = Some(Instant::now());
            self.broadcast_message(&Message::TimeSync {
                server_time_ms: timestamp_ms,
            });
        }

        if self.world.tick % 60 == 0 && self.host.peer_count() > 0 {
            debug!(
                "Tick {}: {} peers, {} entities",
                self.world.tick,
                self.host.peer_count(),
                self.world.len()
            );
        }
    }

    /// Runs until Ctrl+C
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await
    }

    /// Main server loop, ends when `shutdown` completes
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()>,
    {
        let mut wake = interval(self.config.wake_interval);
        wake.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_wake = Instant::now();

        tokio::pin!(shutdown);
        info!("Server started successfully");

        loop {
            tokio::select! {
                event = self.host.next_event() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(e) => error!("Transport error: {}", e),
                },

                _ = wake.tick() => {
                    let now = Instant::now();
                    self.timestep.accumulate(now.duration_since(last_wake));
                    last_wake = now;

                    while self.timestep.consume_tick() {
                        self.tick();
                    }
                    self.host.flush().await;
                },

                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Channel, Controls, InputMessage};

    async fn test_server(config: ServerConfig) -> Server {
        Server::with_world("127.0.0.1:0", config, WorldState::with_seed(42))
            .await
            .unwrap()
    }

    fn receive(peer: PeerId, message: Message) -> TransportEvent {
        TransportEvent::Receive {
            peer,
            channel: message.channel(),
            payload: message.encode(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_clients, 32);
        assert_eq!(config.time_sync_interval, Duration::from_millis(1000));
        assert!(!config.reap_disconnected);
    }

    #[tokio::test]
    async fn test_join_spawns_one_entity_per_peer() {
        let mut server = test_server(ServerConfig::default()).await;

        server.handle_event(receive(1, Message::Join));
        server.handle_event(receive(2, Message::Join));

        assert_eq!(server.world().len(), 2);
        assert!(server.world().entity_of(1).is_some());
        assert!(server.world().entity_of(2).is_some());
    }

    #[tokio::test]
    async fn test_rejoin_does_not_spawn_again() {
        let mut server = test_server(ServerConfig::default()).await;

        server.handle_event(receive(1, Message::Join));
        let first = server.world().entity_of(1);
        server.handle_event(receive(1, Message::Join));

        assert_eq!(server.world().len(), 1);
        assert_eq!(server.world().entity_of(1), first);
    }

    #[tokio::test]
    async fn test_input_drives_simulation() {
        let mut server = test_server(ServerConfig::default()).await;
        server.handle_event(receive(1, Message::Join));
        let id = server.world().entity_of(1).unwrap();

        server.handle_event(receive(
            1,
            Message::Input(InputMessage {
                entity_id: id,
                frame: 5,
                throttle: 1.0,
                steer: 0.0,
            }),
        ));
        let before = *server.world().get(id).unwrap();
        server.tick();

        let after = server.world().get(id).unwrap();
        assert_eq!(after.controls, Controls::new(1.0, 0.0));
        assert_ne!(after.distance_to(before.x, before.y), 0.0);
        assert_eq!(server.world().ack_frame(id), 5);
        assert_eq!(server.world().tick, 1);
    }

    #[tokio::test]
    async fn test_state_and_malformed_packets_are_ignored() {
        let mut server = test_server(ServerConfig::default()).await;
        server.handle_event(receive(1, Message::Join));
        let id = server.world().entity_of(1).unwrap();
        let before = *server.world().get(id).unwrap();

        server.handle_event(receive(
            1,
            Message::State {
                entity_id: id,
                x: 20.0,
                y: 20.0,
            },
        ));
        server.handle_event(TransportEvent::Receive {
            peer: 1,
            channel: Channel::Unreliable,
            payload: vec![250, 1, 2, 3],
        });
        server.handle_event(receive(1, Message::TimeSync { server_time_ms: 9 }));

        assert_eq!(*server.world().get(id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_entity_by_default() {
        let mut server = test_server(ServerConfig::default()).await;
        server.handle_event(receive(1, Message::Join));
        let id = server.world().entity_of(1).unwrap();

        server.handle_event(TransportEvent::Disconnect { peer: 1 });

        assert!(server.world().get(id).is_some());
        assert_eq!(server.world().entity_of(1), None);
    }

    #[tokio::test]
    async fn test_disconnect_reaps_entity_when_configured() {
        let config = ServerConfig {
            reap_disconnected: true,
            ..ServerConfig::default()
        };
        let mut server = test_server(config).await;
        server.handle_event(receive(1, Message::Join));
        let id = server.world().entity_of(1).unwrap();

        server.handle_event(TransportEvent::Disconnect { peer: 1 });

        assert!(server.world().get(id).is_none());
        assert!(server.world().is_empty());
    }
}
