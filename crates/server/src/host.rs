//! Tick-boundary game host.
//!
//! The host owns the world and every client's session and subscription state.
//! Network handlers only enqueue [`HostEvent`]s; the simulation thread calls
//! [`GameHost::step`], which drains the queue, advances the world one tick and
//! returns the messages to deliver, in order, per client.

use std::collections::{BTreeMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use ironworks_core::{EntityId, TICKS_PER_SECOND};
use ironworks_net::{
    compute_schema_hash, encode_server_message, AuthRequest, AuthResponse, ChunkData,
    ChunkRequest, ClientId, ClientMessage, EntityRemove, PlayerJoin, PlayerLeave, PlayerMove,
    ServerMessage, SubscriptionRouter, SyncRequest, SyncResponse, WorldTick,
};
use ironworks_world::{world_to_chunk, ActionError, ChunkPos, World, WorldEvent};
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;

/// Something the network layer observed about a client.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A connection was accepted.
    Connected(ClientId),
    /// A decoded, verified message arrived.
    Message(ClientId, ClientMessage),
    /// The connection ended (EOF, protocol error or full outbound queue).
    Disconnected(ClientId),
}

/// What the network layer must do after a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Queue a message for one client.
    Send(ClientId, ServerMessage),
    /// Drop the connection once its queued messages are flushed.
    Close(ClientId),
}

#[derive(Debug, Default)]
struct Session {
    player: Option<EntityId>,
    name: Option<String>,
}

/// Authoritative server state advanced one tick at a time.
pub struct GameHost {
    world: World,
    router: SubscriptionRouter,
    sessions: BTreeMap<ClientId, Session>,
    inbound: VecDeque<HostEvent>,
    outbox: Vec<Outgoing>,
    view_distance: i32,
    save_interval_ticks: u64,
    schema_hash: u64,
}

impl GameHost {
    /// Wrap a world with the session settings from `config`.
    pub fn new(world: World, config: &ServerConfig) -> Self {
        Self {
            world,
            router: SubscriptionRouter::new(),
            sessions: BTreeMap::new(),
            inbound: VecDeque::new(),
            outbox: Vec::new(),
            view_distance: config.view_distance.max(0),
            save_interval_ticks: config.save_interval_secs.max(1) * TICKS_PER_SECOND,
            schema_hash: compute_schema_hash(),
        }
    }

    /// The simulated world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Mutable world access, for seeding a scenario before clients connect.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Subscription state of every authenticated client.
    pub fn router(&self) -> &SubscriptionRouter {
        &self.router
    }

    /// Connected clients, authenticated or not.
    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    /// Player entity controlled by `client`, once authenticated.
    pub fn player_of(&self, client: ClientId) -> Option<EntityId> {
        self.sessions.get(&client).and_then(|s| s.player)
    }

    /// Queue an event for the next tick boundary.
    pub fn enqueue(&mut self, event: HostEvent) {
        self.inbound.push_back(event);
    }

    /// Drain queued events, advance the world one tick and fan out the results.
    #[instrument(skip(self), fields(tick = self.world.tick().0 + 1))]
    pub fn step(&mut self) -> Vec<Outgoing> {
        while let Some(event) = self.inbound.pop_front() {
            self.handle_event(event);
        }

        let report = self.world.step();
        let routed = self.router.route_updates(&report.updated, self.world.entities());
        for (client, ids) in routed {
            for id in ids {
                if let Some(entity) = self.world.entities().get(id) {
                    self.outbox
                        .push(Outgoing::Send(client, ServerMessage::EntityUpdate(entity.clone())));
                }
            }
        }

        let tick = report.tick.0;
        if tick % TICKS_PER_SECOND == 0 {
            self.broadcast(None, ServerMessage::WorldTick(WorldTick { tick }));
        }
        if tick % self.save_interval_ticks == 0 {
            let saved = self.world.save_dirty();
            if saved.failed > 0 {
                warn!(tick, failed = saved.failed, "periodic save incomplete; will retry");
            }
        }
        if tick % TICKS_PER_SECOND == 0 {
            let router = &self.router;
            self.world.evict_unreferenced(|pos| router.is_referenced(pos));
        }

        std::mem::take(&mut self.outbox)
    }

    /// Flush players, chunks and world meta before the process exits.
    pub fn shutdown(&mut self) -> Result<()> {
        info!(clients = self.sessions.len(), tick = self.world.tick().0, "host shutting down");
        self.world.shutdown()
    }

    fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Connected(client) => {
                debug!(client, "client connected");
                self.sessions.insert(client, Session::default());
            }
            HostEvent::Disconnected(client) => self.disconnect(client),
            HostEvent::Message(client, message) => self.handle_message(client, message),
        }
    }

    fn handle_message(&mut self, client: ClientId, message: ClientMessage) {
        let Some(session) = self.sessions.get(&client) else {
            return;
        };
        let player = session.player;

        match (message, player) {
            (ClientMessage::Auth(request), None) => self.authenticate(client, request),
            (ClientMessage::Auth(_), Some(_)) => {
                warn!(client, "second authentication attempt; dropping client");
                self.drop_client(client);
            }
            (ClientMessage::Sync(request), _) => self.sync(client, request),
            (ClientMessage::PlayerMove(mv), Some(player)) => self.move_player(client, player, mv),
            (ClientMessage::ChunkRequest(request), Some(player)) => {
                self.request_chunk(client, player, request)
            }
            (ClientMessage::PlayerAction(action), Some(player)) => {
                match self.world.apply_action(player, action.into()) {
                    Ok(event) => self.publish(event),
                    Err(err) => self.reject_action(client, err),
                }
            }
            (message, None) => {
                debug!(client, tag = ?message.tag(), "ignoring message before authentication");
            }
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    fn authenticate(&mut self, client: ClientId, request: AuthRequest) {
        let tick = self.world.tick().0;
        if request.schema_hash != self.schema_hash {
            info!(client, "rejecting client with mismatched protocol schema");
            self.send(client, ServerMessage::AuthResponse(AuthResponse::rejected("protocol schema mismatch", tick)));
            self.drop_client(client);
            return;
        }
        let name_taken = self
            .sessions
            .values()
            .any(|s| s.name.as_deref() == Some(request.name.as_str()));
        if name_taken {
            info!(client, "rejecting duplicate player name");
            self.send(client, ServerMessage::AuthResponse(AuthResponse::rejected("player already online", tick)));
            self.drop_client(client);
            return;
        }

        let player = self.world.spawn_player(&request.name);
        let Some((x, y)) = self.world.entities().get(player).map(|e| e.position()) else {
            warn!(client, entity = player, "spawned player vanished");
            self.drop_client(client);
            return;
        };
        if let Some(session) = self.sessions.get_mut(&client) {
            session.player = Some(player);
            session.name = Some(request.name.clone());
        }
        info!(client, entity = player, x, y, "player joined");
        self.send(client, ServerMessage::AuthResponse(AuthResponse::accepted(player, x, y, tick)));

        let others: Vec<PlayerJoin> = self
            .sessions
            .iter()
            .filter(|(other, _)| **other != client)
            .filter_map(|(_, s)| {
                let id = s.player?;
                let (x, y) = self.world.entities().get(id)?.position();
                Some(PlayerJoin {
                    id,
                    name: s.name.clone()?,
                    x,
                    y,
                })
            })
            .collect();
        for join in others {
            self.send(client, ServerMessage::PlayerJoin(join));
        }
        self.broadcast(
            Some(client),
            ServerMessage::PlayerJoin(PlayerJoin {
                id: player,
                name: request.name,
                x,
                y,
            }),
        );

        self.router.add_client(client);
        self.update_view(client, x, y);
    }

    fn sync(&mut self, client: ClientId, request: SyncRequest) {
        let server_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.send(
            client,
            ServerMessage::Sync(SyncResponse {
                client_time: request.client_time,
                server_time,
                tick: self.world.tick().0,
            }),
        );
    }

    fn move_player(&mut self, client: ClientId, player: EntityId, mv: PlayerMove) {
        if let Err(err) = self.world.move_player(player, mv.x, mv.y) {
            debug!(client, error = %err, "move rejected");
            return;
        }
        self.update_view(client, mv.x, mv.y);
        self.broadcast(
            Some(client),
            ServerMessage::PlayerMove(PlayerMove {
                id: player,
                x: mv.x,
                y: mv.y,
            }),
        );
    }

    /// Explicit requests may reach one view radius past the subscribed square.
    fn request_chunk(&mut self, client: ClientId, player: EntityId, request: ChunkRequest) {
        let pos = request.position();
        let Some(center) = self.world.entities().get(player).map(|e| e.chunk()) else {
            return;
        };
        let reach = (2 * self.view_distance + 1).unsigned_abs();
        if pos.x.abs_diff(center.x) > reach || pos.y.abs_diff(center.y) > reach {
            debug!(client, chunk = %pos, "chunk request too far from player");
            return;
        }
        self.router.subscribe(client, pos);
        self.send_snapshot(client, pos);
    }

    fn reject_action(&self, client: ClientId, err: ActionError) {
        debug!(client, error = %err, "action rejected");
    }

    fn publish(&mut self, event: WorldEvent) {
        match event {
            WorldEvent::Added(id) | WorldEvent::Updated(id) => {
                let Some(entity) = self.world.entities().get(id).cloned() else {
                    return;
                };
                let subscribers: Vec<ClientId> = self.router.subscribers_of(entity.chunk()).collect();
                for client in subscribers {
                    let message = match event {
                        WorldEvent::Added(_) => ServerMessage::EntityAdd(entity.clone()),
                        _ => ServerMessage::EntityUpdate(entity.clone()),
                    };
                    self.send(client, message);
                }
            }
            WorldEvent::Removed { id, chunk } => {
                let subscribers: Vec<ClientId> = self.router.subscribers_of(chunk).collect();
                for client in subscribers {
                    self.send(client, ServerMessage::EntityRemove(EntityRemove { id }));
                }
            }
        }
    }

    /// Re-centre a client's view on `(x, y)` and snapshot every newly visible chunk.
    fn update_view(&mut self, client: ClientId, x: f64, y: f64) {
        let (center, _, _) = world_to_chunk(x, y);
        let change = self.router.set_view(client, center, self.view_distance);
        if !change.added.is_empty() || !change.removed.is_empty() {
            debug!(
                client,
                center = %center,
                added = change.added.len(),
                removed = change.removed.len(),
                "view changed"
            );
        }
        for pos in change.added {
            self.send_snapshot(client, pos);
        }
    }

    /// Full chunk snapshot. A chunk too crowded for one frame goes out as its
    /// tiles followed by one `EntityAdd` per entity.
    fn send_snapshot(&mut self, client: ClientId, pos: ChunkPos) {
        let (tiles, entities) = self.world.chunk_snapshot(pos);
        let message = ServerMessage::ChunkData(ChunkData {
            cx: pos.x,
            cy: pos.y,
            tiles,
            entities,
        });
        if encode_server_message(&message).is_ok() {
            self.send(client, message);
            return;
        }
        let ServerMessage::ChunkData(mut data) = message else {
            return;
        };
        let entities = std::mem::take(&mut data.entities);
        debug!(client, chunk = %pos, entities = entities.len(), "splitting oversized snapshot");
        self.send(client, ServerMessage::ChunkData(data));
        for entity in entities {
            self.send(client, ServerMessage::EntityAdd(entity));
        }
    }

    fn disconnect(&mut self, client: ClientId) {
        let Some(session) = self.sessions.remove(&client) else {
            return;
        };
        self.router.remove_client(client);
        let Some(player) = session.player else {
            debug!(client, "unauthenticated client left");
            return;
        };
        self.world.despawn_player(player);
        info!(client, entity = player, "player left");
        self.broadcast(None, ServerMessage::PlayerLeave(PlayerLeave { id: player }));
    }

    fn drop_client(&mut self, client: ClientId) {
        self.disconnect(client);
        self.outbox.push(Outgoing::Close(client));
    }

    fn send(&mut self, client: ClientId, message: ServerMessage) {
        self.outbox.push(Outgoing::Send(client, message));
    }

    /// Send to every authenticated client except `skip`.
    fn broadcast(&mut self, skip: Option<ClientId>, message: ServerMessage) {
        let targets: Vec<ClientId> = self
            .sessions
            .iter()
            .filter(|(client, s)| s.player.is_some() && Some(**client) != skip)
            .map(|(client, _)| *client)
            .collect();
        for client in targets {
            self.send(client, message.clone());
        }
    }
}
