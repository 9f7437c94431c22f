//! Session, subscription and broadcast behaviour of the tick-boundary host.

use ironworks_core::{Direction, EntityId, TICKS_PER_SECOND};
use ironworks_net::{
    compute_schema_hash, ActionRequest, AuthRequest, ChunkRequest, ClientId, ClientMessage,
    PlayerMove, ServerMessage, SyncRequest,
};
use ironworks_server::{GameHost, HostEvent, Outgoing, ServerConfig};
use ironworks_world::{ChunkPos, EntityKind, MemoryStore, TileType, World};

fn config() -> ServerConfig {
    ServerConfig {
        view_distance: 1,
        save_interval_secs: 1,
        ..ServerConfig::default()
    }
}

fn host_with(store: MemoryStore) -> GameHost {
    let mut world = World::new(7, 256, Box::new(store));
    for y in -4..8 {
        for x in -4..12 {
            world.set_tile(x, y, TileType::Grass);
        }
    }
    GameHost::new(world, &config())
}

fn host() -> GameHost {
    host_with(MemoryStore::new())
}

fn auth(name: &str) -> ClientMessage {
    ClientMessage::Auth(AuthRequest {
        name: name.to_string(),
        schema_hash: compute_schema_hash(),
    })
}

fn join(host: &mut GameHost, client: ClientId, name: &str) -> Vec<Outgoing> {
    host.enqueue(HostEvent::Connected(client));
    host.enqueue(HostEvent::Message(client, auth(name)));
    host.step()
}

fn to(out: &[Outgoing], client: ClientId) -> Vec<ServerMessage> {
    out.iter()
        .filter_map(|o| match o {
            Outgoing::Send(c, m) if *c == client => Some(m.clone()),
            _ => None,
        })
        .collect()
}

fn closed(out: &[Outgoing], client: ClientId) -> bool {
    out.iter().any(|o| *o == Outgoing::Close(client))
}

fn chunk_data_positions(messages: &[ServerMessage]) -> Vec<ChunkPos> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::ChunkData(data) => Some(data.position()),
            _ => None,
        })
        .collect()
}

#[test]
fn auth_accepts_and_snapshots_the_view() {
    let mut host = host();
    let out = join(&mut host, 1, "ada");
    let messages = to(&out, 1);

    let ServerMessage::AuthResponse(resp) = &messages[0] else {
        panic!("first message should be the auth response, got {:?}", messages[0]);
    };
    assert!(resp.accepted);
    assert_eq!(resp.player_id, host.player_of(1));
    assert_eq!((resp.x, resp.y), (0.0, 0.0));

    let mut chunks = chunk_data_positions(&messages);
    chunks.sort();
    let expected: Vec<ChunkPos> = ChunkPos::new(0, 0).square_around(1).collect();
    assert_eq!(chunks.len(), 9);
    for pos in expected {
        assert!(chunks.contains(&pos), "missing snapshot for {pos}");
        assert!(host.router().is_subscribed(1, pos));
    }
}

#[test]
fn snapshot_precedes_updates_for_existing_entities() {
    let mut host = host();
    let world = host.world_mut();
    world.set_tile(3, 2, TileType::IronOre);
    let miner = world.build(EntityKind::Miner, 3, 2, Direction::East).unwrap();
    let belt = world.build(EntityKind::Conveyor, 4, 2, Direction::East).unwrap();
    let chest = world.build(EntityKind::Chest, 6, 2, Direction::North).unwrap();
    for _ in 0..10 {
        host.step();
    }

    let mut log = join(&mut host, 1, "ada");
    for _ in 0..60 {
        log.extend(host.step());
    }
    let messages = to(&log, 1);

    let snapshot_at = messages
        .iter()
        .position(|m| matches!(m, ServerMessage::ChunkData(d) if d.position() == ChunkPos::new(0, 0)))
        .expect("snapshot of the origin chunk");
    let ServerMessage::ChunkData(data) = &messages[snapshot_at] else {
        unreachable!();
    };
    let ids: Vec<EntityId> = data.entities.iter().map(|e| e.id).collect();
    for id in [miner, belt, chest] {
        assert!(ids.contains(&id), "snapshot lacks entity {id}");
    }

    let first_update = messages
        .iter()
        .position(|m| matches!(m, ServerMessage::EntityUpdate(e) if e.chunk() == ChunkPos::new(0, 0)))
        .expect("the miner changes within a second");
    assert!(snapshot_at < first_update);
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::EntityUpdate(e) if e.id == miner)));
}

#[test]
fn mismatched_schema_is_rejected_and_closed() {
    let mut host = host();
    host.enqueue(HostEvent::Connected(1));
    host.enqueue(HostEvent::Message(
        1,
        ClientMessage::Auth(AuthRequest {
            name: "ada".into(),
            schema_hash: compute_schema_hash() ^ 1,
        }),
    ));
    let out = host.step();
    match to(&out, 1).first() {
        Some(ServerMessage::AuthResponse(resp)) => {
            assert!(!resp.accepted);
            assert!(resp.reason.is_some());
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(closed(&out, 1));
    assert_eq!(host.client_count(), 0);
}

#[test]
fn duplicate_names_are_rejected() {
    let mut host = host();
    join(&mut host, 1, "ada");
    let out = join(&mut host, 2, "ada");
    assert!(matches!(
        to(&out, 2).first(),
        Some(ServerMessage::AuthResponse(resp)) if !resp.accepted
    ));
    assert!(closed(&out, 2));
    assert!(host.player_of(1).is_some());
}

#[test]
fn join_and_leave_are_announced() {
    let mut host = host();
    join(&mut host, 1, "ada");
    let ada = host.player_of(1).unwrap();
    let out = join(&mut host, 2, "bob");
    let bob = host.player_of(2).unwrap();

    assert!(to(&out, 2)
        .iter()
        .any(|m| matches!(m, ServerMessage::PlayerJoin(j) if j.id == ada && j.name == "ada")));
    assert!(to(&out, 1)
        .iter()
        .any(|m| matches!(m, ServerMessage::PlayerJoin(j) if j.id == bob && j.name == "bob")));

    host.enqueue(HostEvent::Disconnected(2));
    let out = host.step();
    assert!(to(&out, 1)
        .iter()
        .any(|m| matches!(m, ServerMessage::PlayerLeave(l) if l.id == bob)));
    assert!(host.world().entities().get(bob).is_none());
    assert!(!host.router().has_client(2));
}

#[test]
fn messages_before_auth_are_ignored() {
    let mut host = host();
    host.enqueue(HostEvent::Connected(1));
    host.enqueue(HostEvent::Message(
        1,
        ClientMessage::PlayerAction(ActionRequest::Build {
            kind: EntityKind::Chest,
            x: 1,
            y: 1,
            direction: Direction::North,
        }),
    ));
    let out = host.step();
    assert!(to(&out, 1).is_empty());
    assert!(host.world().entities().machine_at((1, 1)).is_none());
    assert_eq!(host.client_count(), 1);
}

#[test]
fn builds_and_destroys_reach_subscribers() {
    let mut host = host();
    join(&mut host, 1, "ada");
    join(&mut host, 2, "bob");

    host.enqueue(HostEvent::Message(
        1,
        ClientMessage::PlayerAction(ActionRequest::Build {
            kind: EntityKind::Chest,
            x: 2,
            y: 3,
            direction: Direction::North,
        }),
    ));
    let out = host.step();
    let chest = host.world().entities().machine_at((2, 3)).expect("chest built");
    for client in [1, 2] {
        assert!(to(&out, client)
            .iter()
            .any(|m| matches!(m, ServerMessage::EntityAdd(e) if e.id == chest)));
    }

    host.enqueue(HostEvent::Message(
        2,
        ClientMessage::PlayerAction(ActionRequest::Destroy { entity_id: chest }),
    ));
    let out = host.step();
    for client in [1, 2] {
        assert!(to(&out, client)
            .iter()
            .any(|m| matches!(m, ServerMessage::EntityRemove(r) if r.id == chest)));
    }
    assert!(host.world().entities().get(chest).is_none());
}

#[test]
fn invalid_actions_change_nothing() {
    let mut host = host();
    join(&mut host, 1, "ada");
    let before = host.world().entities().len();

    for action in [
        ActionRequest::Build {
            kind: EntityKind::Chest,
            x: 40,
            y: 0,
            direction: Direction::North,
        },
        ActionRequest::Destroy { entity_id: 999 },
        ActionRequest::Destroy {
            entity_id: host.player_of(1).unwrap(),
        },
        ActionRequest::Configure {
            entity_id: 999,
            recipe: None,
        },
    ] {
        host.enqueue(HostEvent::Message(1, ClientMessage::PlayerAction(action)));
    }
    let out = host.step();
    assert_eq!(host.world().entities().len(), before);
    assert!(!to(&out, 1).iter().any(|m| matches!(
        m,
        ServerMessage::EntityAdd(_) | ServerMessage::EntityRemove(_)
    )));
    assert!(!closed(&out, 1));
}

#[test]
fn moving_shifts_the_view_and_notifies_others() {
    let mut host = host();
    join(&mut host, 1, "ada");
    join(&mut host, 2, "bob");
    let ada = host.player_of(1).unwrap();

    host.enqueue(HostEvent::Message(
        1,
        ClientMessage::PlayerMove(PlayerMove {
            id: 0,
            x: 100.0,
            y: 5.0,
        }),
    ));
    let out = host.step();

    let mut gained = chunk_data_positions(&to(&out, 1));
    gained.sort();
    let expected: Vec<ChunkPos> = (2..=4)
        .flat_map(|x| (-1..=1).map(move |y| ChunkPos::new(x, y)))
        .collect();
    let mut expected = expected;
    expected.sort();
    assert_eq!(gained, expected);
    assert!(!host.router().is_subscribed(1, ChunkPos::new(0, 0)));

    assert!(to(&out, 2).iter().any(|m| matches!(
        m,
        ServerMessage::PlayerMove(mv) if mv.id == ada && mv.x == 100.0
    )));
    assert!(!to(&out, 1)
        .iter()
        .any(|m| matches!(m, ServerMessage::PlayerMove(_))));
    assert_eq!(
        host.world().entities().get(ada).unwrap().chunk(),
        ChunkPos::new(3, 0)
    );
}

#[test]
fn chunk_requests_near_the_player_get_snapshots() {
    let mut host = host();
    join(&mut host, 1, "ada");

    host.enqueue(HostEvent::Message(
        1,
        ClientMessage::ChunkRequest(ChunkRequest { cx: 2, cy: 0 }),
    ));
    host.enqueue(HostEvent::Message(
        1,
        ClientMessage::ChunkRequest(ChunkRequest { cx: 50, cy: 0 }),
    ));
    let out = host.step();
    assert_eq!(chunk_data_positions(&to(&out, 1)), vec![ChunkPos::new(2, 0)]);
    assert!(host.router().is_subscribed(1, ChunkPos::new(2, 0)));
    assert!(!host.router().is_subscribed(1, ChunkPos::new(50, 0)));
}

#[test]
fn chunk_requests_at_the_integer_edges_are_ignored() {
    let mut host = host();
    join(&mut host, 1, "ada");

    for (cx, cy) in [(i32::MIN, 0), (0, i32::MIN), (i32::MAX, i32::MIN)] {
        host.enqueue(HostEvent::Message(
            1,
            ClientMessage::ChunkRequest(ChunkRequest { cx, cy }),
        ));
    }
    let out = host.step();
    assert!(chunk_data_positions(&to(&out, 1)).is_empty());
    assert!(!closed(&out, 1));
    assert!(!host.router().is_subscribed(1, ChunkPos::new(i32::MIN, 0)));
    assert!(!host.router().is_subscribed(1, ChunkPos::new(i32::MAX, i32::MIN)));
}

#[test]
fn world_tick_heartbeat_once_per_second() {
    let mut host = host();
    let mut log = join(&mut host, 1, "ada");
    for _ in 0..(2 * TICKS_PER_SECOND) {
        log.extend(host.step());
    }
    let ticks: Vec<u64> = to(&log, 1)
        .iter()
        .filter_map(|m| match m {
            ServerMessage::WorldTick(t) => Some(t.tick),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, vec![60, 120]);
}

#[test]
fn sync_echoes_client_time() {
    let mut host = host();
    host.enqueue(HostEvent::Connected(1));
    host.enqueue(HostEvent::Message(
        1,
        ClientMessage::Sync(SyncRequest { client_time: 4242 }),
    ));
    let out = host.step();
    match to(&out, 1).as_slice() {
        [ServerMessage::Sync(resp)] => {
            assert_eq!(resp.client_time, 4242);
            assert_eq!(resp.tick, 0);
            assert!(resp.server_time > 0);
        }
        other => panic!("expected one sync reply, got {other:?}"),
    }
}

#[test]
fn periodic_save_and_shutdown_flush() {
    let store = MemoryStore::new();
    let mut host = host_with(store.clone());
    join(&mut host, 1, "ada");
    host.world_mut()
        .build(EntityKind::Chest, 1, 1, Direction::North)
        .unwrap();

    for _ in 0..TICKS_PER_SECOND {
        host.step();
    }
    let saved = store.record(ChunkPos::new(0, 0)).expect("origin chunk saved");
    assert!(saved.entities.iter().any(|e| e.kind() == EntityKind::Chest));

    host.shutdown().unwrap();
}
