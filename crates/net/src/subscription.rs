//! Per-client chunk subscriptions and update routing.
//!
//! Each client subscribes to a set of chunks. After every tick the router maps
//! each dirty entity to its chunk and fans it out to that chunk's subscribers.
//! Subscribing to a chunk is reported to the caller so it can send the full
//! snapshot before any incremental update for that chunk.

use std::collections::{BTreeMap, BTreeSet};

use ironworks_core::EntityId;
use ironworks_world::{ChunkPos, EntityTable};

/// Connection identifier assigned by the network layer.
pub type ClientId = u64;

/// Chunks gained and lost by a view change, both sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewChange {
    /// Newly subscribed; each needs a full snapshot.
    pub added: Vec<ChunkPos>,
    /// No longer subscribed.
    pub removed: Vec<ChunkPos>,
}

/// Subscription state for every connected client.
#[derive(Debug, Default)]
pub struct SubscriptionRouter {
    by_client: BTreeMap<ClientId, BTreeSet<ChunkPos>>,
    by_chunk: BTreeMap<ChunkPos, BTreeSet<ClientId>>,
}

impl SubscriptionRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client with no subscriptions.
    pub fn add_client(&mut self, client: ClientId) {
        self.by_client.entry(client).or_default();
    }

    /// Forget a client and everything it subscribed to.
    pub fn remove_client(&mut self, client: ClientId) -> BTreeSet<ChunkPos> {
        let chunks = self.by_client.remove(&client).unwrap_or_default();
        for pos in &chunks {
            self.detach(*pos, client);
        }
        chunks
    }

    /// Whether `client` is registered.
    pub fn has_client(&self, client: ClientId) -> bool {
        self.by_client.contains_key(&client)
    }

    /// Registered clients, ascending.
    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.by_client.keys().copied()
    }

    /// Subscribe a registered client to one chunk. True if it was not
    /// already subscribed (so a snapshot is owed).
    pub fn subscribe(&mut self, client: ClientId, pos: ChunkPos) -> bool {
        let Some(chunks) = self.by_client.get_mut(&client) else {
            return false;
        };
        if !chunks.insert(pos) {
            return false;
        }
        self.by_chunk.entry(pos).or_default().insert(client);
        true
    }

    /// Drop one subscription. True if it existed.
    pub fn unsubscribe(&mut self, client: ClientId, pos: ChunkPos) -> bool {
        let removed = self
            .by_client
            .get_mut(&client)
            .is_some_and(|chunks| chunks.remove(&pos));
        if removed {
            self.detach(pos, client);
        }
        removed
    }

    /// Replace a client's subscriptions with the square of chunks within
    /// `radius` of `center`.
    pub fn set_view(&mut self, client: ClientId, center: ChunkPos, radius: i32) -> ViewChange {
        let wanted: BTreeSet<ChunkPos> = center.square_around(radius).collect();
        let current = match self.by_client.get(&client) {
            Some(chunks) => chunks.clone(),
            None => return ViewChange::default(),
        };

        let mut change = ViewChange::default();
        for pos in current.difference(&wanted) {
            self.unsubscribe(client, *pos);
            change.removed.push(*pos);
        }
        for pos in wanted.difference(&current) {
            self.subscribe(client, *pos);
            change.added.push(*pos);
        }
        change
    }

    /// Chunks a client currently subscribes to.
    pub fn subscriptions(&self, client: ClientId) -> impl Iterator<Item = ChunkPos> + '_ {
        self.by_client
            .get(&client)
            .into_iter()
            .flat_map(|chunks| chunks.iter().copied())
    }

    /// Whether `client` subscribes to `pos`.
    pub fn is_subscribed(&self, client: ClientId, pos: ChunkPos) -> bool {
        self.by_client
            .get(&client)
            .is_some_and(|chunks| chunks.contains(&pos))
    }

    /// Clients subscribed to `pos`, ascending.
    pub fn subscribers_of(&self, pos: ChunkPos) -> impl Iterator<Item = ClientId> + '_ {
        self.by_chunk
            .get(&pos)
            .into_iter()
            .flat_map(|clients| clients.iter().copied())
    }

    /// Whether any client subscribes to `pos`. Referenced chunks are never evicted.
    pub fn is_referenced(&self, pos: ChunkPos) -> bool {
        self.by_chunk.contains_key(&pos)
    }

    /// Fan dirty entity ids out to subscribers of their chunks.
    ///
    /// Ids no longer in `entities` are skipped. Each client's list keeps the
    /// ascending order of `updated`.
    pub fn route_updates<'a>(
        &self,
        updated: impl IntoIterator<Item = &'a EntityId>,
        entities: &EntityTable,
    ) -> BTreeMap<ClientId, Vec<EntityId>> {
        let mut routed: BTreeMap<ClientId, Vec<EntityId>> = BTreeMap::new();
        for id in updated {
            let Some(entity) = entities.get(*id) else {
                continue;
            };
            for client in self.subscribers_of(entity.chunk()) {
                routed.entry(client).or_default().push(*id);
            }
        }
        routed
    }

    fn detach(&mut self, pos: ChunkPos, client: ClientId) {
        if let Some(clients) = self.by_chunk.get_mut(&pos) {
            clients.remove(&client);
            if clients.is_empty() {
                self.by_chunk.remove(&pos);
            }
        }
    }
}
