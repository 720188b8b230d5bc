//! Authoritative entity storage.
//!
//! Each entity sits behind its own mutex so the tick and concurrent command
//! handlers contend only when they touch the same entity. The registry maps
//! are guarded separately and are never held while an entity is locked.
//!
//! Lock order: a player's lock may be held while taking a monster's lock,
//! never the other way round. No code path holds two player locks or two
//! monster locks at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::info;
use realm_shared::{
    CharacterClass, EntityId, MonsterSnapshot, MonsterTemplate, PlayerSnapshot, SessionId, Vec3,
};

use crate::entity::{Monster, Player};
use crate::utils::{lock, read, write};

pub type SharedPlayer = Arc<Mutex<Player>>;
pub type SharedMonster = Arc<Mutex<Monster>>;

/// Id-keyed map of individually locked entities.
pub struct EntityRegistry<T> {
    entries: RwLock<HashMap<EntityId, Arc<Mutex<T>>>>,
}

impl<T> Default for EntityRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> EntityRegistry<T> {
    pub fn insert(&self, id: EntityId, entity: T) -> Arc<Mutex<T>> {
        let shared = Arc::new(Mutex::new(entity));
        write(&self.entries).insert(id, Arc::clone(&shared));
        shared
    }

    pub fn remove(&self, id: EntityId) -> Option<Arc<Mutex<T>>> {
        write(&self.entries).remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<Arc<Mutex<T>>> {
        read(&self.entries).get(&id).cloned()
    }

    /// Handles to every entity, sorted by id so iteration order is stable.
    pub fn handles(&self) -> Vec<(EntityId, Arc<Mutex<T>>)> {
        let mut handles: Vec<(EntityId, Arc<Mutex<T>>)> = read(&self.entries)
            .iter()
            .map(|(id, entity)| (*id, Arc::clone(entity)))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.entries).is_empty()
    }
}

/// Every player and monster in the simulation.
pub struct World {
    pub players: EntityRegistry<Player>,
    pub monsters: EntityRegistry<Monster>,
    next_entity_id: AtomicU32,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self {
            players: EntityRegistry::default(),
            monsters: EntityRegistry::default(),
            next_entity_id: AtomicU32::new(1),
        }
    }

    /// Players and monsters share one id space.
    pub fn allocate_id(&self) -> EntityId {
        self.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn spawn_player(
        &self,
        session_id: SessionId,
        name: &str,
        class: CharacterClass,
        spawn: Vec3,
    ) -> (EntityId, SharedPlayer) {
        let id = self.allocate_id();
        let player = Player::new(id, session_id, name, class, spawn);
        info!(
            "Added player {} '{}' ({:?}) at ({:.1}, {:.1})",
            id, name, class, spawn.x, spawn.z
        );
        (id, self.players.insert(id, player))
    }

    pub fn spawn_monster(&self, template: &MonsterTemplate, position: Vec3) -> EntityId {
        let id = self.allocate_id();
        self.monsters
            .insert(id, Monster::from_template(id, template, position));
        id
    }

    pub fn player(&self, id: EntityId) -> Option<PlayerSnapshot> {
        self.players.get(id).map(|player| lock(&player).snapshot())
    }

    pub fn monster(&self, id: EntityId) -> Option<MonsterSnapshot> {
        self.monsters.get(id).map(|monster| lock(&monster).snapshot())
    }

    pub fn player_id_by_session(&self, session_id: SessionId) -> Option<EntityId> {
        self.players
            .handles()
            .into_iter()
            .find(|(_, player)| lock(player).session_id == session_id)
            .map(|(id, _)| id)
    }

    /// Per-entity coherent copies of every player.
    pub fn all_players(&self) -> Vec<PlayerSnapshot> {
        self.players
            .handles()
            .iter()
            .map(|(_, player)| lock(player).snapshot())
            .collect()
    }

    pub fn all_monsters(&self) -> Vec<MonsterSnapshot> {
        self.monsters
            .handles()
            .iter()
            .map(|(_, monster)| lock(monster).snapshot())
            .collect()
    }

    pub fn alive_monsters(&self) -> Vec<MonsterSnapshot> {
        self.all_monsters()
            .into_iter()
            .filter(|monster| !monster.is_dead)
            .collect()
    }
}
