//! Player persistence.
//!
//! Only players whose `dirty` flag is set are collected for a flush. A record
//! that fails to save is reported back so the caller can mark the player dirty
//! again and retry on the next cycle.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use log::{debug, warn};
use realm_shared::{Attributes, CharacterClass, EntityId, LootItem, Vec3};
use serde::{Deserialize, Serialize};

use crate::entity::{LearnedSkill, Player};
use crate::error::PersistenceError;
use crate::utils::{lock, read, write};
use crate::world::World;

/// Durable part of a player. Transient state (combat, movement, effects) is
/// not saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub name: String,
    pub class: CharacterClass,
    pub level: u32,
    pub experience: u64,
    pub skill_points: u32,
    pub attributes: Attributes,
    pub health: u32,
    pub mana: u32,
    pub position: Vec3,
    pub gold: u64,
    pub inventory: Vec<LootItem>,
    pub skills: Vec<LearnedSkill>,
}

impl PlayerRecord {
    pub fn from_player(player: &Player) -> Self {
        let mut skills: Vec<LearnedSkill> = player.skills.values().cloned().collect();
        skills.sort_by_key(|skill| skill.skill_id);

        Self {
            name: player.name.clone(),
            class: player.class,
            level: player.level,
            experience: player.experience,
            skill_points: player.skill_points,
            attributes: player.attributes,
            health: player.health,
            mana: player.mana,
            position: player.position,
            gold: player.gold,
            inventory: player.inventory.clone(),
            skills,
        }
    }

    /// Restores saved progress onto a freshly spawned player.
    pub fn apply_to(&self, player: &mut Player) {
        player.class = self.class;
        player.level = self.level;
        player.experience = self.experience;
        player.skill_points = self.skill_points;
        player.attributes = self.attributes;
        player.recompute_stats();
        player.health = self.health.clamp(1, player.max_health);
        player.mana = self.mana.min(player.max_mana);
        player.position = self.position;
        player.movement.target = self.position;
        player.gold = self.gold;
        player.inventory = self.inventory.clone();
        player.skills = self
            .skills
            .iter()
            .map(|skill| (skill.skill_id, skill.clone()))
            .collect();
        player.dirty = false;
    }
}

pub trait SaveStore: Send + Sync {
    fn save(&self, record: &PlayerRecord) -> Result<(), PersistenceError>;

    fn load(&self, name: &str) -> Result<Option<PlayerRecord>, PersistenceError>;
}

/// One bincode file per player under `base_dir`.
pub struct FileSaveStore {
    base_dir: PathBuf,
}

impl FileSaveStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        let file_stem: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(format!("player_{}.bin", file_stem))
    }
}

impl SaveStore for FileSaveStore {
    fn save(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        let path = self.record_path(&record.name);
        let temp_path = path.with_extension("bin.tmp");

        let bytes = bincode::serialize(record)?;
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, &path)?;

        debug!("Saved player '{}' to {}", record.name, path.display());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<PlayerRecord>, PersistenceError> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }
}

/// In-memory store for tests and local runs without a save directory.
#[derive(Default)]
pub struct MemorySaveStore {
    records: RwLock<HashMap<String, PlayerRecord>>,
    unavailable: AtomicBool,
}

impl MemorySaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every save fails with [`PersistenceError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        read(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.records).is_empty()
    }
}

impl SaveStore for MemorySaveStore {
    fn save(&self, record: &PlayerRecord) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("memory store offline".to_string()));
        }
        write(&self.records).insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Option<PlayerRecord>, PersistenceError> {
        Ok(read(&self.records).get(name).cloned())
    }
}

/// Takes a record of every dirty player and clears their flag.
pub fn collect_dirty(world: &World) -> Vec<(EntityId, PlayerRecord)> {
    world
        .players
        .handles()
        .into_iter()
        .filter_map(|(id, handle)| {
            let mut player = lock(&handle);
            if !player.dirty {
                return None;
            }
            player.dirty = false;
            Some((id, PlayerRecord::from_player(&player)))
        })
        .collect()
}

/// Writes every record and returns the ids whose save failed.
pub fn flush_records(store: &dyn SaveStore, records: &[(EntityId, PlayerRecord)]) -> Vec<EntityId> {
    let mut failed = Vec::new();
    for (id, record) in records {
        if let Err(e) = store.save(record) {
            warn!("Failed to save player {} '{}': {}", id, record.name, e);
            failed.push(*id);
        }
    }
    failed
}

/// Marks players dirty again so the next flush retries them.
pub fn mark_dirty(world: &World, ids: &[EntityId]) {
    for id in ids {
        if let Some(handle) = world.players.get(*id) {
            lock(&handle).dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_player() -> Player {
        let mut player = Player::new(4, 2, "Ayla Stone", CharacterClass::Archer, Vec3::default());
        player.gain_experience(250);
        player.gold = 77;
        player.position = Vec3::new(3.0, 0.0, -4.0);
        player.skills.insert(
            2,
            LearnedSkill {
                skill_id: 2,
                level: 1,
                slot: Some(0),
            },
        );
        player
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileSaveStore::new(dir.path()).unwrap();
        let record = PlayerRecord::from_player(&sample_player());

        store.save(&record).unwrap();

        assert_eq!(store.load("Ayla Stone").unwrap(), Some(record));
        assert_eq!(store.load("Nobody").unwrap(), None);
        assert!(dir.path().join("player_Ayla_Stone.bin").exists());
    }

    #[test]
    fn test_record_restores_progress() {
        let record = PlayerRecord::from_player(&sample_player());
        let mut fresh = Player::new(9, 5, "Ayla Stone", CharacterClass::Archer, Vec3::default());

        record.apply_to(&mut fresh);

        assert_eq!(fresh.level, record.level);
        assert_eq!(fresh.gold, 77);
        assert_eq!(fresh.position, Vec3::new(3.0, 0.0, -4.0));
        assert_eq!(fresh.learned(2).and_then(|skill| skill.slot), Some(0));
        assert!(!fresh.dirty);
    }

    #[test]
    fn test_only_dirty_players_collected() {
        let world = World::new();
        let (clean, clean_handle) =
            world.spawn_player(1, "Clean", CharacterClass::Warrior, Vec3::default());
        let (dirty, _) = world.spawn_player(2, "Dirty", CharacterClass::Mage, Vec3::default());
        lock(&clean_handle).dirty = false;

        let records = collect_dirty(&world);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, dirty);
        assert!(collect_dirty(&world).is_empty());
        assert_ne!(clean, dirty);
    }

    #[test]
    fn test_failed_save_is_retried() {
        let world = World::new();
        let (id, handle) = world.spawn_player(1, "Ayla", CharacterClass::Warrior, Vec3::default());
        let store = MemorySaveStore::new();
        store.set_unavailable(true);

        let records = collect_dirty(&world);
        let failed = flush_records(&store, &records);
        assert_eq!(failed, vec![id]);
        assert!(!lock(&handle).dirty);

        mark_dirty(&world, &failed);
        assert!(lock(&handle).dirty);

        store.set_unavailable(false);
        let failed = flush_records(&store, &collect_dirty(&world));
        assert!(failed.is_empty());
        assert_eq!(store.len(), 1);
    }
}
