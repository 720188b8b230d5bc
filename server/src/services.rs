//! Explicitly wired simulation services shared by the tick scheduler and
//! the command handlers.

use std::f32::consts::TAU;
use std::sync::Arc;

use log::{debug, info, warn};
use rand::RngCore;
use realm_shared::{EntityId, ServerMessage, Vec3};

use crate::ai::{AggroAi, MonsterAi};
use crate::broadcast::BroadcastTransport;
use crate::combat::CombatResolver;
use crate::config::ServerConfig;
use crate::effects::{CooldownStore, EffectStore};
use crate::entity::Player;
use crate::loot::{LootService, TableLoot};
use crate::movement::MovementValidator;
use crate::persistence::{collect_dirty, flush_records, mark_dirty, PlayerRecord, SaveStore};
use crate::skills::SkillEngine;
use crate::templates::TemplateStore;
use crate::world::World;

pub struct Services {
    pub config: ServerConfig,
    pub world: Arc<World>,
    pub templates: Arc<dyn TemplateStore>,
    pub effects: Arc<EffectStore>,
    pub cooldowns: Arc<CooldownStore>,
    pub validator: MovementValidator,
    pub resolver: CombatResolver,
    pub skills: SkillEngine,
    pub loot: Arc<dyn LootService>,
    pub ai: Arc<dyn MonsterAi>,
    pub saves: Arc<dyn SaveStore>,
    pub transport: Arc<dyn BroadcastTransport>,
}

impl Services {
    pub fn new(
        config: ServerConfig,
        templates: Arc<dyn TemplateStore>,
        saves: Arc<dyn SaveStore>,
        transport: Arc<dyn BroadcastTransport>,
    ) -> Self {
        let world = Arc::new(World::new());
        let effects = Arc::new(EffectStore::new());
        let cooldowns = Arc::new(CooldownStore::new());
        let skills = SkillEngine::new(
            Arc::clone(&world),
            Arc::clone(&templates),
            Arc::clone(&effects),
            Arc::clone(&cooldowns),
        );

        Self {
            validator: MovementValidator::new(config.max_player_speed()),
            resolver: CombatResolver::new(Arc::clone(&effects)),
            loot: Arc::new(TableLoot::new(Arc::clone(&templates))),
            ai: Arc::new(AggroAi),
            config,
            world,
            templates,
            effects,
            cooldowns,
            skills,
            saves,
            transport,
        }
    }

    pub fn with_loot(mut self, loot: Arc<dyn LootService>) -> Self {
        self.loot = loot;
        self
    }

    pub fn with_ai(mut self, ai: Arc<dyn MonsterAi>) -> Self {
        self.ai = ai;
        self
    }

    /// Places `count` monsters on rings around the origin, cycling through
    /// the monster templates. Returns the spawned ids.
    pub fn populate_monsters(&self, count: u32) -> Vec<EntityId> {
        let template_ids = self.templates.monster_ids();
        if template_ids.is_empty() {
            warn!("No monster templates loaded, world starts empty");
            return Vec::new();
        }

        let spawned: Vec<EntityId> = (0..count)
            .filter_map(|index| {
                let template_id = template_ids[index as usize % template_ids.len()];
                let template = self.templates.monster(template_id)?;
                let angle = index as f32 / count.max(1) as f32 * TAU;
                let radius = 15.0 + (index % 3) as f32 * 8.0;
                let position = Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius);
                Some(self.world.spawn_monster(&template, position))
            })
            .collect();
        info!("Spawned {} monsters", spawned.len());
        spawned
    }

    /// Generates loot for a kill of `monster_template_id` and credits it.
    pub fn hand_off_loot(
        &self,
        player: &mut Player,
        monster_template_id: u32,
        rng: &mut dyn RngCore,
    ) -> Option<ServerMessage> {
        let Some(template) = self.templates.monster(monster_template_id) else {
            warn!(
                "Kill of unknown monster template {}, no loot",
                monster_template_id
            );
            return None;
        };

        let drop = self.loot.generate_loot(&template, rng);
        if drop.is_empty() {
            return None;
        }
        self.loot.apply_loot(player, &drop);
        Some(ServerMessage::LootReceived {
            player_id: player.id,
            gold: drop.gold,
            items: drop.items,
        })
    }

    /// Writes dirty players synchronously. Failed saves stay dirty.
    pub fn flush_dirty(&self) -> usize {
        let records = collect_dirty(&self.world);
        self.flush(&records)
    }

    /// Saves `records` and returns how many were written.
    pub fn flush(&self, records: &[(EntityId, PlayerRecord)]) -> usize {
        if records.is_empty() {
            return 0;
        }
        let failed = flush_records(self.saves.as_ref(), records);
        mark_dirty(&self.world, &failed);
        debug!(
            "Persistence flush: {} saved, {} failed",
            records.len() - failed.len(),
            failed.len()
        );
        records.len() - failed.len()
    }

    pub fn broadcast_all(&self, messages: &[ServerMessage]) {
        for message in messages {
            self.transport.broadcast_to_all(message);
        }
    }
}

pub fn level_up_message(player: &Player) -> ServerMessage {
    ServerMessage::LevelUp {
        player_id: player.id,
        level: player.level,
        max_health: player.max_health,
        max_mana: player.max_mana,
        skill_points: player.skill_points,
    }
}

pub fn stats_message(player: &Player) -> ServerMessage {
    ServerMessage::PlayerStatsUpdate {
        player_id: player.id,
        level: player.level,
        experience: player.experience,
        experience_to_next: player.experience_to_next(),
        health: player.health,
        max_health: player.max_health,
        mana: player.mana,
        max_mana: player.max_mana,
        skill_points: player.skill_points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ChannelTransport;
    use crate::persistence::MemorySaveStore;
    use crate::templates::{TemplateRegistry, TemplateSet};
    use crate::utils::lock;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use realm_shared::CharacterClass;

    fn services(saves: Arc<MemorySaveStore>) -> Services {
        Services::new(
            ServerConfig::default(),
            Arc::new(TemplateRegistry::new(TemplateSet::builtin())),
            saves,
            Arc::new(ChannelTransport::new(64)),
        )
    }

    #[test]
    fn test_populate_cycles_templates() {
        let services = services(Arc::new(MemorySaveStore::new()));
        let ids = services.populate_monsters(4);

        assert_eq!(ids.len(), 4);
        let templates: Vec<u32> = services
            .world
            .all_monsters()
            .iter()
            .map(|monster| monster.template_id)
            .collect();
        assert_eq!(templates, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_loot_hand_off_credits_gold() {
        let services = services(Arc::new(MemorySaveStore::new()));
        let mut player = Player::new(1, 1, "Ayla", CharacterClass::Warrior, Vec3::default());
        let mut rng = StdRng::seed_from_u64(3);

        let message = services.hand_off_loot(&mut player, 2, &mut rng);

        match message {
            Some(ServerMessage::LootReceived { player_id, gold, .. }) => {
                assert_eq!(player_id, 1);
                assert!((10..=25).contains(&gold));
                assert_eq!(player.gold, gold);
            }
            other => panic!("Unexpected loot message {:?}", other),
        }
        assert!(services.hand_off_loot(&mut player, 99, &mut rng).is_none());
    }

    #[test]
    fn test_flush_dirty_writes_and_clears() {
        let saves = Arc::new(MemorySaveStore::new());
        let services = services(Arc::clone(&saves));
        let (_, handle) =
            services
                .world
                .spawn_player(1, "Ayla", CharacterClass::Mage, Vec3::default());

        assert_eq!(services.flush_dirty(), 1);
        assert_eq!(saves.len(), 1);
        assert!(!lock(&handle).dirty);
        assert_eq!(services.flush_dirty(), 0);

        lock(&handle).gold = 5;
        lock(&handle).dirty = true;
        saves.set_unavailable(true);
        assert_eq!(services.flush_dirty(), 0);
        assert!(lock(&handle).dirty);
    }
}
