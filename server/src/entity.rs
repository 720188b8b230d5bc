use std::collections::HashMap;

use realm_shared::templates::Attributes;
use realm_shared::{
    CharacterClass, EntityId, LootItem, MonsterSnapshot, MonsterTemplate, PlayerSnapshot,
    SessionId, SkillId, Stat, Vec3, MAX_LEVEL,
};
use serde::{Deserialize, Serialize};

/// Combat-relevant stats before timed effects are applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombatStats {
    pub attack_power: f32,
    pub magic_power: f32,
    pub defense: f32,
    pub dexterity: f32,
    pub intelligence: f32,
    pub attack_speed: f32,
    pub move_speed: f32,
}

impl CombatStats {
    pub fn get(&self, stat: Stat) -> f32 {
        match stat {
            Stat::AttackPower => self.attack_power,
            Stat::MagicPower => self.magic_power,
            Stat::Defense => self.defense,
            Stat::Dexterity => self.dexterity,
            Stat::Intelligence => self.intelligence,
            Stat::AttackSpeed => self.attack_speed,
            Stat::MoveSpeed => self.move_speed,
        }
    }

    pub fn get_mut(&mut self, stat: Stat) -> &mut f32 {
        match stat {
            Stat::AttackPower => &mut self.attack_power,
            Stat::MagicPower => &mut self.magic_power,
            Stat::Defense => &mut self.defense,
            Stat::Dexterity => &mut self.dexterity,
            Stat::Intelligence => &mut self.intelligence,
            Stat::AttackSpeed => &mut self.attack_speed,
            Stat::MoveSpeed => &mut self.move_speed,
        }
    }
}

/// Where the player wants to go. Integrated by the tick, written by commands.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MovementIntent {
    pub target: Vec3,
    pub moving: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CombatIntent {
    pub target_id: Option<EntityId>,
    pub in_combat: bool,
    pub last_attack_at: u64,
    /// Set while the current movement intent was issued to close distance.
    pub chasing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedSkill {
    pub skill_id: SkillId,
    pub level: u32,
    pub slot: Option<u8>,
}

/// Experience needed to advance from `level` to `level + 1`.
pub fn experience_for_level(level: u32) -> u64 {
    (100.0 * (level.max(1) as f64).powf(1.5)).round() as u64
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: EntityId,
    pub session_id: SessionId,
    pub name: String,
    pub class: CharacterClass,
    pub level: u32,
    /// Progress inside the current level.
    pub experience: u64,
    pub skill_points: u32,
    pub attributes: Attributes,
    pub stats: CombatStats,
    pub health: u32,
    pub max_health: u32,
    pub mana: u32,
    pub max_mana: u32,
    pub position: Vec3,
    pub spawn_position: Vec3,
    pub is_dead: bool,
    pub died_at: Option<u64>,
    pub movement: MovementIntent,
    pub combat: CombatIntent,
    pub skills: HashMap<SkillId, LearnedSkill>,
    pub gold: u64,
    pub inventory: Vec<LootItem>,
    /// Mutated since the last persistence flush.
    pub dirty: bool,
}

impl Player {
    pub fn new(
        id: EntityId,
        session_id: SessionId,
        name: impl Into<String>,
        class: CharacterClass,
        spawn: Vec3,
    ) -> Self {
        let mut player = Self {
            id,
            session_id,
            name: name.into(),
            class,
            level: 1,
            experience: 0,
            skill_points: 0,
            attributes: class.starting_attributes(),
            stats: CombatStats {
                attack_power: 0.0,
                magic_power: 0.0,
                defense: 0.0,
                dexterity: 0.0,
                intelligence: 0.0,
                attack_speed: 1.0,
                move_speed: 0.0,
            },
            health: 0,
            max_health: 0,
            mana: 0,
            max_mana: 0,
            position: spawn,
            spawn_position: spawn,
            is_dead: false,
            died_at: None,
            movement: MovementIntent {
                target: spawn,
                moving: false,
            },
            combat: CombatIntent::default(),
            skills: HashMap::new(),
            gold: 0,
            inventory: Vec::new(),
            dirty: true,
        };
        player.recompute_stats();
        player.health = player.max_health;
        player.mana = player.max_mana;
        player
    }

    /// Derives combat stats and pools from attributes and level.
    pub fn recompute_stats(&mut self) {
        let level = self.level as f32;
        let attrs = self.attributes;

        self.max_health = (100.0 + attrs.vitality * 10.0 + level * 15.0).round() as u32;
        self.max_mana = (50.0 + attrs.intelligence * 8.0 + level * 5.0).round() as u32;
        self.stats.attack_power = attrs.strength * 2.0 + level * 2.0;
        self.stats.magic_power = attrs.intelligence * 2.0 + level * 2.0;
        self.stats.defense = attrs.vitality + level;
        self.stats.dexterity = attrs.dexterity;
        self.stats.intelligence = attrs.intelligence;
        self.stats.attack_speed = 1.0 + attrs.dexterity * 0.01;
        self.stats.move_speed = 0.0;

        self.health = self.health.min(self.max_health);
        self.mana = self.mana.min(self.max_mana);
    }

    pub fn experience_to_next(&self) -> u64 {
        experience_for_level(self.level)
    }

    /// Adds experience and applies every level crossed. Returns levels gained.
    pub fn gain_experience(&mut self, amount: u64) -> u32 {
        self.dirty = true;
        if self.level >= MAX_LEVEL {
            return 0;
        }

        self.experience += amount;
        let mut gained = 0;
        while self.level < MAX_LEVEL && self.experience >= self.experience_to_next() {
            self.experience -= self.experience_to_next();
            self.level += 1;
            self.attributes.add(&self.class.growth());
            self.skill_points += 1;
            gained += 1;
        }

        if self.level >= MAX_LEVEL {
            self.experience = 0;
        }

        if gained > 0 {
            self.recompute_stats();
            self.health = self.max_health;
            self.mana = self.max_mana;
        }
        gained
    }

    /// Applies damage and reports whether this hit killed the player.
    pub fn take_damage(&mut self, amount: u32, now: u64) -> bool {
        if self.is_dead {
            return false;
        }

        self.health = self.health.saturating_sub(amount);
        self.dirty = true;
        if self.health == 0 {
            self.is_dead = true;
            self.died_at = Some(now);
            self.cancel_combat();
            self.stop_moving();
            return true;
        }
        false
    }

    /// Heals up to max health. Returns the amount actually restored.
    pub fn heal(&mut self, amount: u32) -> u32 {
        let before = self.health;
        self.health = self.health.saturating_add(amount).min(self.max_health);
        self.dirty = true;
        self.health - before
    }

    pub fn respawn(&mut self) {
        self.is_dead = false;
        self.died_at = None;
        self.health = self.max_health;
        self.mana = self.max_mana;
        self.position = self.spawn_position;
        self.movement = MovementIntent {
            target: self.spawn_position,
            moving: false,
        };
        self.combat = CombatIntent::default();
        self.dirty = true;
    }

    pub fn set_move_target(&mut self, target: Vec3) {
        self.movement.target = target;
        self.movement.moving = true;
    }

    pub fn stop_moving(&mut self) {
        self.movement.moving = false;
        self.movement.target = self.position;
    }

    /// Leaves combat and drops any chase movement tied to it.
    pub fn cancel_combat(&mut self) {
        if self.combat.chasing {
            self.stop_moving();
        }
        self.combat.in_combat = false;
        self.combat.target_id = None;
        self.combat.chasing = false;
    }

    pub fn engage(&mut self, target_id: EntityId) {
        self.combat.target_id = Some(target_id);
        self.combat.in_combat = true;
    }

    pub fn learned(&self, skill_id: SkillId) -> Option<&LearnedSkill> {
        self.skills.get(&skill_id)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            session_id: self.session_id,
            name: self.name.clone(),
            class: self.class,
            level: self.level,
            experience: self.experience,
            experience_to_next: self.experience_to_next(),
            position: self.position,
            health: self.health,
            max_health: self.max_health,
            mana: self.mana,
            max_mana: self.max_mana,
            is_dead: self.is_dead,
            in_combat: self.combat.in_combat,
            target_id: self.combat.target_id,
            moving: self.movement.moving,
            gold: self.gold,
        }
    }
}

/// Per-monster AI bookkeeping, owned by the monster and stepped by the tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MonsterAiState {
    pub target_id: Option<EntityId>,
    pub last_attack_at: u64,
}

#[derive(Debug, Clone)]
pub struct Monster {
    pub id: EntityId,
    pub template_id: u32,
    pub name: String,
    pub level: u32,
    pub position: Vec3,
    pub spawn_position: Vec3,
    pub health: u32,
    pub max_health: u32,
    pub stats: CombatStats,
    pub experience_reward: u32,
    pub aggro_radius: f32,
    pub attack_range: f32,
    pub respawn_ms: u64,
    pub is_dead: bool,
    pub died_at: Option<u64>,
    pub ai: MonsterAiState,
}

impl Monster {
    pub fn from_template(id: EntityId, template: &MonsterTemplate, position: Vec3) -> Self {
        Self {
            id,
            template_id: template.id,
            name: template.name.clone(),
            level: template.level,
            position,
            spawn_position: position,
            health: template.max_health,
            max_health: template.max_health,
            stats: CombatStats {
                attack_power: template.attack_power,
                magic_power: 0.0,
                defense: template.defense,
                dexterity: template.dexterity,
                intelligence: 0.0,
                attack_speed: template.attack_speed,
                move_speed: template.move_speed,
            },
            experience_reward: template.experience_reward,
            aggro_radius: template.aggro_radius,
            attack_range: template.attack_range,
            respawn_ms: template.respawn_ms(),
            is_dead: false,
            died_at: None,
            ai: MonsterAiState::default(),
        }
    }

    /// Applies damage and reports whether this hit made the kill.
    ///
    /// Only the alive-to-dead transition returns true, so with the monster's
    /// lock held exactly one caller can ever claim a given death.
    pub fn take_damage(&mut self, amount: u32, now: u64) -> bool {
        if self.is_dead {
            return false;
        }

        self.health = self.health.saturating_sub(amount);
        if self.health == 0 {
            self.is_dead = true;
            self.died_at = Some(now);
            self.ai = MonsterAiState::default();
            return true;
        }
        false
    }

    pub fn ready_to_respawn(&self, now: u64) -> bool {
        match self.died_at {
            Some(died_at) => self.is_dead && now.saturating_sub(died_at) >= self.respawn_ms,
            None => false,
        }
    }

    pub fn respawn(&mut self) {
        self.is_dead = false;
        self.died_at = None;
        self.health = self.max_health;
        self.position = self.spawn_position;
        self.ai = MonsterAiState::default();
    }

    pub fn snapshot(&self) -> MonsterSnapshot {
        MonsterSnapshot {
            id: self.id,
            template_id: self.template_id,
            name: self.name.clone(),
            level: self.level,
            position: self.position,
            health: self.health,
            max_health: self.max_health,
            is_dead: self.is_dead,
        }
    }
}
