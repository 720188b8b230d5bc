//! Immutable content definitions: skills, monsters, items and class tables.
//!
//! These are loaded by the server's template store and never mutated at
//! runtime. A reload replaces whole definitions instead of editing them.

use serde::{Deserialize, Serialize};

use crate::SkillId;

/// Who a skill is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetType {
    #[serde(rename = "self")]
    SelfTarget,
    Enemy,
    Area,
    Ally,
}

/// Combat stats that timed effects can modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stat {
    AttackPower,
    MagicPower,
    Defense,
    Dexterity,
    Intelligence,
    AttackSpeed,
    MoveSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EffectKind {
    Buff,
    Debuff,
}

/// Secondary effect attached to a skill, applied on a successful roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectTemplate {
    pub kind: EffectKind,
    pub stat: Stat,
    pub value: f32,
    pub duration_secs: f32,
    #[serde(default = "default_chance")]
    pub chance: f32,
}

fn default_chance() -> f32 {
    1.0
}

impl EffectTemplate {
    pub fn duration_ms(&self) -> u64 {
        (self.duration_secs.max(0.0) * 1000.0).round() as u64
    }

    /// Debuffs always lower the stat, whatever sign the content author used.
    pub fn signed_value(&self) -> f32 {
        match self.kind {
            EffectKind::Buff => self.value,
            EffectKind::Debuff => -self.value.abs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillLevelData {
    pub level: u32,
    #[serde(default)]
    pub base_damage: f32,
    #[serde(default)]
    pub base_healing: f32,
    #[serde(default = "default_multiplier")]
    pub damage_multiplier: f32,
    #[serde(default)]
    pub crit_bonus: f32,
    #[serde(default = "default_point_cost")]
    pub point_cost: u32,
}

fn default_multiplier() -> f32 {
    1.0
}

fn default_point_cost() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillTemplate {
    pub id: SkillId,
    pub name: String,
    pub target_type: TargetType,
    #[serde(default)]
    pub mana_cost: u32,
    #[serde(default)]
    pub health_cost: u32,
    #[serde(default)]
    pub cooldown_secs: f32,
    #[serde(default)]
    pub range: f32,
    #[serde(default)]
    pub area_radius: f32,
    #[serde(default)]
    pub magical: bool,
    pub levels: Vec<SkillLevelData>,
    #[serde(default)]
    pub effects: Vec<EffectTemplate>,
}

impl SkillTemplate {
    pub fn cooldown_ms(&self) -> u64 {
        (self.cooldown_secs.max(0.0) * 1000.0).round() as u64
    }

    pub fn level_data(&self, level: u32) -> Option<&SkillLevelData> {
        self.levels.iter().find(|data| data.level == level)
    }

    pub fn max_level(&self) -> u32 {
        self.levels.iter().map(|data| data.level).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropEntry {
    pub item_id: u32,
    pub chance: f32,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterTemplate {
    pub id: u32,
    pub name: String,
    pub level: u32,
    pub max_health: u32,
    pub attack_power: f32,
    pub defense: f32,
    #[serde(default)]
    pub dexterity: f32,
    #[serde(default = "default_attack_speed")]
    pub attack_speed: f32,
    #[serde(default = "default_monster_speed")]
    pub move_speed: f32,
    #[serde(default = "default_aggro_radius")]
    pub aggro_radius: f32,
    #[serde(default = "default_monster_range")]
    pub attack_range: f32,
    pub experience_reward: u32,
    #[serde(default)]
    pub gold_min: u32,
    #[serde(default)]
    pub gold_max: u32,
    #[serde(default)]
    pub drops: Vec<DropEntry>,
    #[serde(default = "default_respawn")]
    pub respawn_secs: f32,
}

fn default_attack_speed() -> f32 {
    1.0
}

fn default_monster_speed() -> f32 {
    3.5
}

fn default_aggro_radius() -> f32 {
    8.0
}

fn default_monster_range() -> f32 {
    2.0
}

fn default_respawn() -> f32 {
    15.0
}

impl MonsterTemplate {
    pub fn respawn_ms(&self) -> u64 {
        (self.respawn_secs.max(0.0) * 1000.0).round() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTemplate {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub value: u32,
}

/// Primary attributes from which derived combat stats are computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    pub strength: f32,
    pub dexterity: f32,
    pub intelligence: f32,
    pub vitality: f32,
}

impl Attributes {
    pub fn add(&mut self, other: &Attributes) {
        self.strength += other.strength;
        self.dexterity += other.dexterity;
        self.intelligence += other.intelligence;
        self.vitality += other.vitality;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CharacterClass {
    Warrior,
    Archer,
    Mage,
}

impl CharacterClass {
    /// Mages auto-attack with magic power and roll crits on intelligence.
    pub fn is_magical(&self) -> bool {
        matches!(self, CharacterClass::Mage)
    }

    pub fn attack_range(&self) -> f32 {
        match self {
            CharacterClass::Warrior => 2.5,
            CharacterClass::Archer => 8.0,
            CharacterClass::Mage => 7.0,
        }
    }

    pub fn starting_attributes(&self) -> Attributes {
        match self {
            CharacterClass::Warrior => Attributes {
                strength: 12.0,
                dexterity: 8.0,
                intelligence: 4.0,
                vitality: 12.0,
            },
            CharacterClass::Archer => Attributes {
                strength: 8.0,
                dexterity: 14.0,
                intelligence: 6.0,
                vitality: 8.0,
            },
            CharacterClass::Mage => Attributes {
                strength: 4.0,
                dexterity: 6.0,
                intelligence: 14.0,
                vitality: 8.0,
            },
        }
    }

    pub fn growth(&self) -> Attributes {
        match self {
            CharacterClass::Warrior => Attributes {
                strength: 3.0,
                dexterity: 1.0,
                intelligence: 0.5,
                vitality: 2.5,
            },
            CharacterClass::Archer => Attributes {
                strength: 1.5,
                dexterity: 3.0,
                intelligence: 1.0,
                vitality: 1.5,
            },
            CharacterClass::Mage => Attributes {
                strength: 0.5,
                dexterity: 1.0,
                intelligence: 3.0,
                vitality: 1.5,
            },
        }
    }
}
