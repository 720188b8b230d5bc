//! Read-only content lookup with atomic hot reload.
//!
//! Readers take an `Arc` of the current [`TemplateSet`]; a reload swaps the
//! whole set at once, so a reader sees either the old or the new content and
//! never a half-applied mix.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use log::{info, warn};
use realm_shared::{
    DropEntry, EffectKind, EffectTemplate, ItemTemplate, MonsterTemplate, SkillId,
    SkillLevelData, SkillTemplate, Stat, TargetType,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TemplateError;
use crate::utils::{read, write};

pub trait TemplateStore: Send + Sync {
    fn skill(&self, id: SkillId) -> Option<Arc<SkillTemplate>>;
    fn monster(&self, id: u32) -> Option<Arc<MonsterTemplate>>;
    fn item(&self, id: u32) -> Option<Arc<ItemTemplate>>;

    /// Ids of every monster template, sorted.
    fn monster_ids(&self) -> Vec<u32>;
}

#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    pub skills: HashMap<SkillId, Arc<SkillTemplate>>,
    pub monsters: HashMap<u32, Arc<MonsterTemplate>>,
    pub items: HashMap<u32, Arc<ItemTemplate>>,
}

impl TemplateSet {
    pub fn with_skill(mut self, skill: SkillTemplate) -> Self {
        self.skills.insert(skill.id, Arc::new(skill));
        self
    }

    pub fn with_monster(mut self, monster: MonsterTemplate) -> Self {
        self.monsters.insert(monster.id, Arc::new(monster));
        self
    }

    pub fn with_item(mut self, item: ItemTemplate) -> Self {
        self.items.insert(item.id, Arc::new(item));
        self
    }

    /// Parses `{"skills": [...], "monsters": [...], "items": [...]}`.
    ///
    /// A malformed entry is skipped with a warning; the rest still load.
    pub fn from_json(source: &str) -> Result<Self, TemplateError> {
        let document: Value = serde_json::from_str(source)?;
        let Value::Object(sections) = document else {
            return Err(TemplateError::InvalidDocument(type_name(&document).to_string()));
        };

        let mut set = TemplateSet::default();
        for skill in parse_section::<SkillTemplate>(&sections, "skills") {
            set.skills.insert(skill.id, Arc::new(skill));
        }
        for monster in parse_section::<MonsterTemplate>(&sections, "monsters") {
            set.monsters.insert(monster.id, Arc::new(monster));
        }
        for item in parse_section::<ItemTemplate>(&sections, "items") {
            set.items.insert(item.id, Arc::new(item));
        }
        Ok(set)
    }

    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    /// Starter content used when no template file is configured.
    pub fn builtin() -> Self {
        TemplateSet::default()
            .with_skill(SkillTemplate {
                id: 1,
                name: "Power Strike".to_string(),
                target_type: TargetType::Enemy,
                mana_cost: 15,
                health_cost: 0,
                cooldown_secs: 4.0,
                range: 3.0,
                area_radius: 0.0,
                magical: false,
                levels: vec![
                    level(1, 20.0, 0.0, 1.2, 0.05),
                    level(2, 32.0, 0.0, 1.35, 0.08),
                    level(3, 45.0, 0.0, 1.5, 0.1),
                ],
                effects: vec![EffectTemplate {
                    kind: EffectKind::Debuff,
                    stat: Stat::Defense,
                    value: 5.0,
                    duration_secs: 4.0,
                    chance: 0.3,
                }],
            })
            .with_skill(SkillTemplate {
                id: 2,
                name: "Fireball".to_string(),
                target_type: TargetType::Enemy,
                mana_cost: 30,
                health_cost: 0,
                cooldown_secs: 2.5,
                range: 10.0,
                area_radius: 0.0,
                magical: true,
                levels: vec![
                    level(1, 35.0, 0.0, 1.1, 0.0),
                    level(2, 50.0, 0.0, 1.25, 0.03),
                ],
                effects: vec![],
            })
            .with_skill(SkillTemplate {
                id: 3,
                name: "Flame Nova".to_string(),
                target_type: TargetType::Area,
                mana_cost: 45,
                health_cost: 0,
                cooldown_secs: 8.0,
                range: 12.0,
                area_radius: 4.0,
                magical: true,
                levels: vec![level(1, 25.0, 0.0, 0.8, 0.0)],
                effects: vec![],
            })
            .with_skill(SkillTemplate {
                id: 4,
                name: "Mend".to_string(),
                target_type: TargetType::SelfTarget,
                mana_cost: 25,
                health_cost: 0,
                cooldown_secs: 6.0,
                range: 0.0,
                area_radius: 0.0,
                magical: true,
                levels: vec![level(1, 0.0, 40.0, 0.5, 0.0), level(2, 0.0, 70.0, 0.7, 0.0)],
                effects: vec![],
            })
            .with_skill(SkillTemplate {
                id: 5,
                name: "Battle Cry".to_string(),
                target_type: TargetType::SelfTarget,
                mana_cost: 20,
                health_cost: 10,
                cooldown_secs: 20.0,
                range: 0.0,
                area_radius: 0.0,
                magical: false,
                levels: vec![level(1, 0.0, 0.0, 1.0, 0.0)],
                effects: vec![EffectTemplate {
                    kind: EffectKind::Buff,
                    stat: Stat::AttackPower,
                    value: 12.0,
                    duration_secs: 10.0,
                    chance: 1.0,
                }],
            })
            .with_monster(MonsterTemplate {
                id: 1,
                name: "Forest Wolf".to_string(),
                level: 2,
                max_health: 80,
                attack_power: 9.0,
                defense: 6.0,
                dexterity: 10.0,
                attack_speed: 1.2,
                move_speed: 4.0,
                aggro_radius: 8.0,
                attack_range: 2.0,
                experience_reward: 30,
                gold_min: 2,
                gold_max: 8,
                drops: vec![DropEntry {
                    item_id: 1,
                    chance: 0.5,
                    quantity: 1,
                }],
                respawn_secs: 15.0,
            })
            .with_monster(MonsterTemplate {
                id: 2,
                name: "Stone Golem".to_string(),
                level: 5,
                max_health: 260,
                attack_power: 18.0,
                defense: 40.0,
                dexterity: 0.0,
                attack_speed: 0.6,
                move_speed: 2.0,
                aggro_radius: 6.0,
                attack_range: 2.5,
                experience_reward: 90,
                gold_min: 10,
                gold_max: 25,
                drops: vec![DropEntry {
                    item_id: 2,
                    chance: 0.25,
                    quantity: 2,
                }],
                respawn_secs: 30.0,
            })
            .with_item(ItemTemplate {
                id: 1,
                name: "Wolf Pelt".to_string(),
                value: 4,
            })
            .with_item(ItemTemplate {
                id: 2,
                name: "Granite Shard".to_string(),
                value: 9,
            })
    }
}

fn level(
    level: u32,
    base_damage: f32,
    base_healing: f32,
    damage_multiplier: f32,
    crit_bonus: f32,
) -> SkillLevelData {
    SkillLevelData {
        level,
        base_damage,
        base_healing,
        damage_multiplier,
        crit_bonus,
        point_cost: level,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_section<T: DeserializeOwned>(
    sections: &serde_json::Map<String, Value>,
    key: &str,
) -> Vec<T> {
    let Some(section) = sections.get(key) else {
        return Vec::new();
    };
    let Value::Array(entries) = section else {
        warn!("Template section '{}' is not an array, skipping", key);
        return Vec::new();
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match T::deserialize(entry) {
            Ok(template) => Some(template),
            Err(e) => {
                warn!("Skipping malformed {} entry #{}: {}", key, index, e);
                None
            }
        })
        .collect()
}

/// Shared, hot-reloadable template source.
pub struct TemplateRegistry {
    current: RwLock<Arc<TemplateSet>>,
}

impl TemplateRegistry {
    pub fn new(set: TemplateSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    pub fn snapshot(&self) -> Arc<TemplateSet> {
        Arc::clone(&read(&self.current))
    }

    pub fn reload(&self, set: TemplateSet) {
        info!(
            "Reloaded templates: {} skills, {} monsters, {} items",
            set.skills.len(),
            set.monsters.len(),
            set.items.len()
        );
        *write(&self.current) = Arc::new(set);
    }
}

impl TemplateStore for TemplateRegistry {
    fn skill(&self, id: SkillId) -> Option<Arc<SkillTemplate>> {
        self.snapshot().skills.get(&id).cloned()
    }

    fn monster(&self, id: u32) -> Option<Arc<MonsterTemplate>> {
        self.snapshot().monsters.get(&id).cloned()
    }

    fn item(&self, id: u32) -> Option<Arc<ItemTemplate>> {
        self.snapshot().items.get(&id).cloned()
    }

    fn monster_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.snapshot().monsters.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
