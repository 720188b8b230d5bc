//! Damage resolution and kill rewards.
//!
//! The critical multiplier is applied to the raw value before defense
//! mitigation. Auto-attacks, monster attacks and skills all go through
//! [`roll_damage`], so the ordering is the same everywhere.

use std::sync::Arc;

use log::debug;
use rand::Rng;
use realm_shared::{
    EntityId, CRIT_MULTIPLIER, CRIT_PER_STAT_POINT, DEFENSE_CONSTANT, MAX_CRIT_CHANCE,
    MIN_ATTACK_SPEED, MIN_DAMAGE_FACTOR, BASE_ATTACK_INTERVAL_MS,
};

use crate::effects::EffectStore;
use crate::entity::{CombatStats, Monster, Player};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageKind {
    Physical,
    Magical,
}

impl DamageKind {
    pub fn from_magical(magical: bool) -> Self {
        if magical {
            DamageKind::Magical
        } else {
            DamageKind::Physical
        }
    }

    /// Stat that scales raw damage of this kind.
    pub fn power(&self, stats: &CombatStats) -> f32 {
        match self {
            DamageKind::Physical => stats.attack_power,
            DamageKind::Magical => stats.magic_power,
        }
    }

    /// Stat that drives the critical chance of this kind.
    pub fn crit_stat(&self, stats: &CombatStats) -> f32 {
        match self {
            DamageKind::Physical => stats.dexterity,
            DamageKind::Magical => stats.intelligence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageInput {
    pub raw: f32,
    pub crit_stat: f32,
    pub crit_bonus: f32,
    pub defense: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRoll {
    pub damage: u32,
    pub crit: bool,
}

pub fn crit_chance(crit_stat: f32, crit_bonus: f32) -> f32 {
    (crit_stat * CRIT_PER_STAT_POINT + crit_bonus).clamp(0.0, MAX_CRIT_CHANCE)
}

/// Defense mitigation with a floor on the multiplier and on the result.
pub fn mitigate(raw: f32, defense: f32) -> u32 {
    let defense = defense.max(0.0);
    let factor = (1.0 - defense / (defense + DEFENSE_CONSTANT)).max(MIN_DAMAGE_FACTOR);
    let damage = (raw.max(0.0) * factor).round();
    (damage as u32).max(1)
}

pub fn roll_damage<R: Rng>(input: DamageInput, rng: &mut R) -> DamageRoll {
    let chance = crit_chance(input.crit_stat, input.crit_bonus);
    let crit = chance > 0.0 && rng.gen::<f32>() < chance;
    let raw = if crit {
        input.raw * CRIT_MULTIPLIER
    } else {
        input.raw
    };
    DamageRoll {
        damage: mitigate(raw, input.defense),
        crit,
    }
}

/// Experience for a kill, scaled by the level gap between killer and victim.
pub fn experience_reward(attacker_level: u32, defender_level: u32, base_reward: u32) -> u64 {
    let gap = defender_level as i64 - attacker_level as i64;
    let modifier = if gap >= 0 {
        1.0 + 0.1 * gap.min(5) as f64
    } else {
        (1.0 - 0.2 * gap.unsigned_abs() as f64).max(0.1)
    };
    ((base_reward as f64 * modifier).round() as u64).max(1)
}

pub fn attack_interval_ms(attack_speed: f32) -> u64 {
    (BASE_ATTACK_INTERVAL_MS / attack_speed.max(MIN_ATTACK_SPEED)).round() as u64
}

/// Base stats plus every live effect on `entity_id`.
pub fn effective_stats(
    effects: &EffectStore,
    entity_id: EntityId,
    base: &CombatStats,
    now: u64,
) -> CombatStats {
    let mut stats = *base;
    for effect in effects.active_effects(entity_id, now) {
        *stats.get_mut(effect.stat) += effect.value;
    }
    stats
}

/// Outcome of one resolved hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttackResult {
    pub damage: u32,
    pub crit: bool,
    pub died: bool,
    pub experience: u64,
    pub levels_gained: u32,
}

impl AttackResult {
    pub fn leveled_up(&self) -> bool {
        self.levels_gained > 0
    }
}

pub struct CombatResolver {
    effects: Arc<EffectStore>,
}

impl CombatResolver {
    pub fn new(effects: Arc<EffectStore>) -> Self {
        Self { effects }
    }

    pub fn effects(&self) -> &EffectStore {
        &self.effects
    }

    /// Resolves one player auto-attack against a monster.
    ///
    /// The caller holds both entity locks (player first), which makes the
    /// damage, death detection and experience grant one indivisible step.
    pub fn resolve_auto_attack<R: Rng>(
        &self,
        attacker: &mut Player,
        defender: &mut Monster,
        now: u64,
        rng: &mut R,
    ) -> AttackResult {
        if attacker.is_dead || defender.is_dead {
            return AttackResult::default();
        }

        let kind = DamageKind::from_magical(attacker.class.is_magical());
        let attacker_stats = effective_stats(&self.effects, attacker.id, &attacker.stats, now);
        let defender_stats = effective_stats(&self.effects, defender.id, &defender.stats, now);

        let roll = roll_damage(
            DamageInput {
                raw: kind.power(&attacker_stats),
                crit_stat: kind.crit_stat(&attacker_stats),
                crit_bonus: 0.0,
                defense: defender_stats.defense,
            },
            rng,
        );

        let died = defender.take_damage(roll.damage, now);
        let mut result = AttackResult {
            damage: roll.damage,
            crit: roll.crit,
            died,
            ..AttackResult::default()
        };

        if died {
            let (experience, levels) =
                self.grant_kill_experience(attacker, defender.level, defender.experience_reward);
            result.experience = experience;
            result.levels_gained = levels;
            debug!(
                "Player {} killed monster {} for {} xp",
                attacker.id, defender.id, experience
            );
        }
        result
    }

    /// Resolves a monster hit on a player. Callers hold the player's lock and
    /// then the monster's, so neither side can die mid-resolution.
    pub fn resolve_monster_attack<R: Rng>(
        &self,
        attacker: &Monster,
        defender: &mut Player,
        now: u64,
        rng: &mut R,
    ) -> AttackResult {
        if attacker.is_dead || defender.is_dead {
            return AttackResult::default();
        }

        let attacker_stats = effective_stats(&self.effects, attacker.id, &attacker.stats, now);
        let defender_stats = effective_stats(&self.effects, defender.id, &defender.stats, now);

        let roll = roll_damage(
            DamageInput {
                raw: attacker_stats.attack_power,
                crit_stat: attacker_stats.dexterity,
                crit_bonus: 0.0,
                defense: defender_stats.defense,
            },
            rng,
        );

        AttackResult {
            damage: roll.damage,
            crit: roll.crit,
            died: defender.take_damage(roll.damage, now),
            ..AttackResult::default()
        }
    }

    /// Credits kill experience. Returns (experience granted, levels gained).
    pub fn grant_kill_experience(
        &self,
        player: &mut Player,
        monster_level: u32,
        base_reward: u32,
    ) -> (u64, u32) {
        let experience = experience_reward(player.level, monster_level, base_reward);
        let levels = player.gain_experience(experience);
        (experience, levels)
    }
}
