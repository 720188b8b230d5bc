//! Skill use and skill progression.
//!
//! A skill use is validated and executed while the caster's lock is held, so
//! two casts from the same player cannot interleave. Monster locks are taken
//! inside it in id order, which follows the player-then-monster lock order.
//! Validation runs in a fixed order and the first failure is returned before
//! anything is mutated. Every random roll is made before costs are paid.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, error};
use rand::Rng;
use realm_shared::{
    CharacterClass, EffectKind, EntityId, ServerMessage, SkillId, SkillLevelData,
    SkillTargetResult, SkillTemplate, TargetType, Vec3, HOTBAR_SLOTS,
};

use crate::combat::{
    effective_stats, experience_reward, roll_damage, DamageInput, DamageKind, DamageRoll,
};
use crate::effects::{ActiveEffect, CooldownStore, EffectStore};
use crate::entity::{LearnedSkill, Monster, Player};
use crate::error::{ProgressionError, SkillFailure};
use crate::templates::TemplateStore;
use crate::utils::{lock, panic_message};
use crate::world::World;

#[derive(Debug, Clone, PartialEq)]
pub struct SkillRequest {
    pub caster_id: EntityId,
    pub skill_id: SkillId,
    pub target_id: Option<EntityId>,
    pub target_position: Option<Vec3>,
}

impl SkillRequest {
    pub fn new(caster_id: EntityId, skill_id: SkillId) -> Self {
        Self {
            caster_id,
            skill_id,
            target_id: None,
            target_position: None,
        }
    }

    pub fn at_target(mut self, target_id: EntityId) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn at_position(mut self, position: Vec3) -> Self {
        self.target_position = Some(position);
        self
    }
}

/// A monster killed by a skill, for loot hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillKill {
    pub monster_id: EntityId,
    pub template_id: u32,
    pub experience: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkillOutcome {
    pub caster_id: EntityId,
    pub skill_id: SkillId,
    pub skill_name: String,
    pub targets: Vec<SkillTargetResult>,
    pub effects: Vec<ActiveEffect>,
    pub kills: Vec<SkillKill>,
    pub caster_health: u32,
    pub caster_mana: u32,
    pub levels_gained: u32,
}

impl SkillOutcome {
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::SkillUsed {
            caster_id: self.caster_id,
            skill_id: self.skill_id,
            skill_name: self.skill_name.clone(),
            targets: self.targets.clone(),
            caster_health: self.caster_health,
            caster_mana: self.caster_mana,
        }
    }
}

/// Skills a new character of `class` starts with, in hotbar order.
pub fn starter_skills(class: CharacterClass) -> &'static [SkillId] {
    match class {
        CharacterClass::Warrior => &[1, 5],
        CharacterClass::Archer => &[1, 4],
        CharacterClass::Mage => &[2, 3, 4],
    }
}

pub struct SkillEngine {
    world: Arc<World>,
    templates: Arc<dyn TemplateStore>,
    effects: Arc<EffectStore>,
    cooldowns: Arc<CooldownStore>,
}

impl SkillEngine {
    pub fn new(
        world: Arc<World>,
        templates: Arc<dyn TemplateStore>,
        effects: Arc<EffectStore>,
        cooldowns: Arc<CooldownStore>,
    ) -> Self {
        Self {
            world,
            templates,
            effects,
            cooldowns,
        }
    }

    pub fn cooldowns(&self) -> &CooldownStore {
        &self.cooldowns
    }

    /// Validates and executes one skill use at time `now` (ms).
    ///
    /// A panic during execution is caught here and reported as
    /// [`SkillFailure::ExecutionError`].
    pub fn use_skill<R: Rng>(
        &self,
        request: &SkillRequest,
        now: u64,
        rng: &mut R,
    ) -> Result<SkillOutcome, SkillFailure> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.execute(request, now, rng))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    "Skill {} from {} panicked: {}",
                    request.skill_id, request.caster_id, message
                );
                Err(SkillFailure::ExecutionError(message))
            }
        }
    }

    fn execute<R: Rng>(
        &self,
        request: &SkillRequest,
        now: u64,
        rng: &mut R,
    ) -> Result<SkillOutcome, SkillFailure> {
        let handle = self
            .world
            .players
            .get(request.caster_id)
            .ok_or(SkillFailure::CasterNotFound)?;
        let mut caster = lock(&handle);

        if caster.is_dead {
            return Err(SkillFailure::CasterDead);
        }
        let learned_level = caster
            .learned(request.skill_id)
            .map(|skill| skill.level)
            .ok_or(SkillFailure::SkillNotLearned(request.skill_id))?;
        let template = self
            .templates
            .skill(request.skill_id)
            .ok_or(SkillFailure::TemplateNotFound(request.skill_id))?;

        let remaining_ms =
            self.cooldowns
                .remaining(caster.id, template.id, template.cooldown_ms(), now);
        if remaining_ms > 0 {
            return Err(SkillFailure::OnCooldown { remaining_ms });
        }

        let level = template
            .level_data(learned_level)
            .cloned()
            .ok_or(SkillFailure::LevelDataMissing {
                skill_id: template.id,
                level: learned_level,
            })?;
        if caster.mana < template.mana_cost {
            return Err(SkillFailure::InsufficientMana {
                required: template.mana_cost,
                available: caster.mana,
            });
        }
        if template.health_cost > caster.health {
            return Err(SkillFailure::InsufficientHealth {
                required: template.health_cost,
                available: caster.health,
            });
        }

        let mut outcome = SkillOutcome {
            caster_id: caster.id,
            skill_id: template.id,
            skill_name: template.name.clone(),
            targets: Vec::new(),
            effects: Vec::new(),
            kills: Vec::new(),
            caster_health: 0,
            caster_mana: 0,
            levels_gained: 0,
        };

        match template.target_type {
            TargetType::Enemy => {
                let target_id = request.target_id.ok_or(SkillFailure::TargetNotFound)?;
                let target = self
                    .world
                    .monsters
                    .get(target_id)
                    .ok_or(SkillFailure::TargetNotFound)?;
                let mut monster = lock(&target);
                if monster.is_dead {
                    return Err(SkillFailure::TargetDead);
                }
                let distance = caster.position.planar_distance(&monster.position);
                if distance > template.range {
                    return Err(SkillFailure::OutOfRange {
                        distance,
                        range: template.range,
                    });
                }

                let plan = self.plan_strike(&caster, &monster, &template, &level, now, rng);
                self.commit(&mut caster, &template, now);
                self.strike(&mut caster, &mut monster, &template, plan, now, &mut outcome);
            }
            TargetType::Area => {
                let center = request.target_position.unwrap_or(caster.position);
                if template.range > 0.0 {
                    let distance = caster.position.planar_distance(&center);
                    if distance > template.range {
                        return Err(SkillFailure::OutOfRange {
                            distance,
                            range: template.range,
                        });
                    }
                }

                // Handles come sorted by id, so concurrent area casts lock in the same order.
                let handles = self.world.monsters.handles();
                let mut targets: Vec<_> = handles
                    .iter()
                    .map(|(_, target)| lock(target))
                    .filter(|monster| {
                        !monster.is_dead
                            && monster.position.planar_distance(&center) <= template.area_radius
                    })
                    .collect();
                let mut plans = Vec::with_capacity(targets.len());
                for monster in &targets {
                    plans.push(self.plan_strike(&caster, monster, &template, &level, now, rng));
                }

                self.commit(&mut caster, &template, now);
                for (monster, plan) in targets.iter_mut().zip(plans) {
                    self.strike(&mut caster, monster, &template, plan, now, &mut outcome);
                }
            }
            // Party targeting does not exist yet; ally skills act on the caster.
            TargetType::SelfTarget | TargetType::Ally => {
                let effect_hits = roll_effects(&template, rng);
                self.commit(&mut caster, &template, now);
                self.support_self(&mut caster, &template, &level, effect_hits, now, &mut outcome);
            }
        }

        outcome.caster_health = caster.health;
        outcome.caster_mana = caster.mana;
        debug!(
            "Player {} used {} ({} targets, {} kills)",
            caster.id,
            template.name,
            outcome.targets.len(),
            outcome.kills.len()
        );
        Ok(outcome)
    }

    /// Pays the costs and starts the cooldown. Only reached after validation.
    fn commit(&self, caster: &mut Player, template: &SkillTemplate, now: u64) {
        caster.mana -= template.mana_cost;
        caster.health = caster.health.saturating_sub(template.health_cost).max(1);
        caster.dirty = true;
        self.cooldowns.stamp(caster.id, template.id, now);
    }

    /// Rolls damage and effect procs against one monster without touching
    /// either side.
    fn plan_strike<R: Rng>(
        &self,
        caster: &Player,
        monster: &Monster,
        template: &SkillTemplate,
        level: &SkillLevelData,
        now: u64,
        rng: &mut R,
    ) -> StrikePlan {
        let kind = DamageKind::from_magical(template.magical);
        let caster_stats = effective_stats(&self.effects, caster.id, &caster.stats, now);
        let monster_stats = effective_stats(&self.effects, monster.id, &monster.stats, now);

        let roll = roll_damage(
            DamageInput {
                raw: level.base_damage + kind.power(&caster_stats) * level.damage_multiplier,
                crit_stat: kind.crit_stat(&caster_stats),
                crit_bonus: level.crit_bonus,
                defense: monster_stats.defense,
            },
            rng,
        );
        StrikePlan {
            roll,
            effect_hits: roll_effects(template, rng),
        }
    }

    fn strike(
        &self,
        caster: &mut Player,
        monster: &mut Monster,
        template: &SkillTemplate,
        plan: StrikePlan,
        now: u64,
        outcome: &mut SkillOutcome,
    ) {
        let roll = plan.roll;
        let died = monster.take_damage(roll.damage, now);

        for (effect, hit) in template.effects.iter().zip(plan.effect_hits) {
            if !hit {
                continue;
            }
            let target_id = match effect.kind {
                EffectKind::Buff => caster.id,
                EffectKind::Debuff if died => continue,
                EffectKind::Debuff => monster.id,
            };
            outcome
                .effects
                .push(self.effects.apply(target_id, caster.id, effect, now));
        }

        if died {
            let experience = experience_reward(caster.level, monster.level, monster.experience_reward);
            outcome.levels_gained += caster.gain_experience(experience);
            outcome.kills.push(SkillKill {
                monster_id: monster.id,
                template_id: monster.template_id,
                experience,
            });
        }

        outcome.targets.push(SkillTargetResult {
            target_id: monster.id,
            damage: roll.damage,
            is_critical: roll.crit,
            healing: 0,
            target_health: monster.health,
            target_died: died,
        });
    }

    fn support_self(
        &self,
        caster: &mut Player,
        template: &SkillTemplate,
        level: &SkillLevelData,
        effect_hits: Vec<bool>,
        now: u64,
        outcome: &mut SkillOutcome,
    ) {
        let mut healed = 0;
        if level.base_healing > 0.0 {
            let stats = effective_stats(&self.effects, caster.id, &caster.stats, now);
            let amount = (level.base_healing + stats.magic_power * level.damage_multiplier)
                .round()
                .max(1.0) as u32;
            healed = caster.heal(amount);
        }

        for (effect, hit) in template.effects.iter().zip(effect_hits) {
            if hit {
                outcome
                    .effects
                    .push(self.effects.apply(caster.id, caster.id, effect, now));
            }
        }

        outcome.targets.push(SkillTargetResult {
            target_id: caster.id,
            damage: 0,
            is_critical: false,
            healing: healed,
            target_health: caster.health,
            target_died: false,
        });
    }

    /// Grants a skill at level 1 without spending points.
    pub fn grant_skill(&self, player: &mut Player, skill_id: SkillId, slot: Option<u8>) {
        player.skills.insert(
            skill_id,
            LearnedSkill {
                skill_id,
                level: 1,
                slot,
            },
        );
        player.dirty = true;
    }

    /// Learns an unknown skill, or raises a known one by a level.
    pub fn learn_skill(
        &self,
        player_id: EntityId,
        skill_id: SkillId,
    ) -> Result<LearnedSkill, ProgressionError> {
        let handle = self
            .world
            .players
            .get(player_id)
            .ok_or(ProgressionError::PlayerNotFound)?;
        let mut player = lock(&handle);
        if player.learned(skill_id).is_some() {
            return self.raise_level(&mut player, skill_id);
        }

        let template = self
            .templates
            .skill(skill_id)
            .ok_or(ProgressionError::TemplateNotFound(skill_id))?;
        let cost = template
            .level_data(1)
            .map(|data| data.point_cost)
            .ok_or(ProgressionError::MaxLevel(skill_id))?;
        spend_points(&mut player, cost)?;

        let learned = LearnedSkill {
            skill_id,
            level: 1,
            slot: None,
        };
        player.skills.insert(skill_id, learned.clone());
        debug!("Player {} learned skill {}", player_id, skill_id);
        Ok(learned)
    }

    pub fn upgrade_skill(
        &self,
        player_id: EntityId,
        skill_id: SkillId,
    ) -> Result<LearnedSkill, ProgressionError> {
        let handle = self
            .world
            .players
            .get(player_id)
            .ok_or(ProgressionError::PlayerNotFound)?;
        let mut player = lock(&handle);
        self.raise_level(&mut player, skill_id)
    }

    fn raise_level(
        &self,
        player: &mut Player,
        skill_id: SkillId,
    ) -> Result<LearnedSkill, ProgressionError> {
        let current = player
            .learned(skill_id)
            .map(|skill| skill.level)
            .ok_or(ProgressionError::NotLearned(skill_id))?;
        let template = self
            .templates
            .skill(skill_id)
            .ok_or(ProgressionError::TemplateNotFound(skill_id))?;
        let cost = template
            .level_data(current + 1)
            .map(|data| data.point_cost)
            .ok_or(ProgressionError::MaxLevel(skill_id))?;
        spend_points(player, cost)?;

        let learned = player
            .skills
            .get_mut(&skill_id)
            .ok_or(ProgressionError::NotLearned(skill_id))?;
        learned.level = current + 1;
        debug!("Player {} raised skill {} to {}", player.id, skill_id, current + 1);
        Ok(learned.clone())
    }

    /// Binds a learned skill to a hotbar slot, displacing whatever held it.
    pub fn assign_slot(
        &self,
        player_id: EntityId,
        skill_id: SkillId,
        slot: u8,
    ) -> Result<(), ProgressionError> {
        if slot >= HOTBAR_SLOTS {
            return Err(ProgressionError::InvalidSlot(slot));
        }
        let handle = self
            .world
            .players
            .get(player_id)
            .ok_or(ProgressionError::PlayerNotFound)?;
        let mut player = lock(&handle);
        if player.learned(skill_id).is_none() {
            return Err(ProgressionError::NotLearned(skill_id));
        }

        for skill in player.skills.values_mut() {
            if skill.slot == Some(slot) {
                skill.slot = None;
            }
        }
        if let Some(skill) = player.skills.get_mut(&skill_id) {
            skill.slot = Some(slot);
        }
        player.dirty = true;
        Ok(())
    }
}

/// Rolls decided before a cast commits, so a failed roll leaves nothing spent.
struct StrikePlan {
    roll: DamageRoll,
    effect_hits: Vec<bool>,
}

fn roll_effects<R: Rng>(template: &SkillTemplate, rng: &mut R) -> Vec<bool> {
    template
        .effects
        .iter()
        .map(|effect| rng.gen::<f32>() < effect.chance)
        .collect()
}

fn spend_points(player: &mut Player, cost: u32) -> Result<(), ProgressionError> {
    if player.skill_points < cost {
        return Err(ProgressionError::NotEnoughPoints {
            required: cost,
            available: player.skill_points,
        });
    }
    player.skill_points -= cost;
    player.dirty = true;
    Ok(())
}
