//! Monster behaviour stepped once per tick.
//!
//! AI never locks a player while holding a monster lock. Planning works on a
//! copy of the monster; an attack locks the player first and then re-locks the
//! monster, so a monster that died in between never lands the hit.

use log::debug;
use rand::RngCore;
use realm_shared::{EntityId, ServerMessage, Vec3};

use crate::combat::{attack_interval_ms, effective_stats, CombatResolver};
use crate::entity::Monster;
use crate::utils::lock;
use crate::world::World;

/// A target further than this multiple of the aggro radius from the
/// monster's spawn point is abandoned.
const LEASH_FACTOR: f32 = 2.0;

pub trait MonsterAi: Send + Sync {
    /// Advances one monster by `dt_secs` and returns the messages it produced.
    fn step(
        &self,
        world: &World,
        resolver: &CombatResolver,
        monster_id: EntityId,
        now: u64,
        dt_secs: f32,
        rng: &mut dyn RngCore,
    ) -> Vec<ServerMessage>;
}

#[derive(Debug, Clone, Copy)]
struct TargetView {
    id: EntityId,
    position: Vec3,
}

/// Chases the nearest living player inside the aggro radius, attacks when in
/// range and walks home when the target is lost.
#[derive(Debug, Default)]
pub struct AggroAi;

impl AggroAi {
    fn living_player(world: &World, id: EntityId) -> Option<TargetView> {
        let handle = world.players.get(id)?;
        let player = lock(&handle);
        (!player.is_dead).then_some(TargetView {
            id,
            position: player.position,
        })
    }

    fn nearest_player(world: &World, from: Vec3, radius: f32) -> Option<TargetView> {
        world
            .players
            .handles()
            .into_iter()
            .filter_map(|(id, handle)| {
                let player = lock(&handle);
                (!player.is_dead).then_some(TargetView {
                    id,
                    position: player.position,
                })
            })
            .map(|view| (from.planar_distance(&view.position), view))
            .filter(|(distance, _)| *distance <= radius)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, view)| view)
    }

    fn pick_target(world: &World, monster: &Monster) -> Option<TargetView> {
        let leash = monster.aggro_radius * LEASH_FACTOR;
        let current = monster
            .ai
            .target_id
            .and_then(|id| Self::living_player(world, id))
            .filter(|view| monster.spawn_position.planar_distance(&view.position) <= leash);

        current.or_else(|| Self::nearest_player(world, monster.position, monster.aggro_radius))
    }
}

impl MonsterAi for AggroAi {
    fn step(
        &self,
        world: &World,
        resolver: &CombatResolver,
        monster_id: EntityId,
        now: u64,
        dt_secs: f32,
        mut rng: &mut dyn RngCore,
    ) -> Vec<ServerMessage> {
        let Some(handle) = world.monsters.get(monster_id) else {
            return Vec::new();
        };
        let view = {
            let monster = lock(&handle);
            if monster.is_dead {
                return Vec::new();
            }
            monster.clone()
        };

        let stats = effective_stats(resolver.effects(), view.id, &view.stats, now);
        let max_step = stats.move_speed.max(0.0) * dt_secs;

        let Some(target) = Self::pick_target(world, &view) else {
            let mut monster = lock(&handle);
            if monster.is_dead {
                return Vec::new();
            }
            monster.ai.target_id = None;
            if monster.position != monster.spawn_position {
                let (next, _) = monster.position.step_toward(&monster.spawn_position, max_step);
                monster.position = next;
            }
            return Vec::new();
        };

        let distance = view.position.planar_distance(&target.position);
        {
            let mut monster = lock(&handle);
            if monster.is_dead {
                return Vec::new();
            }
            if monster.ai.target_id != Some(target.id) {
                debug!("Monster {} aggroed on player {}", monster.id, target.id);
                monster.ai.target_id = Some(target.id);
            }

            if distance > monster.attack_range {
                let approach = (distance - monster.attack_range * 0.9).max(0.0);
                let (next, _) = monster
                    .position
                    .step_toward(&target.position, max_step.min(approach));
                monster.position = next;
                return Vec::new();
            }
        }

        let Some(player_handle) = world.players.get(target.id) else {
            return Vec::new();
        };
        let mut player = lock(&player_handle);
        let mut attacker = lock(&handle);
        if attacker.is_dead
            || player.is_dead
            || attacker.position.planar_distance(&player.position) > attacker.attack_range
        {
            return Vec::new();
        }

        let interval = attack_interval_ms(stats.attack_speed);
        let ready = attacker.ai.last_attack_at == 0
            || now.saturating_sub(attacker.ai.last_attack_at) >= interval;
        if !ready {
            return Vec::new();
        }
        attacker.ai.last_attack_at = now;
        let result = resolver.resolve_monster_attack(&attacker, &mut player, now, &mut rng);
        if result.damage == 0 {
            return Vec::new();
        }

        let mut messages = vec![ServerMessage::PlayerAttack {
            attacker_id: attacker.id,
            player_id: player.id,
            damage: result.damage,
            is_critical: result.crit,
            player_health: player.health,
        }];
        if result.died {
            debug!("Player {} killed by monster {}", player.id, attacker.id);
            messages.push(ServerMessage::PlayerDeath {
                player_id: player.id,
                killer_id: Some(attacker.id),
            });
        }
        messages
    }
}
