//! Integration tests for the simulation core
//!
//! These tests drive the public services the way the network layer and the
//! tick loop do, including from several threads at once.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realm_server::broadcast::{ChannelTransport, Outbound};
use realm_server::commands::CommandHandler;
use realm_server::config::ServerConfig;
use realm_server::error::SkillFailure;
use realm_server::persistence::MemorySaveStore;
use realm_server::scheduler::WorldTickScheduler;
use realm_server::services::Services;
use realm_server::skills::SkillRequest;
use realm_server::templates::{TemplateRegistry, TemplateSet};
use realm_server::utils::lock;
use realm_shared::{CharacterClass, EntityId, MonsterTemplate, ServerMessage, Vec3};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

const DUMMY: u32 = 90;
const FRAGILE: u32 = 91;

fn monster_template(id: u32, max_health: u32, defense: f32) -> MonsterTemplate {
    MonsterTemplate {
        id,
        name: format!("Target {}", id),
        level: 1,
        max_health,
        attack_power: 0.0,
        defense,
        dexterity: 0.0,
        attack_speed: 1.0,
        move_speed: 0.0,
        aggro_radius: 0.0,
        attack_range: 0.0,
        experience_reward: 40,
        gold_min: 0,
        gold_max: 0,
        drops: vec![],
        respawn_secs: 600.0,
    }
}

struct Harness {
    services: Arc<Services>,
    saves: Arc<MemorySaveStore>,
    outbound: Receiver<Outbound>,
}

fn harness() -> Harness {
    let transport = Arc::new(ChannelTransport::new(4096));
    let outbound = transport.subscribe();
    let saves = Arc::new(MemorySaveStore::new());
    let templates = TemplateSet::builtin()
        .with_monster(monster_template(DUMMY, 10_000, 0.0))
        .with_monster(monster_template(FRAGILE, 5, 0.0));
    let services = Services::new(
        ServerConfig::default(),
        Arc::new(TemplateRegistry::new(templates)),
        saves.clone(),
        transport,
    );
    Harness {
        services: Arc::new(services),
        saves,
        outbound,
    }
}

fn spawn(services: &Services, template_id: u32, position: Vec3) -> EntityId {
    let template = services.templates.monster(template_id).unwrap();
    services.world.spawn_monster(&template, position)
}

fn join(services: &Arc<Services>, session: u32, class: CharacterClass) -> EntityId {
    CommandHandler::new(Arc::clone(services)).join(session, &format!("hero{}", session), class, 0)
}

/// MOVEMENT VALIDATION
mod movement_tests {
    use super::*;
    use realm_server::movement::MovementValidator;

    /// Random bursts, teleports and out-of-order timestamps never let two
    /// consecutive accepted samples imply more than the speed limit.
    #[test]
    fn accepted_samples_never_exceed_max_speed() {
        let max_speed = 7.5;
        let validator = MovementValidator::new(max_speed);
        let mut rng = StdRng::seed_from_u64(42);
        let mut clock: u64 = 1_000;

        validator.validate(1, Vec3::default(), clock);
        let mut accepted = 0;
        let mut rejected = 0;

        for _ in 0..5_000 {
            let (last_position, last_at) = validator.last_accepted(1).unwrap();

            clock = match rng.gen_range(0..10) {
                0 => clock.saturating_sub(rng.gen_range(0..200)),
                1 => clock,
                _ => clock + rng.gen_range(1..120),
            };
            let reach = if rng.gen_bool(0.1) { 500.0 } else { 1.0 };
            let proposal = Vec3::new(
                last_position.x + rng.gen_range(-reach..reach),
                rng.gen_range(-50.0..50.0),
                last_position.z + rng.gen_range(-reach..reach),
            );

            let verdict = validator.validate(1, proposal, clock);
            let (stored_position, stored_at) = validator.last_accepted(1).unwrap();

            if verdict.is_accepted() {
                accepted += 1;
                let distance = last_position.planar_distance(&stored_position);
                let elapsed = stored_at.saturating_sub(last_at);
                if elapsed == 0 {
                    assert!(distance <= 0.01, "same-instant jump of {}", distance);
                } else {
                    let speed = distance / (elapsed as f32 / 1000.0);
                    assert!(speed <= max_speed + 1e-3, "accepted {} u/s", speed);
                }
            } else {
                rejected += 1;
                assert_eq!((stored_position, stored_at), (last_position, last_at));
            }
        }

        assert!(accepted > 0);
        assert!(rejected > 0);
    }

    #[test]
    fn teleport_rejected_gradual_accepted() {
        let validator = MovementValidator::new(7.5);
        assert!(validator.validate(9, Vec3::default(), 0).is_accepted());
        assert!(!validator
            .validate(9, Vec3::new(100.0, 0.0, 0.0), 50)
            .is_accepted());
        assert!(validator
            .validate(9, Vec3::new(0.3, 0.0, 0.0), 50)
            .is_accepted());
    }
}

/// COMBAT AND SKILL RULES
mod skill_tests {
    use super::*;

    #[test]
    fn damage_floor_holds_against_huge_defense() {
        assert!(realm_server::combat::mitigate(10.0, 100_000.0) >= 1);
        assert_eq!(realm_server::combat::mitigate(0.0, 0.0), 1);

        let harness = harness();
        let services = &harness.services;
        let template = monster_template(7, 500, 100_000.0);
        let monster_id = services.world.spawn_monster(&template, Vec3::default());
        let player_id = join(services, 1, CharacterClass::Warrior);
        let mut rng = StdRng::seed_from_u64(3);

        let player = services.world.players.get(player_id).unwrap();
        let monster = services.world.monsters.get(monster_id).unwrap();
        for step in 0..20u64 {
            let result = services.resolver.resolve_auto_attack(
                &mut lock(&player),
                &mut lock(&monster),
                step,
                &mut rng,
            );
            assert!(result.damage >= 1);
        }
        assert!(lock(&monster).health < 500);
    }

    #[test]
    fn fifty_mana_caster_pays_thirty() {
        let harness = harness();
        let services = &harness.services;
        let caster = join(services, 1, CharacterClass::Mage);
        let target = spawn(services, DUMMY, Vec3::new(5.0, 0.0, 0.0));
        lock(&services.world.players.get(caster).unwrap()).mana = 50;
        let mut rng = StdRng::seed_from_u64(5);

        let outcome = services
            .skills
            .use_skill(&SkillRequest::new(caster, 2).at_target(target), 7_000, &mut rng)
            .unwrap();

        assert_eq!(outcome.caster_mana, 20);
        assert_eq!(services.world.player(caster).unwrap().mana, 20);
        assert_eq!(services.cooldowns.last_used(caster, 2), Some(7_000));
        assert!(services.world.monster(target).unwrap().health < 10_000);
    }

    #[test]
    fn insufficient_mana_changes_nothing() {
        let harness = harness();
        let services = &harness.services;
        let caster = join(services, 1, CharacterClass::Mage);
        let target = spawn(services, DUMMY, Vec3::new(5.0, 0.0, 0.0));
        lock(&services.world.players.get(caster).unwrap()).mana = 10;
        let before = services.world.player(caster).unwrap();
        let mut rng = StdRng::seed_from_u64(6);

        let failure = services
            .skills
            .use_skill(&SkillRequest::new(caster, 2).at_target(target), 1_000, &mut rng)
            .unwrap_err();

        assert_eq!(
            failure,
            SkillFailure::InsufficientMana {
                required: 30,
                available: 10
            }
        );
        assert_eq!(services.world.player(caster).unwrap(), before);
        assert_eq!(services.cooldowns.last_used(caster, 2), None);
        assert_eq!(services.world.monster(target).unwrap().health, 10_000);
    }

    #[test]
    fn cooldown_blocks_repeat_until_elapsed() {
        let harness = harness();
        let services = &harness.services;
        let caster = join(services, 1, CharacterClass::Mage);
        let target = spawn(services, DUMMY, Vec3::new(5.0, 0.0, 0.0));
        let request = SkillRequest::new(caster, 2).at_target(target);
        let mut rng = StdRng::seed_from_u64(7);

        assert!(services.skills.use_skill(&request, 1_000, &mut rng).is_ok());
        let mana_after_first = services.world.player(caster).unwrap().mana;

        assert_eq!(
            services.skills.use_skill(&request, 3_499, &mut rng),
            Err(SkillFailure::OnCooldown { remaining_ms: 1 })
        );
        assert_eq!(services.world.player(caster).unwrap().mana, mana_after_first);

        assert!(services.skills.use_skill(&request, 3_500, &mut rng).is_ok());
        assert_eq!(services.cooldowns.last_used(caster, 2), Some(3_500));
    }

    #[test]
    fn area_skill_hits_exactly_the_radius() {
        let harness = harness();
        let services = &harness.services;
        let caster = join(services, 1, CharacterClass::Mage);
        let center = Vec3::new(10.0, 0.0, 0.0);

        let on_edge = spawn(services, DUMMY, Vec3::new(14.0, 0.0, 0.0));
        let raised = spawn(services, DUMMY, Vec3::new(10.0, 5.0, 4.0));
        let inside = spawn(services, DUMMY, Vec3::new(12.0, 0.0, 2.0));
        let at_center = spawn(services, DUMMY, center);
        let just_outside = spawn(services, DUMMY, Vec3::new(14.01, 0.0, 0.0));
        let far = spawn(services, DUMMY, Vec3::new(-10.0, 0.0, 0.0));
        let dead = spawn(services, DUMMY, Vec3::new(11.0, 0.0, 0.0));
        lock(&services.world.monsters.get(dead).unwrap()).take_damage(u32::MAX, 0);

        let mut rng = StdRng::seed_from_u64(8);
        let outcome = services
            .skills
            .use_skill(&SkillRequest::new(caster, 3).at_position(center), 1_000, &mut rng)
            .unwrap();

        let mut hit: Vec<EntityId> = outcome.targets.iter().map(|t| t.target_id).collect();
        hit.sort_unstable();
        let mut expected = vec![on_edge, raised, inside, at_center];
        expected.sort_unstable();
        assert_eq!(hit, expected);

        for untouched in [just_outside, far] {
            assert_eq!(services.world.monster(untouched).unwrap().health, 10_000);
        }
    }

    #[test]
    fn buff_expires_exactly_once() {
        let harness = harness();
        let services = &harness.services;
        let caster = join(services, 1, CharacterClass::Warrior);
        let mut rng = StdRng::seed_from_u64(9);

        let outcome = services
            .skills
            .use_skill(&SkillRequest::new(caster, 5), 1_000, &mut rng)
            .unwrap();
        assert_eq!(outcome.effects.len(), 1);
        let buff = outcome.effects[0].clone();
        assert_eq!(buff.started_at + buff.duration_ms, 11_000);

        assert!(services.effects.expire(10_999).is_empty());
        assert_eq!(services.effects.active_effects(caster, 10_999), vec![buff.clone()]);

        assert_eq!(services.effects.expire(11_000), vec![buff]);
        assert!(services.effects.expire(11_000).is_empty());
        assert!(services.effects.expire(20_000).is_empty());
        assert!(services.effects.active_effects(caster, 11_000).is_empty());
    }
}

/// CONCURRENT ACCESS
mod concurrency_tests {
    use super::*;

    /// Eight skill casts and an auto-attack tick race for one fragile
    /// monster. Exactly one of them may claim the kill.
    #[test]
    fn concurrent_lethal_hits_credit_one_kill() {
        for round in 0..20u64 {
            let mut harness = harness();
            let services = Arc::clone(&harness.services);
            let target = spawn(&services, FRAGILE, Vec3::new(2.0, 0.0, 0.0));

            let warrior = join(&services, 100, CharacterClass::Warrior);
            lock(&services.world.players.get(warrior).unwrap()).engage(target);
            let mages: Vec<EntityId> = (0..8)
                .map(|session| join(&services, session, CharacterClass::Mage))
                .collect();

            let scheduler = Arc::new(WorldTickScheduler::with_rng(
                Arc::clone(&services),
                StdRng::seed_from_u64(round),
            ));
            let barrier = Arc::new(Barrier::new(mages.len() + 1));

            let mut casts = Vec::new();
            for (index, mage) in mages.iter().copied().enumerate() {
                let services = Arc::clone(&services);
                let barrier = Arc::clone(&barrier);
                casts.push(thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(round * 100 + index as u64);
                    barrier.wait();
                    services.skills.use_skill(
                        &SkillRequest::new(mage, 2).at_target(target),
                        1_000,
                        &mut rng,
                    )
                }));
            }
            let tick = {
                let scheduler = Arc::clone(&scheduler);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    scheduler.tick(1_000)
                })
            };

            let results: Vec<_> = casts.into_iter().map(|cast| cast.join().unwrap()).collect();
            let report = tick.join().unwrap();
            assert!(report.failed_phases.is_empty());

            let skill_kills: usize = results
                .iter()
                .filter_map(|result| result.as_ref().ok())
                .map(|outcome| outcome.kills.len())
                .sum();
            for failure in results.iter().filter_map(|result| result.as_ref().err()) {
                assert_eq!(*failure, SkillFailure::TargetDead);
            }
            let tick_kills = std::iter::from_fn(|| harness.outbound.try_recv().ok())
                .filter(|outbound| {
                    matches!(
                        outbound.message,
                        ServerMessage::CombatResult {
                            target_died: true,
                            ..
                        }
                    )
                })
                .count();
            assert_eq!(skill_kills + tick_kills, 1, "round {}", round);

            let total_experience: u64 = services
                .world
                .all_players()
                .iter()
                .map(|player| player.experience)
                .sum();
            assert_eq!(total_experience, 40, "round {}", round);

            let monster = services.world.monster(target).unwrap();
            assert!(monster.is_dead);
            assert_eq!(monster.health, 0);
        }
    }

    #[test]
    fn commands_and_ticks_interleave_safely() {
        let harness = harness();
        let services = Arc::clone(&harness.services);
        services.populate_monsters(10);
        let scheduler = Arc::new(WorldTickScheduler::with_rng(
            Arc::clone(&services),
            StdRng::seed_from_u64(1),
        ));
        let handler = Arc::new(CommandHandler::with_rng(
            Arc::clone(&services),
            StdRng::seed_from_u64(2),
        ));
        let players: Vec<EntityId> = (1..=6)
            .map(|session| handler.join(session, &format!("p{}", session), CharacterClass::Mage, 0))
            .collect();
        let monsters: Vec<EntityId> = services
            .world
            .all_monsters()
            .iter()
            .map(|monster| monster.id)
            .collect();

        let ticker = {
            let scheduler = Arc::clone(&scheduler);
            thread::spawn(move || {
                for step in 1..=200u64 {
                    let report = scheduler.tick(step * 50);
                    assert!(report.failed_phases.is_empty());
                }
            })
        };
        let workers: Vec<_> = players
            .iter()
            .copied()
            .enumerate()
            .map(|(index, player_id)| {
                let handler = Arc::clone(&handler);
                let monsters = monsters.clone();
                thread::spawn(move || {
                    let session = index as u32 + 1;
                    for step in 0..200u64 {
                        let target = monsters[(index + step as usize) % monsters.len()];
                        match step % 4 {
                            0 => {
                                handler.attack(player_id, target);
                            }
                            1 => {
                                let request = SkillRequest::new(player_id, 2).at_target(target);
                                let _ = handler.use_skill(session, &request, step * 50);
                            }
                            2 => {
                                handler.move_to(player_id, Vec3::new(step as f32 % 20.0, 0.0, 3.0));
                            }
                            _ => handler.stop_attack(player_id),
                        }
                    }
                })
            })
            .collect();

        ticker.join().unwrap();
        for worker in workers {
            worker.join().unwrap();
        }

        for monster in services.world.all_monsters() {
            assert!(monster.health <= monster.max_health);
            assert_eq!(monster.is_dead, monster.health == 0);
        }
    }
}

/// TICK LOOP AND COLLABORATORS
mod tick_tests {
    use super::*;

    #[test]
    fn persistence_failure_does_not_stop_ticks() {
        let harness = harness();
        let services = Arc::clone(&harness.services);
        join(&services, 1, CharacterClass::Archer);
        harness.saves.set_unavailable(true);
        let scheduler =
            WorldTickScheduler::with_rng(Arc::clone(&services), StdRng::seed_from_u64(4));

        scheduler.tick(0);
        let report = scheduler.tick(5_000);
        let pending = report.pending_save.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(services.flush(&pending), 0);
        assert!(harness.saves.is_empty());

        let next = scheduler.tick(5_050);
        assert_eq!(next.tick, 3);
        assert!(next.failed_phases.is_empty());

        harness.saves.set_unavailable(false);
        assert_eq!(services.flush_dirty(), 1);
        assert_eq!(harness.saves.len(), 1);
    }

    #[test]
    fn world_state_is_published_on_the_wire_contract() {
        let mut harness = harness();
        let services = Arc::clone(&harness.services);
        join(&services, 1, CharacterClass::Warrior);
        services.populate_monsters(3);
        let scheduler =
            WorldTickScheduler::with_rng(Arc::clone(&services), StdRng::seed_from_u64(5));

        scheduler.tick(1_000);

        let outbound = harness.outbound.try_recv().unwrap();
        assert_eq!(outbound.session_id, None);
        let value = serde_json::to_value(&outbound.message).unwrap();
        assert_eq!(value["type"], "worldState");
        assert_eq!(value["timestamp"], 1_000);
        assert_eq!(value["players"].as_array().unwrap().len(), 1);
        assert_eq!(value["monsters"].as_array().unwrap().len(), 3);
        assert!(value["players"][0]["maxHealth"].is_u64());
    }

    #[test]
    fn run_loop_publishes_snapshots_in_real_time() {
        let mut harness = harness();
        let services = Arc::clone(&harness.services);
        join(&services, 1, CharacterClass::Mage);
        let scheduler = Arc::new(WorldTickScheduler::with_rng(
            Arc::clone(&services),
            StdRng::seed_from_u64(6),
        ));

        tokio_test::block_on(async {
            let stopped =
                tokio::time::timeout(Duration::from_millis(350), Arc::clone(&scheduler).run())
                    .await;
            assert!(stopped.is_err());
        });

        let snapshots = std::iter::from_fn(|| harness.outbound.try_recv().ok())
            .filter(|outbound| matches!(outbound.message, ServerMessage::WorldState { .. }))
            .count();
        assert!(snapshots >= 1);
    }
}
