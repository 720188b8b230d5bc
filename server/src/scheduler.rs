//! Fixed-rate world tick.
//!
//! [`WorldTickScheduler::tick`] holds the tick-state mutex for its whole
//! duration, so ticks never overlap: a tick that arrives while another is
//! running waits for it instead of being skipped. Every phase runs inside its
//! own panic guard; a failing phase is logged and the rest of the tick goes on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use realm_shared::{EntityId, ServerMessage};

use crate::broadcast::BroadcastCoalescer;
use crate::combat::{attack_interval_ms, effective_stats};
use crate::movement::integrate_player;
use crate::persistence::{collect_dirty, PlayerRecord};
use crate::services::{level_up_message, stats_message, Services};
use crate::utils::{get_timestamp, lock, panic_message};

struct TickState {
    tick: u64,
    last_tick_at: Option<u64>,
    last_save_at: Option<u64>,
    rng: StdRng,
}

/// What one tick did, for logging and tests.
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub dt_ms: u64,
    pub broadcast: bool,
    pub failed_phases: Vec<&'static str>,
    /// Dirty player records collected for a persistence flush.
    pub pending_save: Option<Vec<(EntityId, PlayerRecord)>>,
}

pub struct WorldTickScheduler {
    services: Arc<Services>,
    coalescer: BroadcastCoalescer,
    state: Mutex<TickState>,
}

impl WorldTickScheduler {
    pub fn new(services: Arc<Services>) -> Self {
        Self::with_rng(services, StdRng::from_entropy())
    }

    pub fn with_rng(services: Arc<Services>, rng: StdRng) -> Self {
        let coalescer = BroadcastCoalescer::new(services.config.broadcast_interval_ms);
        Self {
            services,
            coalescer,
            state: Mutex::new(TickState {
                tick: 0,
                last_tick_at: None,
                last_save_at: None,
                rng,
            }),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Advances the simulation to `now` (ms).
    pub fn tick(&self, now: u64) -> TickReport {
        let mut state = lock(&self.state);
        let config = &self.services.config;

        let nominal_ms = config.tick_interval.as_millis() as u64;
        let dt_ms = state
            .last_tick_at
            .map(|last| now.saturating_sub(last))
            .unwrap_or(nominal_ms)
            .min(config.max_delta_ms);
        let dt_secs = dt_ms as f32 / 1000.0;
        state.tick += 1;
        state.last_tick_at = Some(now);

        let mut report = TickReport {
            tick: state.tick,
            dt_ms,
            ..TickReport::default()
        };
        let rng = &mut state.rng;

        self.run_phase("movement", &mut report, || self.integrate_movement(now, dt_secs));
        self.run_phase("combat", &mut report, || self.resolve_auto_combat(now, &mut *rng));
        self.run_phase("monsters", &mut report, || self.step_monsters(now, dt_secs, &mut *rng));
        self.run_phase("effects", &mut report, || self.expire_effects(now));
        self.run_phase("respawn", &mut report, || self.respawn_players(now));

        let mut broadcast = false;
        self.run_phase("broadcast", &mut report, || {
            broadcast = self.coalescer.maybe_broadcast(
                &self.services.world,
                self.services.transport.as_ref(),
                now,
            );
        });
        report.broadcast = broadcast;

        let save_due = match state.last_save_at {
            Some(last) => now.saturating_sub(last) >= config.save_interval_ms,
            None => {
                state.last_save_at = Some(now);
                false
            }
        };
        if save_due {
            state.last_save_at = Some(now);
            let mut pending = None;
            self.run_phase("persistence", &mut report, || {
                pending = Some(collect_dirty(&self.services.world));
            });
            report.pending_save = pending;
        }

        report
    }

    fn run_phase<F: FnOnce()>(&self, name: &'static str, report: &mut TickReport, phase: F) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(phase)) {
            error!(
                "Tick {} phase '{}' panicked: {}",
                report.tick,
                name,
                panic_message(payload.as_ref())
            );
            report.failed_phases.push(name);
        }
    }

    fn integrate_movement(&self, now: u64, dt_secs: f32) {
        let services = &self.services;
        for (_, handle) in services.world.players.handles() {
            let mut player = lock(&handle);
            let stats = effective_stats(&services.effects, player.id, &player.stats, now);
            let speed = services.config.player_move_speed + stats.move_speed;
            integrate_player(&mut player, &services.validator, speed, dt_secs, now);
        }
    }

    fn resolve_auto_combat(&self, now: u64, rng: &mut StdRng) {
        let services = &self.services;
        let mut messages = Vec::new();

        for (_, handle) in services.world.players.handles() {
            let mut player = lock(&handle);
            if player.is_dead || !player.combat.in_combat {
                continue;
            }

            let Some(monster_handle) = player
                .combat
                .target_id
                .and_then(|target_id| services.world.monsters.get(target_id))
            else {
                player.cancel_combat();
                continue;
            };
            let mut monster = lock(&monster_handle);
            if monster.is_dead {
                drop(monster);
                player.cancel_combat();
                continue;
            }

            let distance = player.position.planar_distance(&monster.position);
            if distance > player.class.attack_range() {
                let destination = monster.position;
                drop(monster);
                player.set_move_target(destination);
                player.combat.chasing = true;
                continue;
            }
            if player.combat.chasing {
                player.stop_moving();
                player.combat.chasing = false;
            }

            let stats = effective_stats(&services.effects, player.id, &player.stats, now);
            let interval = attack_interval_ms(stats.attack_speed);
            let last = player.combat.last_attack_at;
            if last != 0 && now.saturating_sub(last) < interval {
                continue;
            }
            player.combat.last_attack_at = now;

            let result = services
                .resolver
                .resolve_auto_attack(&mut player, &mut monster, now, rng);
            messages.push(ServerMessage::CombatResult {
                attacker_id: player.id,
                target_id: monster.id,
                damage: result.damage,
                is_critical: result.crit,
                target_health: monster.health,
                target_max_health: monster.max_health,
                target_died: result.died,
            });
            let template_id = monster.template_id;
            drop(monster);

            if result.died {
                player.cancel_combat();
                if let Some(loot) = services.hand_off_loot(&mut player, template_id, rng) {
                    messages.push(loot);
                }
                if result.leveled_up() {
                    info!("Player {} reached level {}", player.id, player.level);
                    messages.push(level_up_message(&player));
                }
                messages.push(stats_message(&player));
            }
        }

        services.broadcast_all(&messages);
    }

    fn step_monsters(&self, now: u64, dt_secs: f32, rng: &mut StdRng) {
        let services = &self.services;
        let mut messages = Vec::new();

        for (id, handle) in services.world.monsters.handles() {
            {
                let mut monster = lock(&handle);
                if monster.ready_to_respawn(now) {
                    monster.respawn();
                    services.effects.clear(id);
                    debug!("Monster {} respawned", id);
                    continue;
                }
            }
            messages.extend(services.ai.step(
                &services.world,
                &services.resolver,
                id,
                now,
                dt_secs,
                rng,
            ));
        }

        services.broadcast_all(&messages);
    }

    fn expire_effects(&self, now: u64) {
        let expired = self.services.effects.expire(now);
        if !expired.is_empty() {
            debug!("Expired {} effects", expired.len());
        }
    }

    fn respawn_players(&self, now: u64) {
        let services = &self.services;
        let delay = services.config.player_respawn_ms;
        let mut messages = Vec::new();

        for (id, handle) in services.world.players.handles() {
            let mut player = lock(&handle);
            let Some(died_at) = player.died_at else {
                continue;
            };
            if !player.is_dead || now.saturating_sub(died_at) < delay {
                continue;
            }

            player.respawn();
            services.effects.clear(id);
            services
                .validator
                .seed(player.session_id, player.position, now);
            info!("Player {} respawned", id);
            messages.push(ServerMessage::PlayerRespawn {
                player_id: id,
                position: player.position,
                health: player.health,
            });
        }

        services.broadcast_all(&messages);
    }

    /// Ticks on the configured interval until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let interval = self.tick_interval();
        info!(
            "Tick loop started ({} ms tick, {} ms broadcast, {} ms save)",
            interval.as_millis(),
            self.services.config.broadcast_interval_ms,
            self.services.config.save_interval_ms
        );

        loop {
            let started = Instant::now();
            let report = self.tick(get_timestamp());

            if let Some(records) = report.pending_save {
                let services = Arc::clone(&self.services);
                tokio::task::spawn_blocking(move || {
                    services.flush(&records);
                });
            }
            if report.tick % 200 == 0 {
                debug!(
                    "Tick {}: {} players, {} monsters",
                    report.tick,
                    self.services.world.players.len(),
                    self.services.world.monsters.len()
                );
            }

            let elapsed = started.elapsed();
            if elapsed >= interval {
                warn!(
                    "Tick {} overran its budget: {:.1} ms",
                    report.tick,
                    elapsed.as_secs_f64() * 1000.0
                );
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.services.config.tick_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{ChannelTransport, Outbound};
    use crate::config::ServerConfig;
    use crate::persistence::MemorySaveStore;
    use crate::templates::{TemplateRegistry, TemplateSet};
    use realm_shared::{CharacterClass, MonsterTemplate, Vec3};
    use tokio::sync::broadcast::Receiver;

    fn target_dummy(max_health: u32) -> MonsterTemplate {
        MonsterTemplate {
            id: 50,
            name: "Training Dummy".to_string(),
            level: 1,
            max_health,
            attack_power: 0.0,
            defense: 0.0,
            dexterity: 0.0,
            attack_speed: 1.0,
            move_speed: 0.0,
            aggro_radius: 0.0,
            attack_range: 0.0,
            experience_reward: 20,
            gold_min: 1,
            gold_max: 1,
            drops: vec![],
            respawn_secs: 1.0,
        }
    }

    fn scheduler() -> (WorldTickScheduler, Receiver<Outbound>) {
        let transport = Arc::new(ChannelTransport::new(1024));
        let receiver = transport.subscribe();
        let templates = TemplateSet::builtin().with_monster(target_dummy(60));
        let services = Services::new(
            ServerConfig::default(),
            Arc::new(TemplateRegistry::new(templates)),
            Arc::new(MemorySaveStore::new()),
            transport,
        );
        (
            WorldTickScheduler::with_rng(Arc::new(services), StdRng::seed_from_u64(7)),
            receiver,
        )
    }

    fn drain(receiver: &mut Receiver<Outbound>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(outbound) = receiver.try_recv() {
            messages.push(outbound.message);
        }
        messages
    }

    fn kinds(messages: &[ServerMessage]) -> Vec<&'static str> {
        messages.iter().map(|message| message.kind()).collect()
    }

    #[test]
    fn test_delta_time_is_capped() {
        let (scheduler, _rx) = scheduler();

        assert_eq!(scheduler.tick(1_000).dt_ms, 50);
        assert_eq!(scheduler.tick(1_050).dt_ms, 50);
        assert_eq!(scheduler.tick(9_000).dt_ms, 250);
    }

    #[test]
    fn test_broadcast_cadence_decoupled_from_tick() {
        let (scheduler, mut rx) = scheduler();

        let broadcasts: Vec<bool> = (0..10u64)
            .map(|step| scheduler.tick(1_000 + step * 50).broadcast)
            .collect();

        assert_eq!(broadcasts.iter().filter(|sent| **sent).count(), 5);
        let snapshots = drain(&mut rx)
            .into_iter()
            .filter(|message| message.kind() == "worldState")
            .count();
        assert_eq!(snapshots, 5);
    }

    #[test]
    fn test_save_collected_on_interval() {
        let (scheduler, _rx) = scheduler();
        let world = &scheduler.services().world;
        world.spawn_player(1, "Ayla", CharacterClass::Warrior, Vec3::default());

        assert!(scheduler.tick(0).pending_save.is_none());
        assert!(scheduler.tick(4_950).pending_save.is_none());
        let pending = scheduler.tick(5_000).pending_save.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(scheduler.tick(5_050).pending_save.is_none());
    }

    #[test]
    fn test_auto_combat_kills_and_rewards() {
        let (scheduler, mut rx) = scheduler();
        let services = scheduler.services();
        let template = services.templates.monster(50).unwrap();
        let monster_id = services
            .world
            .spawn_monster(&template, Vec3::new(1.0, 0.0, 0.0));
        let (player_id, handle) =
            services
                .world
                .spawn_player(1, "Ayla", CharacterClass::Warrior, Vec3::default());
        {
            let mut player = lock(&handle);
            player.stats.dexterity = 0.0;
            player.engage(monster_id);
        }

        // Warrior attack power 26 against 60 health: three swings, one second apart.
        for now in [1_000u64, 1_050, 2_000, 3_000] {
            scheduler.tick(now);
        }

        let messages = drain(&mut rx);
        let combat: Vec<&ServerMessage> = messages
            .iter()
            .filter(|message| message.kind() == "combatResult")
            .collect();
        assert_eq!(combat.len(), 3);
        assert!(matches!(
            combat[2],
            ServerMessage::CombatResult {
                target_died: true,
                ..
            }
        ));
        assert!(kinds(&messages).contains(&"lootReceived"));

        let player = services.world.player(player_id).unwrap();
        assert!(!player.in_combat);
        assert_eq!(player.experience, 20);
        assert_eq!(player.gold, 1);
        assert!(services.world.monster(monster_id).unwrap().is_dead);
    }

    #[test]
    fn test_out_of_range_target_is_chased() {
        let (scheduler, _rx) = scheduler();
        let services = scheduler.services();
        let template = services.templates.monster(50).unwrap();
        let monster_id = services
            .world
            .spawn_monster(&template, Vec3::new(10.0, 0.0, 0.0));
        let (player_id, handle) =
            services
                .world
                .spawn_player(1, "Ayla", CharacterClass::Warrior, Vec3::default());
        services.validator.seed(1, Vec3::default(), 1_000);
        lock(&handle).engage(monster_id);

        scheduler.tick(1_000);
        scheduler.tick(1_050);

        let player = services.world.player(player_id).unwrap();
        assert!(player.moving);
        assert!(player.position.x > 0.0);
        assert!(lock(&handle).combat.chasing);
    }

    #[test]
    fn test_despawned_target_cancels_combat() {
        let (scheduler, _rx) = scheduler();
        let services = scheduler.services();
        let (player_id, handle) =
            services
                .world
                .spawn_player(1, "Ayla", CharacterClass::Warrior, Vec3::default());
        {
            let mut player = lock(&handle);
            player.engage(4242);
            player.combat.chasing = true;
            player.set_move_target(Vec3::new(3.0, 0.0, 0.0));
        }

        let report = scheduler.tick(1_000);

        assert!(report.failed_phases.is_empty());
        let player = services.world.player(player_id).unwrap();
        assert!(!player.in_combat);
        assert_eq!(player.target_id, None);
    }

    #[test]
    fn test_dead_player_respawns_after_delay() {
        let (scheduler, mut rx) = scheduler();
        let services = scheduler.services();
        let (player_id, handle) = services.world.spawn_player(
            1,
            "Ayla",
            CharacterClass::Mage,
            Vec3::new(2.0, 0.0, 2.0),
        );
        {
            let mut player = lock(&handle);
            player.position = Vec3::new(9.0, 0.0, 9.0);
            player.take_damage(10_000, 1_000);
        }

        scheduler.tick(5_950);
        assert!(services.world.player(player_id).unwrap().is_dead);

        scheduler.tick(6_000);
        let player = services.world.player(player_id).unwrap();
        assert!(!player.is_dead);
        assert_eq!(player.health, player.max_health);
        assert_eq!(player.position, Vec3::new(2.0, 0.0, 2.0));
        assert!(kinds(&drain(&mut rx)).contains(&"playerRespawn"));
    }

    #[test]
    fn test_dead_monster_respawns() {
        let (scheduler, _rx) = scheduler();
        let services = scheduler.services();
        let template = services.templates.monster(50).unwrap();
        let id = services.world.spawn_monster(&template, Vec3::default());
        lock(&services.world.monsters.get(id).unwrap()).take_damage(1_000, 1_000);

        scheduler.tick(1_500);
        assert!(services.world.monster(id).unwrap().is_dead);
        scheduler.tick(2_000);
        assert!(!services.world.monster(id).unwrap().is_dead);
    }

    struct ExplodingAi;

    impl crate::ai::MonsterAi for ExplodingAi {
        fn step(
            &self,
            _world: &crate::world::World,
            _resolver: &crate::combat::CombatResolver,
            _monster_id: EntityId,
            _now: u64,
            _dt_secs: f32,
            _rng: &mut dyn rand::RngCore,
        ) -> Vec<ServerMessage> {
            panic!("ai exploded")
        }
    }

    #[test]
    fn test_panicking_phase_does_not_stop_tick() {
        let transport = Arc::new(ChannelTransport::new(64));
        let mut rx = transport.subscribe();
        let services = Services::new(
            ServerConfig::default(),
            Arc::new(TemplateRegistry::new(TemplateSet::builtin())),
            Arc::new(MemorySaveStore::new()),
            transport,
        )
        .with_ai(Arc::new(ExplodingAi));
        services.populate_monsters(2);
        let scheduler = WorldTickScheduler::with_rng(Arc::new(services), StdRng::seed_from_u64(1));

        let first = scheduler.tick(1_000);
        let second = scheduler.tick(1_100);

        assert_eq!(first.failed_phases, vec!["monsters"]);
        assert!(first.broadcast);
        assert_eq!(second.tick, 2);
        assert!(second.broadcast);
        assert_eq!(kinds(&drain(&mut rx)), vec!["worldState", "worldState"]);
    }

    #[test]
    fn test_ticks_serialize_across_threads() {
        let (scheduler, _rx) = scheduler();
        let scheduler = Arc::new(scheduler);

        let handles: Vec<_> = (0..4)
            .map(|thread_index| {
                let scheduler = Arc::clone(&scheduler);
                std::thread::spawn(move || {
                    (0..25u64)
                        .map(|step| scheduler.tick(1_000 + thread_index * 10_000 + step).tick)
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut ticks: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        ticks.sort_unstable();
        assert_eq!(ticks, (1..=100).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_run_loop_keeps_ticking() {
        let (scheduler, mut rx) = scheduler();
        let scheduler = Arc::new(scheduler);

        let task = tokio::spawn(Arc::clone(&scheduler).run());
        tokio::time::sleep(Duration::from_millis(300)).await;
        task.abort();

        assert!(lock(&scheduler.state).tick >= 3);
        assert!(kinds(&drain(&mut rx)).contains(&"worldState"));
    }
}
