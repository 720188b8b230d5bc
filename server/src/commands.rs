//! Applies client intents to the world.
//!
//! Clients only ask; every request is checked against authoritative state
//! and rejected requests leave it untouched. Replies addressed to one player
//! go through [`BroadcastTransport::send_to_session`], results everyone can
//! see are broadcast.
//!
//! [`BroadcastTransport::send_to_session`]: crate::broadcast::BroadcastTransport::send_to_session

use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use realm_shared::{
    CharacterClass, ClientCommand, EntityId, ServerMessage, SessionId, SkillId, Vec3,
};

use crate::error::{ProgressionError, SkillFailure};
use crate::persistence::PlayerRecord;
use crate::services::{level_up_message, stats_message, Services};
use crate::skills::{starter_skills, SkillOutcome, SkillRequest};
use crate::utils::lock;

pub struct CommandHandler {
    services: Arc<Services>,
    /// Seeds one generator per command; held only while seeding.
    seeds: Mutex<StdRng>,
}

impl CommandHandler {
    pub fn new(services: Arc<Services>) -> Self {
        Self::with_rng(services, StdRng::from_entropy())
    }

    pub fn with_rng(services: Arc<Services>, rng: StdRng) -> Self {
        Self {
            services,
            seeds: Mutex::new(rng),
        }
    }

    fn command_rng(&self) -> StdRng {
        let mut seeds = lock(&self.seeds);
        StdRng::from_rng(&mut *seeds).unwrap_or_else(|e| {
            warn!("Seeding command rng failed, using entropy: {}", e);
            StdRng::from_entropy()
        })
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Spawns a player for `session_id`, restoring saved progress by name.
    /// New characters get their class's starter skills on the hotbar.
    pub fn join(
        &self,
        session_id: SessionId,
        name: &str,
        class: CharacterClass,
        now: u64,
    ) -> EntityId {
        let services = &self.services;
        let saved = match services.saves.load(name) {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Could not load save for '{}', starting fresh: {}", name, e);
                None
            }
        };

        let (player_id, handle) = services
            .world
            .spawn_player(session_id, name, class, Vec3::default());
        let mut player = lock(&handle);
        match saved {
            Some(record) => {
                record.apply_to(&mut player);
                info!(
                    "Restored '{}' at level {} with {} skills",
                    name,
                    player.level,
                    player.skills.len()
                );
            }
            None => {
                for (slot, skill_id) in starter_skills(class).iter().enumerate() {
                    services
                        .skills
                        .grant_skill(&mut player, *skill_id, Some(slot as u8));
                }
            }
        }
        services
            .validator
            .seed(session_id, player.position, now);
        player_id
    }

    /// Removes the session's player and writes its final save.
    pub fn leave(&self, session_id: SessionId) -> Option<EntityId> {
        let services = &self.services;
        let player_id = services.world.player_id_by_session(session_id)?;
        let handle = services.world.players.remove(player_id)?;

        let record = PlayerRecord::from_player(&lock(&handle));
        services.validator.forget(session_id);
        services.cooldowns.clear(player_id);
        services.effects.clear(player_id);

        match services.saves.save(&record) {
            Ok(()) => info!("Player {} '{}' left, progress saved", player_id, record.name),
            Err(e) => warn!("Player {} '{}' left, save failed: {}", player_id, record.name, e),
        }
        Some(player_id)
    }

    /// Routes one command from `session_id`. Commands from sessions without a
    /// player are dropped.
    pub fn handle(&self, session_id: SessionId, command: ClientCommand, now: u64) {
        let Some(player_id) = self.services.world.player_id_by_session(session_id) else {
            debug!("Dropping command from session {} without a player", session_id);
            return;
        };

        match command {
            ClientCommand::MoveTo { target } => {
                self.move_to(player_id, target);
            }
            ClientCommand::Attack { target_id } => {
                self.attack(player_id, target_id);
            }
            ClientCommand::StopAttack => self.stop_attack(player_id),
            ClientCommand::UseSkill {
                skill_id,
                target_id,
                target_position,
            } => {
                let request = SkillRequest {
                    caster_id: player_id,
                    skill_id,
                    target_id,
                    target_position,
                };
                // Failures are already reported to the session.
                let _ = self.use_skill(session_id, &request, now);
            }
            ClientCommand::LearnSkill { skill_id } => {
                self.learn_skill(session_id, player_id, skill_id);
            }
            ClientCommand::UpgradeSkill { skill_id } => {
                self.upgrade_skill(session_id, player_id, skill_id);
            }
            ClientCommand::AssignSlot { skill_id, slot } => {
                self.assign_slot(session_id, player_id, skill_id, slot);
            }
        }
    }

    /// Sets a walk target. Walking away ends auto-combat.
    pub fn move_to(&self, player_id: EntityId, target: Vec3) -> bool {
        let Some(handle) = self.services.world.players.get(player_id) else {
            return false;
        };
        let mut player = lock(&handle);
        if player.is_dead {
            return false;
        }
        player.cancel_combat();
        player.set_move_target(target);
        true
    }

    /// Starts auto-attacking a living monster. The tick does the chasing.
    pub fn attack(&self, player_id: EntityId, target_id: EntityId) -> bool {
        let world = &self.services.world;
        let Some(handle) = world.players.get(player_id) else {
            return false;
        };
        let mut player = lock(&handle);
        if player.is_dead {
            return false;
        }

        let target_alive = world
            .monsters
            .get(target_id)
            .map(|monster| !lock(&monster).is_dead)
            .unwrap_or(false);
        if !target_alive {
            debug!("Player {} tried to attack invalid target {}", player_id, target_id);
            return false;
        }

        player.engage(target_id);
        true
    }

    pub fn stop_attack(&self, player_id: EntityId) {
        if let Some(handle) = self.services.world.players.get(player_id) {
            lock(&handle).cancel_combat();
        }
    }

    /// Runs a skill use and publishes its consequences. A failure is sent to
    /// the caster's session only.
    pub fn use_skill(
        &self,
        session_id: SessionId,
        request: &SkillRequest,
        now: u64,
    ) -> Result<SkillOutcome, SkillFailure> {
        let services = &self.services;
        let mut rng = self.command_rng();

        let outcome = match services.skills.use_skill(request, now, &mut rng) {
            Ok(outcome) => outcome,
            Err(failure) => {
                debug!(
                    "Player {} failed skill {}: {}",
                    request.caster_id, request.skill_id, failure
                );
                services.transport.send_to_session(
                    session_id,
                    &ServerMessage::SkillFailed {
                        skill_id: request.skill_id,
                        code: failure.code().to_string(),
                        reason: failure.to_string(),
                    },
                );
                return Err(failure);
            }
        };

        let mut messages = vec![outcome.to_message()];
        if let Some(handle) = services.world.players.get(outcome.caster_id) {
            let mut caster = lock(&handle);
            for kill in &outcome.kills {
                if let Some(loot) = services.hand_off_loot(&mut caster, kill.template_id, &mut rng) {
                    messages.push(loot);
                }
            }
            if outcome.levels_gained > 0 {
                info!("Player {} reached level {}", caster.id, caster.level);
                messages.push(level_up_message(&caster));
            }
            messages.push(stats_message(&caster));
        }
        services.broadcast_all(&messages);
        Ok(outcome)
    }

    pub fn learn_skill(&self, session_id: SessionId, player_id: EntityId, skill_id: SkillId) {
        let result = self
            .services
            .skills
            .learn_skill(player_id, skill_id)
            .map(|_| ());
        self.report_progression(session_id, player_id, skill_id, result);
    }

    pub fn upgrade_skill(&self, session_id: SessionId, player_id: EntityId, skill_id: SkillId) {
        let result = self
            .services
            .skills
            .upgrade_skill(player_id, skill_id)
            .map(|_| ());
        self.report_progression(session_id, player_id, skill_id, result);
    }

    pub fn assign_slot(&self, session_id: SessionId, player_id: EntityId, skill_id: SkillId, slot: u8) {
        let result = self.services.skills.assign_slot(player_id, skill_id, slot);
        self.report_progression(session_id, player_id, skill_id, result);
    }

    fn report_progression(
        &self,
        session_id: SessionId,
        player_id: EntityId,
        skill_id: SkillId,
        result: Result<(), ProgressionError>,
    ) {
        let transport = &self.services.transport;
        match result {
            Ok(()) => {
                if let Some(handle) = self.services.world.players.get(player_id) {
                    transport.send_to_session(session_id, &stats_message(&lock(&handle)));
                }
            }
            Err(e) => {
                debug!("Player {} skill {} refused: {}", player_id, skill_id, e);
                transport.send_to_session(
                    session_id,
                    &ServerMessage::SkillFailed {
                        skill_id,
                        code: e.code().to_string(),
                        reason: e.to_string(),
                    },
                );
            }
        }
    }
}
