//! Speed-bounded movement validation and per-tick movement integration.

use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;
use realm_shared::{SessionId, Vec3};

use crate::entity::Player;
use crate::utils::lock;

/// Movement shorter than this between two same-millisecond samples is jitter.
const SAME_INSTANT_TOLERANCE: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveVerdict {
    Accepted,
    Rejected { speed: f32 },
}

impl MoveVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MoveVerdict::Accepted)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    position: Vec3,
    at: u64,
}

/// Last accepted position per session, checked against a fixed speed ceiling.
pub struct MovementValidator {
    max_speed: f32,
    samples: Mutex<HashMap<SessionId, Sample>>,
}

impl MovementValidator {
    pub fn new(max_speed: f32) -> Self {
        Self {
            max_speed,
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_speed(&self) -> f32 {
        self.max_speed
    }

    /// Accepts or rejects `proposed` for `session_id` at time `now` (ms).
    ///
    /// The first sample for a session always passes. A rejected sample leaves
    /// the stored position and time untouched.
    pub fn validate(&self, session_id: SessionId, proposed: Vec3, now: u64) -> MoveVerdict {
        let mut samples = lock(&self.samples);

        let Some(last) = samples.get(&session_id).copied() else {
            samples.insert(
                session_id,
                Sample {
                    position: proposed,
                    at: now,
                },
            );
            return MoveVerdict::Accepted;
        };

        let distance = last.position.planar_distance(&proposed);
        let elapsed_ms = now.saturating_sub(last.at);

        let speed = if elapsed_ms == 0 {
            if distance <= SAME_INSTANT_TOLERANCE {
                0.0
            } else {
                f32::INFINITY
            }
        } else {
            distance / (elapsed_ms as f32 / 1000.0)
        };

        if speed > self.max_speed {
            return MoveVerdict::Rejected { speed };
        }

        samples.insert(
            session_id,
            Sample {
                position: proposed,
                at: now.max(last.at),
            },
        );
        MoveVerdict::Accepted
    }

    /// Overrides the stored sample, used for server-side relocation (spawn, respawn).
    pub fn seed(&self, session_id: SessionId, position: Vec3, now: u64) {
        lock(&self.samples).insert(session_id, Sample { position, at: now });
    }

    pub fn forget(&self, session_id: SessionId) {
        lock(&self.samples).remove(&session_id);
    }

    pub fn last_accepted(&self, session_id: SessionId) -> Option<(Vec3, u64)> {
        lock(&self.samples)
            .get(&session_id)
            .map(|sample| (sample.position, sample.at))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveStep {
    Idle,
    Moved { arrived: bool },
    Rejected,
}

/// Advances one player toward its movement target by `speed * dt`.
///
/// The step is run through the validator; a rejected step stops the player
/// where it stands instead of applying the move.
pub fn integrate_player(
    player: &mut Player,
    validator: &MovementValidator,
    speed: f32,
    dt_secs: f32,
    now: u64,
) -> MoveStep {
    if player.is_dead || !player.movement.moving {
        return MoveStep::Idle;
    }

    let speed = speed.clamp(0.0, validator.max_speed());
    let (next, arrived) = player
        .position
        .step_toward(&player.movement.target, speed * dt_secs);

    match validator.validate(player.session_id, next, now) {
        MoveVerdict::Accepted => {
            player.position = next;
            player.dirty = true;
            if arrived {
                player.movement.moving = false;
            }
            MoveStep::Moved { arrived }
        }
        MoveVerdict::Rejected { speed } => {
            warn!(
                "Rejected movement for player {} (session {}): {:.2} u/s",
                player.id, player.session_id, speed
            );
            player.stop_moving();
            MoveStep::Rejected
        }
    }
}
