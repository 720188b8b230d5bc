use serde::{Deserialize, Serialize};

pub mod protocol;
pub mod templates;

pub use protocol::{
    ClientCommand, ClientPacket, LootItem, MonsterSnapshot, PlayerSnapshot, ServerMessage,
    SkillTargetResult,
};
pub use templates::{
    Attributes, CharacterClass, DropEntry, EffectKind, EffectTemplate, ItemTemplate, MonsterTemplate,
    SkillLevelData, SkillTemplate, Stat, TargetType,
};

pub type EntityId = u32;
pub type SkillId = u32;
pub type SessionId = u32;

pub const TICK_INTERVAL_MS: u64 = 50;
pub const BROADCAST_INTERVAL_MS: u64 = 100;
pub const SAVE_INTERVAL_MS: u64 = 5000;
pub const MAX_DELTA_MS: u64 = 250;

pub const PLAYER_MOVE_SPEED: f32 = 5.0;
pub const MAX_SPEED_MULTIPLIER: f32 = 1.5;
pub const PLAYER_RESPAWN_MS: u64 = 5000;
pub const MAX_LEVEL: u32 = 60;

pub const BASE_ATTACK_INTERVAL_MS: f32 = 1000.0;
pub const MIN_ATTACK_SPEED: f32 = 0.1;
pub const CRIT_MULTIPLIER: f32 = 1.5;
pub const CRIT_PER_STAT_POINT: f32 = 0.002;
pub const MAX_CRIT_CHANCE: f32 = 0.75;
pub const MIN_DAMAGE_FACTOR: f32 = 0.1;
pub const DEFENSE_CONSTANT: f32 = 100.0;

pub const HOTBAR_SLOTS: u8 = 10;

/// Position in world space. `y` is height; gameplay distances use the (x, z) plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Distance on the ground plane, ignoring height.
    pub fn planar_distance(&self, other: &Vec3) -> f32 {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Moves toward `target` on the ground plane by at most `max_step`.
    /// Returns the new position and whether the target was reached.
    pub fn step_toward(&self, target: &Vec3, max_step: f32) -> (Vec3, bool) {
        let distance = self.planar_distance(target);
        if distance <= max_step || distance < f32::EPSILON {
            return (*target, true);
        }

        let ratio = max_step / distance;
        let next = Vec3 {
            x: self.x + (target.x - self.x) * ratio,
            y: self.y + (target.y - self.y) * ratio,
            z: self.z + (target.z - self.z) * ratio,
        };
        (next, false)
    }
}
