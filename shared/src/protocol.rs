//! JSON wire protocol between the authoritative server and its clients.
//!
//! Every message is an object carrying a `type` discriminator. Field names are
//! camelCase and form the compatibility contract with existing clients.

use serde::{Deserialize, Serialize};

use crate::templates::CharacterClass;
use crate::{EntityId, SessionId, SkillId, Vec3};

/// Intent sent by a client. Clients request actions; they never dictate outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    MoveTo {
        target: Vec3,
    },
    Attack {
        target_id: EntityId,
    },
    StopAttack,
    UseSkill {
        skill_id: SkillId,
        #[serde(default)]
        target_id: Option<EntityId>,
        #[serde(default)]
        target_position: Option<Vec3>,
    },
    LearnSkill {
        skill_id: SkillId,
    },
    UpgradeSkill {
        skill_id: SkillId,
    },
    AssignSlot {
        skill_id: SkillId,
        slot: u8,
    },
}

/// Datagram envelope accepted by the UDP transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientPacket {
    Connect {
        name: String,
        class: CharacterClass,
    },
    Command {
        command: ClientCommand,
    },
    Heartbeat,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: EntityId,
    pub session_id: SessionId,
    pub name: String,
    pub class: CharacterClass,
    pub level: u32,
    pub experience: u64,
    pub experience_to_next: u64,
    pub position: Vec3,
    pub health: u32,
    pub max_health: u32,
    pub mana: u32,
    pub max_mana: u32,
    pub is_dead: bool,
    pub in_combat: bool,
    pub target_id: Option<EntityId>,
    pub moving: bool,
    pub gold: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonsterSnapshot {
    pub id: EntityId,
    pub template_id: u32,
    pub name: String,
    pub level: u32,
    pub position: Vec3,
    pub health: u32,
    pub max_health: u32,
    pub is_dead: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillTargetResult {
    pub target_id: EntityId,
    pub damage: u32,
    pub is_critical: bool,
    pub healing: u32,
    pub target_health: u32,
    pub target_died: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootItem {
    pub item_id: u32,
    pub name: String,
    pub quantity: u32,
}

/// Everything the core emits for the transport to relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        session_id: SessionId,
        player_id: EntityId,
    },
    Disconnected {
        reason: String,
    },
    WorldState {
        timestamp: u64,
        players: Vec<PlayerSnapshot>,
        monsters: Vec<MonsterSnapshot>,
    },
    CombatResult {
        attacker_id: EntityId,
        target_id: EntityId,
        damage: u32,
        is_critical: bool,
        target_health: u32,
        target_max_health: u32,
        target_died: bool,
    },
    SkillUsed {
        caster_id: EntityId,
        skill_id: SkillId,
        skill_name: String,
        targets: Vec<SkillTargetResult>,
        caster_health: u32,
        caster_mana: u32,
    },
    SkillFailed {
        skill_id: SkillId,
        code: String,
        reason: String,
    },
    PlayerAttack {
        attacker_id: EntityId,
        player_id: EntityId,
        damage: u32,
        is_critical: bool,
        player_health: u32,
    },
    LootReceived {
        player_id: EntityId,
        gold: u64,
        items: Vec<LootItem>,
    },
    LevelUp {
        player_id: EntityId,
        level: u32,
        max_health: u32,
        max_mana: u32,
        skill_points: u32,
    },
    PlayerDeath {
        player_id: EntityId,
        killer_id: Option<EntityId>,
    },
    PlayerRespawn {
        player_id: EntityId,
        position: Vec3,
        health: u32,
    },
    PlayerStatsUpdate {
        player_id: EntityId,
        level: u32,
        experience: u64,
        experience_to_next: u64,
        health: u32,
        max_health: u32,
        mana: u32,
        max_mana: u32,
        skill_points: u32,
    },
}

impl ServerMessage {
    /// Discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Disconnected { .. } => "disconnected",
            ServerMessage::WorldState { .. } => "worldState",
            ServerMessage::CombatResult { .. } => "combatResult",
            ServerMessage::SkillUsed { .. } => "skillUsed",
            ServerMessage::SkillFailed { .. } => "skillFailed",
            ServerMessage::PlayerAttack { .. } => "playerAttack",
            ServerMessage::LootReceived { .. } => "lootReceived",
            ServerMessage::LevelUp { .. } => "levelUp",
            ServerMessage::PlayerDeath { .. } => "playerDeath",
            ServerMessage::PlayerRespawn { .. } => "playerRespawn",
            ServerMessage::PlayerStatsUpdate { .. } => "playerStatsUpdate",
        }
    }

    /// JSON datagram payload for this message.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
