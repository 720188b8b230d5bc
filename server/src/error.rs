//! Error types for the simulation core and its collaborators.
//!
//! Gameplay validation failures are values ([`SkillFailure`]), not faults:
//! the caller turns them into a no-op plus an optional message for the
//! player. Infrastructure errors are logged where they happen and never
//! reach gameplay code.

use realm_shared::SkillId;
use thiserror::Error;

/// Why a skill use was refused. Any of these leaves world state untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkillFailure {
    #[error("Caster not found")]
    CasterNotFound,

    #[error("You cannot use skills while dead")]
    CasterDead,

    #[error("You have not learned skill {0}")]
    SkillNotLearned(SkillId),

    #[error("Skill {0} does not exist")]
    TemplateNotFound(SkillId),

    #[error("Skill is on cooldown ({remaining_ms} ms remaining)")]
    OnCooldown { remaining_ms: u64 },

    #[error("Skill {skill_id} has no data for level {level}")]
    LevelDataMissing { skill_id: SkillId, level: u32 },

    #[error("Not enough mana ({available}/{required})")]
    InsufficientMana { required: u32, available: u32 },

    #[error("Not enough health ({available}/{required})")]
    InsufficientHealth { required: u32, available: u32 },

    #[error("Target not found")]
    TargetNotFound,

    #[error("Target is already dead")]
    TargetDead,

    #[error("Target is out of range ({distance:.1} > {range:.1})")]
    OutOfRange { distance: f32, range: f32 },

    #[error("Skill execution failed: {0}")]
    ExecutionError(String),
}

impl SkillFailure {
    /// Stable machine-readable tag sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            SkillFailure::CasterNotFound => "CASTER_NOT_FOUND",
            SkillFailure::CasterDead => "CASTER_DEAD",
            SkillFailure::SkillNotLearned(_) => "SKILL_NOT_LEARNED",
            SkillFailure::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            SkillFailure::OnCooldown { .. } => "ON_COOLDOWN",
            SkillFailure::LevelDataMissing { .. } => "LEVEL_DATA_MISSING",
            SkillFailure::InsufficientMana { .. } => "INSUFFICIENT_MANA",
            SkillFailure::InsufficientHealth { .. } => "INSUFFICIENT_HEALTH",
            SkillFailure::TargetNotFound => "TARGET_NOT_FOUND",
            SkillFailure::TargetDead => "TARGET_DEAD",
            SkillFailure::OutOfRange { .. } => "OUT_OF_RANGE",
            SkillFailure::ExecutionError(_) => "EXECUTION_ERROR",
        }
    }
}

/// Refusals from skill progression (learning, upgrading, hotbar slots).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgressionError {
    #[error("Player not found")]
    PlayerNotFound,

    #[error("Skill {0} does not exist")]
    TemplateNotFound(SkillId),

    #[error("Skill {0} is already at its maximum level")]
    MaxLevel(SkillId),

    #[error("Not enough skill points ({available}/{required})")]
    NotEnoughPoints { required: u32, available: u32 },

    #[error("Skill {0} is not learned")]
    NotLearned(SkillId),

    #[error("Hotbar slot {0} does not exist")]
    InvalidSlot(u8),
}

impl ProgressionError {
    pub fn code(&self) -> &'static str {
        match self {
            ProgressionError::PlayerNotFound => "PLAYER_NOT_FOUND",
            ProgressionError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            ProgressionError::MaxLevel(_) => "MAX_LEVEL",
            ProgressionError::NotEnoughPoints { .. } => "NOT_ENOUGH_POINTS",
            ProgressionError::NotLearned(_) => "SKILL_NOT_LEARNED",
            ProgressionError::InvalidSlot(_) => "INVALID_SLOT",
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("save store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("template document must be an object, found {0}")]
    InvalidDocument(String),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes_are_distinct() {
        let failures = vec![
            SkillFailure::CasterNotFound,
            SkillFailure::CasterDead,
            SkillFailure::SkillNotLearned(1),
            SkillFailure::TemplateNotFound(1),
            SkillFailure::OnCooldown { remaining_ms: 10 },
            SkillFailure::LevelDataMissing {
                skill_id: 1,
                level: 2,
            },
            SkillFailure::InsufficientMana {
                required: 30,
                available: 10,
            },
            SkillFailure::InsufficientHealth {
                required: 30,
                available: 10,
            },
            SkillFailure::TargetNotFound,
            SkillFailure::TargetDead,
            SkillFailure::OutOfRange {
                distance: 12.0,
                range: 5.0,
            },
            SkillFailure::ExecutionError("boom".to_string()),
        ];

        let mut codes: Vec<&str> = failures.iter().map(|f| f.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), failures.len());
    }

    #[test]
    fn test_failure_messages() {
        let failure = SkillFailure::InsufficientMana {
            required: 30,
            available: 10,
        };
        assert_eq!(failure.to_string(), "Not enough mana (10/30)");
        assert_eq!(
            SkillFailure::ExecutionError("bad data".to_string()).code(),
            "EXECUTION_ERROR"
        );
    }
}
