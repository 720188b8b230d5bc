use std::path::PathBuf;
use std::time::Duration;

use realm_shared::{
    BROADCAST_INTERVAL_MS, MAX_DELTA_MS, MAX_SPEED_MULTIPLIER, PLAYER_MOVE_SPEED,
    PLAYER_RESPAWN_MS, SAVE_INTERVAL_MS, TICK_INTERVAL_MS,
};

/// Runtime settings for the simulation and its outer services.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_interval: Duration,
    pub broadcast_interval_ms: u64,
    pub save_interval_ms: u64,
    /// Upper bound for the delta time fed into one tick.
    pub max_delta_ms: u64,
    pub player_move_speed: f32,
    /// Movement validator limit as a multiple of the nominal move speed.
    pub max_speed_multiplier: f32,
    pub player_respawn_ms: u64,
    pub save_dir: PathBuf,
    pub templates_path: Option<PathBuf>,
    pub max_clients: usize,
    pub starting_monsters: u32,
}

impl ServerConfig {
    pub fn max_player_speed(&self) -> f32 {
        self.player_move_speed * self.max_speed_multiplier
    }

    /// Builds a config whose tick runs at `tick_rate` Hz.
    pub fn with_tick_rate(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_interval: Duration::from_secs_f64(1.0 / tick_rate as f64),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            broadcast_interval_ms: BROADCAST_INTERVAL_MS,
            save_interval_ms: SAVE_INTERVAL_MS,
            max_delta_ms: MAX_DELTA_MS,
            player_move_speed: PLAYER_MOVE_SPEED,
            max_speed_multiplier: MAX_SPEED_MULTIPLIER,
            player_respawn_ms: PLAYER_RESPAWN_MS,
            save_dir: PathBuf::from("saves"),
            templates_path: None,
            max_clients: 64,
            starting_monsters: 12,
        }
    }
}
