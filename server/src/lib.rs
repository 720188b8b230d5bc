//! # Realm Server Library
//!
//! Authoritative simulation server for a persistent real-time multiplayer
//! world. Clients send intents (move here, attack that, cast this); the
//! server decides every outcome and pushes the results back out.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Positions, damage, deaths, experience and loot are computed here only.
//! Movement that would exceed the speed limit is rejected, skills are checked
//! for cost, cooldown, range and target state before anything changes.
//!
//! ### Fixed-Rate World Tick
//! [`scheduler::WorldTickScheduler`] advances the world every 50 ms through
//! movement, auto-combat, monster AI, effect expiry and respawns. World
//! snapshots go out every 100 ms and dirty players are persisted every 5 s.
//! Each phase is isolated: a failing phase is logged and the tick carries on.
//!
//! ### Concurrent Command Handling
//! Client commands run on network tasks while the tick runs on its own.
//! Entities sit behind per-entity locks taken in a fixed order (player
//! before monster), which keeps a kill from being claimed twice.
//!
//! ## Module Organization
//!
//! - `world`, `entity`: entity registry and the player/monster model
//! - `movement`: speed validation and per-tick movement integration
//! - `combat`: damage, critical hits, mitigation and kill rewards
//! - `skills`: skill validation, execution and progression
//! - `effects`: timed stat effects and skill cooldowns
//! - `ai`: monster aggro, chase and attack behaviour
//! - `loot`, `persistence`, `templates`: collaborator services
//! - `broadcast`: outbound transport and snapshot coalescing
//! - `services`, `commands`, `scheduler`: wiring, intents and the tick
//! - `network`, `client_manager`: the UDP front end
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use realm_server::broadcast::ChannelTransport;
//! use realm_server::commands::CommandHandler;
//! use realm_server::config::ServerConfig;
//! use realm_server::network::Server;
//! use realm_server::persistence::MemorySaveStore;
//! use realm_server::scheduler::WorldTickScheduler;
//! use realm_server::services::Services;
//! use realm_server::templates::{TemplateRegistry, TemplateSet};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(ChannelTransport::new(1024));
//!     let outbound = transport.subscribe();
//!     let services = Arc::new(Services::new(
//!         ServerConfig::default(),
//!         Arc::new(TemplateRegistry::new(TemplateSet::builtin())),
//!         Arc::new(MemorySaveStore::new()),
//!         transport,
//!     ));
//!     services.populate_monsters(12);
//!
//!     tokio::spawn(Arc::new(WorldTickScheduler::new(Arc::clone(&services))).run());
//!
//!     let handler = Arc::new(CommandHandler::new(services));
//!     let mut server = Server::new("127.0.0.1:8080", handler, outbound, 64).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod broadcast;
pub mod client_manager;
pub mod combat;
pub mod commands;
pub mod config;
pub mod effects;
pub mod entity;
pub mod error;
pub mod loot;
pub mod movement;
pub mod network;
pub mod persistence;
pub mod scheduler;
pub mod services;
pub mod skills;
pub mod templates;
pub mod utils;
pub mod world;
