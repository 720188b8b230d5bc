use clap::Parser;
use log::{error, info};
use realm_server::broadcast::ChannelTransport;
use realm_server::commands::CommandHandler;
use realm_server::config::ServerConfig;
use realm_server::network::{NetworkEvent, Server};
use realm_server::persistence::FileSaveStore;
use realm_server::scheduler::WorldTickScheduler;
use realm_server::services::Services;
use realm_server::templates::{TemplateRegistry, TemplateSet};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// World ticks per second
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Milliseconds between world snapshots
    #[arg(long, default_value = "100")]
    broadcast_interval: u64,

    /// Milliseconds between persistence flushes
    #[arg(long, default_value = "5000")]
    save_interval: u64,

    /// Directory for player save files
    #[arg(long, default_value = "saves")]
    save_dir: PathBuf,

    /// JSON template file replacing the built-in content
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Monsters spawned at startup
    #[arg(short, long, default_value = "12")]
    monsters: u32,

    /// Maximum concurrent clients
    #[arg(short = 'c', long, default_value = "64")]
    max_clients: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        broadcast_interval_ms: args.broadcast_interval,
        save_interval_ms: args.save_interval,
        save_dir: args.save_dir,
        templates_path: args.templates,
        max_clients: args.max_clients,
        starting_monsters: args.monsters,
        ..ServerConfig::with_tick_rate(args.tick_rate)
    };

    let templates = match &config.templates_path {
        Some(path) => {
            info!("Loading templates from {}", path.display());
            TemplateSet::from_file(path)?
        }
        None => TemplateSet::builtin(),
    };
    let saves = Arc::new(FileSaveStore::new(&config.save_dir)?);
    info!("Saving players to {}", config.save_dir.display());

    let transport = Arc::new(ChannelTransport::new(4096));
    let outbound = transport.subscribe();
    let address = format!("{}:{}", args.host, args.port);
    let max_clients = config.max_clients;
    let starting_monsters = config.starting_monsters;

    let services = Arc::new(Services::new(
        config,
        Arc::new(TemplateRegistry::new(templates)),
        saves,
        transport,
    ));
    services.populate_monsters(starting_monsters);

    let handler = Arc::new(CommandHandler::new(Arc::clone(&services)));
    let mut server = Server::new(&address, handler, outbound, max_clients).await?;
    let shutdown = server.shutdown_handle();

    let scheduler = Arc::new(WorldTickScheduler::new(Arc::clone(&services)));
    let tick_handle = tokio::spawn(scheduler.run());
    let server_handle = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("Network stopped with error: {}", e),
                Err(e) => error!("Network task panicked: {}", e),
                Ok(Ok(())) => info!("Network stopped"),
            }
        }
        result = tick_handle => {
            if let Err(e) = result {
                error!("Tick task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(NetworkEvent::Shutdown);
        }
    }

    let saved = tokio::task::spawn_blocking(move || services.flush_dirty()).await?;
    info!("Saved {} players on shutdown", saved);

    Ok(())
}
