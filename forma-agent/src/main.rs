//! Forma Agent: headless design collaborator.
//!
//! Joins a design channel, applies every remote edit to an in-memory
//! store and logs what happens. Useful for watching a session from a
//! terminal or for keeping a live copy of a design on disk.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use forma_collab::{CollabSession, OnlineUser, SessionConfig, SessionEvent};
use forma_core::{Component, DesignDocument, DesignStore, StoreEvent};
use log::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "forma-agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Headless collaborator for a Forma design session")]
struct Cli {
    /// Design to join
    #[arg(short, long)]
    design: String,

    /// User id (default: random)
    #[arg(long)]
    user_id: Option<String>,

    /// Display name announced to peers
    #[arg(long, default_value = "Forma Agent")]
    name: String,

    /// Avatar URL announced to peers
    #[arg(long, default_value = "")]
    avatar: String,

    /// Session config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server URL, overrides the config file
    #[arg(short, long)]
    server: Option<String>,

    /// JSON file with the initial component list
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Write the final design document here on exit
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<SessionConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    config.validate()?;
    Ok(config)
}

fn load_store(cli: &Cli) -> Result<DesignStore, Box<dyn Error>> {
    let Some(path) = &cli.seed else {
        return Ok(DesignStore::new());
    };
    let raw = std::fs::read_to_string(path)?;
    let components: Vec<Component> = serde_json::from_str(&raw)?;
    Ok(DesignStore::from_document(DesignDocument::new(&cli.design, components))?)
}

fn report(event: &SessionEvent, store: &DesignStore) {
    match event {
        SessionEvent::Connected => info!("Connected"),
        SessionEvent::Disconnected => warn!("Disconnected"),
        SessionEvent::Reconnecting { attempt, delay } => {
            info!("Reconnect attempt {attempt} in {}ms", delay.as_millis())
        }
        SessionEvent::ConnectionFailed { attempts } => {
            error!("Connection failed after {attempts} attempts; restart to retry")
        }
        SessionEvent::Applied(op) => info!(
            "{} from {} applied ({} components)",
            op.op_type,
            op.user_id,
            store.len()
        ),
        SessionEvent::PresenceChanged { user_id, change } => {
            debug!("Presence {user_id}: {change:?}")
        }
        SessionEvent::Stale {
            timestamp,
            watermark,
        } => debug!("Stale operation ts {timestamp} (watermark {watermark})"),
        SessionEvent::MessageDropped { error } => warn!("Dropped message: {error}"),
        SessionEvent::OperationFailed { error } => warn!("Operation failed: {error}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let mut store = load_store(&cli)?;
    store.subscribe(|event: &StoreEvent| debug!("Store: {event:?}"));

    let user_id = cli
        .user_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let user = OnlineUser::new(user_id, cli.name.clone(), cli.avatar.clone());

    info!("Joining design {} as {} ({})", cli.design, user.name, user.id);
    let mut session = CollabSession::open(config, cli.design.clone(), user)?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let next = tokio::select! {
            event = session.next_event(&mut store) => Some(event),
            _ = &mut shutdown => None,
        };
        match next {
            Some(Some(event)) => report(&event, &store),
            Some(None) => {
                info!("Session ended");
                break;
            }
            None => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.cleanup().await;

    if let Some(path) = &cli.dump {
        std::fs::write(path, store.to_document(&cli.design).to_json()?)?;
        info!("Wrote {} components to {}", store.len(), path.display());
    }
    Ok(())
}
