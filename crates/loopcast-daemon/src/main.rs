use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use loopcast_core::config::LoopcastConfig;
use loopcast_scheduler::{LoopStatus, LoopStore};
use tracing::info;

mod commands;
mod publisher;

use commands::Transition;

/// Post-loop scheduler for influencer content.
#[derive(Debug, Parser)]
#[command(name = "loopcast", version)]
struct Cli {
    /// Config file (default: $LOOPCAST_CONFIG, then ~/.loopcast/loopcast.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll for due loops and publish them until interrupted.
    Run,
    /// Create a loop from a JSON definition file.
    Add { file: PathBuf },
    /// List loops, optionally for one team and/or status.
    List {
        #[arg(long)]
        team: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<LoopStatus>,
    },
    /// Print one loop as JSON.
    Show { id: String },
    /// List active loops that are due now.
    Due {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Stop an active loop until resumed.
    Pause { id: String },
    /// Reactivate a paused loop.
    Resume { id: String },
    /// Stop a loop permanently.
    Cancel { id: String },
    /// Remove a loop from the database.
    Delete { id: String },
}

fn parse_status(s: &str) -> Result<LoopStatus, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loopcast=info,loopcast_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > LOOPCAST_CONFIG env > ~/.loopcast/loopcast.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("LOOPCAST_CONFIG").ok());
    let config = LoopcastConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        LoopcastConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    // LoopStore::new runs the schema migrations
    let store = Arc::new(LoopStore::new(db)?);
    let engine = commands::engine(&config);

    match cli.command {
        Command::Run => commands::run(&config, store).await?,
        Command::Add { file } => {
            let new = commands::load_new_loop(&file)?;
            let entity = commands::add(&store, &engine, new)?;
            println!("{}", commands::summary(&entity));
        }
        Command::List { team, status } => commands::list(&store, team.as_deref(), status)?,
        Command::Show { id } => commands::show(&store, &id)?,
        Command::Due { limit } => commands::due(&store, limit)?,
        Command::Pause { id } => {
            let e = commands::transition(&store, &engine, &id, Transition::Pause)?;
            println!("{}", commands::summary(&e));
        }
        Command::Resume { id } => {
            let e = commands::transition(&store, &engine, &id, Transition::Resume)?;
            println!("{}", commands::summary(&e));
        }
        Command::Cancel { id } => {
            let e = commands::transition(&store, &engine, &id, Transition::Cancel)?;
            println!("{}", commands::summary(&e));
        }
        Command::Delete { id } => {
            commands::delete(&store, &id)?;
            println!("deleted {id}");
        }
    }
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_parses_status_filter() {
        let cli = Cli::try_parse_from(["loopcast", "list", "--team", "t1", "--status", "paused"]).unwrap();
        match cli.command {
            Command::List { team, status } => {
                assert_eq!(team.as_deref(), Some("t1"));
                assert_eq!(status, Some(LoopStatus::Paused));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["loopcast", "list", "--status", "sleeping"]).is_err());
    }
}
