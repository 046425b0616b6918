//! PeerQuest maintenance CLI
//!
//! Runs the repair sweeps and consistency checks against a PeerQuest database.
//!
//! ## Usage
//!
//! ```bash
//! # Create or migrate the schema
//! peerquest-core init
//!
//! # Reopen quests left in progress with nobody on them
//! peerquest-core --database /data/peerquest.db reconcile-quests
//!
//! # Rebuild every cached balance from the ledger
//! peerquest-core recompute-balances
//!
//! # Inspect one user or one (quest, user) pair
//! peerquest-core check-balance <user-id>
//! peerquest-core check-attempts <quest-id> <user-id>
//! ```
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use peerquest_core::services::events::spawn_logging_listener;
use peerquest_core::{Config, PeerQuest};

#[derive(Parser, Debug)]
#[command(name = "peerquest-core")]
#[command(about = "Maintenance tools for the PeerQuest quest and gold ledger database")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "PEERQUEST_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config)
    #[arg(long, env = "PEERQUEST_DATABASE")]
    database: Option<PathBuf>,

    /// Maximum application attempts per quest and user (overrides config)
    #[arg(long)]
    max_attempts: Option<i64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or migrate the database schema
    Init {
        /// Also write the effective config to this path
        #[arg(long)]
        write_config: Option<PathBuf>,
    },
    /// Reconcile every quest's status with its applications and participants
    ReconcileQuests,
    /// Rebuild every cached balance from the ledger
    RecomputeBalances,
    /// Create attempt rows for applications that have none
    BackfillAttempts,
    /// Compare one user's cached balance with the ledger
    CheckBalance {
        user_id: String,
        /// Overwrite the cache when it has drifted
        #[arg(long)]
        repair: bool,
    },
    /// Show attempt budget and eligibility for a quest and user
    CheckAttempts { quest_id: String, user_id: String },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("peerquest_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_application_attempts = max_attempts;
    }

    info!(
        database = %config.database_path.display(),
        max_attempts = config.max_application_attempts,
        "Opening PeerQuest database"
    );

    let pq = PeerQuest::open(&config)?;
    let listener = spawn_logging_listener(pq.events.clone());

    match args.command {
        Command::Init { write_config } => {
            if let Some(path) = write_config {
                config.save(&path)?;
                info!(path = %path.display(), "Wrote config");
            }
            print_json(&pq.db.stats()?)?;
        }
        Command::ReconcileQuests => print_json(&pq.reconcile_all_quests()?)?,
        Command::RecomputeBalances => print_json(&pq.recompute_all_balances()?)?,
        Command::BackfillAttempts => print_json(&pq.backfill_attempts()?)?,
        Command::CheckBalance { user_id, repair } => {
            let check = pq.check_balance(&user_id)?;
            if repair && !check.consistent {
                pq.recompute_user_balance(&user_id)?;
                print_json(&pq.check_balance(&user_id)?)?;
            } else {
                print_json(&check)?;
            }
        }
        Command::CheckAttempts { quest_id, user_id } => {
            print_json(&pq.check_attempts(&quest_id, &user_id)?)?;
        }
    }

    // Closing the bus lets the listener drain what the sweeps emitted
    drop(pq);
    listener.await?;
    Ok(())
}
