mod commands;
mod config;
mod relay_client;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    MealArgs, cmd_clear, cmd_diet_set, cmd_diet_show, cmd_export, cmd_favorite_list,
    cmd_favorite_toggle, cmd_goals_set, cmd_goals_show, cmd_history, cmd_import, cmd_log,
    cmd_remove, cmd_streak, cmd_summary, cmd_sync_create, cmd_sync_join, cmd_sync_pull,
    cmd_sync_push, cmd_sync_status, cmd_sync_unpair, cmd_template_apply, cmd_template_delete,
    cmd_template_list, cmd_template_save, cmd_water_add, cmd_water_set, cmd_water_show,
    cmd_weight_clear, cmd_weight_history, cmd_weight_log,
};
use crate::config::Config;
use crate::relay_client::HttpRelay;
use boilerfuel_core::error::SyncError;
use boilerfuel_core::quota::AdvisoryState;
use boilerfuel_core::relay::BlobRelay;
use boilerfuel_core::storage::SqliteBackend;
use boilerfuel_core::store::Store;
use boilerfuel_core::sync::{SyncClient, SyncStatus};

#[derive(Parser)]
#[command(
    name = "boilerfuel",
    version,
    about = "Dining hall nutrition log with encrypted device sync"
)]
struct Cli {
    /// Skip syncing with the relay for this command
    #[arg(long, global = true)]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a food entry
    Log {
        #[command(flatten)]
        meal: MealArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove the most recent entry with this id
    Remove {
        /// Entry id (shown in brackets by `summary`)
        id: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every entry for a day
    Clear {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show daily summary (defaults to today)
    Summary {
        /// Date to show (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show totals for the last N days
    History {
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show logging streaks
    Streak {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage daily nutrition goals
    Goals {
        #[command(subcommand)]
        command: GoalsCommands,
    },
    /// Manage favorite foods
    Favorite {
        #[command(subcommand)]
        command: FavoriteCommands,
    },
    /// Track water intake
    Water {
        #[command(subcommand)]
        command: WaterCommands,
    },
    /// Track body weight
    Weight {
        #[command(subcommand)]
        command: WeightCommands,
    },
    /// Save and reuse meal templates
    Template {
        #[command(subcommand)]
        command: TemplateCommands,
    },
    /// Dietary preferences
    Diet {
        #[command(subcommand)]
        command: DietCommands,
    },
    /// Export all data to a JSON backup
    Export {
        /// Output file (default: boilerfuel-backup-<date>.json, `-` for stdout)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge a JSON backup into local data
    Import {
        /// Path to the backup file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Pair devices and sync through the relay
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Run the sync relay server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "BOILERFUEL_PORT", default_value = "8787")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, env = "BOILERFUEL_BIND", default_value = "127.0.0.1")]
        bind: String,
        /// Relay database path (default: relay.db in the data directory)
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum GoalsCommands {
    /// Show current goals
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set one or more goals (e.g. calories=2200 protein=160)
    Set {
        /// nutrient=value pairs
        #[arg(required = true)]
        goals: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FavoriteCommands {
    /// Add or remove a food id from favorites
    Toggle {
        /// Food id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List favorite food ids
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WaterCommands {
    /// Add glasses (negative to remove)
    Add {
        /// Number of glasses
        #[arg(default_value = "1", allow_negative_numbers = true)]
        glasses: f64,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the number of glasses for a day
    Set {
        /// Number of glasses
        glasses: f64,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show glasses for a day
    Show {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WeightCommands {
    /// Log a weight entry
    Log {
        /// Weight value (number)
        value: f64,
        /// Unit: kg or lbs (default: kg)
        #[arg(short, long, default_value = "kg")]
        unit: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove the weight entry for a day
    Clear {
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show weight history
    History {
        /// Number of days to show (default: all)
        #[arg(short, long)]
        days: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TemplateCommands {
    /// Save a day's entries as a template
    Save {
        /// Template name
        name: String,
        /// Day to copy entries from (default: today)
        #[arg(long)]
        from_date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List saved templates
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log a template's entries on a day
    Apply {
        /// Template name
        name: String,
        /// Date (YYYY-MM-DD or today/yesterday/tomorrow, default: today)
        #[arg(short, long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a template
    Delete {
        /// Template name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DietCommands {
    /// Show dietary preferences
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update dietary preferences
    Set {
        #[arg(long)]
        vegetarian: Option<bool>,
        #[arg(long)]
        vegan: Option<bool>,
        /// Comma-separated allergens to exclude (empty string clears)
        #[arg(long, value_delimiter = ',')]
        exclude: Option<Vec<String>>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Create a new sync code and upload this device's data
    Create {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Join an existing sync code
    Join {
        /// Six-character sync code
        token: String,
        /// Secret shown on the other device
        secret: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop syncing and delete the remote copy
    Unpair {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show pairing state
    Status {
        /// Also print the secret and pairing QR code
        #[arg(long)]
        show_secret: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fetch and merge the latest remote data
    Pull {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload local data now
    Push {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    if let Commands::Serve { port, bind, db } = cli.command {
        let path = db.unwrap_or_else(|| config.relay_db_path.clone());
        let relay = BlobRelay::open(&path)?;
        return server::start_server(relay, port, &bind).await;
    }

    let backend = SqliteBackend::open(&config.store_path, config.storage_quota)?;
    let store = Arc::new(Store::new(
        Arc::new(backend),
        Arc::new(AdvisoryState::new()),
    ));
    let client = SyncClient::new(Arc::clone(&store), HttpRelay::new(&config.relay_url)?);

    // Sync subcommands drive the client themselves, but still drain any push
    // they scheduled before the process exits.
    let online = !cli.offline;
    let auto_sync = online && !matches!(cli.command, Commands::Sync { .. });
    if auto_sync && !client.start().await {
        warn_sync_failure(&client.status());
    }

    let result = dispatch(cli.command, &store, &client, &config).await;

    if online && !client.flush().await {
        warn_sync_failure(&client.status());
    }
    if store.take_advisory() {
        eprintln!(
            "Local storage is nearly full. Run `boilerfuel export` to keep a backup of your full history."
        );
    }

    result
}

fn warn_sync_failure(status: &SyncStatus) {
    match status {
        SyncStatus::Error(SyncError::TokenNotFound) => eprintln!(
            "Sync code no longer exists on the relay. Run `boilerfuel sync unpair`, then create or join again."
        ),
        SyncStatus::Error(e) => eprintln!("Sync skipped: {e}"),
        _ => {}
    }
}

#[allow(clippy::too_many_lines)]
async fn dispatch(
    command: Commands,
    store: &Store,
    client: &SyncClient<HttpRelay>,
    config: &Config,
) -> Result<()> {
    match command {
        Commands::Log { meal, json } => cmd_log(store, meal, json),
        Commands::Remove { id, date, json } => cmd_remove(store, &id, date, json),
        Commands::Clear { date, json } => cmd_clear(store, date, json),
        Commands::Summary { date, json } => cmd_summary(store, date, json),
        Commands::History { days, json } => cmd_history(store, days, json),
        Commands::Streak { json } => cmd_streak(store, json),
        Commands::Goals { command } => match command {
            GoalsCommands::Show { json } => cmd_goals_show(store, json),
            GoalsCommands::Set { goals, json } => cmd_goals_set(store, &goals, json),
        },
        Commands::Favorite { command } => match command {
            FavoriteCommands::Toggle { id, json } => cmd_favorite_toggle(store, &id, json),
            FavoriteCommands::List { json } => cmd_favorite_list(store, json),
        },
        Commands::Water { command } => match command {
            WaterCommands::Add {
                glasses,
                date,
                json,
            } => cmd_water_add(store, glasses, date, json),
            WaterCommands::Set {
                glasses,
                date,
                json,
            } => cmd_water_set(store, glasses, date, json),
            WaterCommands::Show { date, json } => cmd_water_show(store, date, json),
        },
        Commands::Weight { command } => match command {
            WeightCommands::Log {
                value,
                unit,
                date,
                json,
            } => cmd_weight_log(store, value, &unit, date, json),
            WeightCommands::Clear { date, json } => cmd_weight_clear(store, date, json),
            WeightCommands::History { days, json } => cmd_weight_history(store, days, json),
        },
        Commands::Template { command } => match command {
            TemplateCommands::Save {
                name,
                from_date,
                json,
            } => cmd_template_save(store, &name, from_date, json),
            TemplateCommands::List { json } => cmd_template_list(store, json),
            TemplateCommands::Apply { name, date, json } => {
                cmd_template_apply(store, &name, date, json)
            }
            TemplateCommands::Delete { name, json } => cmd_template_delete(store, &name, json),
        },
        Commands::Diet { command } => match command {
            DietCommands::Show { json } => cmd_diet_show(store, json),
            DietCommands::Set {
                vegetarian,
                vegan,
                exclude,
                json,
            } => cmd_diet_set(store, vegetarian, vegan, exclude, json),
        },
        Commands::Export { output, json } => cmd_export(store, output, json),
        Commands::Import { file, json } => cmd_import(store, &file, json),
        Commands::Sync { command } => match command {
            SyncCommands::Create { json } => cmd_sync_create(client, json).await,
            SyncCommands::Join {
                token,
                secret,
                json,
            } => cmd_sync_join(client, &token, &secret, json).await,
            SyncCommands::Unpair { json } => cmd_sync_unpair(client, json).await,
            SyncCommands::Status { show_secret, json } => {
                cmd_sync_status(store, &config.relay_url, show_secret, json)
            }
            SyncCommands::Pull { json } => cmd_sync_pull(client, json).await,
            SyncCommands::Push { json } => cmd_sync_push(client, json).await,
        },
        Commands::Serve { .. } => unreachable!("serve is handled before the store is opened"),
    }
}
