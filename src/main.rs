use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hmcpl_scraper::{
    CheckoutFilter, ClientError, Config, Credential, HoldFilter, LibraryClient, Mode, SearchIndex,
};
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "hmcpl")]
#[command(about = "Manage a Huntsville-Madison County Public Library account", long_about = None)]
struct Cli {
    /// Discard the saved session and log in again
    #[arg(long, global = true)]
    relogin: bool,

    /// Transport mode: http or rendered
    #[arg(long, global = true, env = "HMCPL_MODE")]
    mode: Option<Mode>,

    /// Seconds to wait for login and anti-bot challenges
    #[arg(long, global = true, env = "HMCPL_TIMEOUT")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Account summary: counts, fines, card expiry
    Status,
    /// Checked out items
    Checkouts {
        /// Only items due within N days
        #[arg(long)]
        due_soon: Option<u32>,
        /// Only overdue items
        #[arg(long)]
        overdue: bool,
    },
    /// Holds (empty in rendered mode, where the holds page is blocked)
    Holds {
        #[arg(long)]
        ready: bool,
        #[arg(long)]
        pending: bool,
    },
    /// Search the catalog
    Search {
        query: String,
        #[arg(long, default_value = "keyword")]
        index: SearchIndex,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Place a hold on a record
    Hold {
        record_id: String,
        /// Pickup branch, matched by name
        #[arg(long)]
        pickup: Option<String>,
    },
    /// Renew one item, or everything renewable with --all
    Renew {
        #[arg(required_unless_present = "all")]
        item_id: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Pickup branches
    Locations,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn credential_from_env() -> Result<Credential> {
    let barcode = std::env::var("HMCPL_BARCODE").context("HMCPL_BARCODE must be set")?;
    let pin = std::env::var("HMCPL_PIN").context("HMCPL_PIN must be set")?;
    Ok(Credential::new(barcode, pin))
}

fn outcome_json<T: Serialize>(result: &Result<T, ClientError>) -> serde_json::Value {
    match result {
        Ok(value) => json!({ "success": true, "result": value }),
        Err(e) => json!({ "success": false, "error": e.to_string() }),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(timeout) = cli.timeout {
        config.login_timeout_secs = timeout;
    }

    let credential = credential_from_env()?;
    let mut client = LibraryClient::from_config(&config, credential, cli.relogin)?;

    match cli.command {
        Commands::Status => print_json(&client.get_status().await?)?,
        Commands::Checkouts { due_soon, overdue } => {
            let filter = CheckoutFilter {
                due_soon_days: due_soon,
                overdue_only: overdue,
            };
            print_json(&client.list_checkouts(&filter).await?)?
        }
        Commands::Holds { ready, pending } => {
            let filter = HoldFilter {
                ready_only: ready,
                pending_only: pending,
            };
            print_json(&client.list_holds(&filter).await?)?
        }
        Commands::Search { query, index, limit } => print_json(&client.search(&query, index, limit).await?)?,
        Commands::Hold { record_id, pickup } => {
            print_json(&client.place_hold(&record_id, pickup.as_deref()).await?)?
        }
        Commands::Renew { all: true, .. } => {
            let outcomes: Vec<_> = client
                .renew_all()
                .await?
                .iter()
                .map(|(item_id, result)| {
                    let mut entry = outcome_json(result);
                    entry["itemId"] = json!(item_id);
                    entry
                })
                .collect();
            print_json(&outcomes)?
        }
        Commands::Renew { item_id, .. } => {
            let item_id = item_id.context("an item id or --all is required")?;
            print_json(&client.renew(&item_id).await?)?
        }
        Commands::Locations => print_json(&client.pickup_locations().await?)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{}", json!({ "error": format!("{:#}", e) }));
        std::process::exit(1);
    }
}
