use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use stateset_inventory_core::{
    config::{self, AppConfig},
    db::{self, DbPool},
    events::{self, EventSender},
    services::ledger::EventFilter,
    Actor, InventoryServices,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "inventory-cli",
    about = "Operator tooling for the inventory ledger and balances",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Compare a balance row with the sum of its ledger deltas
    VerifyBalance(VerifyBalanceArgs),
    /// List ledger events, newest first
    Events(EventsArgs),
    /// Expire every lot whose expiration date has passed
    ExpireLots(ExpireLotsArgs),
}

#[derive(Args)]
struct VerifyBalanceArgs {
    #[arg(long)]
    tenant: Uuid,
    #[arg(long)]
    item: Uuid,
    #[arg(long)]
    location: Uuid,
}

#[derive(Args)]
struct EventsArgs {
    #[arg(long)]
    tenant: Uuid,
    #[arg(long)]
    item: Uuid,
    #[arg(long)]
    location: Option<Uuid>,
    #[arg(long, default_value_t = 50)]
    limit: u64,
}

#[derive(Args)]
struct ExpireLotsArgs {
    #[arg(long)]
    tenant: Uuid,
    #[arg(long, help = "User recorded on the lot history")]
    user: Uuid,
    #[arg(long, help = "Expire lots dated before this day (defaults to today, UTC)")]
    as_of: Option<NaiveDate>,
}

struct CliContext {
    db: Arc<DbPool>,
    services: InventoryServices,
}

impl CliContext {
    async fn initialize(app_config: &AppConfig) -> Result<Self> {
        let pool = db::establish_connection_from_app_config(app_config)
            .await
            .context("failed to connect to the database")?;
        let db = Arc::new(pool);

        let (sender, receiver) = EventSender::channel(app_config.event_channel_capacity);
        tokio::spawn(events::process_events(receiver));

        let services = InventoryServices::new(db.clone(), Arc::new(sender), app_config);
        Ok(Self { db, services })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = config::load_config().context("failed to load configuration")?;
    config::init_tracing(&app_config.log_level, app_config.log_json);

    let context = CliContext::initialize(&app_config).await?;
    debug!(environment = %app_config.environment, "CLI initialized");

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("migration failed")?;
            println!("Migrations applied");
        }
        Commands::VerifyBalance(args) => {
            let verification = context
                .services
                .balances
                .verify_balance(args.tenant, args.item, args.location)
                .await
                .context("failed to verify balance")?;
            if cli.json {
                print_json(&verification)?;
            } else if verification.in_sync() {
                println!("In sync: {}", verification.balance_qty);
            } else {
                println!(
                    "DRIFT: balance {} ledger {} (drift {})",
                    verification.balance_qty,
                    verification.ledger_qty,
                    verification.drift()
                );
            }
        }
        Commands::Events(args) => {
            let filter = EventFilter {
                item_id: Some(args.item),
                location_id: args.location,
                ..Default::default()
            };
            let page = context
                .services
                .ledger
                .list_events(args.tenant, &filter, 1, args.limit)
                .await
                .context("failed to list events")?;
            if cli.json {
                print_json(&page)?;
            } else {
                println!("{} event(s), showing {}", page.total, page.events.len());
                for event in &page.events {
                    println!(
                        "{}  {:<8}  {:>14}  from {}  to {}  ref {}",
                        event.created_at.format("%Y-%m-%d %H:%M:%S"),
                        event.event_type,
                        event.qty_base,
                        display_opt(event.from_location_id),
                        display_opt(event.to_location_id),
                        event.reference_id.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        Commands::ExpireLots(args) => {
            let actor = Actor::new(args.user, args.tenant, "operator", Vec::new());
            let as_of = args.as_of.unwrap_or_else(|| Utc::now().date_naive());
            let outcome = context
                .services
                .lots
                .expire_due_lots(&actor, as_of)
                .await
                .context("failed to expire lots")?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                println!(
                    "Expired {} lot(s); {} failed",
                    outcome.succeeded(),
                    outcome.failed()
                );
            }
        }
    }

    Ok(())
}

fn display_opt(id: Option<Uuid>) -> String {
    id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
