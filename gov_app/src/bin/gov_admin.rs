use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use gov_app::config_loader;
use gov_app::services;
use gov_app::tracing_setup;
use gov_ledger::CreditAllocation;
use gov_ledger::HistoryCursor;
use gov_ratelimit::DEFAULT_KEY_SUFFIX;
use gov_ratelimit::Window;
use gov_ratelimit::counter_key;
use serde_json::json;
use time::Date;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::Level;
use tracing::info;
use uuid::Uuid;

/// Operator tooling for rate limit counters and credit balances
#[derive(Parser, Debug)]
#[command(name = "gov_admin", version, long_about = None)]
struct Args {
    /// TOML config file; GOV_* environment variables apply on top
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mirror logs to stderr at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete every window counter of a key
    Reset {
        arena: String,
        provider: String,
        #[arg(long, default_value = DEFAULT_KEY_SUFFIX)]
        key_suffix: String,
    },
    /// Show whether a key is limited and how long until it frees up
    Status {
        arena: String,
        provider: String,
        #[arg(long, default_value = DEFAULT_KEY_SUFFIX)]
        key_suffix: String,
    },
    /// Show a user's credit balance
    Balance { user_id: Uuid },
    /// Page through a user's transactions, newest first
    History {
        user_id: Uuid,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// `next_cursor` of the previous page
        #[arg(long)]
        cursor: Option<HistoryCursor>,
    },
    /// Grant credits to a user
    Allocate {
        user_id: Uuid,
        credits: i64,
        /// First day the credits count (YYYY-MM-DD), defaults to today
        #[arg(long, value_parser = parse_date)]
        valid_from: Option<Date>,
        /// Last day the credits count (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        valid_until: Option<Date>,
    },
    /// Refund reservations abandoned for longer than the grace period
    Sweep {
        #[arg(long, default_value_t = 3600)]
        grace_secs: u64,
    },
}

fn parse_date(value: &str) -> Result<Date, String> {
    Date::parse(value, format_description!("[year]-[month]-[day]")).map_err(|err| format!("expected YYYY-MM-DD: {err}"))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config_loader::load_config_or_default(args.config.as_deref());
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _guard = tracing_setup::init("gov_admin", &config.log_dir, level, args.verbose);

    match args.command {
        Commands::Reset { arena, provider, key_suffix } => {
            let limiter = services::rate_limiter(&config)?;
            limiter.reset(&arena, &provider, &key_suffix).await;
            let keys: Vec<String> = Window::ALL.iter().map(|window| counter_key(&arena, &provider, &key_suffix, *window)).collect();
            info!(?keys, "Reset rate limit counters");
            print_json(&json!({ "reset": keys }))?;
        }
        Commands::Status { arena, provider, key_suffix } => {
            let limiter = services::rate_limiter(&config)?;
            let reachable = limiter.store_reachable().await;
            let limited = limiter.is_rate_limited(&arena, &provider, None, &key_suffix).await;
            let wait = limiter.get_wait_time(&arena, &provider, None, &key_suffix).await;
            print_json(&json!({
                "arena": arena,
                "provider": provider,
                "key_suffix": key_suffix,
                "config": limiter.table().resolve(&arena, None),
                "store_reachable": reachable,
                "limited": limited,
                "wait_seconds": wait.as_secs_f64(),
                "store_health": limiter.health().snapshot(),
            }))?;
        }
        Commands::Balance { user_id } => {
            let ledger = services::credit_ledger(&config).await?;
            print_json(&ledger.get_balance(user_id).await?)?;
        }
        Commands::History { user_id, limit, cursor } => {
            let ledger = services::credit_ledger(&config).await?;
            print_json(&ledger.get_transaction_history(user_id, limit, cursor.as_ref()).await?)?;
        }
        Commands::Allocate { user_id, credits, valid_from, valid_until } => {
            let valid_from = valid_from.unwrap_or_else(|| OffsetDateTime::now_utc().date());
            if valid_until.is_some_and(|until| until < valid_from) {
                anyhow::bail!("valid_until {valid_until:?} is before valid_from {valid_from}");
            }
            let ledger = services::credit_ledger(&config).await?;
            let allocation = CreditAllocation { user_id, credits_amount: credits, valid_from, valid_until };
            let id = ledger.allocate(&allocation).await.context("Allocation failed")?;
            print_json(&json!({ "allocation_id": id }))?;
        }
        Commands::Sweep { grace_secs } => {
            let ledger = services::credit_ledger(&config).await?;
            let refunds = ledger.sweep_orphaned_reservations(Duration::from_secs(grace_secs)).await?;
            print_json(&json!({ "refund_ids": refunds }))?;
        }
    }

    Ok(())
}
