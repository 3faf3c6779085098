mod config;
mod credentials;
mod error;
mod models;
mod providers;
mod service;
mod signing;
mod storage;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config::{
    db_path, ensure_initialized, find_account, load_accounts, load_config, save_accounts,
    save_config,
};
use error::AppError;
use models::{Account, AccountColor, BillingSnapshot, MonthlyCost, RefreshInterval};
use service::{RefreshOrchestrator, RefreshOutcome, RefreshScheduler};
use std::collections::HashMap;
use storage::Storage;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "aws-cost-meter")]
#[command(about = "AWS Cost Explorer monitor for multiple accounts")]
struct Cli {
    /// Enable debug logging on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    AddAccount {
        name: String,
        #[arg(long)]
        account_id: String,
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long, default_value = "blue")]
        color: String,
    },
    RemoveAccount {
        account: String,
    },
    EnableAccount {
        account: String,
    },
    DisableAccount {
        account: String,
    },
    Accounts,
    Profiles,
    Refresh,
    Watch {
        #[arg(long)]
        interval: Option<String>,
    },
    SetInterval {
        interval: String,
    },
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn setup_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("aws_cost_meter=debug,info")
        } else {
            EnvFilter::new("aws_cost_meter=warn")
        }
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn parse_interval(input: &str) -> Result<RefreshInterval, AppError> {
    RefreshInterval::parse(input).ok_or_else(|| {
        AppError::Config("Unsupported interval. Use manual, 15m, 30m, 1h, 6h, or 24h.".into())
    })
}

fn parse_color(input: &str) -> Result<AccountColor, AppError> {
    AccountColor::parse(input).ok_or_else(|| {
        AppError::Config("Unsupported color. Use blue, green, orange, purple, red, or teal.".into())
    })
}

fn validate_account_id(input: &str) -> Result<String, AppError> {
    let trimmed = input.trim();
    if trimmed.len() != 12 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Config(
            "AWS account id must be 12 digits.".into(),
        ));
    }
    Ok(trimmed.to_string())
}

fn format_cost(amount: f64, currency: &str) -> String {
    if currency == "USD" {
        format!("${amount:.2}")
    } else {
        format!("{amount:.2} {currency}")
    }
}

fn format_change(change: Option<f64>) -> String {
    match change {
        Some(pct) => format!("{pct:+.1}%"),
        None => "n/a".into(),
    }
}

/// One-line monthly history; `*` marks the month still in progress.
fn format_history(months: &[MonthlyCost], currency: &str) -> String {
    months
        .iter()
        .map(|m| {
            let marker = if m.is_complete { "" } else { "*" };
            format!("{}{} {}", m.short_display(), marker, format_cost(m.cost, currency))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

fn set_account_enabled(key: &str, enabled: bool) -> Result<(), AppError> {
    let mut accounts = load_accounts()?;
    let account = find_account(&mut accounts, key)
        .ok_or_else(|| AppError::Config(format!("Account '{key}' not found.")))?;
    account.is_enabled = enabled;
    let name = account.name.clone();
    save_accounts(&accounts)?;
    println!(
        "Account '{}' {}.",
        name,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn print_summary(orchestrator: &RefreshOrchestrator) {
    let accounts = orchestrator.accounts().await;
    let errors = orchestrator.errors().await;

    for account in accounts.iter().filter(|a| a.is_enabled) {
        match orchestrator.snapshot(&account.id).await {
            Some(snap) => {
                let forecast = snap
                    .forecasted_month_cost
                    .map(|f| format_cost(f, &snap.currency))
                    .unwrap_or_else(|| "n/a".into());
                println!(
                    "{:<20} MTD {:>12}  last month {:>12}  forecast {:>12}  MoM {}",
                    account.name,
                    format_cost(snap.month_to_date_cost, &snap.currency),
                    format_cost(snap.last_month_cost, &snap.currency),
                    forecast,
                    format_change(snap.month_over_month_change()),
                );
                if !snap.monthly_costs.is_empty() {
                    println!(
                        "    history: {}",
                        format_history(&snap.monthly_costs, &snap.currency)
                    );
                }
                for service in snap.cost_by_service.iter().take(5) {
                    println!(
                        "    {:<40} {:>12} {:>6.1}%",
                        service.short_name(),
                        format_cost(service.cost, &snap.currency),
                        service.percentage
                    );
                }
            }
            None => println!("{:<20} no data", account.name),
        }
        if let Some(err) = errors.get(&account.id) {
            println!("    error: {err}");
        }
    }

    let total = orchestrator.aggregate().await;
    println!(
        "Total: MTD {}  last month {}  forecast {}  MoM {}",
        format_cost(total.total_month_to_date, "USD"),
        format_cost(total.total_last_month, "USD"),
        total
            .total_forecast
            .map(|f| format_cost(f, "USD"))
            .unwrap_or_else(|| "n/a".into()),
        format_change(total.month_over_month_change()),
    );
    match orchestrator.last_refresh().await {
        Some(at) => println!("Last refresh: {}", at.to_rfc3339()),
        None => {
            if let Some(updated) = total.last_updated {
                println!("Last updated: {} (stored)", updated.to_rfc3339());
            }
        }
    }
}

/// Persists snapshots not yet recorded, keyed by their fetch time.
async fn record_new_snapshots(
    orchestrator: &RefreshOrchestrator,
    storage: &mut Storage,
    recorded: &mut HashMap<String, DateTime<Utc>>,
) -> Result<(), AppError> {
    let fresh: Vec<BillingSnapshot> = orchestrator
        .snapshots()
        .await
        .into_iter()
        .filter(|s| recorded.get(&s.account_id) != Some(&s.fetched_at))
        .collect();
    storage.record_snapshots(&fresh)?;
    for snap in fresh {
        recorded.insert(snap.account_id, snap.fetched_at);
    }
    Ok(())
}

/// Applies the on-disk account list to the orchestrator. Returns whether it
/// differed.
async fn sync_accounts(orchestrator: &RefreshOrchestrator, on_disk: Vec<Account>) -> bool {
    let current = orchestrator.accounts().await;
    if current == on_disk {
        return false;
    }
    for stale in current.iter().filter(|a| !on_disk.iter().any(|d| d.id == a.id)) {
        orchestrator.remove_account(&stale.id).await;
    }
    for account in on_disk {
        if !current.contains(&account) && !orchestrator.update_account(account.clone()).await {
            orchestrator.add_account(account).await;
        }
    }
    true
}

async fn open_orchestrator(
    storage: &Storage,
) -> Result<(RefreshOrchestrator, HashMap<String, DateTime<Utc>>), AppError> {
    let cfg = load_config()?;
    let orchestrator = RefreshOrchestrator::from_config(&cfg, load_accounts()?)?;
    let stored = storage.latest_snapshots()?;
    let recorded = stored
        .iter()
        .map(|s| (s.account_id.clone(), s.fetched_at))
        .collect();
    orchestrator.seed_snapshots(stored).await;
    Ok((orchestrator, recorded))
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            println!("Initialized aws-cost-meter config and data directories.");
        }
        Commands::AddAccount {
            name,
            account_id,
            profile,
            region,
            color,
        } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let mut accounts = load_accounts()?;
            if accounts.iter().any(|a| a.name.eq_ignore_ascii_case(name.trim())) {
                return Err(AppError::Config(format!(
                    "Account '{}' already exists.",
                    name.trim()
                )));
            }
            let account = Account::new(
                name.trim(),
                validate_account_id(&account_id)?,
                region.unwrap_or(cfg.default_region).trim().to_ascii_lowercase(),
            )
            .with_profile(profile)
            .with_color(parse_color(&color)?);
            println!("Account '{}' added ({}).", account.name, account.id);
            accounts.push(account);
            save_accounts(&accounts)?;
        }
        Commands::RemoveAccount { account } => {
            let mut accounts = load_accounts()?;
            let id = find_account(&mut accounts, &account)
                .map(|a| a.id.clone())
                .ok_or_else(|| AppError::Config(format!("Account '{account}' not found.")))?;
            accounts.retain(|a| a.id != id);
            save_accounts(&accounts)?;
            println!("Account '{account}' removed.");
        }
        Commands::EnableAccount { account } => set_account_enabled(&account, true)?,
        Commands::DisableAccount { account } => set_account_enabled(&account, false)?,
        Commands::Accounts => {
            for a in load_accounts()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    a.id,
                    a.name,
                    a.account_id,
                    a.profile_name.as_deref().unwrap_or(credentials::DEFAULT_PROFILE),
                    a.region,
                    a.color.as_label(),
                    if a.is_enabled { "enabled" } else { "disabled" },
                );
            }
        }
        Commands::Profiles => {
            let cfg = load_config()?;
            for profile in service::credential_provider(&cfg).list_profiles()? {
                println!("{profile}");
            }
        }
        Commands::Refresh => {
            ensure_initialized()?;
            let mut storage = Storage::open(&db_path()?)?;
            let (orchestrator, mut recorded) = open_orchestrator(&storage).await?;
            if !orchestrator.accounts().await.iter().any(|a| a.is_enabled) {
                println!("No enabled accounts. Add one with `aws-cost-meter add-account`.");
                return Ok(());
            }

            if let RefreshOutcome::Completed { succeeded, failed } = orchestrator.refresh().await {
                record_new_snapshots(&orchestrator, &mut storage, &mut recorded).await?;
                print_summary(&orchestrator).await;
                println!(
                    "Refreshed {} account(s), {} failed.",
                    succeeded.len(),
                    failed.len()
                );
            }
        }
        Commands::Watch { interval } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let interval = match interval {
                Some(raw) => parse_interval(&raw)?,
                None => cfg.refresh_interval,
            };
            let mut storage = Storage::open(&db_path()?)?;
            let (orchestrator, mut recorded) = open_orchestrator(&storage).await?;
            let mut changes = orchestrator.subscribe();

            let scheduler = RefreshScheduler::new(orchestrator.clone());
            scheduler.set_interval(interval);
            match scheduler.interval() {
                RefreshInterval::Manual => println!("Refreshing once; press Ctrl-C to exit."),
                every => println!("Refreshing every {}; press Ctrl-C to exit.", every.as_label()),
            }
            tokio::spawn({
                let orchestrator = orchestrator.clone();
                async move { orchestrator.refresh().await }
            });

            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if orchestrator.is_refreshing().await {
                            continue;
                        }
                        // Account edits made from another shell apply to the next wave.
                        if sync_accounts(&orchestrator, load_accounts()?).await {
                            orchestrator.forget_credentials();
                            changes.borrow_and_update();
                        }
                        record_new_snapshots(&orchestrator, &mut storage, &mut recorded).await?;
                        print_summary(&orchestrator).await;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        scheduler.stop();
                        break;
                    }
                }
            }
        }
        Commands::SetInterval { interval } => {
            ensure_initialized()?;
            let mut cfg = load_config()?;
            cfg.refresh_interval = parse_interval(&interval)?;
            save_config(&cfg)?;
            println!("Refresh interval set to {}.", cfg.refresh_interval.as_label());
        }
        Commands::Export { format } => {
            ensure_initialized()?;
            let storage = Storage::open(&db_path()?)?;
            if format.eq_ignore_ascii_case("json") {
                println!("{}", storage.export_json()?);
            } else if format.eq_ignore_ascii_case("csv") {
                print!("{}", storage.export_csv()?);
            } else {
                return Err(AppError::Config(
                    "Unsupported export format. Use json or csv".into(),
                ));
            }
        }
    }

    Ok(())
}
