//! Paper stock-trading desk.
//!
//! Accounts hold cash and positions, trades execute against a synthetic
//! live price, and every state change lands in an audit log. Trading is
//! only permitted during configured market sessions.

mod admin;
mod audit;
mod db;
mod feed;
mod ledger;
mod market;
mod models;
mod retry;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, NaiveTime, Weekday};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::admin::Admin;
use crate::audit::{AuditLog, EventKind};
use crate::db::Database;
use crate::feed::PriceFeed;
use crate::ledger::{Ledger, LedgerError};
use crate::market::{market_status, MarketStatus};
use crate::models::{Holiday, ScheduleUpdate, SettingsUpdate};
use crate::retry::RetryPolicy;

/// Paper trading desk CLI.
#[derive(Parser)]
#[command(name = "paperdesk")]
#[command(about = "Paper stock trading with session gating and a synthetic price feed", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./paperdesk.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account
    CreateAccount {
        username: String,
        email: String,
    },

    /// Add a tradable instrument
    AddInstrument {
        symbol: String,

        /// Display name (company name)
        #[arg(short, long)]
        name: String,

        /// Initial price
        #[arg(short, long)]
        price: String,
    },

    /// Deposit cash into an account
    Deposit {
        #[arg(short, long)]
        account: i64,
        amount: String,
    },

    /// Withdraw cash from an account
    Withdraw {
        #[arg(short, long)]
        account: i64,
        amount: String,
    },

    /// Buy shares at the current price
    Buy {
        #[arg(short, long)]
        account: i64,
        symbol: String,
        quantity: String,
    },

    /// Sell shares at the current price
    Sell {
        #[arg(short, long)]
        account: i64,
        symbol: String,
        quantity: String,
    },

    /// Show an account's cash and positions
    Portfolio {
        #[arg(short, long)]
        account: i64,
    },

    /// Show an account's trade history
    History {
        #[arg(short, long)]
        account: i64,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show current prices for all instruments
    Prices,

    /// Show recent price history for one instrument
    Chart {
        symbol: String,

        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show whether the market is open right now
    Status,

    /// Show or update the market schedule
    Schedule {
        /// Session open time (HH:MM)
        #[arg(long)]
        open: Option<String>,

        /// Session close time (HH:MM)
        #[arg(long)]
        close: Option<String>,

        /// Trading weekdays, comma-separated (e.g. Mon,Tue,Wed,Thu,Fri)
        #[arg(long)]
        days: Option<String>,

        /// Replace the holiday list (repeatable, DATE or DATE=LABEL)
        #[arg(long = "holiday")]
        holidays: Vec<String>,

        /// Remove all holidays
        #[arg(long)]
        clear_holidays: bool,

        /// Force the market closed (true/false)
        #[arg(long, value_name = "BOOL")]
        manual_override: Option<bool>,

        /// Reason shown while the override is active
        #[arg(long)]
        override_message: Option<String>,
    },

    /// Show or update the price-generator settings
    Generator {
        #[arg(long, value_name = "BOOL")]
        enabled: Option<bool>,

        /// Seconds between ticks
        #[arg(long)]
        interval: Option<u64>,

        /// Std-dev of the per-tick log-return
        #[arg(long)]
        volatility: Option<f64>,

        /// Mean of the per-tick log-return
        #[arg(long)]
        drift: Option<f64>,

        /// Multiplier on the whole log-return
        #[arg(long)]
        exaggeration: Option<f64>,
    },

    /// Query the audit log
    Audit {
        /// Filter by event kind (e.g. deposit, buy, trade-rejected)
        #[arg(short, long)]
        kind: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: i64,

        #[arg(short, long, default_value = "0")]
        offset: i64,
    },

    /// Run the background price feed
    Run,
}

fn parse_amount(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("invalid amount {s:?}"))
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").with_context(|| format!("invalid time {s:?}, want HH:MM"))
}

fn parse_days(s: &str) -> Result<Vec<Weekday>> {
    s.split(',')
        .map(|d| {
            d.trim()
                .parse::<Weekday>()
                .map_err(|_| anyhow::anyhow!("invalid weekday {d:?}"))
        })
        .collect()
}

/// `DATE` or `DATE=LABEL`, e.g. `2025-12-25=Christmas Day`.
fn parse_holiday(s: &str) -> Result<Holiday> {
    let (date, label) = match s.split_once('=') {
        Some((date, label)) => (date, Some(label.to_string())),
        None => (s, None),
    };
    Ok(Holiday {
        date: date
            .trim()
            .parse()
            .with_context(|| format!("invalid holiday date {date:?}"))?,
        label,
    })
}

fn parse_kind(s: &str) -> Result<EventKind> {
    for kind in [
        EventKind::Deposit,
        EventKind::Withdrawal,
        EventKind::Buy,
        EventKind::Sell,
        EventKind::TradeRejected,
        EventKind::WithdrawalRejected,
        EventKind::DepositRejected,
        EventKind::ScheduleChanged,
        EventKind::GeneratorChanged,
        EventKind::Auth,
    ] {
        if kind.as_str() == s {
            return Ok(kind);
        }
    }
    bail!("unknown event kind {s:?}");
}

fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Print a ledger result the way the web layer would render it.
fn report(result: Result<ledger::TradeOutcome, LedgerError>) -> Result<()> {
    match result {
        Ok(outcome) => {
            println!("{} (balance: {})", outcome.message, outcome.balance);
            Ok(())
        }
        Err(LedgerError::MarketClosed { reason, next_open }) => {
            match next_open {
                Some(at) => println!("{reason} (next open: {})", at.format("%Y-%m-%d %H:%M")),
                None => println!("{reason} (no upcoming session found)"),
            }
            Ok(())
        }
        Err(LedgerError::Storage(e)) => Err(e.context("operation failed")),
        Err(e) => {
            println!("Rejected: {e}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Arc::new(Database::new(&cli.database).await?);
    let retry = RetryPolicy::default();
    let audit = AuditLog::new(db.clone(), retry);
    let ledger = Ledger::new(db.clone(), audit.clone(), retry);
    let admin = Admin::new(db.clone(), audit.clone());

    match cli.command {
        Commands::CreateAccount { username, email } => {
            let account = db.create_account(&username, &email).await?;
            println!("Created account {} ({})", account.id, account.username);
        }

        Commands::AddInstrument { symbol, name, price } => {
            let price = parse_amount(&price)?;
            if price <= Decimal::ZERO {
                bail!("price must be positive");
            }
            let inst = db.create_instrument(&symbol, &name, price).await?;
            println!("Added {} ({}) at {}", inst.symbol, inst.name, inst.price);
        }

        Commands::Deposit { account, amount } => {
            report(ledger.deposit(account, parse_amount(&amount)?).await)?;
        }

        Commands::Withdraw { account, amount } => {
            report(ledger.withdraw(account, parse_amount(&amount)?).await)?;
        }

        Commands::Buy {
            account,
            symbol,
            quantity,
        } => {
            let quantity = parse_amount(&quantity)?;
            report(ledger.execute_buy(account, &symbol, quantity, now_local()).await)?;
        }

        Commands::Sell {
            account,
            symbol,
            quantity,
        } => {
            let quantity = parse_amount(&quantity)?;
            report(ledger.execute_sell(account, &symbol, quantity, now_local()).await)?;
        }

        Commands::Portfolio { account } => {
            let acct = db
                .account(account)
                .await?
                .with_context(|| format!("no account {account}"))?;
            println!(
                "Account {} ({}) | cash {} | deposited {} | withdrawn {}",
                acct.id, acct.username, acct.balance, acct.total_deposited, acct.total_withdrawn
            );

            let positions = db.positions_for_account(account).await?;
            if positions.is_empty() {
                println!("No open positions");
            } else {
                let instruments = db.instruments().await?;
                println!("\n{:<8} {:>12} {:>12} {:>14} {:>14}", "SYMBOL", "QTY", "AVG COST", "VALUE", "UNREAL P/L");
                for pos in positions {
                    let Some(inst) = instruments.iter().find(|i| i.id == pos.instrument_id) else {
                        continue;
                    };
                    println!(
                        "{:<8} {:>12} {:>12} {:>14} {:>14}",
                        inst.symbol,
                        pos.quantity,
                        pos.avg_cost.round_dp(2),
                        pos.market_value(inst.price).round_dp(2),
                        pos.unrealized_pl(inst.price).round_dp(2)
                    );
                }
            }
        }

        Commands::History { account, limit } => {
            let trades = db.trades_for_account(account, limit).await?;
            let instruments = db.instruments().await?;
            println!("{:<20} {:<6} {:<8} {:>10} {:>10} {:>12} {:>12}", "TIME", "SIDE", "SYMBOL", "QTY", "PRICE", "REAL P/L", "CASH AFTER");
            for trade in trades {
                let symbol = instruments
                    .iter()
                    .find(|i| i.id == trade.instrument_id)
                    .map(|i| i.symbol.as_str())
                    .unwrap_or("?");
                println!(
                    "{:<20} {:<6} {:<8} {:>10} {:>10} {:>12} {:>12}",
                    trade.executed_at.format("%Y-%m-%d %H:%M:%S"),
                    trade.side.as_str(),
                    symbol,
                    trade.quantity,
                    trade.price,
                    trade.realized_pl,
                    trade.cash_after
                );
            }
        }

        Commands::Prices => {
            println!("{:<8} {:<24} {:>10}", "SYMBOL", "NAME", "PRICE");
            for inst in db.instruments().await? {
                println!("{:<8} {:<24} {:>10}", inst.symbol, inst.name, inst.price);
            }
        }

        Commands::Chart { symbol, limit } => {
            let inst = db
                .instrument_by_symbol(&symbol)
                .await?
                .with_context(|| format!("no instrument {symbol}"))?;
            for sample in db.price_history(inst.id, limit).await? {
                println!(
                    "{}  {}",
                    sample.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    sample.price
                );
            }
        }

        Commands::Status => {
            let schedule = db.market_schedule().await?;
            match market_status(&schedule, now_local()) {
                MarketStatus::Open => println!("Market is OPEN"),
                MarketStatus::Closed { reason, next_open } => {
                    println!("Market is CLOSED: {reason}");
                    if let Some(at) = next_open {
                        println!("Next open: {}", at.format("%A %Y-%m-%d %H:%M"));
                    }
                }
            }
        }

        Commands::Schedule {
            open,
            close,
            days,
            holidays,
            clear_holidays,
            manual_override,
            override_message,
        } => {
            let holidays = if clear_holidays {
                Some(Vec::new())
            } else if holidays.is_empty() {
                None
            } else {
                Some(
                    holidays
                        .iter()
                        .map(|h| parse_holiday(h))
                        .collect::<Result<Vec<_>>>()?,
                )
            };

            let update = ScheduleUpdate {
                open_time: open.as_deref().map(parse_time).transpose()?,
                close_time: close.as_deref().map(parse_time).transpose()?,
                timezone: None,
                trading_days: days.as_deref().map(parse_days).transpose()?,
                holidays,
                manual_override,
                override_message: override_message.map(Some),
            };

            let schedule = admin.update_schedule(update).await?;
            println!(
                "Session {} - {} ({}) on {}",
                schedule.open_time.format("%H:%M"),
                schedule.close_time.format("%H:%M"),
                schedule.timezone,
                schedule
                    .trading_days
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            for holiday in &schedule.holidays {
                println!(
                    "Holiday: {} {}",
                    holiday.date,
                    holiday.label.as_deref().unwrap_or("")
                );
            }
            if schedule.manual_override {
                println!(
                    "MANUAL OVERRIDE ACTIVE: {}",
                    schedule.override_message.as_deref().unwrap_or("(no message)")
                );
            }
        }

        Commands::Generator {
            enabled,
            interval,
            volatility,
            drift,
            exaggeration,
        } => {
            let settings = admin
                .set_generator_settings(SettingsUpdate {
                    enabled,
                    interval_secs: interval,
                    volatility,
                    drift,
                    exaggeration,
                })
                .await?;
            println!(
                "enabled={} interval={}s volatility={} drift={} exaggeration={}",
                settings.enabled,
                settings.interval_secs,
                settings.volatility,
                settings.drift,
                settings.exaggeration
            );
        }

        Commands::Audit { kind, limit, offset } => {
            let kind = kind.as_deref().map(parse_kind).transpose()?;
            for entry in audit.query(kind, limit, offset).await? {
                println!(
                    "{}  [{}]  account={}  {}",
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.kind.as_str(),
                    entry
                        .account_id
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    entry.detail
                );
            }
        }

        Commands::Run => {
            info!("starting price feed, Ctrl+C to stop");
            let feed = PriceFeed::new(db.clone(), retry);
            tokio::select! {
                _ = feed.run() => {}
                _ = tokio::signal::ctrl_c() => {
                    println!("\nStopping price feed...");
                }
            }
        }
    }

    Ok(())
}
