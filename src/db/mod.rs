//! SQLite persistence for all ledger state.
//!
//! Stores everything the system needs across restarts:
//! - Accounts, instruments, positions
//! - Trade and price history (append-only)
//! - The audit log
//! - Market schedule and generator settings (singleton rows)
//!
//! Monetary columns are stored as TEXT and parsed into `Decimal` so that
//! average-cost arithmetic stays exact. Row structs are the raw storage
//! shape; they convert into the domain models in `crate::models`.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::SqliteConnection;

use crate::models::{
    Account, GeneratorSettings, Holiday, Instrument, MarketSchedule, Position, PriceSample,
    TradeRecord, TradeSide,
};

/// Database connection pool with schema management.
pub struct Database {
    pool: SqlitePool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    username: String,
    email: String,
    balance: String,
    total_deposited: String,
    total_withdrawn: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct InstrumentRow {
    id: i64,
    symbol: String,
    name: String,
    price: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PositionRow {
    account_id: i64,
    instrument_id: i64,
    quantity: String,
    avg_cost: String,
    total_invested: String,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TradeRow {
    id: i64,
    account_id: i64,
    instrument_id: i64,
    side: String,
    quantity: String,
    price: String,
    cash_after: String,
    realized_pl: String,
    executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct PriceSampleRow {
    instrument_id: i64,
    price: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ScheduleRow {
    open_time: String,
    close_time: String,
    timezone: String,
    trading_days: String,
    holidays: String,
    manual_override: bool,
    override_message: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SettingsRow {
    enabled: bool,
    interval_secs: i64,
    volatility: f64,
    drift: f64,
    exaggeration: f64,
}

fn parse_dec(column: &str, s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("bad decimal in column {column}: {s:?}"))
}

impl TryFrom<AccountRow> for Account {
    type Error = anyhow::Error;

    fn try_from(row: AccountRow) -> Result<Self> {
        Ok(Account {
            id: row.id,
            username: row.username,
            email: row.email,
            balance: parse_dec("balance", &row.balance)?,
            total_deposited: parse_dec("total_deposited", &row.total_deposited)?,
            total_withdrawn: parse_dec("total_withdrawn", &row.total_withdrawn)?,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<InstrumentRow> for Instrument {
    type Error = anyhow::Error;

    fn try_from(row: InstrumentRow) -> Result<Self> {
        Ok(Instrument {
            id: row.id,
            symbol: row.symbol,
            name: row.name,
            price: parse_dec("price", &row.price)?,
        })
    }
}

impl TryFrom<PositionRow> for Position {
    type Error = anyhow::Error;

    fn try_from(row: PositionRow) -> Result<Self> {
        Ok(Position {
            account_id: row.account_id,
            instrument_id: row.instrument_id,
            quantity: parse_dec("quantity", &row.quantity)?,
            avg_cost: parse_dec("avg_cost", &row.avg_cost)?,
            total_invested: parse_dec("total_invested", &row.total_invested)?,
            last_updated: row.last_updated,
        })
    }
}

impl TryFrom<TradeRow> for TradeRecord {
    type Error = anyhow::Error;

    fn try_from(row: TradeRow) -> Result<Self> {
        Ok(TradeRecord {
            id: row.id,
            account_id: row.account_id,
            instrument_id: row.instrument_id,
            side: TradeSide::parse(&row.side)
                .with_context(|| format!("unknown trade side {:?}", row.side))?,
            quantity: parse_dec("quantity", &row.quantity)?,
            price: parse_dec("price", &row.price)?,
            cash_after: parse_dec("cash_after", &row.cash_after)?,
            realized_pl: parse_dec("realized_pl", &row.realized_pl)?,
            executed_at: row.executed_at,
        })
    }
}

impl TryFrom<PriceSampleRow> for PriceSample {
    type Error = anyhow::Error;

    fn try_from(row: PriceSampleRow) -> Result<Self> {
        Ok(PriceSample {
            instrument_id: row.instrument_id,
            price: parse_dec("price", &row.price)?,
            recorded_at: row.recorded_at,
        })
    }
}

fn weekdays_to_csv(days: &[Weekday]) -> String {
    days.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn weekdays_from_csv(csv: &str) -> Result<Vec<Weekday>> {
    csv.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim()
                .parse::<Weekday>()
                .map_err(|_| anyhow::anyhow!("bad weekday in schedule: {s:?}"))
        })
        .collect()
}

impl TryFrom<ScheduleRow> for MarketSchedule {
    type Error = anyhow::Error;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        let holidays: Vec<Holiday> =
            serde_json::from_str(&row.holidays).context("bad holiday list in schedule")?;
        Ok(MarketSchedule {
            open_time: NaiveTime::parse_from_str(&row.open_time, "%H:%M:%S")
                .context("bad open_time in schedule")?,
            close_time: NaiveTime::parse_from_str(&row.close_time, "%H:%M:%S")
                .context("bad close_time in schedule")?,
            timezone: row.timezone,
            trading_days: weekdays_from_csv(&row.trading_days)?,
            holidays,
            manual_override: row.manual_override,
            override_message: row.override_message,
        })
    }
}

impl Database {
    /// Open a connection pool and bring the schema up to date.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// In-memory database on a single pooled connection. A larger pool
    /// would give every connection its own empty `:memory:` database.
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                balance TEXT NOT NULL DEFAULT '0',
                total_deposited TEXT NOT NULL DEFAULT '0',
                total_withdrawn TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instruments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                price TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                instrument_id INTEGER NOT NULL REFERENCES instruments(id),
                quantity TEXT NOT NULL,
                avg_cost TEXT NOT NULL,
                total_invested TEXT NOT NULL,
                last_updated TEXT NOT NULL,
                UNIQUE(account_id, instrument_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                instrument_id INTEGER NOT NULL REFERENCES instruments(id),
                side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                cash_after TEXT NOT NULL,
                realized_pl TEXT NOT NULL DEFAULT '0',
                executed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instrument_id INTEGER NOT NULL REFERENCES instruments(id),
                price TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code INTEGER NOT NULL,
                detail TEXT NOT NULL,
                account_id INTEGER,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_schedule (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                open_time TEXT NOT NULL,
                close_time TEXT NOT NULL,
                timezone TEXT NOT NULL,
                trading_days TEXT NOT NULL,
                holidays TEXT NOT NULL DEFAULT '[]',
                manual_override INTEGER NOT NULL DEFAULT 0,
                override_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generator_settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                enabled INTEGER NOT NULL DEFAULT 1,
                interval_secs INTEGER NOT NULL DEFAULT 5,
                volatility REAL NOT NULL DEFAULT 0.01,
                drift REAL NOT NULL DEFAULT 0,
                exaggeration REAL NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_price_history_instrument ON price_history(instrument_id, recorded_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_time ON audit_log(recorded_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_account ON trades(account_id)")
            .execute(&self.pool)
            .await?;

        self.seed_singletons().await
    }

    /// Insert default schedule and generator settings if missing.
    async fn seed_singletons(&self) -> Result<()> {
        let schedule = MarketSchedule::default();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO market_schedule
                (id, open_time, close_time, timezone, trading_days, holidays, manual_override, override_message)
            VALUES (1, ?, ?, ?, ?, '[]', 0, NULL)
            "#,
        )
        .bind(schedule.open_time.format("%H:%M:%S").to_string())
        .bind(schedule.close_time.format("%H:%M:%S").to_string())
        .bind(&schedule.timezone)
        .bind(weekdays_to_csv(&schedule.trading_days))
        .execute(&self.pool)
        .await?;

        let settings = GeneratorSettings::default();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO generator_settings
                (id, enabled, interval_secs, volatility, drift, exaggeration)
            VALUES (1, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(settings.enabled)
        .bind(settings.interval_secs as i64)
        .bind(settings.volatility)
        .bind(settings.drift)
        .bind(settings.exaggeration)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Accounts ====================

    /// Register a new account with a zero balance.
    pub async fn create_account(&self, username: &str, email: &str) -> Result<Account> {
        let row: AccountRow = sqlx::query_as(
            r#"
            INSERT INTO accounts (username, email, balance, total_deposited, total_withdrawn, created_at)
            VALUES (?, ?, '0', '0', '0', ?)
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .context("Failed to create account (username/email must be unique)")?;

        row.try_into()
    }

    pub async fn account(&self, id: i64) -> Result<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    // ==================== Instruments ====================

    pub async fn create_instrument(
        &self,
        symbol: &str,
        name: &str,
        price: Decimal,
    ) -> Result<Instrument> {
        let row: InstrumentRow = sqlx::query_as(
            "INSERT INTO instruments (symbol, name, price) VALUES (?, ?, ?) RETURNING *",
        )
        .bind(symbol)
        .bind(name)
        .bind(price.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to create instrument (symbol must be unique)")?;

        row.try_into()
    }

    pub async fn instrument_by_symbol(&self, symbol: &str) -> Result<Option<Instrument>> {
        let row: Option<InstrumentRow> =
            sqlx::query_as("SELECT * FROM instruments WHERE symbol = ?")
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Instrument::try_from).transpose()
    }

    /// All instruments with their current quotes, for price display.
    pub async fn instruments(&self) -> Result<Vec<Instrument>> {
        let rows: Vec<InstrumentRow> = sqlx::query_as("SELECT * FROM instruments ORDER BY symbol")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch instruments")?;
        rows.into_iter().map(Instrument::try_from).collect()
    }

    // ==================== Positions & history ====================

    /// Open positions for an account, for portfolio display.
    pub async fn positions_for_account(&self, account_id: i64) -> Result<Vec<Position>> {
        let rows: Vec<PositionRow> =
            sqlx::query_as("SELECT * FROM positions WHERE account_id = ?")
                .bind(account_id)
                .fetch_all(&self.pool)
                .await
                .context("Failed to fetch positions")?;
        rows.into_iter().map(Position::try_from).collect()
    }

    /// Trade history for an account, newest first.
    pub async fn trades_for_account(&self, account_id: i64, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows: Vec<TradeRow> = sqlx::query_as(
            "SELECT * FROM trades WHERE account_id = ? ORDER BY executed_at DESC, id DESC LIMIT ?",
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")?;
        rows.into_iter().map(TradeRecord::try_from).collect()
    }

    /// Time-ordered price samples for one instrument, newest first.
    pub async fn price_history(&self, instrument_id: i64, limit: i64) -> Result<Vec<PriceSample>> {
        let rows: Vec<PriceSampleRow> = sqlx::query_as(
            r#"
            SELECT instrument_id, price, recorded_at FROM price_history
            WHERE instrument_id = ? ORDER BY recorded_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(instrument_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch price history")?;
        rows.into_iter().map(PriceSample::try_from).collect()
    }

    // ==================== Schedule & settings ====================

    pub async fn market_schedule(&self) -> Result<MarketSchedule> {
        let row: ScheduleRow = sqlx::query_as("SELECT * FROM market_schedule WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Market schedule not initialized")?;
        row.try_into()
    }

    pub async fn save_market_schedule(&self, schedule: &MarketSchedule) -> Result<()> {
        let holidays = serde_json::to_string(&schedule.holidays)?;
        sqlx::query(
            r#"
            UPDATE market_schedule SET
                open_time = ?, close_time = ?, timezone = ?, trading_days = ?,
                holidays = ?, manual_override = ?, override_message = ?
            WHERE id = 1
            "#,
        )
        .bind(schedule.open_time.format("%H:%M:%S").to_string())
        .bind(schedule.close_time.format("%H:%M:%S").to_string())
        .bind(&schedule.timezone)
        .bind(weekdays_to_csv(&schedule.trading_days))
        .bind(holidays)
        .bind(schedule.manual_override)
        .bind(&schedule.override_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn generator_settings(&self) -> Result<GeneratorSettings> {
        let row: SettingsRow = sqlx::query_as("SELECT * FROM generator_settings WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Generator settings not initialized")?;
        Ok(GeneratorSettings {
            enabled: row.enabled,
            interval_secs: row.interval_secs.max(1) as u64,
            volatility: row.volatility,
            drift: row.drift,
            exaggeration: row.exaggeration,
        })
    }

    pub async fn save_generator_settings(&self, settings: &GeneratorSettings) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE generator_settings SET
                enabled = ?, interval_secs = ?, volatility = ?, drift = ?, exaggeration = ?
            WHERE id = 1
            "#,
        )
        .bind(settings.enabled)
        .bind(settings.interval_secs as i64)
        .bind(settings.volatility)
        .bind(settings.drift)
        .bind(settings.exaggeration)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The connection pool (for transactional callers and the audit log).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ==================== Transactional row access ====================
//
// These run against a caller-owned transaction so that a whole ledger
// operation commits or rolls back as one unit.

pub async fn get_account(conn: &mut SqliteConnection, id: i64) -> Result<Option<Account>> {
    let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Account::try_from).transpose()
}

pub async fn update_account_cash(conn: &mut SqliteConnection, account: &Account) -> Result<()> {
    sqlx::query(
        "UPDATE accounts SET balance = ?, total_deposited = ?, total_withdrawn = ? WHERE id = ?",
    )
    .bind(account.balance.to_string())
    .bind(account.total_deposited.to_string())
    .bind(account.total_withdrawn.to_string())
    .bind(account.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_instrument_by_symbol(
    conn: &mut SqliteConnection,
    symbol: &str,
) -> Result<Option<Instrument>> {
    let row: Option<InstrumentRow> = sqlx::query_as("SELECT * FROM instruments WHERE symbol = ?")
        .bind(symbol)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(Instrument::try_from).transpose()
}

pub async fn get_position(
    conn: &mut SqliteConnection,
    account_id: i64,
    instrument_id: i64,
) -> Result<Option<Position>> {
    let row: Option<PositionRow> =
        sqlx::query_as("SELECT * FROM positions WHERE account_id = ? AND instrument_id = ?")
            .bind(account_id)
            .bind(instrument_id)
            .fetch_optional(&mut *conn)
            .await?;
    row.map(Position::try_from).transpose()
}

pub async fn upsert_position(conn: &mut SqliteConnection, position: &Position) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO positions (account_id, instrument_id, quantity, avg_cost, total_invested, last_updated)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(account_id, instrument_id) DO UPDATE SET
            quantity = excluded.quantity,
            avg_cost = excluded.avg_cost,
            total_invested = excluded.total_invested,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(position.account_id)
    .bind(position.instrument_id)
    .bind(position.quantity.to_string())
    .bind(position.avg_cost.to_string())
    .bind(position.total_invested.to_string())
    .bind(position.last_updated)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Positions at quantity zero are removed entirely.
pub async fn delete_position(
    conn: &mut SqliteConnection,
    account_id: i64,
    instrument_id: i64,
) -> Result<()> {
    sqlx::query("DELETE FROM positions WHERE account_id = ? AND instrument_id = ?")
        .bind(account_id)
        .bind(instrument_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_trade(
    conn: &mut SqliteConnection,
    account_id: i64,
    instrument_id: i64,
    side: TradeSide,
    quantity: Decimal,
    price: Decimal,
    cash_after: Decimal,
    realized_pl: Decimal,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO trades (account_id, instrument_id, side, quantity, price, cash_after, realized_pl, executed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(account_id)
    .bind(instrument_id)
    .bind(side.as_str())
    .bind(quantity.to_string())
    .bind(price.to_string())
    .bind(cash_after.to_string())
    .bind(realized_pl.to_string())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn update_instrument_price(
    conn: &mut SqliteConnection,
    instrument_id: i64,
    price: Decimal,
) -> Result<()> {
    sqlx::query("UPDATE instruments SET price = ? WHERE id = ?")
        .bind(price.to_string())
        .bind(instrument_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn insert_price_sample(
    conn: &mut SqliteConnection,
    instrument_id: i64,
    price: Decimal,
    recorded_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO price_history (instrument_id, price, recorded_at) VALUES (?, ?, ?)")
        .bind(instrument_id)
        .bind(price.to_string())
        .bind(recorded_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
