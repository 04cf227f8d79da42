//! Synthetic price-feed generator.
//!
//! One background task perturbs every instrument's price on a timer using a
//! log-normal random walk and appends to price history. Settings are reread
//! on every tick so administrative changes apply live. The loop runs for
//! the life of the process: tick failures are logged and followed by a
//! cooldown, never propagated.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::db::{self, Database};
use crate::models::{GeneratorSettings, Instrument};
use crate::retry::{is_busy, RetryPolicy};

/// Pause after an unexpected tick failure before trying again.
const COOLDOWN: Duration = Duration::from_secs(5);

/// Recurring price-perturbation worker.
pub struct PriceFeed {
    db: Arc<Database>,
    retry: RetryPolicy,
}

/// One tick's new quote: `old * exp((noise + drift) * exaggeration)`,
/// clamped to the minimum price and rounded to cents.
fn next_price(old: Decimal, noise: f64, settings: &GeneratorSettings) -> Decimal {
    let old_f = old.to_f64().unwrap_or(0.0);
    let log_return = (noise + settings.drift) * settings.exaggeration;
    let raw = old_f * log_return.exp();

    match Decimal::from_f64(raw) {
        Some(d) => Instrument::normalize_price(d),
        // Overflow or NaN from a pathological walk: hold the old quote.
        None => old,
    }
}

impl PriceFeed {
    pub fn new(db: Arc<Database>, retry: RetryPolicy) -> Self {
        Self { db, retry }
    }

    /// Run forever. An operational shutdown simply stops scheduling ticks
    /// by dropping the task.
    pub async fn run(self) {
        info!("price feed started");
        loop {
            let wait = match self.tick_once().await {
                Ok(interval) => interval,
                Err(e) => {
                    error!(error = %e, "price feed tick failed, cooling down");
                    COOLDOWN
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// One generator tick. Returns the delay until the next tick, taken
    /// from freshly-read settings.
    pub async fn tick_once(&self) -> Result<Duration> {
        let settings = self
            .db
            .generator_settings()
            .await
            .context("reading generator settings")?;
        let interval = Duration::from_secs(settings.interval_secs);

        if !settings.enabled {
            debug!("price feed disabled, skipping tick");
            return Ok(interval);
        }

        let noise_dist = Normal::new(0.0, settings.volatility.max(0.0))
            .context("invalid volatility for noise distribution")?;

        let instruments = self.db.instruments().await.context("listing instruments")?;
        for instrument in instruments {
            let noise = noise_dist.sample(&mut rand::thread_rng());
            let price = next_price(instrument.price, noise, &settings);

            // Per-instrument writes are independent; one failure must not
            // block the rest of the tick.
            if let Err(e) = self.persist_price(instrument.id, price).await {
                warn!(
                    symbol = %instrument.symbol,
                    error = %e,
                    "price update failed, skipping instrument"
                );
            } else {
                debug!(symbol = %instrument.symbol, old = %instrument.price, new = %price, "tick");
            }
        }

        Ok(interval)
    }

    /// Write the new quote and its history sample atomically, with bounded
    /// retry on lock contention.
    async fn persist_price(&self, instrument_id: i64, price: Decimal) -> Result<()> {
        self.retry
            .run(is_busy, || async {
                let mut tx = self.db.pool().begin().await?;
                db::update_instrument_price(&mut tx, instrument_id, price).await?;
                db::insert_price_sample(&mut tx, instrument_id, price, Utc::now()).await?;
                tx.commit().await?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings(volatility: f64, drift: f64, exaggeration: f64) -> GeneratorSettings {
        GeneratorSettings {
            enabled: true,
            interval_secs: 5,
            volatility,
            drift,
            exaggeration,
        }
    }

    #[test]
    fn test_zero_noise_zero_drift_holds_price() {
        let s = settings(0.01, 0.0, 1.0);
        assert_eq!(next_price(dec!(50.00), 0.0, &s), dec!(50.00));
    }

    #[test]
    fn test_drift_moves_price() {
        let s = settings(0.0, 0.1, 1.0);
        let new = next_price(dec!(100.00), 0.0, &s);
        // 100 * e^0.1 = 110.52 to cents
        assert_eq!(new, dec!(110.52));
    }

    #[test]
    fn test_exaggeration_scales_return() {
        let s = settings(0.0, 0.1, 2.0);
        let new = next_price(dec!(100.00), 0.0, &s);
        // 100 * e^0.2 = 122.14 to cents
        assert_eq!(new, dec!(122.14));
    }

    #[test]
    fn test_price_never_drops_below_floor() {
        let s = settings(0.0, 0.0, 1.0);
        let new = next_price(dec!(0.01), -20.0, &s);
        assert_eq!(new, dec!(0.01));
    }

    async fn feed_fixture() -> (Arc<Database>, PriceFeed) {
        let db = Arc::new(Database::new_in_memory().await.unwrap());
        db.create_instrument("ACME", "Acme Corp", dec!(50.00))
            .await
            .unwrap();
        let feed = PriceFeed::new(db.clone(), RetryPolicy::default());
        (db, feed)
    }

    #[tokio::test]
    async fn test_disabled_tick_writes_nothing() {
        let (db, feed) = feed_fixture().await;

        let mut s = db.generator_settings().await.unwrap();
        s.enabled = false;
        db.save_generator_settings(&s).await.unwrap();

        let interval = feed.tick_once().await.unwrap();
        assert_eq!(interval, Duration::from_secs(s.interval_secs));

        let inst = db.instrument_by_symbol("ACME").await.unwrap().unwrap();
        assert_eq!(inst.price, dec!(50.00));
        assert!(db.price_history(inst.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_enabled_tick_appends_one_sample_per_instrument() {
        let (db, feed) = feed_fixture().await;
        db.create_instrument("GLOBEX", "Globex Corp", dec!(20.00))
            .await
            .unwrap();

        feed.tick_once().await.unwrap();
        feed.tick_once().await.unwrap();

        for symbol in ["ACME", "GLOBEX"] {
            let inst = db.instrument_by_symbol(symbol).await.unwrap().unwrap();
            assert!(inst.price >= dec!(0.01));

            let history = db.price_history(inst.id, 10).await.unwrap();
            assert_eq!(history.len(), 2);
            // Sample matches the persisted quote.
            assert_eq!(history[0].price, inst.price);
        }
    }

    #[tokio::test]
    async fn test_zero_drift_expected_price_stays_near_start() {
        let (db, feed) = feed_fixture().await;

        let mut s = db.generator_settings().await.unwrap();
        s.volatility = 0.001;
        s.drift = 0.0;
        db.save_generator_settings(&s).await.unwrap();

        for _ in 0..50 {
            feed.tick_once().await.unwrap();
        }

        let inst = db.instrument_by_symbol("ACME").await.unwrap().unwrap();
        // 50 ticks of sigma=0.1% noise: roughly ±0.7% drift expected,
        // leave generous room for sampling noise.
        assert!(inst.price > dec!(45) && inst.price < dec!(55), "price was {}", inst.price);
    }
}
