//! Administrative mutations: market schedule and generator settings.
//!
//! Both are partial updates; every change is followed by an audit entry
//! describing the field diff.

use std::sync::Arc;

use anyhow::Result;

use crate::audit::{AuditLog, EventKind};
use crate::db::Database;
use crate::models::{GeneratorSettings, MarketSchedule, ScheduleUpdate, SettingsUpdate};

#[derive(Clone)]
pub struct Admin {
    db: Arc<Database>,
    audit: AuditLog,
}

impl Admin {
    pub fn new(db: Arc<Database>, audit: AuditLog) -> Self {
        Self { db, audit }
    }

    /// Apply a partial schedule update and audit the diff.
    pub async fn update_schedule(&self, update: ScheduleUpdate) -> Result<MarketSchedule> {
        let mut schedule = self.db.market_schedule().await?;
        let changes = update.apply(&mut schedule);

        if changes.is_empty() {
            return Ok(schedule);
        }

        self.db.save_market_schedule(&schedule).await?;
        self.audit
            .record(EventKind::ScheduleChanged, &changes.join("; "), None)
            .await;

        Ok(schedule)
    }

    /// Apply a partial generator-settings update and audit the diff.
    pub async fn set_generator_settings(
        &self,
        update: SettingsUpdate,
    ) -> Result<GeneratorSettings> {
        let mut settings = self.db.generator_settings().await?;
        let changes = update.apply(&mut settings);

        if changes.is_empty() {
            return Ok(settings);
        }

        self.db.save_generator_settings(&settings).await?;
        self.audit
            .record(EventKind::GeneratorChanged, &changes.join("; "), None)
            .await;

        Ok(settings)
    }
}
