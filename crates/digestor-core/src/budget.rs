//! Budget Engine (§4.2) — decides whether paid provider calls are allowed
//! for a run and emits a warning level, from `provider_calls` minus
//! `budget_resets` sums.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::model::BudgetPeriod;
use crate::storage::Storage;

/// Severity band for a budget status, driven off the closer of the two
/// (monthly, daily) limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    None,
    Approaching,
    Critical,
}

/// Result of [`BudgetEngine::compute_credits_status`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsStatus {
    pub monthly_used: f64,
    pub monthly_limit: f64,
    pub monthly_remaining: f64,
    pub daily_used: f64,
    pub daily_limit: Option<f64>,
    pub daily_remaining: Option<f64>,
    pub paid_calls_allowed: bool,
    pub warning_level: WarningLevel,
}

/// The budget gate consulted by Ingest (paid connectors) and by the
/// Pipeline Runner (triage/enrich/digest policy).
#[async_trait::async_trait]
pub trait BudgetEngine: Send + Sync {
    async fn compute_credits_status(
        &self,
        user_id: &str,
        monthly_credits: f64,
        daily_throttle_credits: Option<f64>,
        reference_instant: DateTime<Utc>,
    ) -> StorageResult<CreditsStatus>;
}

/// `BudgetEngine` backed directly by the storage gateway's `provider_calls`
/// / `budget_resets` tables.
pub struct SqliteBudgetEngine<'a> {
    storage: &'a Storage,
}

impl<'a> SqliteBudgetEngine<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }
}

fn month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0).unwrap()
}

fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap()
}

fn warning_level(used: f64, limit: f64, daily_used: Option<f64>, daily_limit: Option<f64>) -> WarningLevel {
    let monthly_ratio = if limit > 0.0 { used / limit } else { 1.0 };
    let daily_ratio = match (daily_used, daily_limit) {
        (Some(u), Some(l)) if l > 0.0 => u / l,
        _ => 0.0,
    };
    let worst = monthly_ratio.max(daily_ratio);
    if worst >= 0.95 {
        WarningLevel::Critical
    } else if worst >= 0.80 {
        WarningLevel::Approaching
    } else {
        WarningLevel::None
    }
}

#[async_trait::async_trait]
impl<'a> BudgetEngine for SqliteBudgetEngine<'a> {
    async fn compute_credits_status(
        &self,
        user_id: &str,
        monthly_credits: f64,
        daily_throttle_credits: Option<f64>,
        reference_instant: DateTime<Utc>,
    ) -> StorageResult<CreditsStatus> {
        let month_start_at = month_start(reference_instant);
        let day_start_at = day_start(reference_instant);

        let monthly_calls = self.storage.sum_provider_call_credits(user_id, month_start_at)?;
        let monthly_resets = self
            .storage
            .sum_budget_resets(user_id, BudgetPeriod::Monthly, month_start_at)?;
        let monthly_used = (monthly_calls - monthly_resets).max(0.0);
        let monthly_remaining = monthly_credits - monthly_used;

        let daily_calls = self.storage.sum_provider_call_credits(user_id, day_start_at)?;
        let daily_resets = self
            .storage
            .sum_budget_resets(user_id, BudgetPeriod::Daily, day_start_at)?;
        let daily_used = (daily_calls - daily_resets).max(0.0);
        let daily_remaining = daily_throttle_credits.map(|limit| limit - daily_used);

        let paid_calls_allowed =
            monthly_remaining > 0.0 && daily_remaining.map(|r| r > 0.0).unwrap_or(true);

        let warning_level = warning_level(monthly_used, monthly_credits, Some(daily_used), daily_throttle_credits);

        Ok(CreditsStatus {
            monthly_used,
            monthly_limit: monthly_credits,
            monthly_remaining,
            daily_used,
            daily_limit: daily_throttle_credits,
            daily_remaining,
            paid_calls_allowed,
            warning_level,
        })
    }
}
