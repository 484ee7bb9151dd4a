//! Billing module for plan tiers and monthly credit accounting
//!
//! This module provides:
//! 1. The plan tier enumeration and the single authoritative quota table
//! 2. Per-principal, per-calendar-month ledger entries
//! 3. The `CreditLedger` component, which owns all reads and writes of
//!    those entries through the injected store client

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::datastore::Datastore;
use crate::error::StateError;

/// Plan tier levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Free tier with limited monthly credits
    Free,
    /// Paid tier with higher limits
    Paid,
    /// Enterprise tier for the largest workloads
    Enterprise,
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl PlanTier {
    /// Monthly credit quota for the tier.
    ///
    /// This is the only place the quota table lives; every caller that needs
    /// a quota goes through here.
    pub fn quota(&self) -> u64 {
        match self {
            Self::Free => 1_000,
            Self::Paid => 25_000,
            Self::Enterprise => 100_000,
        }
    }
}

/// Consumption counter and quota for one principal in one billing period.
///
/// One row exists per (principal, calendar-month start) pair. Rows are
/// created lazily on first access in a period and are never deleted;
/// historical periods stay around for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Principal the row belongs to
    pub principal_id: String,

    /// First day of the billing month, UTC
    pub period_start: NaiveDate,

    /// Plan tier the principal was on when the row was created
    pub plan: PlanTier,

    /// Credit quota for the period
    pub total_credits: u64,

    /// Credits consumed so far; monotonically non-decreasing within a period
    pub used_credits: u64,
}

impl LedgerEntry {
    pub fn new(
        principal_id: String,
        period_start: NaiveDate,
        plan: PlanTier,
        total_credits: u64,
    ) -> Self {
        Self {
            principal_id,
            period_start,
            plan,
            total_credits,
            used_credits: 0,
        }
    }

    /// Credits left in the period, saturating at zero
    pub fn remaining(&self) -> u64 {
        self.total_credits.saturating_sub(self.used_credits)
    }

    /// Whether consumption has passed the quota. The ledger only counts;
    /// enforcement happens elsewhere.
    pub fn over_quota(&self) -> bool {
        self.used_credits > self.total_credits
    }
}

/// First calendar day of `now`'s month, UTC, no time component.
///
/// The sole definition of "current billing period". Both the usage recorder
/// and every read path key ledger rows off this computation.
pub fn current_period_start(now: DateTime<Utc>) -> NaiveDate {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .expect("the first of a valid month is a valid date")
}

/// Per-principal, per-billing-period usage counters.
///
/// All writes go through the store's atomic primitives: row creation is an
/// insert-or-fetch upsert and consumption is an atomic add, so concurrent
/// first-accesses and concurrent usage events cannot duplicate rows or lose
/// increments.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Datastore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Return the ledger row for the given period, creating it with the
    /// principal's current plan quota if absent. Safe under concurrent first
    /// access: when two callers race, both get the winning row back.
    pub async fn get_or_create(
        &self,
        principal_id: &str,
        period_start: NaiveDate,
    ) -> Result<LedgerEntry, StateError> {
        let principal = self
            .store
            .principal_by_id(principal_id)
            .await?
            .ok_or(StateError::PrincipalNotFound)?;

        let entry = LedgerEntry::new(
            principal_id.to_string(),
            period_start,
            principal.plan,
            principal.plan.quota(),
        );
        Ok(self.store.upsert_ledger_entry(entry).await?)
    }

    /// Atomically add `amount` to the consumed counter for the period,
    /// creating the row first if this is the principal's first recorded
    /// usage in it.
    pub async fn increment(
        &self,
        principal_id: &str,
        period_start: NaiveDate,
        amount: u64,
    ) -> Result<LedgerEntry, StateError> {
        self.get_or_create(principal_id, period_start).await?;
        Ok(self
            .store
            .add_consumed(principal_id, period_start, amount)
            .await?)
    }

    /// Dashboard read path: the row for the current period, created lazily
    /// on the principal's first observed access in it.
    pub async fn current_entry(
        &self,
        principal_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StateError> {
        self.get_or_create(principal_id, current_period_start(now))
            .await
    }

    /// All ledger rows for a principal, most recent period first
    pub async fn history(&self, principal_id: &str) -> Result<Vec<LedgerEntry>, StateError> {
        Ok(self.store.ledger_entries(principal_id).await?)
    }
}
