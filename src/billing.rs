use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::resource::BillableResource;
use crate::core::running_time::RunningTimeCalculator;
use crate::errors::BillingResult;

pub mod expenses;
pub mod portfolio;

pub use expenses::{summarize_monthly, MonthlyExpense};
pub use portfolio::{summarize_portfolio, KindTotals, PortfolioSummary};

pub const DEFAULT_DAYS_BASIS: u32 = 30;

/// Everything the presentation layer needs to render a resource's costs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingCalculation {
    pub resource_id: String,
    pub current_period_hours: Decimal,
    pub current_period_cost: Decimal,
    pub projected_period_hours: Decimal,
    pub projected_period_cost: Decimal,
    pub lifetime_hours: Decimal,
    pub lifetime_cost: Decimal,
}

/// How the active billing period is located and prorated.
///
/// The period is the UTC calendar month containing `now`. When the resource
/// was last started before the period began (or has no start marker), the
/// period's hours are *estimated* as
/// `estimated_monthly_hours * day_of_month / days_basis`. This is a rough
/// stand-in for aggregating the usage log and is not exact accounting: it
/// ignores the actual runs recorded this month and can exceed the estimate
/// on the 31st.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPolicy {
    pub days_basis: u32,
}

impl Default for PeriodPolicy {
    fn default() -> Self {
        Self {
            days_basis: DEFAULT_DAYS_BASIS,
        }
    }
}

impl PeriodPolicy {
    pub fn new(days_basis: u32) -> Self {
        // A zero basis would divide by zero; fall back to the usual 30 days.
        Self {
            days_basis: if days_basis == 0 { DEFAULT_DAYS_BASIS } else { days_basis },
        }
    }

    /// First instant of the UTC month containing `now`.
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .unwrap_or(now)
    }

    /// Linear share of the monthly estimate attributed to the days elapsed so far.
    pub fn prorated_hours(&self, estimated_monthly_hours: Decimal, now: DateTime<Utc>) -> Decimal {
        estimated_monthly_hours * Decimal::from(now.day()) / Decimal::from(self.days_basis)
    }
}

/// Derives period and lifetime costs from a resource snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct CostAccrualEngine {
    policy: PeriodPolicy,
}

impl CostAccrualEngine {
    pub fn new(policy: PeriodPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PeriodPolicy {
        self.policy
    }

    /// Pure function of `resource` and `now`; the only failure is a clock skew
    /// reported by the running-time calculator.
    pub fn calculate(&self, resource: &BillableResource, now: DateTime<Utc>) -> BillingResult<BillingCalculation> {
        let elapsed = RunningTimeCalculator::elapsed_hours(resource, now)?;
        let lifetime_hours = resource.total_running_hours + elapsed;
        let current_period_hours = self.current_period_hours(resource, now, elapsed);

        // Sub-resources accrue alongside the parent for period figures only.
        let combined_rate = resource.hourly_rate + resource.sub_resource_rate();

        Ok(BillingCalculation {
            resource_id: resource.id.clone(),
            current_period_hours,
            current_period_cost: combined_rate * current_period_hours,
            projected_period_hours: resource.estimated_monthly_hours,
            projected_period_cost: combined_rate * resource.estimated_monthly_hours,
            lifetime_hours,
            lifetime_cost: resource.hourly_rate * lifetime_hours,
        })
    }

    fn current_period_hours(&self, resource: &BillableResource, now: DateTime<Utc>, elapsed: Decimal) -> Decimal {
        match resource.last_start_time {
            Some(started_at) if started_at >= self.policy.period_start(now) => elapsed,
            _ => self
                .policy
                .prorated_hours(resource.estimated_monthly_hours, now),
        }
    }
}

/// Parent-only monthly estimate, ignoring sub-resources.
pub fn estimate_monthly_cost(resource: &BillableResource) -> Decimal {
    resource.hourly_rate * resource.estimated_monthly_hours
}

/// Cost of the hours already folded into the running total.
pub fn recorded_lifetime_cost(resource: &BillableResource) -> Decimal {
    resource.hourly_rate * resource.total_running_hours
}
