use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::billing::CostAccrualEngine;
use crate::core::resource::{BillableResource, ServiceKind, ServiceStatus};
use crate::errors::BillingResult;

/// Totals across every tracked service at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_services: usize,
    pub active_services: usize,
    pub running_services: usize,
    pub expired_services: usize,
    /// Sum of current-period costs over active services.
    pub current_period_cost: Decimal,
    /// Sum of projected-period costs over active services.
    pub projected_period_cost: Decimal,
    /// Twelve times the active current-period cost.
    pub annual_estimate: Decimal,
    pub by_kind: Vec<KindTotals>,
}

/// Current-period cost of every service of one kind, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindTotals {
    pub kind: ServiceKind,
    pub count: usize,
    pub current_period_cost: Decimal,
}

/// Folds per-service calculations into fleet totals.
///
/// Money totals only count `active` services; the per-kind breakdown counts
/// all of them. A clock skew on any service fails the whole summary.
pub fn summarize_portfolio(
    engine: &CostAccrualEngine,
    resources: &[BillableResource],
    now: DateTime<Utc>,
) -> BillingResult<PortfolioSummary> {
    let mut summary = PortfolioSummary {
        total_services: resources.len(),
        active_services: 0,
        running_services: 0,
        expired_services: 0,
        current_period_cost: Decimal::ZERO,
        projected_period_cost: Decimal::ZERO,
        annual_estimate: Decimal::ZERO,
        by_kind: Vec::new(),
    };
    let mut kinds: BTreeMap<ServiceKind, (usize, Decimal)> = BTreeMap::new();

    for resource in resources {
        let calc = engine.calculate(resource, now)?;

        if resource.is_running {
            summary.running_services += 1;
        }
        match resource.status {
            ServiceStatus::Active => {
                summary.active_services += 1;
                summary.current_period_cost += calc.current_period_cost;
                summary.projected_period_cost += calc.projected_period_cost;
            }
            ServiceStatus::Expired => summary.expired_services += 1,
            ServiceStatus::Inactive | ServiceStatus::Pending => {}
        }

        let entry = kinds.entry(resource.kind).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 += calc.current_period_cost;
    }

    summary.annual_estimate = summary.current_period_cost * Decimal::from(12);
    summary.by_kind = kinds
        .into_iter()
        .map(|(kind, (count, current_period_cost))| KindTotals {
            kind,
            count,
            current_period_cost,
        })
        .collect();

    Ok(summary)
}
