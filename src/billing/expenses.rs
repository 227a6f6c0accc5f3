use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::usage::{UsageAction, UsageEvent};

/// Usage of one resource over one calendar month, built from its stop events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyExpense {
    pub resource_id: String,
    pub year: i32,
    pub month: u32,
    pub total_hours: Decimal,
    pub total_cost: Decimal,
    pub runs: u32,
    pub days_active: u32,
    pub average_daily_hours: Decimal,
    pub peak_day: Option<NaiveDate>,
    pub peak_day_hours: Decimal,
}

/// Folds stop events into per-month totals, newest month first.
///
/// A run is attributed entirely to the UTC day its stop event was recorded on.
/// Start events carry no hours and are ignored.
pub fn summarize_monthly(resource_id: &str, events: &[UsageEvent]) -> Vec<MonthlyExpense> {
    let mut months: BTreeMap<(i32, u32), BTreeMap<NaiveDate, (Decimal, Decimal, u32)>> = BTreeMap::new();

    for event in events
        .iter()
        .filter(|e| e.resource_id == resource_id && e.action == UsageAction::Stop)
    {
        let day = event.timestamp.date_naive();
        let entry = months
            .entry((day.year(), day.month()))
            .or_default()
            .entry(day)
            .or_insert((Decimal::ZERO, Decimal::ZERO, 0));
        entry.0 += event.duration.unwrap_or_default();
        entry.1 += event.cost.unwrap_or_default();
        entry.2 += 1;
    }

    months
        .into_iter()
        .rev()
        .map(|((year, month), days)| {
            let total_hours: Decimal = days.values().map(|d| d.0).sum();
            let total_cost: Decimal = days.values().map(|d| d.1).sum();
            let runs = days.values().map(|d| d.2).sum();
            let days_active = days.len() as u32;

            // Earliest day wins a tie.
            let peak = days.iter().fold(None::<(NaiveDate, Decimal)>, |best, (day, d)| match best {
                Some((_, hours)) if hours >= d.0 => best,
                _ => Some((*day, d.0)),
            });

            MonthlyExpense {
                resource_id: resource_id.to_string(),
                year,
                month,
                total_hours,
                total_cost,
                runs,
                days_active,
                average_daily_hours: if days_active == 0 {
                    Decimal::ZERO
                } else {
                    total_hours / Decimal::from(days_active)
                },
                peak_day: peak.map(|(day, _)| day),
                peak_day_hours: peak.map(|(_, hours)| hours).unwrap_or_default(),
            }
        })
        .collect()
}
