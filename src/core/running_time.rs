use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::resource::BillableResource;
use crate::errors::{BillingError, BillingResult};

const MILLIS_PER_HOUR: Decimal = dec!(3600000);

/// Computes how long the current run of a resource has lasted.
///
/// Stateless: the same value is used for live display and for the amount
/// folded into `total_running_hours` when the resource stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningTimeCalculator;

impl RunningTimeCalculator {
    /// Hours elapsed since the last start, from exact millisecond arithmetic.
    ///
    /// A stopped resource, or one without a start marker, contributes zero.
    /// A `now` earlier than the start marker is a `ClockSkew` error.
    pub fn elapsed_hours(resource: &BillableResource, now: DateTime<Utc>) -> BillingResult<Decimal> {
        let started_at = match (resource.is_running, resource.last_start_time) {
            (true, Some(started_at)) => started_at,
            _ => return Ok(Decimal::ZERO),
        };

        if now < started_at {
            return Err(BillingError::ClockSkew {
                resource_id: resource.id.clone(),
                started_at,
                now,
            });
        }

        let millis = (now - started_at).num_milliseconds();
        Ok(Decimal::from(millis) / MILLIS_PER_HOUR)
    }

    /// Parent-only cost of the run in progress.
    pub fn current_session_cost(resource: &BillableResource, now: DateTime<Utc>) -> BillingResult<Decimal> {
        Ok(resource.hourly_rate * Self::elapsed_hours(resource, now)?)
    }
}
