use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// `$1,234.56`, keeping up to four decimals for sub-cent hourly rates.
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount
        .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    let negative = rounded < Decimal::ZERO;
    let text = rounded.abs().to_string();

    let (whole, frac) = match text.split_once('.') {
        Some((whole, frac)) => (whole.to_string(), frac.to_string()),
        None => (text, String::new()),
    };
    let frac = format!("{:0<2}", frac);

    format!(
        "{}${}.{}",
        if negative { "-" } else { "" },
        group_thousands(&whole),
        frac
    )
}

/// Fractional hours as `HH:MM:SS`, truncating partial seconds.
pub fn format_hours(hours: Decimal) -> String {
    let total_seconds = (hours * dec!(3600)).floor().to_i64().unwrap_or(0).max(0);
    let h = total_seconds / 3600;
    let m = (total_seconds % 3600) / 60;
    let s = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

/// Two decimals for tables.
pub fn format_decimal(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_keeps_two_to_four_decimals() {
        assert_eq!(format_currency(dec!(0.6)), "$0.60");
        assert_eq!(format_currency(dec!(12)), "$12.00");
        assert_eq!(format_currency(dec!(0.0137)), "$0.0137");
        assert_eq!(format_currency(dec!(0.012345)), "$0.0123");
        assert_eq!(format_currency(dec!(1234567.891)), "$1,234,567.891");
        assert_eq!(format_currency(dec!(-3.5)), "-$3.50");
    }

    #[test]
    fn hours_render_as_clock() {
        assert_eq!(format_hours(dec!(0)), "00:00:00");
        assert_eq!(format_hours(dec!(1.5)), "01:30:00");
        assert_eq!(format_hours(dec!(0.0002777)), "00:00:00");
        assert_eq!(format_hours(dec!(26.2525)), "26:15:09");
    }
}
