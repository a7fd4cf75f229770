pub mod gateway;

/// Authoritative charge for a reservation, in minor currency units. The
/// client-supplied amount is never trusted; this is recomputed from the field's
/// hourly price at checkout time.
pub fn checkout_amount(price_per_hour: i64, duration_hours: i64) -> i64 {
    price_per_hour * duration_hours * 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_hours_at_100_per_hour_is_20000_minor_units() {
        assert_eq!(checkout_amount(100, 2), 20_000);
    }

    #[test]
    fn single_hour_minimum() {
        assert_eq!(checkout_amount(75, 1), 7_500);
    }
}
