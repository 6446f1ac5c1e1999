//! BDI (overhead and profit) rate calculation.
//!
//! Pure arithmetic over fixed-point decimals; invoked whenever a
//! markup configuration changes and the resulting flat rate is
//! broadcast onto every line item's snapshot price.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The nine markup/tax rates that enter the BDI formula, all expressed
/// as fractions (3% = 0.03).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BdiRates {
    pub administration: Decimal,
    pub insurance: Decimal,
    pub risk: Decimal,
    pub financial: Decimal,
    pub profit: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
    pub iss: Decimal,
    pub cprb: Decimal,
}

/// `((1 + AC + S + R) · (1 + DF) · (1 + L)) / (1 − I) − 1`, where `I`
/// sums the four tax rates. Returns zero when `I ≥ 1`, which would
/// make the denominator non-positive.
pub fn bdi_rate(rates: &BdiRates) -> Decimal {
    let one = Decimal::ONE;
    let taxes = rates.pis + rates.cofins + rates.iss + rates.cprb;

    if taxes >= one {
        return Decimal::ZERO;
    }

    let numerator = (one + rates.administration + rates.insurance + rates.risk)
        * (one + rates.financial)
        * (one + rates.profit);
    let denominator = one - taxes;

    numerator / denominator - one
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn matches_closed_form_to_four_decimals() {
        let rates = BdiRates {
            administration: dec("0.03"),
            insurance: dec("0.008"),
            risk: dec("0.0127"),
            financial: dec("0.0059"),
            profit: dec("0.074"),
            pis: dec("0.0065"),
            cofins: dec("0.03"),
            iss: dec("0.05"),
            cprb: dec("0.0455"),
        };
        // taxes = 0.132; ((1.0507 · 1.0059 · 1.074) / 0.868) − 1
        let rate = bdi_rate(&rates);
        assert_eq!(rate.round_dp(4), dec("0.3077"));
    }

    #[test]
    fn zero_rates_yield_zero() {
        assert_eq!(bdi_rate(&BdiRates::default()), Decimal::ZERO);
    }

    #[test]
    fn taxes_at_or_above_one_guard_the_denominator() {
        let rates = BdiRates {
            pis: dec("0.5"),
            cofins: dec("0.5"),
            ..Default::default()
        };
        assert_eq!(bdi_rate(&rates), Decimal::ZERO);

        let rates = BdiRates {
            pis: dec("0.7"),
            cofins: dec("0.7"),
            profit: dec("0.1"),
            ..Default::default()
        };
        assert_eq!(bdi_rate(&rates), Decimal::ZERO);
    }
}
