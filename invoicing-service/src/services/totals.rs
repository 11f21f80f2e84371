//! Invoice totals: subtotal, PPN and grand total.
//!
//! All arithmetic is exact decimal. The only rounding happens on the PPN
//! amount, which is rounded to whole rupiah with half-away-from-zero
//! (half-up for the non-negative amounts this module receives).
//!
//! The calculator does not validate. Callers reject negative nominals and
//! quantities below one before calling; given such input the result is
//! arithmetically correct but meaningless as an invoice.

use crate::models::{InvoiceItem, NewInvoiceItem};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places kept on the PPN amount (whole rupiah).
pub const PPN_SCALE: u32 = 0;

/// Derived amounts of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub ppn_amount: Decimal,
    pub total: Decimal,
}

impl InvoiceTotals {
    pub const ZERO: InvoiceTotals = InvoiceTotals {
        subtotal: Decimal::ZERO,
        ppn_amount: Decimal::ZERO,
        total: Decimal::ZERO,
    };
}

/// Anything with a unit price and a quantity.
pub trait Billable {
    fn nominal(&self) -> Decimal;
    fn quantity(&self) -> i32;

    fn line_amount(&self) -> Decimal {
        self.nominal() * Decimal::from(self.quantity())
    }
}

impl Billable for InvoiceItem {
    fn nominal(&self) -> Decimal {
        self.nominal
    }

    fn quantity(&self) -> i32 {
        self.quantity
    }
}

impl Billable for NewInvoiceItem {
    fn nominal(&self) -> Decimal {
        self.nominal
    }

    fn quantity(&self) -> i32 {
        self.quantity
    }
}

impl<T: Billable + ?Sized> Billable for &T {
    fn nominal(&self) -> Decimal {
        (**self).nominal()
    }

    fn quantity(&self) -> i32 {
        (**self).quantity()
    }
}

/// PPN on `subtotal`, or zero when PPN is off.
pub fn ppn_amount(subtotal: Decimal, use_ppn: bool, ppn_percentage: Decimal) -> Decimal {
    if !use_ppn {
        return Decimal::ZERO;
    }
    (subtotal * ppn_percentage / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(PPN_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute subtotal, PPN and total for a list of items.
pub fn compute_totals<I>(items: I, use_ppn: bool, ppn_percentage: Decimal) -> InvoiceTotals
where
    I: IntoIterator,
    I::Item: Billable,
{
    let subtotal: Decimal = items.into_iter().map(|item| item.line_amount()).sum();
    let ppn_amount = ppn_amount(subtotal, use_ppn, ppn_percentage);

    InvoiceTotals {
        subtotal,
        ppn_amount,
        total: subtotal + ppn_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn items(lines: &[(Decimal, i32)]) -> Vec<NewInvoiceItem> {
        lines
            .iter()
            .map(|(nominal, quantity)| NewInvoiceItem::new("item", *nominal).with_quantity(*quantity))
            .collect()
    }

    #[test]
    fn test_subtotal_is_sum_of_lines() {
        let totals = compute_totals(
            &items(&[(dec!(100000), 2), (dec!(50000), 1)]),
            false,
            dec!(11),
        );
        assert_eq!(totals.subtotal, dec!(250000));
    }

    #[test]
    fn test_ppn_eleven_percent() {
        let totals = compute_totals(
            &items(&[(dec!(100000), 2), (dec!(50000), 1)]),
            true,
            dec!(11),
        );
        assert_eq!(totals.ppn_amount, dec!(27500));
        assert_eq!(totals.total, dec!(277500));
    }

    #[test]
    fn test_ppn_off_ignores_percentage() {
        let lines = items(&[(dec!(12345), 3)]);
        for pct in [dec!(0), dec!(11), dec!(12.5), dec!(100)] {
            let totals = compute_totals(&lines, false, pct);
            assert_eq!(totals.ppn_amount, Decimal::ZERO);
            assert_eq!(totals.total, totals.subtotal);
        }
    }

    #[test]
    fn test_empty_items_are_zero() {
        let totals = compute_totals(Vec::<NewInvoiceItem>::new(), true, dec!(11));
        assert_eq!(totals, InvoiceTotals::ZERO);
    }

    #[test]
    fn test_half_rounds_up() {
        // 1050 * 11% = 115.5
        let totals = compute_totals(&items(&[(dec!(1050), 1)]), true, dec!(11));
        assert_eq!(totals.ppn_amount, dec!(116));
        assert_eq!(totals.total, dec!(1166));

        // 1040 * 11% = 114.4
        let totals = compute_totals(&items(&[(dec!(1040), 1)]), true, dec!(11));
        assert_eq!(totals.ppn_amount, dec!(114));
    }

    #[test]
    fn test_fractional_nominal_stays_exact() {
        // Binary floating point would drift here.
        let totals = compute_totals(&items(&[(dec!(0.1), 3), (dec!(0.2), 1)]), false, dec!(0));
        assert_eq!(totals.subtotal, dec!(0.5));
    }

    #[test]
    fn test_fractional_percentage() {
        // 200000 * 12.5% = 25000
        let totals = compute_totals(&items(&[(dec!(200000), 1)]), true, dec!(12.5));
        assert_eq!(totals.ppn_amount, dec!(25000));
    }

    #[test]
    fn test_recomputation_is_idempotent() {
        let lines = items(&[(dec!(99999), 7), (dec!(1), 1)]);
        let first = compute_totals(&lines, true, dec!(11));
        let second = compute_totals(&lines, true, dec!(11));
        assert_eq!(first, second);
    }

    #[test]
    fn test_quantity_change_is_reflected() {
        let mut lines = items(&[(dec!(100000), 1)]);
        let before = compute_totals(&lines, true, dec!(11));
        lines[0].quantity = 3;
        let after = compute_totals(&lines, true, dec!(11));

        assert_eq!(before.total, dec!(111000));
        assert_eq!(after.subtotal, dec!(300000));
        assert_eq!(after.total, after.subtotal + after.ppn_amount);
        assert_eq!(after.total, dec!(333000));
    }
}
