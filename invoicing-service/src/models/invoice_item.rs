//! Invoice item model for invoicing-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Line on an invoice. Items are owned by their invoice and deleted with it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InvoiceItem {
    pub item_id: Uuid,
    pub invoice_id: Uuid,
    pub title: String,
    pub nominal: Decimal,
    pub quantity: i32,
    pub sort_order: i32,
    pub created_utc: DateTime<Utc>,
}

/// Input for an invoice item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewInvoiceItem {
    #[validate(length(min = 1, max = 255, message = "Item title is required"))]
    pub title: String,
    /// Unit price in rupiah.
    #[validate(custom(function = "validate_nominal"))]
    pub nominal: Decimal,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

impl NewInvoiceItem {
    pub fn new(title: impl Into<String>, nominal: Decimal) -> Self {
        Self {
            title: title.into(),
            nominal,
            quantity: default_quantity(),
        }
    }

    pub fn with_quantity(mut self, quantity: i32) -> Self {
        self.quantity = quantity;
        self
    }
}

fn default_quantity() -> i32 {
    1
}

/// Decimal places `invoice_items.nominal` stores.
const NOMINAL_SCALE: u32 = 4;

fn validate_nominal(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("Nominal must not be negative".into());
        return Err(err);
    }
    if value.normalize().scale() > NOMINAL_SCALE {
        let mut err = ValidationError::new("nominal_scale");
        err.message = Some("Nominal allows at most 4 decimal places".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_to_single_unit() {
        let item = NewInvoiceItem::new("Hosting", dec!(75000));
        assert_eq!(item.quantity, 1);
        assert!(item.validate().is_ok());
    }

    #[test]
    fn test_zero_nominal_is_allowed() {
        assert!(NewInvoiceItem::new("Free setup", Decimal::ZERO)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_rejects_negative_nominal() {
        let errors = NewInvoiceItem::new("Refund", dec!(-0.01))
            .validate()
            .unwrap_err();
        assert!(errors.field_errors().contains_key("nominal"));
    }

    #[test]
    fn test_rejects_nominal_finer_than_stored() {
        assert!(NewInvoiceItem::new("Metered", dec!(0.0005)).validate().is_ok());
        assert!(NewInvoiceItem::new("Metered", dec!(1.50000)).validate().is_ok());

        let errors = NewInvoiceItem::new("Metered", dec!(0.00005))
            .validate()
            .unwrap_err();
        assert!(errors.field_errors().contains_key("nominal"));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        for quantity in [0, -3] {
            let errors = NewInvoiceItem::new("VPS", dec!(100000))
                .with_quantity(quantity)
                .validate()
                .unwrap_err();
            assert!(errors.field_errors().contains_key("quantity"));
        }
    }

    #[test]
    fn test_rejects_empty_title() {
        let errors = NewInvoiceItem::new("", dec!(1)).validate().unwrap_err();
        assert!(errors.field_errors().contains_key("title"));
    }
}
