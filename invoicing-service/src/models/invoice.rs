//! Invoice model for invoicing-service.

use crate::error::InvoicingError;
use crate::models::NewInvoiceItem;
use crate::services::totals::InvoiceTotals;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::InvoiceItem;

/// PPN rate applied when the caller does not give one.
pub const DEFAULT_PPN_PERCENTAGE: Decimal = Decimal::from_parts(11, 0, 0, false, 0);

/// Invoice status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Unpaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::Paid => "paid",
        }
    }

    /// Only single forward steps are allowed: draft -> unpaid -> paid.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        matches!(
            (self, next),
            (InvoiceStatus::Draft, InvoiceStatus::Unpaid)
                | (InvoiceStatus::Unpaid, InvoiceStatus::Paid)
        )
    }

    /// Check a transition, returning the error callers surface.
    pub fn ensure_transition(&self, next: InvoiceStatus) -> Result<(), InvoicingError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(InvoicingError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Paid invoices can no longer be edited.
    pub fn is_editable(&self) -> bool {
        !matches!(self, InvoiceStatus::Paid)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = InvoicingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "unpaid" => Ok(InvoiceStatus::Unpaid),
            "paid" => Ok(InvoiceStatus::Paid),
            other => Err(InvoicingError::UnknownStatus(other.to_string())),
        }
    }
}

/// Invoice row joined with the issuing company's name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub company_id: Uuid,
    pub company_name: String,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub recipient: Option<String>,
    pub recipient_address: Option<String>,
    pub use_ppn: bool,
    pub ppn_percentage: Decimal,
    pub subtotal: Decimal,
    pub ppn_amount: Decimal,
    pub total: Decimal,
    pub status: String,
    pub transaction_number: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Invoice {
    /// Parsed status. Rows are constrained by the schema, so an unknown
    /// value means the row was written outside this service.
    pub fn status(&self) -> Result<InvoiceStatus, InvoicingError> {
        self.status.parse()
    }

    /// Stored totals as a value.
    pub fn totals(&self) -> InvoiceTotals {
        InvoiceTotals {
            subtotal: self.subtotal,
            ppn_amount: self.ppn_amount,
            total: self.total,
        }
    }
}

/// Invoice with its ordered items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

impl InvoiceDetail {
    /// Totals derived from the current items and flags, independent of the
    /// stored columns.
    pub fn recomputed_totals(&self) -> InvoiceTotals {
        crate::services::totals::compute_totals(
            &self.items,
            self.invoice.use_ppn,
            self.invoice.ppn_percentage,
        )
    }
}

/// Sort order for invoice listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceSort {
    InvoiceNumberAsc,
    InvoiceNumberDesc,
    InvoiceDateAsc,
    #[default]
    InvoiceDateDesc,
}

impl InvoiceSort {
    /// ORDER BY clause. Ties fall back to the number so pages are stable.
    pub fn order_by(&self) -> &'static str {
        match self {
            InvoiceSort::InvoiceNumberAsc => "i.invoice_number ASC",
            InvoiceSort::InvoiceNumberDesc => "i.invoice_number DESC",
            InvoiceSort::InvoiceDateAsc => "i.invoice_date ASC, i.invoice_number ASC",
            InvoiceSort::InvoiceDateDesc => "i.invoice_date DESC, i.invoice_number DESC",
        }
    }
}

/// Filter parameters for listing invoices.
///
/// `status: None` lists every status.
#[derive(Debug, Clone, Default)]
pub struct ListInvoicesFilter {
    pub status: Option<InvoiceStatus>,
    pub company_id: Option<Uuid>,
    pub search: Option<String>,
    pub sort: InvoiceSort,
    pub page_size: i32,
    pub offset: i64,
}

impl ListInvoicesFilter {
    /// ILIKE pattern for the search term, with wildcards in the term escaped.
    pub fn search_pattern(&self) -> Option<String> {
        let term = self.search.as_deref()?.trim();
        if term.is_empty() {
            return None;
        }
        let escaped = term
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        Some(format!("%{}%", escaped))
    }
}

/// Input for creating an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInvoice {
    pub company_id: Uuid,
    /// Defaults to today.
    #[serde(default)]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 255, message = "Recipient must be at most 255 characters"))]
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub recipient_address: Option<String>,
    #[validate(nested)]
    #[serde(default)]
    pub items: Vec<NewInvoiceItem>,
    #[serde(default = "default_use_ppn")]
    pub use_ppn: bool,
    #[validate(custom(function = "validate_percentage"))]
    #[serde(default = "default_ppn_percentage")]
    pub ppn_percentage: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

impl CreateInvoice {
    /// Draft input with the form defaults.
    pub fn new(company_id: Uuid) -> Self {
        Self {
            company_id,
            invoice_date: None,
            due_date: None,
            recipient: None,
            recipient_address: None,
            items: Vec::new(),
            use_ppn: default_use_ppn(),
            ppn_percentage: default_ppn_percentage(),
            note: None,
        }
    }

    pub fn with_item(mut self, item: NewInvoiceItem) -> Self {
        self.items.push(item);
        self
    }
}

/// Input for updating an invoice. `None` leaves a field unchanged;
/// `items: Some(..)` replaces every item.
///
/// The optional header fields take `Some(None)` (JSON `null`) to clear them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateInvoice {
    pub company_id: Option<Uuid>,
    pub invoice_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "clearable")]
    pub due_date: Option<Option<NaiveDate>>,
    #[validate(length(max = 255, message = "Recipient must be at most 255 characters"))]
    #[serde(default, deserialize_with = "clearable")]
    pub recipient: Option<Option<String>>,
    #[serde(default, deserialize_with = "clearable")]
    pub recipient_address: Option<Option<String>>,
    #[validate(nested)]
    pub items: Option<Vec<NewInvoiceItem>>,
    pub use_ppn: Option<bool>,
    #[validate(custom(function = "validate_percentage"))]
    pub ppn_percentage: Option<Decimal>,
    #[serde(default, deserialize_with = "clearable")]
    pub note: Option<Option<String>>,
}

/// Resolve a clearable field against its stored value.
pub(crate) fn patch<T: Clone>(update: &Option<Option<T>>, current: &Option<T>) -> Option<T> {
    match update {
        Some(value) => value.clone(),
        None => current.clone(),
    }
}

/// Present-but-null becomes `Some(None)`; a missing field stays `None`
/// through `#[serde(default)]`.
fn clearable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Payment details recorded when an invoice is marked paid.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MarkPaid {
    #[validate(length(min = 1, max = 100, message = "Transaction number is required"))]
    pub transaction_number: String,
    /// Defaults to now.
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

fn default_use_ppn() -> bool {
    true
}

fn default_ppn_percentage() -> Decimal {
    DEFAULT_PPN_PERCENTAGE
}

/// Decimal places `invoices.ppn_percentage` stores.
const PPN_PERCENTAGE_SCALE: u32 = 2;

fn validate_percentage(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() || *value > Decimal::ONE_HUNDRED {
        let mut err = ValidationError::new("percentage_range");
        err.message = Some("PPN percentage must be between 0 and 100".into());
        return Err(err);
    }
    if value.normalize().scale() > PPN_PERCENTAGE_SCALE {
        let mut err = ValidationError::new("percentage_scale");
        err.message = Some("PPN percentage allows at most 2 decimal places".into());
        return Err(err);
    }
    Ok(())
}
