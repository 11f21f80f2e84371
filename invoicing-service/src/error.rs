//! Domain errors for invoicing-service.

use crate::models::InvoiceStatus;
use crate::services::metrics::ERRORS_TOTAL;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvoicingError {
    /// No unique number could be claimed: the sequence is exhausted or every
    /// attempt collided. The invoice must not be persisted.
    #[error("Invoice number generation failed for period {period}: {reason}")]
    NumberGenerationFailed { period: String, reason: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    #[error("Paid invoices require a transaction number and payment time")]
    PaymentDetailsRequired,

    #[error("Invoice {0} is paid and can no longer be changed")]
    InvoiceLocked(String),

    #[error("Invoice {0} needs at least one item once issued")]
    NoItems(String),

    #[error("Unknown invoice status '{0}'")]
    UnknownStatus(String),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl InvoicingError {
    /// Label for the errors counter.
    pub fn error_type(&self) -> &'static str {
        match self {
            InvoicingError::NumberGenerationFailed { .. } => "number_generation_failed",
            InvoicingError::InvalidTransition { .. } => "invalid_transition",
            InvoicingError::PaymentDetailsRequired => "payment_details_required",
            InvoicingError::InvoiceLocked(_) => "invoice_locked",
            InvoicingError::NoItems(_) => "no_items",
            InvoicingError::UnknownStatus(_) => "unknown_status",
            InvoicingError::Store(_) => "store_error",
        }
    }
}

impl From<InvoicingError> for AppError {
    fn from(err: InvoicingError) -> Self {
        ERRORS_TOTAL.with_label_values(&[err.error_type()]).inc();

        match err {
            InvoicingError::NumberGenerationFailed { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            InvoicingError::InvalidTransition { .. }
            | InvoicingError::PaymentDetailsRequired
            | InvoicingError::InvoiceLocked(_)
            | InvoicingError::NoItems(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            InvoicingError::UnknownStatus(_) => {
                AppError::InternalError(anyhow::anyhow!(err.to_string()))
            }
            InvoicingError::Store(inner) => inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_failure_maps_to_conflict() {
        let err: AppError = InvoicingError::NumberGenerationFailed {
            period: "202610".to_string(),
            reason: "sequence exhausted".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(err.to_string().contains("202610"));
    }

    #[test]
    fn test_transition_maps_to_bad_request() {
        let err: AppError = InvoicingError::InvalidTransition {
            from: InvoiceStatus::Paid,
            to: InvoiceStatus::Unpaid,
        }
        .into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_mapping_counts_errors_by_type() {
        let counter = ERRORS_TOTAL.with_label_values(&["invoice_locked"]);
        let before = counter.get();

        let err: AppError = InvoicingError::InvoiceLocked("INV-202610-0001".to_string()).into();

        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(counter.get() >= before + 1.0);
    }

    #[test]
    fn test_empty_issued_invoice_maps_to_bad_request() {
        let err: AppError = InvoicingError::NoItems("INV-202610-0001".to_string()).into();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(err.to_string().contains("INV-202610-0001"));
    }

    #[test]
    fn test_store_error_passes_through() {
        let err: AppError =
            InvoicingError::Store(AppError::NotFound(anyhow::anyhow!("Invoice not found"))).into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
