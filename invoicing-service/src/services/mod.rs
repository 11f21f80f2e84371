//! Services module for invoicing-service.

pub mod database;
pub mod metrics;
pub mod numbering;
pub mod totals;

pub use database::{Database, PgInvoiceSequence};
pub use metrics::{get_metrics, init_metrics};
pub use numbering::{
    InMemoryInvoiceSequence, InvoiceNumberGenerator, InvoiceSequence, NumberingPolicy,
};
pub use totals::{compute_totals, InvoiceTotals};
